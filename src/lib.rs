// src/lib.rs
//! # Thread-Safe Ring Buffer Library
//!
//! A fixed-capacity circular byte buffer shared between producers and
//! consumers, usable as a bounded queue, a sliding window or an in-memory
//! pipe.
//!
//! Features:
//! - Non-blocking, blocking and overwrite modes, switchable at runtime
//! - Per-side timeouts and external cancellation
//! - Sticky close errors with end-of-stream draining semantics
//! - Zero-copy bulk transfer to and from any `std::io` stream
//! - Reset that is transparent to blocked readers and writers
//! - Secure zeroing of the backing storage on drop using `zeroize`
//!
//! # Example
//!
//! ```rust
//! use ringpipe::prelude::*;
//!
//! let window = RingBuffer::with_config(4, RingConfig::window());
//! window.write(b"abcdef")?;
//! assert_eq!(window.bytes(), b"cdef");
//! # Ok::<(), RingError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pipe;
pub mod ring;

// Re-export main types
pub use error::{Result, ResultExt, RingError};
pub use pipe::{PipeReader, PipeWriter, ReadCloser, WriteCloser};
pub use ring::{RingBuffer, RingConfig};

/// Commonly used imports.
pub mod prelude {
    pub use crate::error::{Result, ResultExt, RingError};
    pub use crate::pipe::{PipeReader, PipeWriter, ReadCloser, WriteCloser};
    pub use crate::ring::{RingBuffer, RingConfig};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_ring() {
        let ring = RingBuffer::new(1024);
        ring.write_str("hello").unwrap();
        ring.write_byte(b'!').unwrap();

        let mut out = [0u8; 6];
        assert_eq!(ring.read(&mut out).unwrap(), 6);
        assert_eq!(&out, b"hello!");
    }

    #[test]
    fn test_overwrite_window() {
        let ring = RingBuffer::with_config(4, RingConfig::window());
        assert_eq!(ring.write(b"abcdef").unwrap(), 6);
        assert_eq!(ring.length(), 4);
        assert_eq!(ring.bytes(), b"cdef");
    }

    #[test]
    fn test_shared_across_threads() {
        let ring = Arc::new(RingBuffer::with_config(64, RingConfig::pipe()));
        let mut handles = Vec::new();

        for id in 0..4u8 {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for _ in 0..25 {
                    ring.write(&[id; 4]).unwrap();
                }
            }));
        }

        let mut total = 0;
        let mut buf = [0u8; 16];
        while total < 400 {
            total += ring.read(&mut buf).unwrap();
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(total, 400);
        assert!(ring.is_empty());
    }
}
