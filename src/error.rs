// src/error.rs
//! Error types for ring buffer operations with io/anyhow conversion support
//!
//! Errors fall into two groups:
//!
//! - **Transient** signals ([`RingError::Full`], [`RingError::Empty`],
//!   [`RingError::NotEmpty`], [`RingError::AcquireLock`],
//!   [`RingError::TooMuchDataToWrite`]) describe the outcome of a single call
//!   and are never recorded by the buffer.
//! - Everything else is **sticky**: once recorded, every following operation
//!   fails with the same value until [`RingBuffer::reset`](crate::RingBuffer::reset).

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Errors that can occur during ring buffer operations
#[derive(Debug, Clone)]
pub enum RingError {
    /// Buffer is full and the buffer is not blocking
    Full,
    /// Buffer is empty and the buffer is not blocking
    Empty,
    /// Buffer still holds unread data and the buffer is not blocking
    NotEmpty,
    /// A `try_*` call could not take the lock
    AcquireLock,
    /// Only part of the payload fit; `written` bytes were stored
    TooMuchDataToWrite {
        /// Number of bytes accepted before the buffer filled up
        written: usize,
    },
    /// Write attempted after the writer side was closed
    WriteOnClosed,
    /// The reading side closed the buffer
    ReaderClosed,
    /// The pipe was closed by the other half
    ClosedPipe,
    /// End of stream: the writer closed and all data has been read
    Eof,
    /// A blocking wait outlived its configured timeout
    DeadlineExceeded,
    /// A reset is in progress
    Reset,
    /// The cancellation signal fired
    Canceled,
    /// Transfer operation requires blocking mode
    NonBlocking,
    /// The source kept returning without making progress
    NoProgress,
    /// The sink accepted fewer bytes than offered
    ShortWrite,
    /// I/O error from a transfer source or sink
    Io(Arc<io::Error>),
    /// Caller supplied close reason
    Closed(Arc<dyn Error + Send + Sync>),
}

impl RingError {
    /// Wraps an arbitrary error as a close reason.
    pub fn closed<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Closed(Arc::new(err))
    }

    /// Returns `true` for signals that are never recorded as the sticky error.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Full
                | Self::Empty
                | Self::NotEmpty
                | Self::AcquireLock
                | Self::TooMuchDataToWrite { .. }
        )
    }

    /// Returns `true` for the end-of-stream sentinel.
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "ringbuffer is full"),
            Self::Empty => write!(f, "ringbuffer is empty"),
            Self::NotEmpty => write!(f, "ringbuffer is not empty"),
            Self::AcquireLock => write!(f, "unable to acquire lock"),
            Self::TooMuchDataToWrite { written } => {
                write!(f, "too much data to write ({} bytes written)", written)
            }
            Self::WriteOnClosed => write!(f, "write on closed ringbuffer"),
            Self::ReaderClosed => write!(f, "reader closed"),
            Self::ClosedPipe => write!(f, "read/write on closed pipe"),
            Self::Eof => write!(f, "end of stream"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Reset => write!(f, "reset called"),
            Self::Canceled => write!(f, "canceled"),
            Self::NonBlocking => write!(f, "transfer only available in blocking mode"),
            Self::NoProgress => write!(f, "multiple reads returned no data"),
            Self::ShortWrite => write!(f, "short write"),
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Closed(err) => write!(f, "closed: {}", err),
        }
    }
}

impl Error for RingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err.as_ref()),
            Self::Closed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// Convert RingError to std::io::Error
impl From<RingError> for io::Error {
    fn from(err: RingError) -> Self {
        use io::ErrorKind;
        let kind = match &err {
            RingError::Full | RingError::Empty | RingError::NotEmpty | RingError::AcquireLock => {
                ErrorKind::WouldBlock
            }
            RingError::TooMuchDataToWrite { .. } | RingError::ShortWrite => ErrorKind::WriteZero,
            RingError::WriteOnClosed | RingError::ReaderClosed | RingError::ClosedPipe => {
                ErrorKind::BrokenPipe
            }
            RingError::Eof => ErrorKind::UnexpectedEof,
            RingError::DeadlineExceeded => ErrorKind::TimedOut,
            RingError::Reset | RingError::Canceled => ErrorKind::Interrupted,
            RingError::NonBlocking => ErrorKind::Unsupported,
            RingError::NoProgress => ErrorKind::Other,
            RingError::Io(inner) => inner.kind(),
            RingError::Closed(_) => ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Convert std::io::Error to RingError
///
/// An `io::Error` that already carries a `RingError` (for instance one
/// produced by a [`PipeReader`](crate::PipeReader)) is unwrapped instead of
/// being nested.
impl From<io::Error> for RingError {
    fn from(err: io::Error) -> Self {
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<RingError>()) {
            return inner.clone();
        }
        RingError::Io(Arc::new(err))
    }
}

/// Allow using ? with anyhow::Error
#[cfg(feature = "anyhow")]
impl From<anyhow::Error> for RingError {
    fn from(err: anyhow::Error) -> Self {
        let boxed: Box<dyn Error + Send + Sync + 'static> = err.into();
        RingError::Closed(Arc::from(boxed))
    }
}

// ============================================================================
// RESULT TYPE ALIASES
// ============================================================================

/// Result type alias for ring buffer operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Extension trait for converting Results between different error types
pub trait ResultExt<T> {
    /// Convert to anyhow::Result
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T>;

    /// Convert to io::Result
    fn into_io(self) -> io::Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T> {
        self.map_err(anyhow::Error::new)
    }

    fn into_io(self) -> io::Result<T> {
        self.map_err(|e| e.into())
    }
}
