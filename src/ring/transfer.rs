// src/ring/transfer.rs
//! Bulk transfer between the buffer and external byte streams
//!
//! Transfers lend a contiguous segment of the storage to the source or sink
//! and release the lock for the duration of the external call. The segment
//! stays fenced off from ordinary reads and writes until it is committed;
//! lifting the fence wakes every waiter, and a panicking source or sink
//! still returns the segment before the panic resumes. A running transfer is registered with the buffer so that
//! [`RingBuffer::reset`] can wait for it to stop.

use super::buffer::{RingBuffer, State};
use crate::error::{Result, RingError};
use parking_lot::MutexGuard;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, trace, warn};

/// Consecutive reads without progress tolerated before giving up.
const MAX_STALLS: usize = 100;

/// Below this capacity a drain may hand the whole buffer to the sink at once.
const MIN_CHUNK: usize = 8 * 1024;

/// Writes all of `src` in one call, retrying interrupted writes.
fn write_segment<W: io::Write + ?Sized>(dst: &mut W, src: &[u8]) -> io::Result<usize> {
    loop {
        match dst.write(src) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

impl RingBuffer {
    /// Commits `n` bytes of the fill segment and lifts the writer fence.
    fn lift_fill(&self, state: &mut State, n: usize) {
        state.cursors.finish_fill(n);
        self.wake_all();
    }

    /// Consumes `n` bytes of the drain segment and lifts the reader fence.
    fn lift_drain(&self, state: &mut State, n: usize) {
        state.cursors.finish_drain(n);
        self.wake_all();
    }

    /// Fills the buffer from `src` until it reports end of input.
    ///
    /// Reads straight into the free region of the storage. Waits for space
    /// when the buffer is full. Interrupted and would-block reads count as
    /// no progress; after 100 of them in a row the buffer is closed with
    /// [`RingError::NoProgress`]. Any other read error closes the buffer with
    /// [`RingError::Io`].
    ///
    /// The writer side is left open when `src` is exhausted.
    ///
    /// Requires blocking mode, otherwise fails with
    /// [`RingError::NonBlocking`]. Returns the number of bytes transferred.
    pub fn read_from<R: io::Read + ?Sized>(&self, src: &mut R) -> Result<u64> {
        let mut state = self.state.lock();
        if !state.blocking {
            return Err(RingError::NonBlocking);
        }
        self.enter(&mut state);
        let result = self.fill(&mut state, src);
        self.leave(&mut state);
        result
    }

    fn fill<R: io::Read + ?Sized>(
        &self,
        state: &mut MutexGuard<'_, State>,
        src: &mut R,
    ) -> Result<u64> {
        let mut total = 0u64;
        let mut stalls = 0;
        loop {
            state.write_check()?;

            let Some(seg) = state.cursors.begin_fill() else {
                self.wait_space(state)?;
                continue;
            };

            let result = MutexGuard::unlocked(state, || {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    // SAFETY: `begin_fill` lent out this free run; no other
                    // access touches it until `finish_fill`.
                    let dst = unsafe { self.slab.slice_mut(seg.start, seg.len) };
                    src.read(dst)
                }))
            });
            let result = match result {
                Ok(result) => result,
                Err(payload) => {
                    self.lift_fill(state, 0);
                    self.leave(state);
                    panic::resume_unwind(payload);
                }
            };

            match result {
                Ok(0) => {
                    self.lift_fill(state, 0);
                    debug!(total, "read_from reached end of input");
                    return Ok(total);
                }
                Ok(n) => {
                    stalls = 0;
                    self.lift_fill(state, n);
                    total += n as u64;
                    trace!(n, offset = seg.start, "read_from segment");
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    self.lift_fill(state, 0);
                    stalls += 1;
                    if stalls >= MAX_STALLS {
                        warn!(stalls, "read_from source made no progress");
                        return Err(self.fail(state, RingError::NoProgress));
                    }
                }
                Err(err) => {
                    self.lift_fill(state, 0);
                    return Err(self.fail(state, err.into()));
                }
            }
        }
    }

    /// Drains the buffer into `dst` until the writer side is closed.
    ///
    /// Hands contiguous runs of unread bytes to the sink, at most half the
    /// capacity at a time (or the whole buffer when it is smaller than
    /// 8 KiB). Waits for data when the buffer is empty. Returns `Ok` once the
    /// buffer is drained after [`close_writer`](Self::close_writer).
    ///
    /// A sink that accepts fewer bytes than offered closes the buffer with
    /// [`RingError::ShortWrite`]; a sink error closes it with
    /// [`RingError::Io`].
    ///
    /// Requires blocking mode, otherwise fails with
    /// [`RingError::NonBlocking`]. Returns the number of bytes transferred.
    pub fn write_to<W: io::Write + ?Sized>(&self, dst: &mut W) -> Result<u64> {
        let mut state = self.state.lock();
        if !state.blocking {
            return Err(RingError::NonBlocking);
        }
        self.enter(&mut state);
        let result = self.drain(&mut state, dst);
        self.leave(&mut state);
        result
    }

    fn drain<W: io::Write + ?Sized>(
        &self,
        state: &mut MutexGuard<'_, State>,
        dst: &mut W,
    ) -> Result<u64> {
        let capacity = self.capacity();
        let max_chunk = if capacity < MIN_CHUNK { capacity } else { capacity / 2 };

        let mut total = 0u64;
        loop {
            if let Err(err) = state.read_check() {
                if err.is_eof() {
                    debug!(total, "write_to drained closed buffer");
                    return Ok(total);
                }
                return Err(err);
            }

            let Some(seg) = state.cursors.begin_drain(max_chunk) else {
                self.wait_data(state)?;
                continue;
            };

            let result = MutexGuard::unlocked(state, || {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    // SAFETY: `begin_drain` lent out this unread run; writers
                    // cannot reach it until `finish_drain`.
                    let src = unsafe { self.slab.slice(seg.start, seg.len) };
                    write_segment(dst, src)
                }))
            });
            let result = match result {
                Ok(result) => result,
                Err(payload) => {
                    self.lift_drain(state, 0);
                    self.leave(state);
                    panic::resume_unwind(payload);
                }
            };

            match result {
                Ok(n) => {
                    let n = n.min(seg.len);
                    self.lift_drain(state, n);
                    total += n as u64;
                    trace!(n, offset = seg.start, "write_to segment");
                    if n < seg.len {
                        return Err(self.fail(state, RingError::ShortWrite));
                    }
                }
                Err(err) => {
                    self.lift_drain(state, 0);
                    return Err(self.fail(state, err.into()));
                }
            }
        }
    }

    /// Pumps `src` into `dst` through the buffer.
    ///
    /// Switches the buffer to blocking mode, fills it from `src` on a scoped
    /// thread and drains it into `dst` on the calling thread. The writer side
    /// is closed once `src` is exhausted or fails, so the drain finishes.
    /// Returns the bytes delivered to `dst`, or the first error recorded by
    /// either side.
    pub fn copy<W, R>(&self, dst: &mut W, src: &mut R) -> Result<u64>
    where
        W: io::Write + ?Sized,
        R: io::Read + Send + ?Sized,
    {
        self.set_blocking(true);

        let outcome = crossbeam::scope(|scope| {
            scope.spawn(|_| {
                if let Err(err) = self.read_from(src) {
                    debug!(error = %err, "copy source stopped");
                }
                self.close_writer();
            });
            self.write_to(dst)
        });

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};
    use std::sync::Arc;
    use std::thread;

    /// Sink that accepts at most `limit` bytes per call.
    struct Stingy {
        limit: usize,
        data: Vec<u8>,
    }

    impl Write for Stingy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Source that never produces data.
    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    /// Source that panics mid-read.
    struct Exploding;

    impl Read for Exploding {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("source exploded");
        }
    }

    /// Sink that panics mid-write.
    struct Collapsing;

    impl Write for Collapsing {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            panic!("sink collapsed");
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_panicking_source_releases_segment() {
        let ring = RingBuffer::new(16);
        ring.set_blocking(true);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ring.read_from(&mut Exploding)));
        assert!(outcome.is_err());

        assert_eq!(ring.state.lock().in_flight, 0);
        assert_eq!(ring.try_write(b"x").unwrap(), 1);
        ring.reset();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_panicking_sink_releases_segment() {
        let ring = RingBuffer::new(16);
        ring.set_blocking(true);
        ring.write(b"abc").unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ring.write_to(&mut Collapsing)));
        assert!(outcome.is_err());

        assert_eq!(ring.state.lock().in_flight, 0);
        let mut out = [0u8; 3];
        assert_eq!(ring.try_read(&mut out).unwrap(), 3);
        assert_eq!(&out, b"abc");
        ring.reset();
    }

    #[test]
    fn test_overwrite_suspended_while_draining() {
        let ring = RingBuffer::with_config(4, crate::RingConfig::window());
        ring.write(b"abcd").unwrap();

        let seg = ring.state.lock().cursors.begin_drain(4);
        assert!(seg.is_some());
        assert!(matches!(ring.try_write(b"ef"), Err(RingError::Full)));
        assert!(matches!(ring.write(b"ef"), Err(RingError::Full)));

        ring.state.lock().cursors.finish_drain(2);
        assert_eq!(ring.try_write(b"efg").unwrap(), 3);
        assert_eq!(RingBuffer::bytes(&ring), b"defg");
    }

    #[test]
    fn test_transfers_require_blocking() {
        let ring = RingBuffer::new(16);
        let mut src = Cursor::new(b"abc".to_vec());
        let mut dst = Vec::new();
        assert!(matches!(ring.read_from(&mut src), Err(RingError::NonBlocking)));
        assert!(matches!(ring.write_to(&mut dst), Err(RingError::NonBlocking)));
    }

    #[test]
    fn test_read_from_stops_at_end_of_input() {
        let ring = RingBuffer::new(16);
        ring.set_blocking(true);
        let mut src = Cursor::new(b"hello world".to_vec());
        assert_eq!(ring.read_from(&mut src).unwrap(), 11);
        assert_eq!(RingBuffer::bytes(&ring), b"hello world");
        assert!(ring.error().is_none());
    }

    #[test]
    fn test_read_from_stall_is_sticky() {
        let ring = RingBuffer::new(16);
        ring.set_blocking(true);
        assert!(matches!(ring.read_from(&mut Stalled), Err(RingError::NoProgress)));
        assert!(matches!(ring.write(b"x"), Err(RingError::NoProgress)));
    }

    #[test]
    fn test_write_to_drains_until_closed() {
        let ring = Arc::new(RingBuffer::new(8));
        ring.set_blocking(true);

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for chunk in [&b"abcdef"[..], b"ghijkl", b"mnop"] {
                    ring.write(chunk).unwrap();
                }
                ring.close_writer();
            })
        };

        let mut out = Vec::new();
        assert_eq!(ring.write_to(&mut out).unwrap(), 16);
        producer.join().unwrap();
        assert_eq!(out, b"abcdefghijklmnop");
    }

    #[test]
    fn test_write_to_short_write() {
        let ring = RingBuffer::new(8);
        ring.set_blocking(true);
        ring.write(b"abcdef").unwrap();

        let mut sink = Stingy { limit: 2, data: Vec::new() };
        assert!(matches!(ring.write_to(&mut sink), Err(RingError::ShortWrite)));
        assert_eq!(sink.data, b"ab");
        assert!(matches!(ring.error(), Some(RingError::ShortWrite)));
    }

    #[test]
    fn test_copy_roundtrip() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let ring = RingBuffer::new(64);
        let mut src = Cursor::new(payload.clone());
        let mut dst = Vec::new();
        assert_eq!(ring.copy(&mut dst, &mut src).unwrap(), payload.len() as u64);
        assert_eq!(dst, payload);
    }

    #[test]
    fn test_reset_stops_transfer() {
        let ring = Arc::new(RingBuffer::new(8));
        ring.set_blocking(true);

        let drain = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.write_to(&mut Vec::new()))
        };

        while ring.state.lock().in_flight == 0 {
            thread::yield_now();
        }
        ring.reset();
        assert!(matches!(drain.join().unwrap(), Err(RingError::Reset)));
        assert!(ring.error().is_none());
    }
}
