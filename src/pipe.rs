// src/pipe.rs
//! Stream adapters over a shared [`RingBuffer`]
//!
//! - [`PipeReader`] / [`PipeWriter`]: the two halves of an in-memory pipe
//! - [`WriteCloser`]: a writer whose close waits until the reader caught up
//! - [`ReadCloser`]: a reader whose close stops the writer side

use crate::error::{Result, RingError};
use crate::ring::RingBuffer;
use std::io;
use std::sync::Arc;

impl RingBuffer {
    /// Splits a shared buffer into the two halves of a synchronous pipe.
    ///
    /// Switches the buffer to blocking mode. Dropping a half closes it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ringpipe::prelude::*;
    /// use std::io::{Read, Write};
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// let (mut reader, mut writer) = Arc::new(RingBuffer::new(64)).pipe();
    ///
    /// let producer = thread::spawn(move || {
    ///     writer.write_all(b"hello through the pipe").unwrap();
    /// });
    ///
    /// let mut received = String::new();
    /// reader.read_to_string(&mut received).unwrap();
    /// producer.join().unwrap();
    /// assert_eq!(received, "hello through the pipe");
    /// ```
    pub fn pipe(self: Arc<Self>) -> (PipeReader, PipeWriter) {
        self.set_blocking(true);
        let reader = PipeReader {
            ring: Arc::clone(&self),
        };
        (reader, PipeWriter { ring: self })
    }

    /// Returns a writer whose [`close`](WriteCloser::close) closes the writer
    /// side and waits until every byte has been read.
    pub fn write_closer(self: &Arc<Self>) -> WriteCloser {
        WriteCloser {
            ring: Arc::clone(self),
        }
    }

    /// Returns a reader whose [`close`](ReadCloser::close) closes the buffer
    /// with [`RingError::ReaderClosed`].
    pub fn read_closer(self: &Arc<Self>) -> ReadCloser {
        ReadCloser {
            ring: Arc::clone(self),
        }
    }
}

// ============================================================================
// PIPE
// ============================================================================

/// Reading half of a pipe created by [`RingBuffer::pipe`].
#[derive(Debug)]
pub struct PipeReader {
    ring: Arc<RingBuffer>,
}

impl PipeReader {
    /// Reads up to `buf.len()` bytes, waiting for data.
    ///
    /// Returns `Ok(0)` once the writer closed and every byte was read.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match self.ring.read(buf) {
            Err(RingError::Eof) => Ok(0),
            other => other,
        }
    }

    /// Closes the reading half; writes fail with [`RingError::ClosedPipe`].
    pub fn close(&self) {
        self.ring.close_with_error(RingError::ClosedPipe);
    }

    /// Closes the reading half with `err`, or like [`close`](Self::close)
    /// when `err` is `None`.
    pub fn close_with_error(&self, err: impl Into<Option<RingError>>) {
        self.ring
            .close_with_error(err.into().unwrap_or(RingError::ClosedPipe));
    }
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        PipeReader::read(self, buf).map_err(io::Error::from)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writing half of a pipe created by [`RingBuffer::pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    ring: Arc<RingBuffer>,
}

impl PipeWriter {
    /// Writes all of `buf`, waiting for the reader to make room.
    ///
    /// Fails with [`RingError::ClosedPipe`] once either half is closed.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        match self.ring.write(buf) {
            Err(RingError::WriteOnClosed) => Err(RingError::ClosedPipe),
            other => other,
        }
    }

    /// Closes the writing half; the reader drains what is left and then
    /// sees end of stream.
    pub fn close(&self) {
        self.ring.close_writer();
    }

    /// Closes the writing half with `err`, or like [`close`](Self::close)
    /// when `err` is `None`.
    pub fn close_with_error(&self, err: impl Into<Option<RingError>>) {
        self.ring.close_with_error(err);
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PipeWriter::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// CLOSERS
// ============================================================================

/// Writer returned by [`RingBuffer::write_closer`].
#[derive(Debug)]
pub struct WriteCloser {
    ring: Arc<RingBuffer>,
}

impl WriteCloser {
    /// Closes the writer side and waits for the buffer to drain.
    ///
    /// On a non-blocking buffer that still holds data this fails with
    /// [`RingError::NotEmpty`] instead of waiting.
    pub fn close(&self) -> Result<()> {
        self.ring.close_writer();
        self.ring.flush()
    }
}

impl io::Write for WriteCloser {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self.ring, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader returned by [`RingBuffer::read_closer`].
#[derive(Debug)]
pub struct ReadCloser {
    ring: Arc<RingBuffer>,
}

impl ReadCloser {
    /// Closes the buffer with [`RingError::ReaderClosed`].
    ///
    /// Returns the error the buffer was already closed with, if any.
    pub fn close(&self) -> Result<()> {
        self.ring.close_with_error(RingError::ReaderClosed);
        match self.ring.error() {
            None | Some(RingError::Eof) | Some(RingError::ReaderClosed) => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl io::Read for ReadCloser {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self.ring, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;

    #[test]
    fn test_pipe_roundtrip() {
        let (mut reader, mut writer) = Arc::new(RingBuffer::new(8)).pipe();

        let producer = thread::spawn(move || {
            for i in 0..100u8 {
                writer.write_all(&[i; 5]).unwrap();
            }
        });

        let mut received = Vec::new();
        reader.read_to_end(&mut received).unwrap();
        producer.join().unwrap();

        assert_eq!(received.len(), 500);
        assert!(received.chunks(5).enumerate().all(|(i, c)| c == [i as u8; 5]));
    }

    #[test]
    fn test_reader_close_breaks_pipe() {
        let (reader, writer) = Arc::new(RingBuffer::new(8)).pipe();
        reader.close();
        assert!(matches!(writer.write(b"late"), Err(RingError::ClosedPipe)));
    }

    #[test]
    fn test_writer_close_maps_to_closed_pipe() {
        let (reader, writer) = Arc::new(RingBuffer::new(8)).pipe();
        writer.write(b"ab").unwrap();
        writer.close();
        assert!(matches!(writer.write(b"c"), Err(RingError::ClosedPipe)));

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_writer_close_with_error_reaches_reader() {
        let (reader, writer) = Arc::new(RingBuffer::new(8)).pipe();
        writer.close_with_error(RingError::Canceled);
        assert!(matches!(reader.read(&mut [0u8; 1]), Err(RingError::Canceled)));
    }

    #[test]
    fn test_write_closer_waits_for_drain() {
        let ring = Arc::new(RingBuffer::new(16));
        ring.set_blocking(true);
        let mut closer = ring.write_closer();
        closer.write_all(b"payload").unwrap();

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut out = Vec::new();
                (&*ring).read_to_end(&mut out).unwrap();
                out
            })
        };

        closer.close().unwrap();
        assert!(ring.is_empty());
        assert_eq!(consumer.join().unwrap(), b"payload");
    }

    #[test]
    fn test_write_closer_non_blocking_reports_not_empty() {
        let ring = Arc::new(RingBuffer::new(16));
        let mut closer = ring.write_closer();
        closer.write_all(b"left").unwrap();
        assert!(matches!(closer.close(), Err(RingError::NotEmpty)));
    }

    #[test]
    fn test_read_closer() {
        let ring = Arc::new(RingBuffer::new(16));
        ring.write(b"xy").unwrap();
        let mut closer = ring.read_closer();
        let mut buf = [0u8; 1];
        assert_eq!(closer.read(&mut buf).unwrap(), 1);

        closer.close().unwrap();
        assert!(matches!(ring.write(b"z"), Err(RingError::ReaderClosed)));

        let ring = Arc::new(RingBuffer::new(16));
        ring.close_with_error(RingError::ShortWrite);
        assert!(matches!(ring.read_closer().close(), Err(RingError::ShortWrite)));
    }
}
