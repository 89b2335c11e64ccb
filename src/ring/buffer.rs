// src/ring/buffer.rs
//! Thread-safe ring buffer: locking, waiting and the sticky-error lifecycle
//!
//! # Blocking protocol
//!
//! Every operation takes the single state mutex, attempts one pass of the
//! storage core and, when the pass reports a transient full/empty condition
//! on a blocking buffer, waits on the complementary condition variable:
//!
//! - readers wait on `data_ready`, signalled by every successful write
//! - writers wait on `space_ready`, signalled by every successful read
//!
//! Both are broadcast whenever a sticky error is recorded, so closing the
//! buffer releases every waiter. A configured timeout bounds each individual
//! wait; when it expires the buffer is closed with
//! [`RingError::DeadlineExceeded`].
//!
//! # Reset
//!
//! [`RingBuffer::reset`] posts the [`RingError::Reset`] marker, waits for
//! running transfers to stop, then rewinds. Blocked
//! readers and writers of a blocking buffer treat the marker as "keep
//! waiting", so a reset is invisible to them.

use super::config::{RingConfig, deadline};
use super::storage::{Cursors, Slab};
use crate::error::{Result, RingError};
use crossbeam::channel::Receiver;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// A fixed-capacity circular byte buffer safe to share between threads.
///
/// Depending on its configuration the buffer fails fast, blocks, or
/// overwrites the oldest data when it runs out of room. Share it with
/// [`Arc`]; every method takes `&self`.
///
/// The backing storage is securely zeroed on drop.
///
/// # Example
///
/// ```rust
/// use ringpipe::prelude::*;
///
/// let ring = RingBuffer::new(1024);
/// assert_eq!(ring.write(b"abcd")?, 4);
/// assert_eq!(ring.length(), 4);
/// assert_eq!(ring.free(), 1020);
///
/// let mut output = [0u8; 4];
/// assert_eq!(ring.read(&mut output)?, 4);
/// assert_eq!(&output, b"abcd");
/// assert!(ring.is_empty());
/// # Ok::<(), ringpipe::RingError>(())
/// ```
pub struct RingBuffer {
    pub(super) slab: Slab,
    pub(super) state: Mutex<State>,
    /// Signalled when data has been written.
    pub(super) data_ready: Condvar,
    /// Signalled when data has been read.
    pub(super) space_ready: Condvar,
    /// Signalled when the last lent-out segment is returned.
    idle: Condvar,
}

/// Everything guarded by the buffer's mutex.
pub(super) struct State {
    pub(super) cursors: Cursors,
    pub(super) err: Option<RingError>,
    pub(super) blocking: bool,
    pub(super) overwrite: bool,
    pub(super) read_timeout: Option<Duration>,
    pub(super) write_timeout: Option<Duration>,
    /// Transfers currently running; `reset` waits for them to stop.
    pub(super) in_flight: usize,
}

impl State {
    /// Stores `err` as the sticky error.
    ///
    /// Transient signals are ignored and an existing error is kept, except a
    /// bare end-of-stream which a real failure may replace.
    pub(super) fn record(&mut self, err: RingError) -> bool {
        if err.is_transient() {
            return false;
        }
        match &self.err {
            Some(existing) if !existing.is_eof() => false,
            _ => {
                self.err = Some(err);
                true
            }
        }
    }

    /// Error a reader should see right now, if any.
    ///
    /// End-of-stream only surfaces once every byte has been consumed.
    pub(super) fn read_check(&self) -> Result<()> {
        match &self.err {
            None => Ok(()),
            Some(RingError::Eof) if !self.cursors.is_empty() => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    /// Error a writer should see right now, if any.
    pub(super) fn write_check(&self) -> Result<()> {
        match &self.err {
            None => Ok(()),
            Some(RingError::Eof) => Err(RingError::WriteOnClosed),
            Some(err) => Err(err.clone()),
        }
    }

    /// Whether a blocked caller should keep waiting through `err`.
    fn parks(&self, err: &RingError) -> bool {
        self.blocking && matches!(err, RingError::Reset)
    }
}

/// Maps "stopped after partial progress" onto the io convention: report the
/// progress now, the sticky error resurfaces on the next call.
#[inline]
fn progress(written: usize, err: RingError) -> Result<usize> {
    if written > 0 { Ok(written) } else { Err(err) }
}

impl RingBuffer {
    /// Creates a non-blocking, non-overwriting buffer of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::from_vec(vec![0; capacity])
    }

    /// Creates a buffer that uses `storage` as its backing array.
    ///
    /// The buffer starts empty; the existing contents are ignored.
    ///
    /// # Panics
    ///
    /// Panics if `storage` is empty.
    pub fn from_vec(storage: Vec<u8>) -> Self {
        assert!(!storage.is_empty(), "Ring buffer capacity must be greater than 0");
        let capacity = storage.len();
        Self {
            slab: Slab::from_vec(storage),
            state: Mutex::new(State {
                cursors: Cursors::new(capacity),
                err: None,
                blocking: false,
                overwrite: false,
                read_timeout: None,
                write_timeout: None,
                in_flight: 0,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Creates a buffer of `capacity` bytes configured by `config`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_config(capacity: usize, config: RingConfig) -> Self {
        let ring = Self::new(capacity);
        ring.apply(&config);
        ring
    }

    // ------------------------------------------------------------------
    // Configuration
    //
    // Mode changes are meant to happen before first use or right after
    // `reset`; changing them while callers are blocked has no defined effect.
    // ------------------------------------------------------------------

    /// Applies every field of `config`.
    pub fn apply(&self, config: &RingConfig) -> &Self {
        let mut state = self.state.lock();
        state.blocking = config.blocking;
        state.overwrite = config.overwrite;
        state.read_timeout = deadline(config.read_timeout);
        state.write_timeout = deadline(config.write_timeout);
        self
    }

    /// Returns the current configuration.
    pub fn config(&self) -> RingConfig {
        let state = self.state.lock();
        RingConfig {
            blocking: state.blocking,
            overwrite: state.overwrite,
            read_timeout: state.read_timeout.unwrap_or_default(),
            write_timeout: state.write_timeout.unwrap_or_default(),
        }
    }

    /// Sets blocking mode.
    ///
    /// When blocking, reads wait for data and writes wait for space instead
    /// of returning [`RingError::Empty`] / [`RingError::Full`].
    pub fn set_blocking(&self, blocking: bool) -> &Self {
        self.state.lock().blocking = blocking;
        self
    }

    /// Sets overwrite mode: writes evict the oldest unread bytes instead of
    /// failing or waiting when the buffer is full.
    pub fn set_overwrite(&self, overwrite: bool) -> &Self {
        self.state.lock().overwrite = overwrite;
        self
    }

    /// Sets both read and write timeouts. Zero disables them.
    pub fn set_timeout(&self, timeout: Duration) -> &Self {
        let mut state = self.state.lock();
        state.read_timeout = deadline(timeout);
        state.write_timeout = deadline(timeout);
        self
    }

    /// Sets how long a blocked reader waits before the buffer is closed with
    /// [`RingError::DeadlineExceeded`]. Zero disables the timeout.
    pub fn set_read_timeout(&self, timeout: Duration) -> &Self {
        self.state.lock().read_timeout = deadline(timeout);
        self
    }

    /// Sets how long a blocked writer waits before the buffer is closed with
    /// [`RingError::DeadlineExceeded`]. Zero disables the timeout.
    pub fn set_write_timeout(&self, timeout: Duration) -> &Self {
        self.state.lock().write_timeout = deadline(timeout);
        self
    }

    /// Closes the buffer with [`RingError::Canceled`] once `cancel` yields a
    /// message or its sender is dropped.
    ///
    /// The watcher thread only holds a weak reference to the buffer, but it
    /// lives until the channel yields: if the sender is neither used nor
    /// dropped, the thread outlives the buffer.
    pub fn with_cancel(self: &Arc<Self>, cancel: Receiver<()>) {
        let ring = Arc::downgrade(self);
        thread::spawn(move || {
            // A message and a disconnect both mean cancellation.
            let _ = cancel.recv();
            if let Some(ring) = ring.upgrade() {
                ring.close_with_error(RingError::Canceled);
            }
        });
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Returns the size of the backing storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slab.len()
    }

    /// Returns the number of bytes that can be read without blocking.
    pub fn length(&self) -> usize {
        self.state.lock().cursors.len()
    }

    /// Returns the number of bytes that can be written without blocking.
    pub fn free(&self) -> usize {
        self.state.lock().cursors.free()
    }

    /// Returns `true` if the buffer is full.
    pub fn is_full(&self) -> bool {
        self.state.lock().cursors.is_full()
    }

    /// Returns `true` if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().cursors.is_empty()
    }

    /// Returns the sticky error, if one is recorded.
    pub fn error(&self) -> Option<RingError> {
        self.state.lock().err.clone()
    }

    /// Returns a copy of every unread byte without consuming them.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.bytes_into(&mut out);
        out
    }

    /// Replaces the contents of `dst` with every unread byte, reusing its
    /// allocation.
    pub fn bytes_into(&self, dst: &mut Vec<u8>) {
        dst.clear();
        let state = self.state.lock();
        state.cursors.copy_all(&self.slab, dst);
    }

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------

    /// Records `err` as sticky and wakes every waiter if it was stored.
    pub(super) fn fail(&self, state: &mut State, err: RingError) -> RingError {
        if state.record(err.clone()) {
            debug!(error = %err, "ring buffer closed");
            self.wake_all();
        }
        err
    }

    pub(super) fn wake_all(&self) {
        self.data_ready.notify_all();
        self.space_ready.notify_all();
    }

    /// Waits until a writer produced data or the state changed.
    pub(super) fn wait_data(&self, state: &mut MutexGuard<'_, State>) -> Result<()> {
        let timeout = state.read_timeout;
        self.wait_on(&self.data_ready, state, timeout)
    }

    /// Waits until a reader freed space or the state changed.
    pub(super) fn wait_space(&self, state: &mut MutexGuard<'_, State>) -> Result<()> {
        let timeout = state.write_timeout;
        self.wait_on(&self.space_ready, state, timeout)
    }

    fn wait_on(
        &self,
        cond: &Condvar,
        state: &mut MutexGuard<'_, State>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        match timeout {
            None => {
                cond.wait(state);
                Ok(())
            }
            Some(timeout) => {
                if cond.wait_for(state, timeout).timed_out() {
                    debug!(?timeout, "ring buffer wait timed out");
                    return Err(self.fail(state, RingError::DeadlineExceeded));
                }
                Ok(())
            }
        }
    }

    /// Registers a running transfer.
    pub(super) fn enter(&self, state: &mut State) {
        state.in_flight += 1;
    }

    /// Deregisters a transfer and lets a pending reset proceed.
    pub(super) fn leave(&self, state: &mut State) {
        debug_assert!(state.in_flight > 0);
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns what is available rather than waiting for `buf` to fill.
    /// On an empty buffer this fails with [`RingError::Empty`], or waits when
    /// blocking. After [`close_writer`](Self::close_writer) the remaining
    /// bytes are returned first, then [`RingError::Eof`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if buf.is_empty() {
            return state.read_check().map(|_| 0);
        }
        loop {
            if let Err(err) = state.read_check() {
                if state.parks(&err) {
                    self.wait_data(&mut state)?;
                    continue;
                }
                return Err(err);
            }
            match state.cursors.read(&self.slab, buf) {
                Ok(n) => {
                    self.space_ready.notify_all();
                    return Ok(n);
                }
                Err(RingError::Empty) if state.blocking => self.wait_data(&mut state)?,
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`read`](Self::read) but never waits, not even for the lock.
    ///
    /// Fails with [`RingError::AcquireLock`] if the lock is held.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.try_lock().ok_or(RingError::AcquireLock)?;
        state.read_check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let n = state.cursors.read(&self.slab, buf)?;
        self.space_ready.notify_all();
        Ok(n)
    }

    /// Reads a single byte.
    pub fn read_byte(&self) -> Result<u8> {
        let mut state = self.state.lock();
        loop {
            if let Err(err) = state.read_check() {
                if state.parks(&err) {
                    self.wait_data(&mut state)?;
                    continue;
                }
                return Err(err);
            }
            match state.cursors.read_byte(&self.slab) {
                Ok(byte) => {
                    self.space_ready.notify_all();
                    return Ok(byte);
                }
                Err(RingError::Empty) if state.blocking => self.wait_data(&mut state)?,
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads a single byte without waiting for data or for the lock.
    pub fn try_read_byte(&self) -> Result<u8> {
        let mut state = self.state.try_lock().ok_or(RingError::AcquireLock)?;
        state.read_check()?;
        let byte = state.cursors.read_byte(&self.slab)?;
        self.space_ready.notify_all();
        Ok(byte)
    }

    /// Copies up to `buf.len()` unread bytes without consuming them.
    ///
    /// Never waits; an empty buffer yields [`RingError::Empty`].
    pub fn peek(&self, buf: &mut [u8]) -> Result<usize> {
        let state = self.state.lock();
        state.read_check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        state.cursors.peek(&self.slab, buf)
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Writes `buf` into the buffer.
    ///
    /// - non-blocking: stores what fits; a partial store fails with
    ///   [`RingError::TooMuchDataToWrite`] carrying the stored count, a full
    ///   buffer with [`RingError::Full`]
    /// - blocking: waits for space until all of `buf` is stored
    /// - overwrite: evicts the oldest bytes and always stores everything,
    ///   except while [`write_to`](Self::write_to) has a segment out: bytes
    ///   handed to the sink cannot be evicted, so the write behaves as in
    ///   the non-overwrite modes until the segment is committed
    ///
    /// If the buffer is closed after some bytes went in, that count is
    /// returned and the error surfaces on the next call.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if buf.is_empty() {
            return match &state.err {
                Some(err) if !err.is_eof() => Err(err.clone()),
                _ => Ok(0),
            };
        }

        let mut written = 0;
        loop {
            if let Err(err) = state.write_check() {
                if state.parks(&err) {
                    if let Err(err) = self.wait_space(&mut state) {
                        return progress(written, err);
                    }
                    continue;
                }
                return progress(written, err);
            }

            let overwrite = state.overwrite;
            match state.cursors.write(&self.slab, &buf[written..], overwrite) {
                Ok(n) => {
                    written += n;
                    self.data_ready.notify_all();
                    return Ok(written);
                }
                Err(RingError::TooMuchDataToWrite { written: n }) => {
                    written += n;
                    self.data_ready.notify_all();
                    if !state.blocking {
                        return Err(RingError::TooMuchDataToWrite { written });
                    }
                }
                Err(RingError::Full) if state.blocking => {}
                Err(err) => return progress(written, err),
            }

            if let Err(err) = self.wait_space(&mut state) {
                return progress(written, err);
            }
        }
    }

    /// Writes the UTF-8 bytes of `s`.
    pub fn write_str(&self, s: &str) -> Result<usize> {
        self.write(s.as_bytes())
    }

    /// Like [`write`](Self::write) but never waits, not even for the lock.
    ///
    /// Fails with [`RingError::AcquireLock`] if the lock is held. In overwrite
    /// mode it can still report [`RingError::Full`] or
    /// [`RingError::TooMuchDataToWrite`] while a
    /// [`write_to`](Self::write_to) segment is out.
    pub fn try_write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.try_lock().ok_or(RingError::AcquireLock)?;
        if buf.is_empty() {
            return match &state.err {
                Some(err) if !err.is_eof() => Err(err.clone()),
                _ => Ok(0),
            };
        }
        state.write_check()?;

        let overwrite = state.overwrite;
        let result = state.cursors.write(&self.slab, buf, overwrite);
        if matches!(result, Ok(_) | Err(RingError::TooMuchDataToWrite { .. })) {
            self.data_ready.notify_all();
        }
        result
    }

    /// Writes a single byte.
    pub fn write_byte(&self, byte: u8) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if let Err(err) = state.write_check() {
                if state.parks(&err) {
                    self.wait_space(&mut state)?;
                    continue;
                }
                return Err(err);
            }
            let overwrite = state.overwrite;
            match state.cursors.write_byte(&self.slab, byte, overwrite) {
                Ok(()) => {
                    self.data_ready.notify_all();
                    return Ok(());
                }
                Err(RingError::Full) if state.blocking => self.wait_space(&mut state)?,
                Err(err) => return Err(err),
            }
        }
    }

    /// Writes a single byte without waiting for space or for the lock.
    pub fn try_write_byte(&self, byte: u8) -> Result<()> {
        let mut state = self.state.try_lock().ok_or(RingError::AcquireLock)?;
        state.write_check()?;
        let overwrite = state.overwrite;
        state.cursors.write_byte(&self.slab, byte, overwrite)?;
        self.data_ready.notify_all();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Closes the buffer.
    ///
    /// `None` closes the writer side: reads drain the remaining bytes and then
    /// return [`RingError::Eof`], writes fail with
    /// [`RingError::WriteOnClosed`]. Any other error is returned by every
    /// following operation. The first error wins, except that a real error
    /// may replace a bare end-of-stream. All waiters are woken.
    pub fn close_with_error(&self, err: impl Into<Option<RingError>>) {
        let err = err.into().unwrap_or(RingError::Eof);
        let mut state = self.state.lock();
        self.fail(&mut state, err);
    }

    /// Closes the writer side; readers get the remaining bytes and then
    /// [`RingError::Eof`].
    pub fn close_writer(&self) {
        self.close_with_error(None);
    }

    /// Waits until every byte has been read.
    ///
    /// A non-blocking buffer that still holds data fails with
    /// [`RingError::NotEmpty`]. End-of-stream counts as success; any other
    /// sticky error is returned.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if let Err(err) = state.read_check() {
                if state.parks(&err) {
                    self.wait_space(&mut state)?;
                    continue;
                }
                return if err.is_eof() { Ok(()) } else { Err(err) };
            }
            if state.cursors.is_empty() {
                return Ok(());
            }
            if !state.blocking {
                return Err(RingError::NotEmpty);
            }
            self.wait_space(&mut state)?;
        }
    }

    /// Discards all data and clears the sticky error.
    ///
    /// Callers blocked in a blocking buffer keep waiting as if nothing
    /// happened; transfers in progress stop with [`RingError::Reset`]. Mode
    /// flags and timeouts are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();

        state.err = Some(RingError::Reset);
        self.wake_all();

        while state.in_flight > 0 {
            self.idle.wait(&mut state);
        }

        state.cursors.rewind();
        state.err = None;
        debug!(capacity = self.capacity(), "ring buffer reset");
        self.wake_all();
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("length", &state.cursors.len())
            .field("blocking", &state.blocking)
            .field("overwrite", &state.overwrite)
            .field("err", &state.err)
            .finish()
    }
}

// ============================================================================
// std::io ADAPTERS
// ============================================================================

impl io::Read for &RingBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match RingBuffer::read(self, buf) {
            Ok(n) => Ok(n),
            Err(RingError::Eof) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl io::Write for &RingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match RingBuffer::write(self, buf) {
            Ok(n) => Ok(n),
            Err(RingError::TooMuchDataToWrite { written }) => Ok(written),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for RingBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for RingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
