// src/ring/config.rs
//! Configuration for ring buffer behavior

use std::time::Duration;

/// Mode flags and timeouts for a [`RingBuffer`](crate::RingBuffer).
///
/// A zero timeout disables the deadline for that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingConfig {
    /// Block reads on empty and writes on full instead of failing
    pub blocking: bool,
    /// Evict the oldest unread bytes when a write does not fit
    pub overwrite: bool,
    /// Longest a reader waits for data before the buffer is closed
    pub read_timeout: Duration,
    /// Longest a writer waits for space before the buffer is closed
    pub write_timeout: Duration,
}

impl RingConfig {
    /// Configuration for producer/consumer pipes.
    pub fn pipe() -> Self {
        Self {
            blocking: true,
            ..Self::default()
        }
    }

    /// Configuration for a sliding window over the most recent bytes.
    pub fn window() -> Self {
        Self {
            overwrite: true,
            ..Self::default()
        }
    }

    /// Sets both read and write timeouts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.write_timeout = timeout;
        self
    }
}

/// Internal form of a timeout: `None` when disabled.
#[inline]
pub(crate) fn deadline(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let pipe = RingConfig::pipe();
        assert!(pipe.blocking);
        assert!(!pipe.overwrite);

        let window = RingConfig::window();
        assert!(window.overwrite);
        assert!(!window.blocking);
    }

    #[test]
    fn test_timeouts() {
        let cfg = RingConfig::pipe().with_timeout(Duration::from_millis(50));
        assert_eq!(cfg.read_timeout, Duration::from_millis(50));
        assert_eq!(cfg.write_timeout, Duration::from_millis(50));
        assert_eq!(deadline(cfg.read_timeout), Some(Duration::from_millis(50)));
        assert_eq!(deadline(Duration::ZERO), None);
    }
}
