//! Rate limiting for bulk file copies.

use std::time::{Duration, Instant};

/// Token-bucket style throttler for streaming copies.
///
/// The caller reports each chunk it moved; the throttler sleeps whenever the
/// observed rate runs ahead of the configured one. A rate of zero disables
/// throttling entirely.
#[derive(Debug)]
pub struct WriteThrottler {
    bytes_per_second: u64,
    started: Instant,
    moved: u64,
}

impl WriteThrottler {
    /// Creates a throttler for the given rate; zero means unthrottled.
    #[must_use]
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            started: Instant::now(),
            moved: 0,
        }
    }

    /// Whether this throttler limits anything.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.bytes_per_second > 0
    }

    /// Accounts for `bytes` just moved and sleeps if ahead of the rate.
    pub fn throttle(&mut self, bytes: u64) {
        if self.bytes_per_second == 0 {
            return;
        }
        self.moved += bytes;
        let expected = Duration::from_secs_f64(self.moved as f64 / self.bytes_per_second as f64);
        let elapsed = self.started.elapsed();
        if expected > elapsed {
            std::thread::sleep(expected - elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_throttler_never_sleeps() {
        let mut throttler = WriteThrottler::new(0);
        let start = Instant::now();
        throttler.throttle(u64::MAX / 2);
        assert!(!throttler.is_enabled());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn throttler_paces_to_the_configured_rate() {
        // 1 MiB/s, moving 100 KiB should take at least ~90ms.
        let mut throttler = WriteThrottler::new(1024 * 1024);
        let start = Instant::now();
        throttler.throttle(100 * 1024);
        assert!(throttler.is_enabled());
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
