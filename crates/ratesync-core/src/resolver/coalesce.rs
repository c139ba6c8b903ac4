//! Coalesce-to-latest rate limiting for "now playing changed"
//!
//! Media sessions emit bursts of change notifications (artwork, elapsed
//! time, queue updates). At most one track check runs per spacing window;
//! notifications inside the window collapse into a single deferred check at
//! its end.

use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between track checks
pub const DEFAULT_NOW_PLAYING_SPACING: Duration = Duration::from_millis(500);

/// Decision for one incoming notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Run the check now
    Fire,
    /// Schedule a flush after this delay
    Defer(Duration),
    /// A flush is already scheduled
    Merged,
}

#[derive(Debug)]
pub struct NowPlayingCoalescer {
    min_spacing: Duration,
    last_fired: Option<Instant>,
    pending: bool,
}

impl NowPlayingCoalescer {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_fired: None,
            pending: false,
        }
    }

    /// Offer a notification received at `now`
    pub fn offer(&mut self, now: Instant) -> Offer {
        if self.pending {
            return Offer::Merged;
        }
        match self.last_fired {
            Some(last) if now.duration_since(last) < self.min_spacing => {
                self.pending = true;
                Offer::Defer(self.min_spacing - now.duration_since(last))
            }
            _ => {
                self.last_fired = Some(now);
                Offer::Fire
            }
        }
    }

    /// Consume the deferred notification, if any
    ///
    /// # Returns
    /// `true` when the check should run now
    pub fn flush(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;
        self.last_fired = Some(now);
        true
    }

    /// Whether a deferred check is waiting
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

impl Default for NowPlayingCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_NOW_PLAYING_SPACING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_notification_fires() {
        let mut c = NowPlayingCoalescer::default();
        assert_eq!(c.offer(Instant::now()), Offer::Fire);
    }

    #[test]
    fn test_burst_collapses_to_one_deferred_check() {
        let mut c = NowPlayingCoalescer::default();
        let t0 = Instant::now();
        assert_eq!(c.offer(t0), Offer::Fire);
        assert_eq!(
            c.offer(t0 + Duration::from_millis(100)),
            Offer::Defer(Duration::from_millis(400))
        );
        assert_eq!(c.offer(t0 + Duration::from_millis(200)), Offer::Merged);
        assert_eq!(c.offer(t0 + Duration::from_millis(300)), Offer::Merged);

        assert!(c.flush(t0 + Duration::from_millis(500)));
        assert!(!c.flush(t0 + Duration::from_millis(500)));
        assert!(!c.is_pending());
    }

    #[test]
    fn test_spaced_notifications_fire_immediately() {
        let mut c = NowPlayingCoalescer::default();
        let t0 = Instant::now();
        assert_eq!(c.offer(t0), Offer::Fire);
        assert_eq!(c.offer(t0 + Duration::from_millis(500)), Offer::Fire);
        assert_eq!(c.offer(t0 + Duration::from_secs(2)), Offer::Fire);
    }

    #[test]
    fn test_flush_restarts_window() {
        let mut c = NowPlayingCoalescer::default();
        let t0 = Instant::now();
        c.offer(t0);
        c.offer(t0 + Duration::from_millis(100));
        c.flush(t0 + Duration::from_millis(500));
        assert!(matches!(
            c.offer(t0 + Duration::from_millis(600)),
            Offer::Defer(_)
        ));
    }
}
