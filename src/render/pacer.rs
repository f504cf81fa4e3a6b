//! Frame pacing.

use std::time::{Duration, Instant};

/// Gates how often the compositor does real work, independent of how
/// fast the window system delivers redraw callbacks.
///
/// A rejected callback does nothing at all: the on-screen image and all
/// layer state stay exactly as they were.
pub struct FramePacer {
    target_interval: Duration,
    last_tick: Option<Instant>,
}

impl FramePacer {
    /// Cap work at `target_hz` ticks per second.
    pub fn new(target_hz: f64) -> Self {
        Self {
            target_interval: Duration::from_secs_f64(1.0 / target_hz),
            last_tick: None,
        }
    }

    /// True when enough time has passed since the last admitted tick.
    /// The first call always ticks.
    pub fn should_tick(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_tick {
            if now.duration_since(last) < self.target_interval {
                return false;
            }
        }
        self.last_tick = Some(now);
        true
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gating_sequence() {
        // 1000/35 ms rounds to ~28.57ms; use a round 28ms cap here so the
        // boundary cases are exact.
        let mut pacer = FramePacer {
            target_interval: Duration::from_millis(28),
            last_tick: None,
        };
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);

        assert!(pacer.should_tick(at(0)));
        assert!(!pacer.should_tick(at(10)));
        assert!(!pacer.should_tick(at(20)));
        assert!(pacer.should_tick(at(29)));
        assert!(pacer.should_tick(at(58)));
        assert!(!pacer.should_tick(at(59)));
    }

    #[test]
    fn test_first_call_always_ticks() {
        let mut pacer = FramePacer::new(35.0);
        assert!(pacer.should_tick(Instant::now()));
    }

    #[test]
    fn test_interval_matches_rate() {
        let pacer = FramePacer::new(35.0);
        let ms = pacer.target_interval().as_secs_f64() * 1000.0;
        assert!((ms - 1000.0 / 35.0).abs() < 0.001);
    }
}
