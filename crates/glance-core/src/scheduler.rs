use std::time::{Duration, Instant};

/// Throttles landmark detection to a target rate, independent of how often
/// the host's display refresh calls [`FrameScheduler::tick`].
///
/// The remainder of each interval is carried over instead of being dropped,
/// so the average forwarded rate tracks the target under refresh jitter. No
/// minimum spacing between two forwarded frames is guaranteed.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: Duration,
    last_forwarded: Option<Instant>,
}

impl FrameScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_forwarded: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true if the frame at `now` should be forwarded for detection.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_forwarded else {
            self.last_forwarded = Some(now);
            return true;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.interval {
            return false;
        }

        let interval_ns = self.interval.as_nanos().max(1);
        let carry = Duration::from_nanos((elapsed.as_nanos() % interval_ns) as u64);
        self.last_forwarded = Some(now - carry);
        true
    }

    /// Forget the last forwarded timestamp; the next tick always forwards.
    pub fn reset(&mut self) {
        self.last_forwarded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, micros: u64) -> Instant {
        base + Duration::from_micros(micros)
    }

    #[test]
    fn first_tick_forwards() {
        let mut s = FrameScheduler::new(Duration::from_millis(33));
        assert!(s.tick(Instant::now()));
    }

    #[test]
    fn drops_ticks_inside_interval() {
        let base = Instant::now();
        let mut s = FrameScheduler::new(Duration::from_millis(50));
        assert!(s.tick(base));
        assert!(!s.tick(at(base, 16_000)));
        assert!(!s.tick(at(base, 33_000)));
        assert!(!s.tick(at(base, 49_999)));
        assert!(s.tick(at(base, 50_000)));
    }

    #[test]
    fn carries_remainder_forward() {
        let base = Instant::now();
        let mut s = FrameScheduler::new(Duration::from_millis(50));
        assert!(s.tick(base));
        // Forwarded 20ms late; the next deadline stays on the 50ms grid.
        assert!(s.tick(at(base, 70_000)));
        assert!(!s.tick(at(base, 99_000)));
        assert!(s.tick(at(base, 100_000)));
    }

    #[test]
    fn average_rate_tracks_target_under_jitter() {
        // 60 Hz refresh with +/-4ms jitter, 30 fps target, 10 seconds.
        let base = Instant::now();
        let mut s = FrameScheduler::new(Duration::from_nanos(1_000_000_000 / 30));
        let jitter = [0i64, 3_000, -4_000, 1_500, -2_000, 4_000, -1_000];
        let mut forwarded = 0;
        for i in 0..600u64 {
            let nominal = (i * 16_667) as i64;
            let t = (nominal + jitter[i as usize % jitter.len()]).max(0) as u64;
            if s.tick(at(base, t)) {
                forwarded += 1;
            }
        }
        assert!((280..=310).contains(&forwarded), "forwarded {forwarded}");
    }

    #[test]
    fn reset_forwards_next_tick() {
        let base = Instant::now();
        let mut s = FrameScheduler::new(Duration::from_millis(50));
        assert!(s.tick(base));
        s.reset();
        assert!(s.tick(at(base, 1_000)));
    }
}
