//! Blend timer between blurred and sharp tiles.
//!
//! After the set of tiles in view changes, main-quality tiles fade in over
//! `duration` seconds of smoothed frame time. The opacity follows a
//! smoothstep of the elapsed fraction.

use std::time::Instant;

use crate::config::BlendConfig;

#[derive(Debug, Clone)]
pub(crate) struct BlendTimer {
    duration: f32,
    smoothing: f32,
    avg_changed_time: f32,
    avg_frame_interval: Option<f32>,
    last_update: Option<Instant>,
}

impl BlendTimer {
    pub fn new(config: &BlendConfig) -> Self {
        Self {
            duration: config.duration_secs,
            smoothing: config.smoothing,
            avg_changed_time: 0.0,
            avg_frame_interval: None,
            last_update: None,
        }
    }

    /// Advance by one frame at `now`. A composition change restarts the fade.
    pub fn advance(&mut self, changed: bool, now: Instant) {
        let interval = self
            .last_update
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_update = Some(now);

        let smoothed = match self.avg_frame_interval {
            Some(avg) => avg + self.smoothing * (interval - avg),
            None => interval,
        };
        self.avg_frame_interval = Some(smoothed);

        if changed {
            self.avg_changed_time = 0.0;
        } else {
            self.avg_changed_time = (self.avg_changed_time + smoothed).min(self.duration);
        }
    }

    pub fn avg_changed_time(&self) -> f32 {
        self.avg_changed_time
    }

    pub fn is_settled(&self) -> bool {
        self.avg_changed_time >= self.duration
    }

    /// Opacity of fading main-quality tiles.
    pub fn opacity(&self) -> f32 {
        if !(self.duration > 0.0) {
            return 1.0;
        }
        let t = (self.avg_changed_time / self.duration).clamp(0.0, 1.0);
        t * t * (3.0 - 2.0 * t)
    }

    pub fn reset(&mut self) {
        self.avg_changed_time = 0.0;
        self.avg_frame_interval = None;
        self.last_update = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timer() -> BlendTimer {
        BlendTimer::new(&BlendConfig {
            duration_secs: 0.1,
            smoothing: 1.0,
        })
    }

    #[test]
    fn test_change_resets() {
        let mut blend = timer();
        let start = Instant::now();
        blend.advance(true, start);
        assert_eq!(blend.avg_changed_time(), 0.0);
        assert_eq!(blend.opacity(), 0.0);

        blend.advance(false, start + Duration::from_millis(20));
        assert!(blend.avg_changed_time() > 0.0);

        blend.advance(true, start + Duration::from_millis(40));
        assert_eq!(blend.avg_changed_time(), 0.0);
    }

    #[test]
    fn test_saturates_at_duration() {
        let mut blend = timer();
        let start = Instant::now();
        blend.advance(true, start);
        for frame in 1..20 {
            blend.advance(false, start + Duration::from_millis(20 * frame));
        }
        assert!(blend.is_settled());
        assert_eq!(blend.avg_changed_time(), 0.1);
        assert_eq!(blend.opacity(), 1.0);
    }

    #[test]
    fn test_zero_duration_is_opaque() {
        let mut blend = BlendTimer::new(&BlendConfig {
            duration_secs: 0.0,
            smoothing: 1.0,
        });
        blend.advance(true, Instant::now());
        assert_eq!(blend.opacity(), 1.0);
    }

    #[test]
    fn test_smoothing_damps_spikes() {
        let mut blend = BlendTimer::new(&BlendConfig {
            duration_secs: 10.0,
            smoothing: 0.25,
        });
        let start = Instant::now();
        blend.advance(true, start);
        blend.advance(false, start + Duration::from_millis(10));
        let steady = blend.avg_changed_time();
        // A one-second stall only moves the average a quarter of the way.
        blend.advance(false, start + Duration::from_millis(1010));
        let stalled = blend.avg_changed_time() - steady;
        assert!(stalled < 0.3);
        assert!(stalled > steady);
    }
}
