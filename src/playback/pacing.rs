//! Frame pacing for file playback

use std::time::Duration;

/// Rate used when a source advertises nothing usable
pub const FALLBACK_FPS: f64 = 30.0;

/// Time left to wait after spending `elapsed` on a frame that is due every
/// `interval`. Never negative.
pub fn compute_wait(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Explicit override, else the advertised rate, else [`FALLBACK_FPS`].
/// Non-finite and non-positive rates count as missing.
pub fn nominal_fps(override_fps: Option<f64>, advertised: Option<f64>) -> f64 {
    let usable = |fps: &f64| fps.is_finite() && *fps > 0.0;
    override_fps
        .filter(usable)
        .or_else(|| advertised.filter(usable))
        .unwrap_or(FALLBACK_FPS)
}

pub fn frame_interval(fps: f64) -> Duration {
    Duration::from_secs_f64(1.0 / fps)
}

/// Frame index shown at `msec` into a clip playing at `fps`.
pub fn frame_at(msec: f64, fps: f64) -> u64 {
    if !msec.is_finite() || msec <= 0.0 {
        return 0;
    }
    (msec * fps / 1000.0).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_fills_the_rest_of_the_interval() {
        let wait = compute_wait(frame_interval(30.0), Duration::from_millis(10));
        assert_eq!(wait.as_micros(), 23_333);
    }

    #[test]
    fn slow_frame_does_not_wait() {
        let wait = compute_wait(frame_interval(30.0), Duration::from_millis(50));
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn nominal_rate_fallbacks() {
        assert_eq!(nominal_fps(Some(12.0), Some(25.0)), 12.0);
        assert_eq!(nominal_fps(None, Some(25.0)), 25.0);
        assert_eq!(nominal_fps(None, Some(0.0)), FALLBACK_FPS);
        assert_eq!(nominal_fps(None, Some(f64::NAN)), FALLBACK_FPS);
        assert_eq!(nominal_fps(Some(-1.0), None), FALLBACK_FPS);
    }

    #[test]
    fn time_to_frame_index() {
        assert_eq!(frame_at(1000.0, 25.0), 25);
        assert_eq!(frame_at(39.9, 25.0), 0);
        assert_eq!(frame_at(-5.0, 25.0), 0);
    }
}
