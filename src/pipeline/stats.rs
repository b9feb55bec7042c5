//! Sliding-window rate statistics shared by every worker loop

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Samples kept in the window by default.
pub const DEFAULT_STAT_WINDOW: usize = 32;

/// Statistics a loop publishes after each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStatistics {
    pub average_fps: f64,
    pub frames_processed: u64,
}

/// FPS estimator over the last `window` frame intervals.
#[derive(Debug)]
pub struct RateTracker {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
    last_tick: Option<Instant>,
    frames: u64,
}

impl RateTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
            last_tick: None,
            frames: 0,
        }
    }

    /// Record the interval since the previous tick. The first tick only
    /// establishes the reference point.
    pub fn tick(&mut self, now: Instant) {
        if let Some(last) = self.last_tick {
            self.record(now.saturating_duration_since(last));
        }
        self.last_tick = Some(now);
    }

    /// Record one frame interval. Zero-length intervals carry no rate
    /// information and are skipped.
    pub fn record(&mut self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let fps = 1.0 / interval.as_secs_f64();
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(fps);
        self.sum += fps;
    }

    /// Count a completed frame.
    pub fn frame_done(&mut self) {
        self.frames += 1;
    }

    pub fn set_frames(&mut self, frames: u64) {
        self.frames = frames;
    }

    pub fn average_fps(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn snapshot(&self) -> ThreadStatistics {
        ThreadStatistics {
            average_fps: self.average_fps(),
            frames_processed: self.frames,
        }
    }

    /// Forget intervals, e.g. after a seek or a pause.
    pub fn restart_clock(&mut self) {
        self.last_tick = None;
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
        self.last_tick = None;
        self.frames = 0;
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_STAT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let tracker = RateTracker::default();
        assert_eq!(tracker.snapshot(), ThreadStatistics::default());
    }

    #[test]
    fn averages_recorded_intervals() {
        let mut tracker = RateTracker::new(4);
        tracker.record(Duration::from_millis(20)); // 50 fps
        tracker.record(Duration::from_millis(50)); // 20 fps
        assert!((tracker.average_fps() - 35.0).abs() < 1e-9);
    }

    #[test]
    fn window_slides() {
        let mut tracker = RateTracker::new(2);
        tracker.record(Duration::from_millis(100)); // 10
        tracker.record(Duration::from_millis(50)); // 20
        tracker.record(Duration::from_millis(25)); // 40, evicts 10
        assert!((tracker.average_fps() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn zero_interval_is_ignored() {
        let mut tracker = RateTracker::new(4);
        tracker.record(Duration::ZERO);
        assert_eq!(tracker.average_fps(), 0.0);
    }

    #[test]
    fn tick_uses_wall_clock_delta() {
        let mut tracker = RateTracker::new(4);
        let start = Instant::now();
        tracker.tick(start);
        tracker.tick(start + Duration::from_millis(40));
        assert!((tracker.average_fps() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn restart_clock_skips_next_interval() {
        let mut tracker = RateTracker::new(4);
        let start = Instant::now();
        tracker.tick(start);
        tracker.restart_clock();
        tracker.tick(start + Duration::from_secs(10));
        assert_eq!(tracker.average_fps(), 0.0);
    }

    #[test]
    fn snapshot_serialises_camel_case() {
        let mut tracker = RateTracker::default();
        tracker.frame_done();
        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["framesProcessed"], 1);
        assert!(json["averageFps"].is_number());
    }
}
