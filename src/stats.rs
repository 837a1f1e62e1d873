//! Rolling frame-rate statistics.
//!
//! The average is a windowed running mean: each new sample is weighted
//! against at most `FPS_WINDOW` previous ones, so old history fades out
//! without keeping a sample buffer. Min/max are only sampled during the
//! first `WARM_UP_FRAMES` frames.

use std::time::Instant;

use serde::Serialize;

pub const FPS_WINDOW: u64 = 150;
pub const WARM_UP_FRAMES: u64 = 15;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Frames recorded so far.
    pub frames: u64,
    /// Instantaneous rate of the last frame.
    pub fps: f64,
    pub avg_fps: f64,
    pub min_fps: Option<f64>,
    pub max_fps: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct FrameStats {
    last_at: Instant,
    snapshot: StatsSnapshot,
}

impl FrameStats {
    /// Start measuring; the first frame's interval is taken from `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            last_at: now,
            snapshot: StatsSnapshot::default(),
        }
    }

    pub fn record(&mut self) -> f64 {
        self.record_at(Instant::now())
    }

    /// Record a frame captured at `now` and return its instantaneous rate.
    /// A zero interval yields no sample and returns the previous rate.
    pub fn record_at(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        self.last_at = now;
        let s = &mut self.snapshot;
        if elapsed <= 0.0 {
            return s.fps;
        }
        let fps = 1.0 / elapsed;
        let weight = s.frames.min(FPS_WINDOW) as f64;
        s.avg_fps = (s.avg_fps * weight + fps) / (weight + 1.0);
        if s.frames < WARM_UP_FRAMES {
            s.min_fps = Some(s.min_fps.map_or(fps, |m| m.min(fps)));
            s.max_fps = Some(s.max_fps.map_or(fps, |m| m.max(fps)));
        }
        s.fps = fps;
        s.frames += 1;
        fps
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fixed_interval_converges_to_true_rate() {
        let start = Instant::now();
        let mut stats = FrameStats::new(start);
        for i in 1..=400u64 {
            stats.record_at(start + Duration::from_millis(40 * i));
        }
        let s = stats.snapshot();
        assert_eq!(s.frames, 400);
        assert!((s.avg_fps - 25.0).abs() < 1e-6, "avg {}", s.avg_fps);
        assert!((s.fps - 25.0).abs() < 1e-6);
    }

    #[test]
    fn slow_startup_fades_out_of_the_average() {
        let start = Instant::now();
        let mut stats = FrameStats::new(start);
        // One-second first frame, then a steady 50 fps.
        let mut t = start + Duration::from_secs(1);
        stats.record_at(t);
        for _ in 0..2000 {
            t += Duration::from_millis(20);
            stats.record_at(t);
        }
        let s = stats.snapshot();
        assert!((s.avg_fps - 50.0).abs() < 0.01, "avg {}", s.avg_fps);
        assert_eq!(s.min_fps, Some(1.0));
    }

    #[test]
    fn min_max_only_sampled_during_warm_up() {
        let start = Instant::now();
        let mut stats = FrameStats::new(start);
        let mut t = start;
        for _ in 0..WARM_UP_FRAMES {
            t += Duration::from_millis(100);
            stats.record_at(t);
        }
        // A much faster frame after warm-up does not move max.
        t += Duration::from_millis(1);
        stats.record_at(t);
        let s = stats.snapshot();
        assert!((s.max_fps.unwrap() - 10.0).abs() < 1e-9);
        assert!((s.fps - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn zero_interval_is_not_a_sample() {
        let start = Instant::now();
        let mut stats = FrameStats::new(start);
        stats.record_at(start);
        assert_eq!(stats.snapshot().frames, 0);
        assert_eq!(stats.snapshot().min_fps, None);
    }
}
