//! Time management utilities

use std::time::Instant;

/// Frame clock driving everything time-dependent in the engine.
///
/// Time only moves when the owner calls [`FrameTimer::tick`] (wall clock)
/// or [`FrameTimer::advance`] (explicit step), so a frame sees one
/// consistent `total_time`.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    last_tick: Instant,
    delta_time: f32,
    total_time: f32,
    frame_count: u64,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    /// Create a new timer at time zero
    pub fn new() -> Self {
        Self {
            last_tick: Instant::now(),
            delta_time: 0.0,
            total_time: 0.0,
            frame_count: 0,
        }
    }

    /// Advance by the wall-clock time since the previous tick
    pub fn tick(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.advance(elapsed);
    }

    /// Advance by an explicit step in seconds
    pub fn advance(&mut self, delta: f32) {
        self.delta_time = delta.max(0.0);
        self.total_time += self.delta_time;
        self.frame_count += 1;
    }

    /// Get the time since the last frame in seconds
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Get the total elapsed time in seconds
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Get the current frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// Critically damped smoothing of a scalar towards a moving target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothCD {
    /// Current smoothed value
    pub pos: f32,
    /// Target value
    pub dest: f32,
    /// Current rate of change
    pub vel: f32,
    /// Approximate time to reach the target
    pub smooth_time: f32,
}

impl SmoothCD {
    /// Start at `pos` with the given smoothing time and velocity
    pub const fn new(pos: f32, smooth_time: f32, vel: f32) -> Self {
        Self { pos, dest: pos, vel, smooth_time }
    }

    /// Jump straight to a value
    pub fn set(&mut self, pos: f32, vel: f32) {
        self.pos = pos;
        self.dest = pos;
        self.vel = vel;
    }

    /// Move towards `dest` by `dt` seconds
    pub fn update(&mut self, dest: f32, dt: f32) {
        self.dest = dest;
        if self.smooth_time <= 0.0 {
            self.pos = dest;
            self.vel = 0.0;
            return;
        }
        let omega = 2.0 / self.smooth_time;
        let x = omega * dt;
        let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);
        let change = self.pos - dest;
        let temp = (self.vel + omega * change) * dt;
        self.vel = (self.vel - omega * temp) * exp;
        self.pos = dest + (change + temp) * exp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame_timer_advance() {
        let mut timer = FrameTimer::new();
        timer.advance(0.5);
        timer.advance(0.25);
        assert_relative_eq!(timer.total_time(), 0.75);
        assert_relative_eq!(timer.delta_time(), 0.25);
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_smooth_cd_converges() {
        let mut s = SmoothCD::new(0.0, 0.5, 0.0);
        for _ in 0..200 {
            s.update(1.0, 1.0 / 60.0);
        }
        assert_relative_eq!(s.pos, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_smooth_cd_moves_monotonically_from_rest() {
        let mut s = SmoothCD::new(0.0, 0.5, 0.0);
        let mut last = s.pos;
        for _ in 0..30 {
            s.update(1.0, 1.0 / 60.0);
            assert!(s.pos >= last);
            last = s.pos;
        }
        assert!(s.pos < 1.0);
    }
}
