// src/time.rs
//! Fixed-step clock for the physics world.
//!
//! Rendered frames arrive with arbitrary deltas. The clock banks them and hands
//! out whole physics steps, never more than `max_substeps` per frame, so a long
//! stall does not turn into a spiral of catch-up steps.

/// Largest frame delta accepted before clamping (4 FPS).
pub const MAX_FRAME_DELTA: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepClock {
    accumulator: f32,
    fixed_dt: f32,
    max_substeps: u32,
    steps: u64,
}

impl StepClock {
    #[inline(always)]
    pub fn new(fixed_dt: f32, max_substeps: u32) -> Self {
        Self { accumulator: 0.0, fixed_dt, max_substeps: max_substeps.max(1), steps: 0 }
    }

    /// Banks one frame's worth of time and yields the steps it pays for.
    /// Usage: `for _ in clock.advance(frame_dt) { world.step(); }`
    #[inline(always)]
    pub fn advance(&mut self, frame_dt: f32) -> FixedTimestepIter<'_> {
        if frame_dt.is_finite() && frame_dt > 0.0 {
            self.accumulator += frame_dt.min(MAX_FRAME_DELTA);
        }
        let remaining = self.max_substeps;
        FixedTimestepIter { clock: self, remaining }
    }

    #[inline(always)] pub fn fixed_dt(&self) -> f32 { self.fixed_dt }
    #[inline(always)] pub fn pending(&self) -> f32 { self.accumulator }
    #[inline(always)] pub fn steps(&self) -> u64 { self.steps }

    /// Interpolation factor between the last two steps, for rendering.
    #[inline(always)]
    pub fn alpha(&self) -> f32 {
        (self.accumulator / self.fixed_dt).clamp(0.0, 1.0)
    }

    #[inline(always)]
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.steps = 0;
    }
}

/// Fixed timestep iterator (zero-allocation, capped catch-up).
pub struct FixedTimestepIter<'a> {
    clock: &'a mut StepClock,
    remaining: u32,
}

impl Iterator for FixedTimestepIter<'_> {
    type Item = f32;
    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> {
        if self.clock.accumulator >= self.clock.fixed_dt && self.remaining > 0 {
            self.clock.accumulator -= self.clock.fixed_dt;
            self.clock.steps += 1;
            self.remaining -= 1;
            Some(self.clock.fixed_dt)
        } else {
            None
        }
    }
}

impl Drop for FixedTimestepIter<'_> {
    fn drop(&mut self) {
        // Whatever the cap left behind is dropped rather than carried into later frames.
        if self.remaining == 0 && self.clock.accumulator >= self.clock.fixed_dt {
            self.clock.accumulator %= self.clock.fixed_dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banks_partial_frames() {
        let mut clock = StepClock::new(0.01, 5);
        assert_eq!(clock.advance(0.004).count(), 0);
        assert_eq!(clock.advance(0.004).count(), 0);
        assert_eq!(clock.advance(0.004).count(), 1);
        assert!((clock.pending() - 0.002).abs() < 1.0e-6);
        assert_eq!(clock.steps(), 1);
    }

    #[test]
    fn catch_up_is_capped() {
        let mut clock = StepClock::new(1.0 / 60.0, 5);
        assert_eq!(clock.advance(0.2).count(), 5);
        assert!(clock.pending() < clock.fixed_dt());
        assert_eq!(clock.advance(0.0).count(), 0);
    }

    #[test]
    fn ignores_bad_deltas() {
        let mut clock = StepClock::new(1.0 / 60.0, 5);
        assert_eq!(clock.advance(f32::NAN).count(), 0);
        assert_eq!(clock.advance(-1.0).count(), 0);
        assert_eq!(clock.pending(), 0.0);
    }
}
