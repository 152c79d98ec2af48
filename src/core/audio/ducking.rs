//! Ducking controller
//!
//! Holds the ambience gain and ramps it between the nominal and ducked
//! levels. `duck`/`restore` are edge-triggered; `advance` moves the current
//! gain toward the target by at most one step per frame, so the trajectory
//! is monotonic between edges and converges in roughly the configured ramp
//! time at the configured sample rate.

#[derive(Debug)]
pub struct DuckingController {
    current: f32,
    target: f32,
    nominal: f32,
    ducked: f32,
    step_per_frame: f32,
}

impl DuckingController {
    pub fn new(nominal: f32, ducked: f32, ramp_ms: u32, sample_rate: u32) -> Self {
        let ramp_frames = (sample_rate as f32 * ramp_ms as f32 / 1000.0).max(1.0);
        Self {
            current: nominal,
            target: nominal,
            nominal,
            ducked,
            step_per_frame: (nominal - ducked) / ramp_frames,
        }
    }

    /// Begin ramping down to the ducked level. Idempotent.
    pub fn duck(&mut self) {
        self.target = self.ducked;
    }

    /// Begin ramping back to the nominal level. Idempotent.
    pub fn restore(&mut self) {
        self.target = self.nominal;
    }

    /// Advance one frame and return the gain to apply.
    pub fn advance(&mut self) -> f32 {
        if self.current < self.target {
            self.current = (self.current + self.step_per_frame).min(self.target);
        } else if self.current > self.target {
            self.current = (self.current - self.step_per_frame).max(self.target);
        }
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}
