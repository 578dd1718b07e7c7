//! Frequency and phase steering of the local clock
//!
//! A proportional-integral controller turns each measured offset to the
//! master into a frequency adjustment in parts per million. When a new
//! grandmaster is adopted the phase is stepped once instead.

use tracing::{debug, error, info, warn};

use crate::timestamper::ClockAdjust;

/// Phase error in nanoseconds that counts as a violation
pub const PHASE_ERROR_THRESHOLD: f64 = 1e9;
/// Consecutive violations after which the phase is stepped again
pub const PHASE_ERROR_MAX_COUNT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoConfig {
    pub syntonize: bool,
    pub integral: f64,
    pub proportional: f64,
    pub upper_freq_limit: f32,
    pub lower_freq_limit: f32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        ServoConfig {
            syntonize: true,
            integral: 0.0024,
            proportional: 1.0,
            upper_freq_limit: 250.0,
            lower_freq_limit: -250.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ServoError {
    #[error("clock rate adjustment of {ppm} ppm was rejected")]
    RateAdjustment { ppm: f32 },
    #[error("clock phase step of {offset} ns was rejected")]
    PhaseAdjustment { offset: i64 },
}

#[derive(Debug, Clone)]
pub struct Servo {
    config: ServoConfig,
    ppm: f32,
    new_set_point: bool,
    phase_error_violations: u32,
}

impl Servo {
    pub fn new(config: ServoConfig) -> Self {
        Servo {
            config,
            ppm: 0.0,
            new_set_point: true,
            phase_error_violations: 0,
        }
    }

    /// Step the phase on the next adjustment instead of slewing
    pub fn request_set_point(&mut self) {
        self.new_set_point = true;
    }

    pub fn set_point_pending(&self) -> bool {
        self.new_set_point
    }

    /// Last frequency adjustment that was applied, in ppm
    pub fn ppm(&self) -> f32 {
        self.ppm
    }

    /// Apply one measurement. `master_local_offset` is local minus master
    /// time in nanoseconds, `master_local_freq_offset` the master rate
    /// relative to the local clock. A rejected phase step fails the whole
    /// adjustment and stays pending.
    pub fn adjust_phase_error(
        &mut self,
        clock: &mut dyn ClockAdjust,
        master_local_offset: i64,
        master_local_freq_offset: f64,
    ) -> Result<f32, ServoError> {
        if !self.config.syntonize {
            return Ok(self.ppm);
        }

        let mut offset = master_local_offset;

        if (offset as f64).abs() > PHASE_ERROR_THRESHOLD {
            self.phase_error_violations += 1;
            if self.phase_error_violations > PHASE_ERROR_MAX_COUNT {
                warn!(offset, "persistent phase error, stepping clock");
                self.new_set_point = true;
            }
        } else {
            self.phase_error_violations = 0;
        }

        if self.new_set_point {
            if !clock.suspend_transmission() {
                warn!("could not suspend transmission for phase step");
            }
            let step = offset.saturating_neg();
            let stepped = clock.adjust_clock_phase(step);
            if !clock.resume_transmission() {
                warn!("could not resume transmission after phase step");
            }

            if !stepped {
                warn!(offset = step, "could not step clock phase");
                return Err(ServoError::PhaseAdjustment { offset: step });
            }
            info!(offset = step, "stepped clock phase");
            self.new_set_point = false;
            self.phase_error_violations = 0;
            offset = 0;
        }

        let phase_error = -(offset as f64);
        let ppm = self.ppm as f64
            + self.config.integral * phase_error
            + self.config.proportional * ((master_local_freq_offset - 1.0) * 1e6);
        self.ppm = (ppm as f32).clamp(self.config.lower_freq_limit, self.config.upper_freq_limit);

        debug!(ppm = self.ppm, phase_error, "adjusting clock rate");
        if clock.adjust_clock_rate(self.ppm) {
            Ok(self.ppm)
        } else {
            error!(ppm = self.ppm, "failed to adjust clock rate");
            Err(ServoError::RateAdjustment { ppm: self.ppm })
        }
    }
}
