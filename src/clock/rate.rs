use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("negative time jump of the measured clock")]
pub struct NegativeTimeJump;

/// Ratio between the rates of two clocks, estimated from successive
/// simultaneous readings of both.
#[derive(Debug, Clone, Default)]
pub struct RateRatioEstimator {
    previous: Option<(Timestamp, Timestamp)>,
}

impl RateRatioEstimator {
    /// Feed a new pair of readings and return `Δmeasured / Δreference`
    /// since the previous pair.
    ///
    /// The first pair after construction or a reset yields 1.0. A reading
    /// of `measured` that lies before the previous one resets the estimator.
    pub fn update(
        &mut self,
        measured: Timestamp,
        reference: Timestamp,
    ) -> Result<f64, NegativeTimeJump> {
        let Some((prev_measured, prev_reference)) = self.previous else {
            self.previous = Some((measured, reference));
            return Ok(1.0);
        };

        let inter_measured = measured.nanos_since(&prev_measured);
        if inter_measured < 0 {
            self.previous = None;
            return Err(NegativeTimeJump);
        }

        let inter_reference = reference.nanos_since(&prev_reference);
        self.previous = Some((measured, reference));
        if inter_reference == 0 {
            Ok(1.0)
        } else {
            Ok(inter_measured as f64 / inter_reference as f64)
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
