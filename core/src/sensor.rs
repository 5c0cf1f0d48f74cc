//! Pedometer baseline tracking.
//!
//! Step counter sensors report a cumulative count since device boot. Relative
//! steps are that count minus a baseline captured on the first observation
//! after process start (or after the baseline is re-armed by a reset).

/// The outcome of feeding one raw counter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PedometerReading {
    pub relative_steps: u32,
    /// Set when this observation captured a new baseline.
    pub captured_baseline: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pedometer {
    baseline: Option<f64>,
}

impl Pedometer {
    #[must_use]
    pub const fn new() -> Self {
        Self { baseline: None }
    }

    #[must_use]
    pub const fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Forget the baseline; the next observation captures a new one.
    pub fn rearm(&mut self) {
        self.baseline = None;
    }

    /// Convert a raw counter value into relative steps.
    ///
    /// Non-finite and negative values count as zero. A value below the
    /// baseline means the counter restarted (device reboot), so the baseline
    /// is captured again.
    pub fn observe(&mut self, raw: f64) -> PedometerReading {
        let raw = if raw.is_finite() { raw.max(0.0) } else { 0.0 };

        let captured_baseline = match self.baseline {
            Some(baseline) if raw >= baseline => None,
            _ => {
                self.baseline = Some(raw);
                Some(raw)
            }
        };
        let baseline = self.baseline.unwrap_or(raw);

        PedometerReading {
            // Float-to-int `as` saturates.
            relative_steps: (raw - baseline).floor() as u32,
            captured_baseline,
        }
    }
}
