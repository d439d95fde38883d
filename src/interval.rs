use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::measurement::ReceiveRateMeasurement;
use crate::util::{round5, NamedPair};

/// Two measurements bracketing a rate boundary.
///
/// The low measurement never has a higher target rate than the high one.
/// Construction sorts, so the width accessors are always meaningful.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiveRateInterval {
    measured_low: ReceiveRateMeasurement,
    measured_high: ReceiveRateMeasurement,
}

impl ReceiveRateInterval {
    /// Create a sorted interval from two measurements.
    pub fn new(measured_low: ReceiveRateMeasurement, measured_high: ReceiveRateMeasurement) -> Self {
        let mut interval = ReceiveRateInterval {
            measured_low,
            measured_high,
        };
        interval.sort();
        interval
    }

    /// Swap the bounds if the low one has the higher target rate.
    ///
    /// Equal target rates are left as they are.
    pub fn sort(&mut self) {
        if self.measured_low.target_tr() > self.measured_high.target_tr() {
            std::mem::swap(&mut self.measured_low, &mut self.measured_high);
        }
    }

    /// The bound with the lower target rate.
    pub fn measured_low(&self) -> &ReceiveRateMeasurement {
        &self.measured_low
    }

    /// The bound with the higher target rate.
    pub fn measured_high(&self) -> &ReceiveRateMeasurement {
        &self.measured_high
    }

    /// Absolute difference of the target rates.
    pub fn abs_tr_width(&self) -> f64 {
        self.measured_high.target_tr() - self.measured_low.target_tr()
    }

    /// Width relative to the high target rate.
    pub fn rel_tr_width(&self) -> f64 {
        let high = self.measured_high.target_tr();
        if high == 0.0 {
            return 0.0;
        }
        round5(self.abs_tr_width() / high)
    }

    /// How many times the relative width is wider than `relative_width_goal`.
    ///
    /// Counted in the logarithmic sense halving works in, so each bisection
    /// lowers the result by roughly one half.
    pub fn width_in_goals(&self, relative_width_goal: f64) -> f64 {
        let relative_width = self.rel_tr_width();
        round5((1.0 - relative_width).ln() / (1.0 - relative_width_goal).ln())
    }

    /// Fold a new measurement into this interval.
    ///
    /// `packet_loss_ratio` is the highest loss fraction still accepted for a
    /// lower bound. A measurement only replaces a bound when it tightens the
    /// interval, or when it was taken at the same target rate as a bound.
    pub fn narrow(
        &self,
        measurement: &ReceiveRateMeasurement,
        packet_loss_ratio: f64,
    ) -> ReceiveRateInterval {
        let old_lo = &self.measured_low;
        let old_hi = &self.measured_high;
        let target = measurement.target_tr();
        let lossy = measurement.loss_fraction() > packet_loss_ratio;

        // Same rate as a bound, the newer measurement wins.
        if target == old_lo.target_tr() {
            return Self::new(old_hi.clone(), measurement.clone());
        }
        if target == old_hi.target_tr() {
            return Self::new(old_lo.clone(), measurement.clone());
        }

        if old_lo.loss_fraction() > packet_loss_ratio {
            // The lower bound is invalid, only a lower rate can help.
            if target < old_lo.target_tr() {
                return Self::new(measurement.clone(), old_lo.clone());
            }
        } else if target < old_lo.target_tr() {
            if lossy {
                return Self::new(measurement.clone(), old_hi.clone());
            }
        } else if target > old_hi.target_tr() {
            if old_hi.loss_fraction() <= packet_loss_ratio {
                return Self::new(old_hi.clone(), measurement.clone());
            }
        } else if lossy {
            return Self::new(old_lo.clone(), measurement.clone());
        } else {
            return Self::new(measurement.clone(), old_hi.clone());
        }

        self.clone()
    }
}

impl<'de> Deserialize<'de> for ReceiveRateInterval {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        const FIELDS: &[&str] = &["measured_low", "measured_high"];
        let (low, high) = d.deserialize_struct(
            "ReceiveRateInterval",
            FIELDS,
            NamedPair::<ReceiveRateMeasurement>::new("measured_low", "measured_high"),
        )?;
        Ok(ReceiveRateInterval::new(low, high))
    }
}

impl fmt::Display for ReceiveRateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{};{})", self.measured_low, self.measured_high)
    }
}
