use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::interval::ReceiveRateInterval;
use crate::measurement::ReceiveRateMeasurement;
use crate::util::NamedPair;

/// Loss fraction a no drop rate lower bound may have.
pub const NDR_LOSS_RATIO: f64 = 0.0;

/// Joint NDR and PDR state at one point of a search.
///
/// Both intervals are narrowed from the same sequence of trials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NdrPdrResult {
    ndr_interval: ReceiveRateInterval,
    pdr_interval: ReceiveRateInterval,
}

impl NdrPdrResult {
    pub fn new(ndr_interval: ReceiveRateInterval, pdr_interval: ReceiveRateInterval) -> Self {
        NdrPdrResult {
            ndr_interval,
            pdr_interval,
        }
    }

    /// Interval around the no drop rate.
    pub fn ndr_interval(&self) -> &ReceiveRateInterval {
        &self.ndr_interval
    }

    /// Interval around the partial drop rate.
    pub fn pdr_interval(&self) -> &ReceiveRateInterval {
        &self.pdr_interval
    }

    /// Fold one trial into both intervals.
    ///
    /// The NDR interval uses [`NDR_LOSS_RATIO`], the PDR interval uses
    /// `packet_loss_ratio`.
    pub fn narrow(&self, measurement: &ReceiveRateMeasurement, packet_loss_ratio: f64) -> Self {
        NdrPdrResult {
            ndr_interval: self.ndr_interval.narrow(measurement, NDR_LOSS_RATIO),
            pdr_interval: self.pdr_interval.narrow(measurement, packet_loss_ratio),
        }
    }

    /// Progress of both intervals for logging, `"ndr X; pdr Y"`.
    pub fn width_in_goals(&self, relative_width_goal: f64) -> String {
        format!(
            "ndr {:?}; pdr {:?}",
            self.ndr_interval.width_in_goals(relative_width_goal),
            self.pdr_interval.width_in_goals(relative_width_goal)
        )
    }
}

impl<'de> Deserialize<'de> for NdrPdrResult {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        const FIELDS: &[&str] = &["ndr_interval", "pdr_interval"];
        let (ndr, pdr) = d.deserialize_struct(
            "NdrPdrResult",
            FIELDS,
            NamedPair::<ReceiveRateInterval>::new("ndr_interval", "pdr_interval"),
        )?;
        Ok(NdrPdrResult::new(ndr, pdr))
    }
}

impl fmt::Display for NdrPdrResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NDR={};PDR={}", self.ndr_interval, self.pdr_interval)
    }
}
