use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::LatencySummary;
use crate::util::{round5, serde_secs};

/// Errors constructing a [`ReceiveRateMeasurement`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MeasurementError {
    /// Nothing was transmitted, so the loss fraction is undefined.
    #[error("transmit count is zero, loss fraction is undefined")]
    ZeroTransmitCount,

    /// The trial reported more lost packets than it transmitted.
    #[error("loss count {loss} exceeds transmit count {transmit}")]
    LossExceedsTransmit {
        /// Packets offered.
        transmit: u64,
        /// Packets reported lost.
        loss: u64,
    },

    /// Trial duration must be positive.
    #[error("trial duration must be positive")]
    ZeroDuration,
}

/// Result of one trial at a target transmit rate.
///
/// All derived values are computed once at construction and rounded to five
/// decimal places. The value is never mutated afterwards, apart from attaching
/// latency figures with [`ReceiveRateMeasurement::with_latency`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrialCounters", into = "TrialCounters")]
pub struct ReceiveRateMeasurement {
    duration: Duration,
    target_tr: f64,
    transmit_count: u64,
    loss_count: u64,
    receive_count: u64,
    transmit_rate: f64,
    loss_rate: f64,
    receive_rate: f64,
    loss_fraction: f64,
    latency: Vec<LatencySummary>,
}

impl ReceiveRateMeasurement {
    /// Create a measurement from raw trial counters.
    ///
    /// Fails with [`MeasurementError::ZeroTransmitCount`] when no packet was offered.
    pub fn new(
        duration: Duration,
        target_tr: f64,
        transmit_count: u64,
        loss_count: u64,
    ) -> Result<Self, MeasurementError> {
        if duration.is_zero() {
            return Err(MeasurementError::ZeroDuration);
        }
        if transmit_count == 0 {
            return Err(MeasurementError::ZeroTransmitCount);
        }
        if loss_count > transmit_count {
            return Err(MeasurementError::LossExceedsTransmit {
                transmit: transmit_count,
                loss: loss_count,
            });
        }

        let secs = duration.as_secs_f64();
        let receive_count = transmit_count - loss_count;

        Ok(ReceiveRateMeasurement {
            duration,
            target_tr,
            transmit_count,
            loss_count,
            receive_count,
            transmit_rate: round5(transmit_count as f64 / secs),
            loss_rate: round5(loss_count as f64 / secs),
            receive_rate: round5(receive_count as f64 / secs),
            loss_fraction: round5(loss_count as f64 / transmit_count as f64),
            latency: vec![],
        })
    }

    /// Attach per-stream latency figures gathered during the trial.
    pub fn with_latency(mut self, latency: Vec<LatencySummary>) -> Self {
        self.latency = latency;
        self
    }

    /// Trial duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Requested aggregate transmit rate in packets per second.
    pub fn target_tr(&self) -> f64 {
        self.target_tr
    }

    /// Packets actually offered.
    pub fn transmit_count(&self) -> u64 {
        self.transmit_count
    }

    /// Packets offered but not received.
    pub fn loss_count(&self) -> u64 {
        self.loss_count
    }

    /// Packets received.
    pub fn receive_count(&self) -> u64 {
        self.receive_count
    }

    /// Offered packets per second.
    pub fn transmit_rate(&self) -> f64 {
        self.transmit_rate
    }

    /// Lost packets per second.
    pub fn loss_rate(&self) -> f64 {
        self.loss_rate
    }

    /// Received packets per second.
    pub fn receive_rate(&self) -> f64 {
        self.receive_rate
    }

    /// Lost packets relative to offered packets.
    pub fn loss_fraction(&self) -> f64 {
        self.loss_fraction
    }

    /// Latency per stream, empty unless the trial asked for latency.
    pub fn latency(&self) -> &[LatencySummary] {
        &self.latency
    }
}

impl fmt::Display for ReceiveRateMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "d={:?},Tr={:?},Df={:?}",
            self.duration.as_secs_f64(),
            self.target_tr,
            self.loss_fraction
        )
    }
}

/// Wire form of a measurement, only the counters. Derived values are
/// recomputed when reading it back.
#[derive(Serialize, Deserialize)]
struct TrialCounters {
    #[serde(with = "serde_secs")]
    duration: Duration,
    target_tr: f64,
    transmit_count: u64,
    loss_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    latency: Vec<LatencySummary>,
}

impl TryFrom<TrialCounters> for ReceiveRateMeasurement {
    type Error = MeasurementError;

    fn try_from(c: TrialCounters) -> Result<Self, Self::Error> {
        let m = ReceiveRateMeasurement::new(c.duration, c.target_tr, c.transmit_count, c.loss_count)?;
        Ok(m.with_latency(c.latency))
    }
}

impl From<ReceiveRateMeasurement> for TrialCounters {
    fn from(m: ReceiveRateMeasurement) -> Self {
        TrialCounters {
            duration: m.duration,
            target_tr: m.target_tr,
            transmit_count: m.transmit_count,
            loss_count: m.loss_count,
            latency: m.latency,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn derived_values() {
        let m = ReceiveRateMeasurement::new(secs(1), 4857361.0, 4857339, 84965).unwrap();

        assert_eq!(m.receive_count(), 4772374);
        assert_eq!(m.transmit_rate(), 4857339.0);
        assert_eq!(m.loss_rate(), 84965.0);
        assert_eq!(m.receive_rate(), 4772374.0);
        assert_eq!(m.loss_fraction(), 0.01749);
    }

    #[test]
    fn rates_are_rounded() {
        let m = ReceiveRateMeasurement::new(secs(30), 14880000.0, 14879927, 0).unwrap();
        assert_eq!(m.receive_rate(), 495997.56667);
        assert_eq!(m.loss_fraction(), 0.0);
    }

    #[test]
    fn zero_transmit_count() {
        let err = ReceiveRateMeasurement::new(secs(1), 14880000.0, 0, 0).unwrap_err();
        assert_eq!(err, MeasurementError::ZeroTransmitCount);
    }

    #[test]
    fn loss_above_transmit() {
        let err = ReceiveRateMeasurement::new(secs(1), 100.0, 10, 11).unwrap_err();
        assert!(matches!(err, MeasurementError::LossExceedsTransmit { .. }));
    }

    #[test]
    fn display() {
        let m = ReceiveRateMeasurement::new(secs(1), 4857361.0, 4857339, 84965).unwrap();
        assert_eq!(m.to_string(), "d=1.0,Tr=4857361.0,Df=0.01749");
    }
}
