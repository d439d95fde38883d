//! Result records handed to reporting.
//!
//! A finished search is summarized as a flat map from `Result_*` keys to small
//! records of plain floats. During the search every trial can additionally be
//! pushed to an ordered one-way channel as a [`Report`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interval::ReceiveRateInterval;
use crate::measurement::ReceiveRateMeasurement;

/// Bytes of preamble and inter-frame gap accounted per frame on the wire.
pub const FRAME_OVERHEAD: u32 = 20;

/// Flat result map keyed by `Result_*` names.
pub type ResultSamples = BTreeMap<String, ResultValue>;

/// One entry of [`ResultSamples`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    /// Throughput found by a plain binary search, with the loss at that rate.
    Throughput(ThroughputSample),
    /// Rate of a search bound.
    Rate(RateSample),
    /// Loss observed at a lower bound.
    Loss(LossSample),
    /// Latency of one stream at a lower bound.
    Latency(LatencySample),
}

/// Rate of a bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    /// Aggregate packets per second.
    pub rate_total_pps: f64,
    /// Aggregate bandwidth including per-frame overhead.
    #[serde(rename = "bandwidth_total_Gbps")]
    pub bandwidth_total_gbps: f64,
}

/// Loss at a bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossSample {
    pub packet_loss_ratio: f64,
    pub packets_lost: f64,
}

/// Latency of a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub avg_latency: f64,
    pub max_latency: f64,
    pub min_latency: f64,
}

/// Rate and loss of a passing binary search trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub rate_total_pps: f64,
    #[serde(rename = "bandwidth_total_Gbps")]
    pub bandwidth_total_gbps: f64,
    /// Loss in percent of transmitted packets.
    pub packet_loss_ratio: f64,
    pub packets_lost: f64,
}

/// Failure to parse a `"min/avg/max"` latency string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("latency must be \"min/avg/max\": {0}")]
pub struct ParseLatencyError(String);

/// Latency of one stream as reported by the generator, `"min/avg/max"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LatencySummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl FromStr for LatencySummary {
    type Err = ParseLatencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let [min, avg, max] = parts.as_slice() else {
            return Err(ParseLatencyError(s.to_string()));
        };

        let num = |v: &str| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| ParseLatencyError(s.to_string()))
        };

        Ok(LatencySummary {
            min: num(*min)?,
            avg: num(*avg)?,
            max: num(*max)?,
        })
    }
}

impl TryFrom<String> for LatencySummary {
    type Error = ParseLatencyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LatencySummary> for String {
    fn from(l: LatencySummary) -> Self {
        l.to_string()
    }
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.min, self.avg, self.max)
    }
}

impl From<LatencySummary> for LatencySample {
    fn from(l: LatencySummary) -> Self {
        LatencySample {
            avg_latency: l.avg,
            max_latency: l.max,
            min_latency: l.min,
        }
    }
}

/// Parameters of the test run, attached to every trial report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestData {
    /// Overall time budget for the test, in seconds.
    pub test_duration: f64,
    /// Requested precision of the search.
    pub test_precision: f64,
    /// Tolerated loss ratio for PDR.
    pub tolerated_loss: f64,
    /// Final trial duration, in seconds.
    pub duration: f64,
    /// Frame size in bytes.
    pub packet_size: u32,
    /// Number of flows per stream.
    pub flows: u64,
}

/// Progress sent on the report channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// One trial finished.
    Trial {
        /// The trial outcome.
        measurement: ReceiveRateMeasurement,
        /// Test parameters for context.
        test_data: TestData,
    },
    /// The search finished with these results.
    Result(ResultSamples),
}

/// Aggregate bandwidth in Gbit/s of `rate` frames per second of `pkt_size` bytes.
pub fn bandwidth_gbps(rate: f64, pkt_size: u32) -> f64 {
    rate * (f64::from(pkt_size) + f64::from(FRAME_OVERHEAD)) * 8.0 / 1e9
}

/// Record the rate of one bound, and the latency of each stream, under `label`.
///
/// Inserts `Result_<label>` and one `Result_stream<N>_<label>` per latency entry.
pub fn display_single_bound(
    samples: &mut ResultSamples,
    label: &str,
    rate_total: f64,
    pkt_size: u32,
    latency: &[LatencySummary],
) {
    let bound = RateSample {
        rate_total_pps: rate_total,
        bandwidth_total_gbps: bandwidth_gbps(rate_total, pkt_size),
    };
    samples.insert(format!("Result_{label}"), ResultValue::Rate(bound));

    for (index, lat) in latency.iter().enumerate() {
        samples.insert(
            format!("Result_stream{index}_{label}"),
            ResultValue::Latency((*lat).into()),
        );
    }
}

/// Check that the lower bound of `interval` reaches the loss `target`.
///
/// Records `Result_<label>_packets_lost` and returns a human readable verdict.
/// Not reaching the target is not an error, the search has already finished.
pub fn check_ndrpdr_interval_validity(
    samples: &mut ResultSamples,
    label: &str,
    interval: &ReceiveRateInterval,
    target: f64,
) -> String {
    let lo = interval.measured_low();
    let loss_fraction = lo.loss_fraction();

    samples.insert(
        format!("Result_{label}_packets_lost"),
        ResultValue::Loss(LossSample {
            packet_loss_ratio: loss_fraction,
            packets_lost: lo.loss_count() as f64,
        }),
    );

    if loss_fraction > target {
        format!(
            "Minimal rate loss fraction {loss_fraction:?} does not reach target {target:?}\n{} packets lost.",
            lo.loss_count()
        )
    } else {
        format!("Minimal rate loss fraction {loss_fraction:?} reach target {target:?}")
    }
}
