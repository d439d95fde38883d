//! Throughput search for network benchmarking in Sans I/O style.
//!
//! Finds the NDR (no drop rate) and PDR (partial drop rate) of a system under
//! test, the highest rates at which it forwards traffic without loss, and with
//! at most a tolerated loss ratio.
//!
//! This is a [Sans I/O][sansio] implementation. The search never sends a
//! packet itself. Every trial is delegated to a [`Measurer`] supplied by the
//! caller, typically an adapter over a hardware or software traffic generator.
//! Calls are blocking and strictly sequential.
//!
//! # Multiple loss ratio search
//!
//! [`MultipleLossRatioSearch`] narrows two intervals at once, one for NDR and
//! one for PDR, from a single sequence of trials. It starts with short trials
//! and coarse interval widths and ends with trials of the final duration, until
//! both intervals are narrower than the configured relative width.
//!
//! ```
//! use std::time::Duration;
//! use mlrsearch::sim::{LinkConfig, SimulatedLink};
//! use mlrsearch::SearchConfig;
//!
//! // 10 Mpps of capacity, no random loss.
//! let link = SimulatedLink::new(LinkConfig::new().capacity(10_000_000.0));
//!
//! let mut search = SearchConfig::new()
//!     .set_final_trial_duration(Duration::from_secs(5))
//!     .build(link)
//!     .unwrap();
//!
//! let samples = search.narrow_down_ndr_and_pdr(10_000.0, 14_880_000.0, 0.005).unwrap();
//!
//! assert!(samples.contains_key("Result_NDR_LOWER"));
//! assert!(samples.contains_key("Result_PDR_packets_lost"));
//! ```
//!
//! # RFC2544 profile
//!
//! [`Rfc2544Profile`][profile::Rfc2544Profile] is a simpler single interval
//! search that drives a [`TrafficGenerator`][profile::TrafficGenerator] session
//! directly. Every call to
//! [`get_drop_percentage`][profile::Rfc2544Profile::get_drop_percentage]
//! evaluates the last trial and starts the next one.
//!
//! # Logging
//!
//! The crate logs through [`tracing`]. Every trial is logged at `info`, the
//! internal decisions at `debug`.
//!
//! [sansio]: https://sans-io.readthedocs.io

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

#[macro_use]
extern crate tracing;

use thiserror::Error;

mod config;
pub use config::{ProfileConfig, SearchConfig};

mod measurement;
pub use measurement::ReceiveRateMeasurement;

mod interval;
pub use interval::ReceiveRateInterval;

mod result;
pub use result::{NdrPdrResult, NDR_LOSS_RATIO};

pub mod search;
pub use search::{Measurer, MultipleLossRatioSearch, ProgressState, Trial};

pub mod report;

mod pg_id;
pub use pg_id::PortPgIdMap;

pub mod profile;

pub mod sim;

mod util;

/// Various error types.
pub mod error {
    pub use crate::config::ConfigError;
    pub use crate::measurement::MeasurementError;
    pub use crate::profile::ProfileError;
    pub use crate::report::ParseLatencyError;
    pub use crate::search::BoxError;
}

/// Errors ending a search.
///
/// None of these are retried. A failed search has no partial result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    /// The time budget of the search is used up.
    #[error("Optimized search takes too long.")]
    Timeout,

    /// A trial produced counters that make no measurement.
    #[error("{0}")]
    Measurement(#[from] error::MeasurementError),

    /// A trial reported latency in an unknown format.
    #[error("{0}")]
    Latency(#[from] error::ParseLatencyError),

    /// The measurer failed running a trial.
    #[error("measurer: {0}")]
    Measurer(#[source] error::BoxError),

    /// An intermediate phase duration could not be computed.
    #[error("invalid trial duration: {0} seconds")]
    InvalidDuration(f64),
}
