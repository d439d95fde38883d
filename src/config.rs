use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::binary::BinarySearch;
use crate::search::{Measurer, MultipleLossRatioSearch};
use crate::util::serde_secs;

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A trial duration of zero.
    #[error("{0} must be positive")]
    ZeroDuration(&'static str),

    /// Relative width outside `(0, 1)`.
    #[error("relative width must be within (0, 1): {0}")]
    RelativeWidth(f64),

    /// An allowed drop rate that is not `"<low> - <high>"` percent.
    #[error("allowed drop rate must be \"<low> - <high>\": {0}")]
    DropRate(String),

    /// The final phase would be shorter than the first.
    #[error("final trial duration {final_:?} is shorter than initial {initial:?}")]
    FinalShorterThanInitial {
        /// Configured first phase duration.
        initial: Duration,
        /// Configured last phase duration.
        final_: Duration,
    },

    /// Binary search bounds that are unordered, not finite, or with a
    /// precision that is not positive.
    #[error("binary search bounds [{lower}, {upper}] with precision {precision}")]
    Bounds {
        lower: f64,
        upper: f64,
        precision: f64,
    },
}

/// Configuration of a [`MultipleLossRatioSearch`].
///
/// ```
/// use std::time::Duration;
/// use mlrsearch::SearchConfig;
///
/// let config = SearchConfig::new()
///     .set_pkt_size(128)
///     .set_final_trial_duration(Duration::from_secs(10))
///     .set_timeout(Duration::from_secs(600));
///
/// assert_eq!(config.pkt_size(), 128);
/// ```
///
/// The config can also be read from any serde format, durations are given in
/// float seconds and every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub(crate) latency: bool,
    pub(crate) pkt_size: u32,
    #[serde(with = "serde_secs")]
    pub(crate) final_trial_duration: Duration,
    pub(crate) final_relative_width: f64,
    pub(crate) number_of_intermediate_phases: u32,
    #[serde(with = "serde_secs")]
    pub(crate) initial_trial_duration: Duration,
    #[serde(with = "serde_secs")]
    pub(crate) timeout: Duration,
    pub(crate) doublings: u32,
}

impl SearchConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        SearchConfig::default()
    }

    /// Whether each trial asks the measurer for latency.
    pub fn latency(&self) -> bool {
        self.latency
    }

    /// Request latency figures from every trial.
    ///
    /// Defaults to `false`.
    pub fn set_latency(mut self, enabled: bool) -> Self {
        self.latency = enabled;
        self
    }

    /// Frame size in bytes used for bandwidth figures.
    pub fn pkt_size(&self) -> u32 {
        self.pkt_size
    }

    /// Set the frame size in bytes.
    ///
    /// Defaults to 64.
    pub fn set_pkt_size(mut self, pkt_size: u32) -> Self {
        self.pkt_size = pkt_size;
        self
    }

    /// Trial duration of the final phase.
    pub fn final_trial_duration(&self) -> Duration {
        self.final_trial_duration
    }

    /// Set the trial duration of the final phase.
    ///
    /// Defaults to 30 seconds.
    pub fn set_final_trial_duration(mut self, d: Duration) -> Self {
        self.final_trial_duration = d;
        self
    }

    /// Relative width both intervals must reach in the final phase.
    pub fn final_relative_width(&self) -> f64 {
        self.final_relative_width
    }

    /// Set the target relative width.
    ///
    /// Defaults to 0.005.
    pub fn set_final_relative_width(mut self, width: f64) -> Self {
        self.final_relative_width = width;
        self
    }

    /// Number of shorter, coarser phases before the final one.
    pub fn number_of_intermediate_phases(&self) -> u32 {
        self.number_of_intermediate_phases
    }

    /// Set the number of intermediate phases.
    ///
    /// Each intermediate phase doubles the width goal of the phase after it.
    /// Trial durations grow geometrically from the initial to the final
    /// duration. Defaults to 2.
    pub fn set_number_of_intermediate_phases(mut self, phases: u32) -> Self {
        self.number_of_intermediate_phases = phases;
        self
    }

    /// Trial duration of the first phase.
    pub fn initial_trial_duration(&self) -> Duration {
        self.initial_trial_duration
    }

    /// Set the trial duration of the first phase.
    ///
    /// Defaults to 1 second.
    pub fn set_initial_trial_duration(mut self, d: Duration) -> Self {
        self.initial_trial_duration = d;
        self
    }

    /// Wall clock budget of the whole search.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the wall clock budget of the whole search.
    ///
    /// The search fails with [`SearchError::Timeout`][crate::SearchError::Timeout]
    /// once it is used up. Defaults to 720 seconds.
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How many times a width is doubled when expanding past a bound.
    pub fn doublings(&self) -> u32 {
        self.doublings
    }

    /// Set the number of doublings used when expanding past a bound.
    ///
    /// Defaults to 1.
    pub fn set_doublings(mut self, doublings: u32) -> Self {
        self.doublings = doublings;
        self
    }

    /// Check the values are usable for a search.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_trial_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("initial trial duration"));
        }
        if self.final_trial_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("final trial duration"));
        }
        if self.final_trial_duration < self.initial_trial_duration {
            return Err(ConfigError::FinalShorterThanInitial {
                initial: self.initial_trial_duration,
                final_: self.final_trial_duration,
            });
        }
        let w = self.final_relative_width;
        if !(w > 0.0 && w < 1.0) {
            return Err(ConfigError::RelativeWidth(w));
        }
        Ok(())
    }

    /// Create a [`MultipleLossRatioSearch`] running trials on `measurer`.
    pub fn build<M: Measurer>(self, measurer: M) -> Result<MultipleLossRatioSearch<M>, ConfigError> {
        self.validate()?;
        Ok(MultipleLossRatioSearch::new_from_config(self, measurer))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            latency: false,
            pkt_size: 64,
            final_trial_duration: Duration::from_secs(30),
            final_relative_width: 0.005,
            number_of_intermediate_phases: 2,
            initial_trial_duration: Duration::from_secs(1),
            timeout: Duration::from_secs(720),
            doublings: 1,
        }
    }
}

/// Configuration of an [`Rfc2544Profile`][crate::profile::Rfc2544Profile].
///
/// ```
/// use mlrsearch::ProfileConfig;
///
/// let config = ProfileConfig::new()
///     .set_frame_rate(100.0)
///     .set_framesize("64B", 70)
///     .set_framesize("1518B", 30);
///
/// assert_eq!(config.frame_size(), (500.2, 100));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub(crate) frame_rate: f64,
    pub(crate) pps: f64,
    #[serde(with = "serde_secs")]
    pub(crate) trial_duration: Duration,
    pub(crate) enable_latency: bool,
    pub(crate) correlated_traffic: bool,
    pub(crate) tolerance_low: f64,
    pub(crate) tolerance_high: f64,
    pub(crate) framesize: BTreeMap<String, u32>,
    pub(crate) flows: u64,
    pub(crate) lower_bound: f64,
    pub(crate) upper_bound: f64,
    pub(crate) test_precision: f64,
}

impl ProfileConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        ProfileConfig::default()
    }

    /// Starting rate of the search.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Set the starting rate. Defaults to 100.
    pub fn set_frame_rate(mut self, rate: f64) -> Self {
        self.frame_rate = rate;
        self
    }

    /// Base rate the generator multiplier is relative to.
    pub fn pps(&self) -> f64 {
        self.pps
    }

    /// Set the base rate of the streams. Defaults to 100.
    pub fn set_pps(mut self, pps: f64) -> Self {
        self.pps = pps;
        self
    }

    /// Duration of each generator trial.
    pub fn trial_duration(&self) -> Duration {
        self.trial_duration
    }

    /// Set the duration of each generator trial. Defaults to 30 seconds.
    pub fn set_trial_duration(mut self, d: Duration) -> Self {
        self.trial_duration = d;
        self
    }

    /// Whether latency streams are added.
    pub fn enable_latency(&self) -> bool {
        self.enable_latency
    }

    /// Tag streams with packet group ids to collect latency.
    pub fn set_enable_latency(mut self, enabled: bool) -> Self {
        self.enable_latency = enabled;
        self
    }

    /// Whether traffic is only measured in one direction.
    pub fn correlated_traffic(&self) -> bool {
        self.correlated_traffic
    }

    /// Count received throughput twice, for traffic looped back through the
    /// device and measured in one direction only.
    pub fn set_correlated_traffic(mut self, enabled: bool) -> Self {
        self.correlated_traffic = enabled;
        self
    }

    /// Drop in percent below which the rate goes up.
    pub fn tolerance_low(&self) -> f64 {
        self.tolerance_low
    }

    /// Drop in percent above which the rate goes down.
    pub fn tolerance_high(&self) -> f64 {
        self.tolerance_high
    }

    /// Set the accepted drop band in percent. The bounds are sorted.
    ///
    /// Defaults to `0.0001 - 0.0001`.
    pub fn set_tolerance(mut self, low: f64, high: f64) -> Self {
        self.tolerance_low = low.min(high);
        self.tolerance_high = low.max(high);
        self
    }

    /// Set the accepted drop band from a string like `"0.001 - 0.01"`.
    ///
    /// A single value is used for both bounds.
    pub fn set_allowed_drop_rate(self, drop_rate: &str) -> Result<Self, ConfigError> {
        let err = || ConfigError::DropRate(drop_rate.to_string());

        let values = drop_rate
            .split('-')
            .map(|t| t.trim().parse::<f64>().map_err(|_| err()))
            .collect::<Result<Vec<_>, _>>()?;

        match values.as_slice() {
            [v] => Ok(self.set_tolerance(*v, *v)),
            [low, high] => Ok(self.set_tolerance(*low, *high)),
            _ => Err(err()),
        }
    }

    /// IMIX weights keyed by size, like `"64B"`.
    pub fn framesize(&self) -> &BTreeMap<String, u32> {
        &self.framesize
    }

    /// Set the weight of one frame size. A weight of zero removes it.
    pub fn set_framesize(mut self, size: &str, weight: u32) -> Self {
        if weight == 0 {
            self.framesize.remove(size);
        } else {
            self.framesize.insert(size.to_string(), weight);
        }
        self
    }

    /// Average frame size and weight sum of the IMIX.
    pub fn frame_size(&self) -> (f64, u64) {
        crate::profile::calculate_frame_size(&self.framesize)
    }

    /// Flows per stream.
    pub fn flows(&self) -> u64 {
        self.flows
    }

    /// Set the number of flows per stream. Defaults to 1.
    pub fn set_flows(mut self, flows: u64) -> Self {
        self.flows = flows;
        self
    }

    /// Set the range and precision of a plain binary search, in percent of line rate.
    ///
    /// Defaults to `[1, 100]` with precision 1. The bounds must be finite and
    /// ordered, the precision positive.
    pub fn set_bounds(
        mut self,
        lower: f64,
        upper: f64,
        precision: f64,
    ) -> Result<Self, ConfigError> {
        let finite = lower.is_finite() && upper.is_finite() && precision.is_finite();
        if !finite || lower > upper || precision <= 0.0 {
            return Err(ConfigError::Bounds {
                lower,
                upper,
                precision,
            });
        }
        self.lower_bound = lower;
        self.upper_bound = upper;
        self.test_precision = precision;
        Ok(self)
    }

    /// Plain binary search over the configured bounds.
    pub fn binary_search(&self) -> BinarySearch {
        BinarySearch::new(self.lower_bound, self.upper_bound, self.test_precision)
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            frame_rate: 100.0,
            pps: 100.0,
            trial_duration: Duration::from_secs(30),
            enable_latency: false,
            correlated_traffic: false,
            tolerance_low: 0.0001,
            tolerance_high: 0.0001,
            framesize: BTreeMap::from([("64B".to_string(), 100)]),
            flows: 1,
            lower_bound: 1.0,
            upper_bound: 100.0,
            test_precision: 1.0,
        }
    }
}
