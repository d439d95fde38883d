//! Plain bisection over a percentage of line rate.
//!
//! Used when the rate is given as a percentage rather than in packets per
//! second. There is a single interval, a trial passes when its loss in percent
//! stays within the tolerance.

use std::time::Duration;

use super::Measurer;
use crate::report::{bandwidth_gbps, ResultSamples, ResultValue, ThroughputSample};
use crate::SearchError;

/// Bisection state between a lower and an upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct BinarySearch {
    lower_bound: f64,
    upper_bound: f64,
    precision: f64,
    current_lower: f64,
    current_upper: f64,
    started: bool,
}

impl BinarySearch {
    pub fn new(lower_bound: f64, upper_bound: f64, precision: f64) -> Self {
        BinarySearch {
            lower_bound,
            upper_bound,
            precision,
            current_lower: lower_bound,
            current_upper: upper_bound,
            started: false,
        }
    }

    pub fn current_lower(&self) -> f64 {
        self.current_lower
    }

    pub fn current_upper(&self) -> f64 {
        self.current_upper
    }

    /// Width of the remaining interval.
    pub fn delta(&self) -> f64 {
        self.current_upper - self.current_lower
    }

    pub fn mid_point(&self) -> f64 {
        (self.current_lower + self.current_upper) / 2.0
    }

    /// Start over from the configured bounds.
    pub fn reset(&mut self) {
        self.current_lower = self.lower_bound;
        self.current_upper = self.upper_bound;
        self.started = false;
    }

    /// Next value to test, `None` once the interval is narrower than the precision.
    ///
    /// The upper bound is tested first, then the mid point of what remains.
    /// Bisection also ends when the mid point no longer lies strictly inside
    /// the interval, which bounds the number of steps for any precision.
    pub fn next_value(&mut self) -> Option<f64> {
        if self.delta().abs() < self.precision {
            return None;
        }

        let value = if self.started {
            let mid = self.mid_point();
            if !(mid > self.current_lower && mid < self.current_upper) {
                return None;
            }
            mid
        } else {
            self.started = true;
            self.current_upper
        };

        debug!(
            "New interval [{}, {}), precision: {}",
            self.current_lower, self.current_upper, self.precision
        );

        Some(value)
    }

    /// Record the outcome of testing `value`.
    pub fn record(&mut self, value: f64, passed: bool) {
        if passed {
            debug!("Success! Increasing lower bound");
            self.current_lower = value;
        } else {
            debug!("Failure... Decreasing upper bound");
            self.current_upper = value;
        }
    }

    /// Bisect with trials of `duration` on `measurer`.
    ///
    /// Values are percent of `line_rate`. A trial passes when its loss, in
    /// percent of sent packets, is at most `tolerance`. The last passing trial
    /// is reported as `Result_PDR`.
    pub fn run<M: Measurer>(
        &mut self,
        measurer: &mut M,
        duration: Duration,
        line_rate: f64,
        tolerance: f64,
        pkt_size: u32,
    ) -> Result<ResultSamples, SearchError> {
        self.reset();
        let mut samples = ResultSamples::new();

        while let Some(value) = self.next_value() {
            let rate = line_rate * value / 100.0;
            info!("Testing with value {} ({} pps)", value, rate);

            let trial = measurer
                .measure(duration, rate, false)
                .map_err(SearchError::Measurer)?;

            let loss_ratio = if trial.sent == 0 {
                100.0
            } else {
                trial.loss as f64 / trial.sent as f64 * 100.0
            };

            let passed = loss_ratio <= tolerance;
            self.record(value, passed);

            if passed {
                let rate_total = trial.sent as f64 / duration.as_secs_f64();
                let sample = ThroughputSample {
                    rate_total_pps: rate_total,
                    bandwidth_total_gbps: bandwidth_gbps(rate_total, pkt_size),
                    packet_loss_ratio: loss_ratio,
                    packets_lost: trial.loss as f64,
                };
                samples.insert("Result_PDR".into(), ResultValue::Throughput(sample));
            }
        }

        Ok(samples)
    }
}
