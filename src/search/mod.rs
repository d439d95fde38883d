//! Multiple loss ratio search.
//!
//! Narrows an NDR (no drop rate) interval and a PDR (partial drop rate)
//! interval at the same time. Every trial is folded into both intervals, so a
//! single measurement often tightens both.
//!
//! The search runs in phases. Intermediate phases use shorter trials and wider
//! width goals, each one twice as wide as the phase after it. The final phase
//! uses the configured final duration and relative width. Within a phase the
//! next trial rate is picked by [`MultipleLossRatioSearch::next_probe`] until
//! nothing is left to do.
//!
//! The search does no I/O of its own, each trial is delegated to a [`Measurer`].

use std::fmt;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::config::SearchConfig;
use crate::interval::ReceiveRateInterval;
use crate::measurement::ReceiveRateMeasurement;
use crate::pg_id::PortPgIdMap;
use crate::report::{check_ndrpdr_interval_validity, display_single_bound};
use crate::report::{LatencySummary, Report, ResultSamples, TestData};
use crate::result::{NdrPdrResult, NDR_LOSS_RATIO};
use crate::SearchError;

pub mod binary;
mod width;

pub use width::{double_relative_width, double_step_down, double_step_up};
pub use width::{expand_down, expand_up, half_relative_width, half_step_up};

/// Error type returned by trial runners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raw outcome of one trial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trial {
    /// Packets offered.
    pub sent: u64,
    /// Packets offered but not received.
    pub loss: u64,
    /// Latency per stream as `"min/avg/max"`. Empty when not asked for.
    pub latency: Vec<String>,
}

/// Runs trials for a search.
///
/// Implementations block until the trial has finished. Calls arrive one at a
/// time in the order the search wants them applied.
pub trait Measurer {
    /// Offer traffic at `transmit_rate` packets per second for `duration`.
    fn measure(
        &mut self,
        duration: Duration,
        transmit_rate: f64,
        latency: bool,
    ) -> Result<Trial, BoxError>;
}

impl<M: Measurer + ?Sized> Measurer for &mut M {
    fn measure(
        &mut self,
        duration: Duration,
        transmit_rate: f64,
        latency: bool,
    ) -> Result<Trial, BoxError> {
        (**self).measure(duration, transmit_rate, latency)
    }
}

impl<M: Measurer + ?Sized> Measurer for Box<M> {
    fn measure(
        &mut self,
        duration: Duration,
        transmit_rate: f64,
        latency: bool,
    ) -> Result<Trial, BoxError> {
        (**self).measure(duration, transmit_rate, latency)
    }
}

/// Working state of a search, threaded through every step.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    /// Current NDR and PDR intervals.
    pub result: NdrPdrResult,
    /// Intermediate phases left before this one. Zero or less is the last.
    pub phases: i32,
    /// Trial duration of the current phase.
    pub duration: Duration,
    /// Relative width goal of the current phase.
    pub width_goal: f64,
    /// Loss ratio tolerated by the PDR lower bound.
    pub packet_loss_ratio: f64,
    /// No trial is ever run below this rate.
    pub minimum_transmit_rate: f64,
    /// No trial is ever run above this rate.
    pub maximum_transmit_rate: f64,
}

impl ProgressState {
    pub fn new(
        result: NdrPdrResult,
        phases: i32,
        duration: Duration,
        width_goal: f64,
        packet_loss_ratio: f64,
        minimum_transmit_rate: f64,
        maximum_transmit_rate: f64,
    ) -> Self {
        ProgressState {
            result,
            phases,
            duration,
            width_goal,
            packet_loss_ratio,
            minimum_transmit_rate,
            maximum_transmit_rate,
        }
    }
}

/// Next trial picked by the search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    /// Target transmit rate.
    pub rate: f64,
    /// Why this trial is needed.
    pub reason: ProbeReason,
}

/// Why a trial is run, in order of priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReason {
    /// NDR lower bound lost packets, look further down.
    NdrLowerExternal,
    /// NDR lower bound at minimum rate is too short.
    NdrLowerMinimal,
    /// PDR lower bound lost too many packets, look further down.
    PdrLowerExternal,
    /// PDR lower bound at minimum rate is too short.
    PdrLowerMinimal,
    /// NDR upper bound lost nothing, look further up.
    NdrUpperExternal,
    /// NDR upper bound at maximum rate is too short.
    NdrUpperMaximal,
    /// PDR upper bound is within the loss ratio, look further up.
    PdrUpperExternal,
    /// PDR upper bound at maximum rate is too short.
    PdrUpperMaximal,
    /// NDR interval is wider than the goal.
    NdrInternal,
    /// PDR interval is wider than the goal.
    PdrInternal,
    /// NDR lower bound needs a trial of the current duration.
    NdrLowerShort,
    /// PDR lower bound needs a trial of the current duration.
    PdrLowerShort,
    /// NDR upper bound needs a trial of the current duration.
    NdrUpperShort,
    /// PDR upper bound needs a trial of the current duration.
    PdrUpperShort,
}

impl fmt::Display for ProbeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ProbeReason::*;
        let s = match self {
            NdrLowerExternal => "NDR lower bound external search",
            NdrLowerMinimal => "NDR lower bound minimal re-measure",
            PdrLowerExternal => "PDR lower bound external search",
            PdrLowerMinimal => "PDR lower bound minimal re-measure",
            NdrUpperExternal => "NDR upper bound external search",
            NdrUpperMaximal => "NDR upper bound maximal re-measure",
            PdrUpperExternal => "PDR upper bound external search",
            PdrUpperMaximal => "PDR upper bound maximal re-measure",
            NdrInternal => "NDR interval internal search",
            PdrInternal => "PDR interval internal search",
            NdrLowerShort => "NDR lower bound re-measure",
            PdrLowerShort => "PDR lower bound re-measure",
            NdrUpperShort => "NDR upper bound re-measure",
            PdrUpperShort => "PDR upper bound re-measure",
        };
        f.write_str(s)
    }
}

/// Where trial reports go, with the test parameters attached to each.
struct Reporter {
    test_data: TestData,
    tx: Sender<Report>,
}

/// Search for NDR and PDR over a [`Measurer`].
///
/// ```
/// use std::time::Duration;
/// use mlrsearch::{Measurer, SearchConfig, Trial};
///
/// // A link that forwards up to 1 Mpps and drops 1% when overloaded.
/// struct Link;
///
/// impl Measurer for Link {
///     fn measure(&mut self, d: Duration, rate: f64, _latency: bool)
///         -> Result<Trial, Box<dyn std::error::Error + Send + Sync>>
///     {
///         let sent = (rate * d.as_secs_f64()).round() as u64;
///         let loss = if rate > 1_000_000.0 { sent / 100 } else { 0 };
///         Ok(Trial { sent, loss, latency: vec![] })
///     }
/// }
///
/// let mut search = SearchConfig::new()
///     .set_final_trial_duration(Duration::from_secs(2))
///     .build(Link)
///     .unwrap();
///
/// let result = search.search(10_000.0, 2_000_000.0, 0.005).unwrap();
/// let ndr = result.ndr_interval();
/// assert!(ndr.measured_low().target_tr() <= 1_000_000.0);
/// assert!(ndr.measured_high().target_tr() > 1_000_000.0);
/// assert!(ndr.rel_tr_width() <= 0.005);
/// ```
pub struct MultipleLossRatioSearch<M> {
    measurer: M,
    config: SearchConfig,
    search_start: Option<Instant>,
    ports: Vec<u16>,
    port_pg_id: PortPgIdMap,
    reporter: Option<Reporter>,
}

impl<M: Measurer> MultipleLossRatioSearch<M> {
    /// Search with the default [`SearchConfig`].
    pub fn new(measurer: M) -> Self {
        Self::new_from_config(SearchConfig::default(), measurer)
    }

    pub(crate) fn new_from_config(config: SearchConfig, measurer: M) -> Self {
        MultipleLossRatioSearch {
            measurer,
            config,
            search_start: None,
            ports: vec![],
            port_pg_id: PortPgIdMap::new(),
            reporter: None,
        }
    }

    /// The configuration of this search.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The trial runner.
    pub fn measurer(&self) -> &M {
        &self.measurer
    }

    /// Mutable access to the trial runner.
    pub fn measurer_mut(&mut self) -> &mut M {
        &mut self.measurer
    }

    /// Take back the trial runner.
    pub fn into_measurer(self) -> M {
        self.measurer
    }

    /// Generator ports the trials run on, as given to [`init_generator`][Self::init_generator].
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Packet group ids of the latency streams on [`ports`][Self::ports].
    pub fn port_pg_id(&self) -> &PortPgIdMap {
        &self.port_pg_id
    }

    /// Bind the search to the generator `ports` and their packet group ids,
    /// and send a [`Report`] for every trial and for the final result to `tx`.
    ///
    /// `test_data` is attached to every trial report.
    pub fn init_generator(
        &mut self,
        ports: Vec<u16>,
        port_pg_id: PortPgIdMap,
        test_data: TestData,
        tx: Sender<Report>,
    ) {
        debug!("Generator ports {:?}", ports);
        for (port, pg_ids) in port_pg_id.iter() {
            debug!("Port {} latency pg ids {:?}", port, pg_ids);
        }
        self.ports = ports;
        self.port_pg_id = port_pg_id;
        self.reporter = Some(Reporter { test_data, tx });
    }

    /// Run one trial and turn its counters into a measurement.
    pub fn measure(
        &mut self,
        duration: Duration,
        transmit_rate: f64,
        latency: bool,
    ) -> Result<ReceiveRateMeasurement, SearchError> {
        let trial = self
            .measurer
            .measure(duration, transmit_rate, latency)
            .map_err(SearchError::Measurer)?;

        let latency = trial
            .latency
            .iter()
            .map(|l| l.parse::<LatencySummary>())
            .collect::<Result<Vec<_>, _>>()?;

        let measurement =
            ReceiveRateMeasurement::new(duration, transmit_rate, trial.sent, trial.loss)?
                .with_latency(latency);

        self.collect_kpi(&measurement);

        Ok(measurement)
    }

    fn collect_kpi(&mut self, measurement: &ReceiveRateMeasurement) {
        let Some(reporter) = &self.reporter else {
            return;
        };

        let report = Report::Trial {
            measurement: measurement.clone(),
            test_data: reporter.test_data.clone(),
        };

        if reporter.tx.send(report).is_err() {
            debug!("Report receiver is gone, stop reporting");
            self.reporter = None;
        }
    }

    fn send_report(&mut self, report: Report) {
        if let Some(reporter) = &self.reporter {
            if reporter.tx.send(report).is_err() {
                debug!("Report receiver is gone, stop reporting");
                self.reporter = None;
            }
        }
    }

    /// Run a trial at `rate` and fold it into both intervals of `state`.
    pub fn measure_and_update_state(
        &mut self,
        state: ProgressState,
        rate: f64,
    ) -> Result<ProgressState, SearchError> {
        info!("Measuring at d={:?},Tr={}", state.duration.as_secs_f64(), rate);

        let measurement = self.measure(state.duration, rate, self.config.latency)?;
        let result = state.result.narrow(&measurement, state.packet_loss_ratio);

        Ok(ProgressState { result, ..state })
    }

    /// Pick the next trial for the current phase, if any.
    ///
    /// Bounds that are invalid are expanded first, then intervals wider than
    /// the goal are bisected, last bounds measured with a shorter duration are
    /// measured again. `None` means the phase is done.
    pub fn next_probe(&self, state: &ProgressState) -> Option<Probe> {
        use ProbeReason::*;

        let ndr = state.result.ndr_interval();
        let pdr = state.result.pdr_interval();
        let (ndr_lo, ndr_hi) = (ndr.measured_low(), ndr.measured_high());
        let (pdr_lo, pdr_hi) = (pdr.measured_low(), pdr.measured_high());

        let plr = state.packet_loss_ratio;
        let min_rate = state.minimum_transmit_rate;
        let max_rate = state.maximum_transmit_rate;
        let doublings = self.config.doublings;

        let mut ndr_rel_width = state.width_goal.max(ndr.rel_tr_width());
        let mut pdr_rel_width = state.width_goal.max(pdr.rel_tr_width());

        let probe = |rate: f64, reason: ProbeReason| Some(Probe { rate, reason });

        // Lower bounds with too much loss.
        if ndr_lo.loss_fraction() > NDR_LOSS_RATIO {
            if ndr_lo.target_tr() > min_rate {
                let rate = expand_down(ndr_rel_width, doublings, ndr_lo.target_tr());
                return probe(min_rate.max(rate), NdrLowerExternal);
            }
            if ndr_lo.duration() < state.duration {
                return probe(min_rate, NdrLowerMinimal);
            }
        }
        if pdr_lo.loss_fraction() > plr {
            if pdr_lo.target_tr() > min_rate {
                let rate = expand_down(pdr_rel_width, doublings, pdr_lo.target_tr());
                return probe(min_rate.max(rate), PdrLowerExternal);
            }
            if pdr_lo.duration() < state.duration {
                return probe(min_rate, PdrLowerMinimal);
            }
        }

        // Upper bounds without enough loss.
        if ndr_hi.loss_fraction() <= NDR_LOSS_RATIO {
            if ndr_hi.target_tr() < max_rate {
                let rate = expand_up(ndr_rel_width, doublings, ndr_hi.target_tr());
                return probe(max_rate.min(rate), NdrUpperExternal);
            }
            if ndr_hi.duration() < state.duration {
                return probe(max_rate, NdrUpperMaximal);
            }
        }
        if pdr_hi.loss_fraction() <= plr {
            if pdr_hi.target_tr() < max_rate {
                let rate = expand_up(pdr_rel_width, doublings, pdr_hi.target_tr());
                return probe(max_rate.min(rate), PdrUpperExternal);
            }
            if pdr_hi.duration() < state.duration {
                return probe(max_rate, PdrUpperMaximal);
            }
        }

        // Nothing left to bisect when a bound sits on the search limit.
        if ndr_lo.target_tr() <= min_rate && ndr_lo.loss_fraction() > NDR_LOSS_RATIO {
            ndr_rel_width = 0.0;
        }
        if ndr_hi.target_tr() >= max_rate && ndr_hi.loss_fraction() <= NDR_LOSS_RATIO {
            ndr_rel_width = 0.0;
        }
        if pdr_lo.target_tr() <= min_rate && pdr_lo.loss_fraction() > plr {
            pdr_rel_width = 0.0;
        }
        if pdr_hi.target_tr() >= max_rate && pdr_hi.loss_fraction() <= plr {
            pdr_rel_width = 0.0;
        }

        // NDR first, a trial inside the NDR interval can only move the PDR
        // upper bound.
        if ndr_rel_width > state.width_goal {
            return probe(half_step_up(ndr_rel_width, ndr_lo.target_tr()), NdrInternal);
        }
        if pdr_rel_width > state.width_goal {
            return probe(half_step_up(pdr_rel_width, pdr_lo.target_tr()), PdrInternal);
        }

        if ndr_lo.duration() < state.duration {
            return probe(ndr_lo.target_tr(), NdrLowerShort);
        }
        if pdr_lo.duration() < state.duration {
            return probe(pdr_lo.target_tr(), PdrLowerShort);
        }
        // Upper bounds at a search limit with loss need no re-measure.
        if ndr_rel_width > 0.0 && ndr_hi.duration() < state.duration {
            return probe(ndr_hi.target_tr(), NdrUpperShort);
        }
        if pdr_rel_width > 0.0 && pdr_hi.duration() < state.duration {
            return probe(pdr_hi.target_tr(), PdrUpperShort);
        }

        None
    }

    /// Run the phase of `state` to completion, preceded by all its
    /// intermediate phases.
    ///
    /// Fails with [`SearchError::Timeout`] once the time budget is used up.
    /// The budget starts with the enclosing [`search`][Self::search], or
    /// with this call when made on its own.
    pub fn ndrpdr(&mut self, state: ProgressState) -> Result<ProgressState, SearchError> {
        let owner = self.search_start.is_none();
        if owner {
            self.search_start = Some(Instant::now());
        }

        let result = self.run_phases(state);

        if owner {
            self.search_start = None;
        }
        result
    }

    fn run_phases(&mut self, mut state: ProgressState) -> Result<ProgressState, SearchError> {
        let start = *self.search_start.get_or_insert_with(Instant::now);

        if state.phases > 0 {
            let earlier = self.earlier_phase(&state)?;
            state.result = self.run_phases(earlier)?.result;
        }

        info!(
            "Starting phase with d={:?}, width goal {}, phases left {}",
            state.duration.as_secs_f64(),
            state.width_goal,
            state.phases
        );

        loop {
            if start.elapsed() >= self.config.timeout {
                return Err(SearchError::Timeout);
            }

            debug!(
                "Width in goals: {}",
                state.result.width_in_goals(self.config.final_relative_width)
            );

            let Some(probe) = self.next_probe(&state) else {
                break;
            };

            debug!("{}: {}", probe.reason, probe.rate);
            state = self.measure_and_update_state(state, probe.rate)?;
        }

        info!("Phase done: {}", state.result);

        Ok(state)
    }

    /// The phase before the one of `state`: one phase fewer, shorter trials
    /// and twice the relative width goal.
    fn earlier_phase(&self, state: &ProgressState) -> Result<ProgressState, SearchError> {
        let phases = state.phases - 1;
        Ok(ProgressState {
            phases,
            duration: self.phase_duration(state.duration, phases, state.phases)?,
            width_goal: double_relative_width(state.width_goal),
            ..state.clone()
        })
    }

    /// Duration of an earlier phase, between initial and final duration on a
    /// geometric scale.
    fn phase_duration(
        &self,
        duration: Duration,
        phases: i32,
        saved_phases: i32,
    ) -> Result<Duration, SearchError> {
        let initial = self.config.initial_trial_duration.as_secs_f64();
        let multiplier = duration.as_secs_f64() / initial;
        let exponent = f64::from(phases) / f64::from(saved_phases);
        let secs = initial * multiplier.powf(exponent);

        Duration::try_from_secs_f64(secs).map_err(|_| SearchError::InvalidDuration(secs))
    }

    /// Find NDR and PDR between `minimum_transmit_rate` and `maximum_transmit_rate`.
    ///
    /// `packet_loss_ratio` is the loss fraction tolerated for PDR.
    pub fn search(
        &mut self,
        minimum_transmit_rate: f64,
        maximum_transmit_rate: f64,
        packet_loss_ratio: f64,
    ) -> Result<NdrPdrResult, SearchError> {
        self.search_start = Some(Instant::now());
        let result = self.run_search(
            minimum_transmit_rate,
            maximum_transmit_rate,
            packet_loss_ratio,
        );
        self.search_start = None;
        result
    }

    fn run_search(
        &mut self,
        minimum_transmit_rate: f64,
        maximum_transmit_rate: f64,
        packet_loss_ratio: f64,
    ) -> Result<NdrPdrResult, SearchError> {
        let initial_duration = self.config.initial_trial_duration;
        let latency = self.config.latency;

        let mut initial_width_goal = self.config.final_relative_width;
        for _ in 0..self.config.number_of_intermediate_phases {
            initial_width_goal = double_relative_width(initial_width_goal);
        }

        let line_measurement = self.measure(initial_duration, maximum_transmit_rate, latency)?;

        // Probe just below what the line measurement managed to receive.
        let max_lo = maximum_transmit_rate * (1.0 - initial_width_goal);
        let mrr = minimum_transmit_rate.max(max_lo.min(line_measurement.receive_rate()));
        let mrr_measurement = self.measure(initial_duration, mrr, latency)?;

        let mrr2 = if mrr_measurement.loss_fraction() > 0.0 {
            (mrr * (1.0 - initial_width_goal)).min(mrr_measurement.receive_rate())
        } else {
            mrr / (1.0 - initial_width_goal)
        };

        let starting_interval =
            if mrr2 > minimum_transmit_rate && mrr2 < maximum_transmit_rate {
                let mrr2_measurement = self.measure(initial_duration, mrr2, latency)?;
                ReceiveRateInterval::new(mrr2_measurement, mrr_measurement)
            } else {
                ReceiveRateInterval::new(mrr_measurement, line_measurement)
            };
        debug!("Starting interval {}", starting_interval);

        let state = ProgressState::new(
            NdrPdrResult::new(starting_interval.clone(), starting_interval),
            self.config.number_of_intermediate_phases as i32,
            self.config.final_trial_duration,
            self.config.final_relative_width,
            packet_loss_ratio,
            minimum_transmit_rate,
            maximum_transmit_rate,
        );

        let state = self.ndrpdr(state)?;

        info!("Search done: {}", state.result);

        Ok(state.result)
    }

    /// Search and format the result for reporting.
    ///
    /// The returned map has `Result_NDR_LOWER`, `Result_NDR_UPPER`,
    /// `Result_PDR_LOWER`, `Result_PDR_UPPER`, `Result_NDR_packets_lost`,
    /// `Result_PDR_packets_lost` and one latency entry per stream for each lower
    /// bound. The map is also sent on the report channel, if any.
    pub fn narrow_down_ndr_and_pdr(
        &mut self,
        minimum_transmit_rate: f64,
        maximum_transmit_rate: f64,
        packet_loss_ratio: f64,
    ) -> Result<ResultSamples, SearchError> {
        let result = self.search(
            minimum_transmit_rate,
            maximum_transmit_rate,
            packet_loss_ratio,
        )?;

        let samples = self.result_samples(&result, packet_loss_ratio);
        self.send_report(Report::Result(samples.clone()));

        Ok(samples)
    }

    fn result_samples(&self, result: &NdrPdrResult, packet_loss_ratio: f64) -> ResultSamples {
        let pkt_size = self.config.pkt_size;
        let ndr = result.ndr_interval();
        let pdr = result.pdr_interval();
        let mut samples = ResultSamples::new();

        let bounds = [
            ("NDR_LOWER", ndr.measured_low(), true),
            ("NDR_UPPER", ndr.measured_high(), false),
            ("PDR_LOWER", pdr.measured_low(), true),
            ("PDR_UPPER", pdr.measured_high(), false),
        ];

        for (label, bound, with_latency) in bounds {
            let latency = if with_latency { bound.latency() } else { &[] };
            display_single_bound(&mut samples, label, bound.receive_rate(), pkt_size, latency);
        }

        let checks = [("PDR", pdr, packet_loss_ratio), ("NDR", ndr, NDR_LOSS_RATIO)];
        for (label, interval, target) in checks {
            let msg = check_ndrpdr_interval_validity(&mut samples, label, interval, target);
            if interval.measured_low().loss_fraction() > target {
                warn!("{}: {}", label, msg);
            } else {
                info!("{}: {}", label, msg);
            }
        }

        samples
    }

    /// Run one more trial with latency at the NDR lower bound rate.
    pub fn perform_additional_measurements_based_on_ndrpdr_result(
        &mut self,
        result: &NdrPdrResult,
    ) -> Result<ReceiveRateMeasurement, SearchError> {
        let rate = result.ndr_interval().measured_low().target_tr();
        let duration = self.config.final_trial_duration;

        let measurement = self.measure(duration, rate, true)?;

        info!("Additional measurement at NDR lower bound: {}", measurement);
        for (index, latency) in measurement.latency().iter().enumerate() {
            info!("Stream {} latency min/avg/max: {}", index, latency);
        }

        Ok(measurement)
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::sync::mpsc;

    use super::*;
    use crate::report::ResultValue;

    /// Replays canned trials, recording what was asked for.
    #[derive(Default)]
    struct Scripted {
        trials: VecDeque<Trial>,
        calls: Vec<(Duration, f64, bool)>,
    }

    impl Scripted {
        fn push(&mut self, sent: u64, loss: u64) {
            self.trials.push_back(Trial {
                sent,
                loss,
                latency: vec![],
            });
        }
    }

    impl Measurer for Scripted {
        fn measure(
            &mut self,
            duration: Duration,
            rate: f64,
            latency: bool,
        ) -> Result<Trial, BoxError> {
            self.calls.push((duration, rate, latency));
            self.trials.pop_front().ok_or_else(|| "no more trials".into())
        }
    }

    /// Lossless up to 14879927 pps, no matter what rate is asked for.
    struct LineRate;

    impl Measurer for LineRate {
        fn measure(&mut self, d: Duration, _rate: f64, _latency: bool) -> Result<Trial, BoxError> {
            let sent = (14_879_927.0 * d.as_secs_f64()).round() as u64;
            Ok(Trial {
                sent,
                loss: 0,
                latency: vec!["1/2/3".into()],
            })
        }
    }

    /// Lossless like [`LineRate`], recording trial durations.
    #[derive(Default)]
    struct Timed(Vec<Duration>);

    impl Measurer for Timed {
        fn measure(&mut self, d: Duration, rate: f64, latency: bool) -> Result<Trial, BoxError> {
            self.0.push(d);
            LineRate.measure(d, rate, latency)
        }
    }

    fn m(d: u64, rate: f64, sent: u64, loss: u64) -> ReceiveRateMeasurement {
        ReceiveRateMeasurement::new(Duration::from_secs(d), rate, sent, loss).unwrap()
    }

    fn state(ndr: ReceiveRateInterval, pdr: ReceiveRateInterval, phases: i32) -> ProgressState {
        ProgressState::new(
            NdrPdrResult::new(ndr, pdr),
            phases,
            Duration::from_secs(30),
            0.005,
            0.0,
            14880000.0,
            14880000.0,
        )
    }

    #[test]
    fn measure_builds_measurement() {
        let mut measurer = Scripted::default();
        measurer.push(102563094, 30502);
        let mut search = MultipleLossRatioSearch::new(&mut measurer);

        let m = search
            .measure(Duration::from_secs(30), 3418770.3425, true)
            .unwrap();

        assert_eq!(m.transmit_rate(), 3418769.8);
        assert_eq!(m.loss_rate(), 1016.73333);
        assert_eq!(m.receive_rate(), 3417753.06667);
        assert_eq!(m.loss_fraction(), 0.0003);
        assert_eq!(measurer.calls, vec![(Duration::from_secs(30), 3418770.3425, true)]);
    }

    #[test]
    fn measure_propagates_measurer_error() {
        let mut search = MultipleLossRatioSearch::new(Scripted::default());
        let err = search.measure(Duration::from_secs(1), 1.0, false).unwrap_err();
        assert!(matches!(err, SearchError::Measurer(_)));
        assert_eq!(err.to_string(), "measurer: no more trials");
    }

    #[test]
    fn measure_rejects_bad_latency() {
        struct BadLatency;
        impl Measurer for BadLatency {
            fn measure(&mut self, _: Duration, _: f64, _: bool) -> Result<Trial, BoxError> {
                Ok(Trial {
                    sent: 1,
                    loss: 0,
                    latency: vec!["fast".into()],
                })
            }
        }

        let mut search = MultipleLossRatioSearch::new(BadLatency);
        let err = search.measure(Duration::from_secs(1), 1.0, true).unwrap_err();
        assert!(matches!(err, SearchError::Latency(_)));
    }

    #[test]
    fn measure_and_update_state_moves_invalid_lower_bound() {
        let mut measurer = Scripted::default();
        measurer.push(4626100, 13074);
        let mut search = MultipleLossRatioSearch::new(&mut measurer);

        let interval = ReceiveRateInterval::new(
            m(1, 4857361.0, 4857339, 84965),
            m(1, 4977343.0, 4977320, 119959),
        );
        let before = state(interval.clone(), interval, 2);

        let after = search
            .measure_and_update_state(before.clone(), 4626121.09635)
            .unwrap();

        let ndr = after.result.ndr_interval();
        assert_eq!(ndr.measured_low().target_tr(), 4626121.09635);
        assert_eq!(ndr.measured_high().target_tr(), 4857361.0);
        assert_eq!(after.result.pdr_interval(), ndr);
        assert_eq!(after.phases, before.phases);
        assert_eq!(after.duration, before.duration);
        assert_eq!(after.width_goal, before.width_goal);
    }

    #[test]
    fn ndrpdr_converged_state_runs_no_trial() {
        let mut measurer = Scripted::default();
        let mut search = MultipleLossRatioSearch::new(&mut measurer);

        let interval = ReceiveRateInterval::new(
            m(30, 14880000.0, 14880000, 0),
            m(30, 14880000.0, 14880000, 0),
        );
        let before = state(interval.clone(), interval, -1);

        let after = search.ndrpdr(before.clone()).unwrap();

        assert_eq!(after, before);
        assert!(measurer.calls.is_empty());
    }

    #[test]
    fn ndrpdr_zero_timeout() {
        let config = SearchConfig::new().set_timeout(Duration::ZERO);
        let mut search = config.build(Scripted::default()).unwrap();

        let interval = ReceiveRateInterval::new(
            m(30, 14880000.0, 14880000, 0),
            m(30, 14880000.0, 14880000, 0),
        );

        let err = search.ndrpdr(state(interval.clone(), interval, -1)).unwrap_err();
        assert!(err.to_string().contains("Optimized search takes too long."));
    }

    #[test]
    fn search_start_cleared_after_search() {
        let config = SearchConfig::new().set_timeout(Duration::from_millis(200));
        let mut search = config.build(LineRate).unwrap();

        search.search(14880000.0, 14880000.0, 0.0).unwrap();
        assert_eq!(search.search_start, None);

        // A later phase run has a time budget of its own.
        std::thread::sleep(Duration::from_millis(250));
        let interval = ReceiveRateInterval::new(
            m(30, 14880000.0, 14880000, 0),
            m(30, 14880000.0, 14880000, 0),
        );
        assert!(search.ndrpdr(state(interval.clone(), interval, -1)).is_ok());
        assert_eq!(search.search_start, None);

        let mut search = SearchConfig::new()
            .set_timeout(Duration::ZERO)
            .build(LineRate)
            .unwrap();
        let err = search.search(14880000.0, 14880000.0, 0.0).unwrap_err();
        assert!(matches!(err, SearchError::Timeout));
        assert_eq!(search.search_start, None);
    }

    #[test]
    fn earlier_phases_shorten_and_widen() {
        let search = MultipleLossRatioSearch::new(Scripted::default());
        let interval = ReceiveRateInterval::new(
            m(1, 14880000.0, 14880000, 0),
            m(1, 14880000.0, 14880000, 0),
        );
        let last = state(interval.clone(), interval, 2);

        let middle = search.earlier_phase(&last).unwrap();
        assert_eq!(middle.phases, 1);
        assert!((middle.duration.as_secs_f64() - 30f64.sqrt()).abs() < 1e-6);
        assert_eq!(middle.width_goal, double_relative_width(0.005));
        assert_eq!(middle.result, last.result);

        let first = search.earlier_phase(&middle).unwrap();
        assert_eq!(first.phases, 0);
        assert_eq!(first.duration, Duration::from_secs(1));
        assert_eq!(
            first.width_goal,
            double_relative_width(double_relative_width(0.005))
        );
    }

    #[test]
    fn ndrpdr_restores_final_phase() {
        let mut search = MultipleLossRatioSearch::new(LineRate);
        let interval = ReceiveRateInterval::new(
            m(1, 14880000.0, 14880000, 0),
            m(1, 14880000.0, 14880000, 0),
        );

        let after = search.ndrpdr(state(interval.clone(), interval, 2)).unwrap();

        assert_eq!(after.phases, 2);
        assert_eq!(after.duration, Duration::from_secs(30));
        assert_eq!(after.width_goal, 0.005);
        assert_eq!(
            after.result.ndr_interval().measured_low().duration(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn phases_run_from_initial_to_final_duration() {
        let mut measurer = Timed::default();
        let mut search = MultipleLossRatioSearch::new(&mut measurer);

        let result = search.search(14880000.0, 14880000.0, 0.0).unwrap();
        assert_eq!(
            result.ndr_interval().measured_low().duration(),
            Duration::from_secs(30)
        );

        let secs: Vec<f64> = measurer.0.iter().map(Duration::as_secs_f64).collect();
        assert!(secs.windows(2).all(|w| w[0] <= w[1]), "{secs:?}");

        let mut phases = secs.clone();
        phases.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
        assert_eq!(phases.len(), 3, "{secs:?}");
        assert_eq!(phases[0], 1.0);
        assert!((phases[1] - 30f64.sqrt()).abs() < 1e-6, "{secs:?}");
        assert_eq!(phases[2], 30.0);
    }

    #[test]
    fn probe_priorities() {
        let search = MultipleLossRatioSearch::new(Scripted::default());

        // Lossy lower bound above the minimum rate expands downwards.
        let lossy = ReceiveRateInterval::new(m(30, 100000.0, 100000, 10), m(30, 200000.0, 200000, 50));
        let mut s = state(lossy.clone(), lossy, -1);
        s.minimum_transmit_rate = 10000.0;
        s.maximum_transmit_rate = 1000000.0;

        let p = search.next_probe(&s).unwrap();
        assert_eq!(p.reason, ProbeReason::NdrLowerExternal);
        assert!((p.rate - expand_down(0.5, 1, 100000.0)).abs() < 1e-6);

        // Lossless upper bound below the maximum rate expands upwards.
        let clean = ReceiveRateInterval::new(m(30, 100000.0, 100000, 0), m(30, 101000.0, 101000, 0));
        let mut s = state(clean.clone(), clean, -1);
        s.minimum_transmit_rate = 10000.0;
        s.maximum_transmit_rate = 1000000.0;

        let p = search.next_probe(&s).unwrap();
        assert_eq!(p.reason, ProbeReason::NdrUpperExternal);
        assert!(p.rate > 101000.0);

        // Proper bracket wider than the goal is bisected.
        let wide = ReceiveRateInterval::new(m(30, 100000.0, 100000, 0), m(30, 200000.0, 200000, 50));
        let mut s = state(wide.clone(), wide, -1);
        s.minimum_transmit_rate = 10000.0;
        s.maximum_transmit_rate = 1000000.0;

        let p = search.next_probe(&s).unwrap();
        assert_eq!(p.reason, ProbeReason::NdrInternal);
        assert!((p.rate - half_step_up(0.5, 100000.0)).abs() < 1e-6);

        // Narrow bracket measured too briefly is measured again.
        let short = ReceiveRateInterval::new(m(1, 100000.0, 100000, 0), m(30, 100400.0, 100400, 50));
        let mut s = state(short.clone(), short, -1);
        s.minimum_transmit_rate = 10000.0;
        s.maximum_transmit_rate = 1000000.0;

        let p = search.next_probe(&s).unwrap();
        assert_eq!(p.reason, ProbeReason::NdrLowerShort);
        assert_eq!(p.rate, 100000.0);
    }

    #[test]
    fn probe_none_when_limits_reached() {
        let search = MultipleLossRatioSearch::new(Scripted::default());

        // Loss even at the minimum rate, already measured long enough.
        let lossy = ReceiveRateInterval::new(m(30, 10000.0, 10000, 10), m(30, 20000.0, 20000, 50));
        let mut s = state(lossy.clone(), lossy, -1);
        s.minimum_transmit_rate = 10000.0;
        s.maximum_transmit_rate = 1000000.0;
        s.packet_loss_ratio = 0.0;

        assert_eq!(search.next_probe(&s), None);
    }

    #[test]
    fn narrow_down_degenerate_interval() {
        let config = SearchConfig::new().set_latency(true);
        let mut search = config.build(LineRate).unwrap();

        let samples = search
            .narrow_down_ndr_and_pdr(14880000.0, 14880000.0, 0.0)
            .unwrap();

        let Some(ResultValue::Rate(ndr)) = samples.get("Result_NDR_LOWER") else {
            panic!("no NDR lower bound");
        };
        assert_eq!(ndr.rate_total_pps, 14879927.0);
        assert!((ndr.bandwidth_total_gbps - 9.999310944).abs() < 1e-9);

        for key in [
            "Result_NDR_UPPER",
            "Result_PDR_LOWER",
            "Result_PDR_UPPER",
            "Result_NDR_packets_lost",
            "Result_PDR_packets_lost",
            "Result_stream0_NDR_LOWER",
            "Result_stream0_PDR_LOWER",
        ] {
            assert!(samples.contains_key(key), "missing {key}");
        }
        assert!(!samples.contains_key("Result_stream0_NDR_UPPER"));
    }

    #[test]
    fn reports_trials_and_result() {
        let (tx, rx) = mpsc::channel();
        let mut search = MultipleLossRatioSearch::new(LineRate);
        let test_data = TestData {
            packet_size: 64,
            ..Default::default()
        };
        let mut pg_ids = PortPgIdMap::new();
        pg_ids.add_port(0);
        pg_ids.add_port(1);
        pg_ids.increase_pg_id(Some(0));
        search.init_generator(vec![0, 1], pg_ids.clone(), test_data.clone(), tx);
        assert_eq!(search.ports(), &[0, 1]);
        assert_eq!(search.port_pg_id(), &pg_ids);

        let samples = search
            .narrow_down_ndr_and_pdr(14880000.0, 14880000.0, 0.0)
            .unwrap();
        drop(search);

        let reports: Vec<Report> = rx.iter().collect();
        let (last, trials) = reports.split_last().unwrap();

        assert_eq!(last, &Report::Result(samples));
        assert!(!trials.is_empty());
        for r in trials {
            let Report::Trial { test_data: t, .. } = r else {
                panic!("expected trial report");
            };
            assert_eq!(t, &test_data);
        }
    }

    #[test]
    fn closed_report_channel_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);

        let mut search = MultipleLossRatioSearch::new(LineRate);
        search.init_generator(vec![0], PortPgIdMap::new(), TestData::default(), tx);

        assert!(search.narrow_down_ndr_and_pdr(14880000.0, 14880000.0, 0.0).is_ok());
    }

    #[test]
    fn additional_measurement_asks_for_latency() {
        let mut measurer = Scripted::default();
        measurer.push(1000, 0);
        let mut search = MultipleLossRatioSearch::new(&mut measurer);

        let interval = ReceiveRateInterval::new(m(30, 500.0, 15000, 0), m(30, 600.0, 18000, 10));
        let result = NdrPdrResult::new(interval.clone(), interval);

        let measurement = search
            .perform_additional_measurements_based_on_ndrpdr_result(&result)
            .unwrap();

        assert_eq!(measurement.target_tr(), 500.0);
        assert_eq!(measurer.calls, vec![(Duration::from_secs(30), 500.0, true)]);
    }
}
