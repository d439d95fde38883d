//! RFC2544 throughput search driving a traffic generator session.
//!
//! Unlike [`MultipleLossRatioSearch`][crate::MultipleLossRatioSearch] this
//! search does not run trials itself. The caller starts it with
//! [`Rfc2544Profile::execute`], waits for the trial to finish, collects the
//! port counters and hands them to [`Rfc2544Profile::get_drop_percentage`],
//! which evaluates the trial and starts the next one. The caller decides when
//! to stop.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProfileConfig;
use crate::pg_id::PortPgIdMap;
use crate::report::LatencySummary;
use crate::search::BoxError;
use crate::util::{round5, round_to};

mod imix;
pub use imix::{calculate_frame_size, create_imix_data, parse_frame_size};

/// Errors from driving a traffic generator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfileError {
    /// The generator has no ports to send on.
    #[error("traffic generator has no ports")]
    NoPorts,

    /// A generator call failed.
    #[error("traffic generator: {0}")]
    Generator(#[source] BoxError),
}

/// A stateful traffic generator session.
///
/// One session serves one [`Rfc2544Profile`]. Calls are blocking.
pub trait TrafficGenerator {
    /// Ports owned by this session.
    fn my_ports(&self) -> Vec<u16>;

    /// Install streams on `ports`.
    fn add_streams(&mut self, profile: &StreamProfile, ports: &[u16]) -> Result<(), BoxError>;

    /// Start traffic on `ports` for `duration`.
    ///
    /// `mult` scales the configured stream rates, e.g. `"0.5"` sends at half
    /// rate. With `force` any running traffic is replaced.
    fn start(
        &mut self,
        ports: &[u16],
        mult: &str,
        duration: Duration,
        force: bool,
    ) -> Result<(), BoxError>;

    /// Reset the counters of `ports`.
    fn clear_stats(&mut self, ports: &[u16]) -> Result<(), BoxError>;
}

impl<G: TrafficGenerator + ?Sized> TrafficGenerator for &mut G {
    fn my_ports(&self) -> Vec<u16> {
        (**self).my_ports()
    }

    fn add_streams(&mut self, profile: &StreamProfile, ports: &[u16]) -> Result<(), BoxError> {
        (**self).add_streams(profile, ports)
    }

    fn start(
        &mut self,
        ports: &[u16],
        mult: &str,
        duration: Duration,
        force: bool,
    ) -> Result<(), BoxError> {
        (**self).start(ports, mult, duration, force)
    }

    fn clear_stats(&mut self, ports: &[u16]) -> Result<(), BoxError> {
        (**self).clear_stats(ports)
    }
}

/// One stream of a given frame size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub frame_size: u32,
    /// Share of the port's packets, in percent.
    pub percentage: f64,
    /// Rate at multiplier 1.
    pub pps: f64,
    /// Packet group id for latency, if collected.
    pub pg_id: Option<u32>,
    pub flows: u64,
}

/// Streams installed on one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub port: u16,
    pub streams: Vec<StreamSpec>,
}

impl StreamProfile {
    /// Sum of the stream rates at multiplier 1.
    pub fn pps(&self) -> f64 {
        self.streams.iter().map(|s| s.pps).sum()
    }
}

/// Counters of one port for the last trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSample {
    pub in_packets: u64,
    pub out_packets: u64,
    #[serde(rename = "RxThroughput")]
    pub rx_throughput: f64,
    #[serde(rename = "TxThroughput")]
    pub tx_throughput: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
}

/// Port counters keyed by interface name.
pub type PortSamples = BTreeMap<String, PortSample>;

/// Whether the search should go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Running,
    Completed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running => write!(f, "Running"),
            Status::Completed => write!(f, "Completed"),
        }
    }
}

/// Outcome of evaluating one trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DropSample {
    /// Sum of transmit throughput over the ports.
    pub tx_throughput: f64,
    /// Sum of receive throughput over the ports.
    pub rx_throughput: f64,
    /// Drop of the last trial, in percent.
    pub current_drop_percentage: f64,
    /// Best throughput found so far.
    pub throughput: f64,
    /// Drop, in percent, at the best throughput.
    pub drop_percentage: f64,
    /// Port latencies averaged, when the ports report any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
}

/// Bisection of the generator rate against a drop tolerance band.
#[derive(Debug, Clone)]
pub struct Rfc2544Profile {
    config: ProfileConfig,
    rate: f64,
    max_rate: f64,
    min_rate: f64,
    first_run: bool,
    tmp_throughput: f64,
    tmp_drop: f64,
    ports: Vec<u16>,
    port_pg_id: PortPgIdMap,
    profiles: BTreeMap<u16, StreamProfile>,
}

impl Rfc2544Profile {
    pub fn new(config: ProfileConfig) -> Self {
        Rfc2544Profile {
            rate: config.frame_rate,
            max_rate: config.frame_rate,
            min_rate: 0.0,
            first_run: true,
            tmp_throughput: 0.0,
            tmp_drop: 0.0,
            ports: vec![],
            port_pg_id: PortPgIdMap::new(),
            profiles: BTreeMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Rate of the running trial, per port.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn max_rate(&self) -> f64 {
        self.max_rate
    }

    pub fn min_rate(&self) -> f64 {
        self.min_rate
    }

    /// Whether no trial has been evaluated yet.
    pub fn first_run(&self) -> bool {
        self.first_run
    }

    /// Best passing throughput so far.
    pub fn throughput(&self) -> f64 {
        self.tmp_throughput
    }

    /// Drop in percent at [`Rfc2544Profile::throughput`].
    pub fn drop_percentage(&self) -> f64 {
        self.tmp_drop
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Packet group ids of the installed streams.
    pub fn port_pg_id(&self) -> &PortPgIdMap {
        &self.port_pg_id
    }

    /// Streams installed on `port`.
    pub fn profile(&self, port: u16) -> Option<&StreamProfile> {
        self.profiles.get(&port)
    }

    /// Start the search with a trial at the full configured rate.
    ///
    /// Streams are installed on the generator ports the first time around.
    pub fn execute<G: TrafficGenerator>(&mut self, generator: &mut G) -> Result<(), ProfileError> {
        if self.profiles.is_empty() {
            self.ports = generator.my_ports();
            if self.ports.is_empty() {
                return Err(ProfileError::NoPorts);
            }

            self.port_pg_id = PortPgIdMap::new();
            for port in self.ports.clone() {
                self.port_pg_id.add_port(port);
                let profile = self.create_profile(port);
                generator
                    .add_streams(&profile, &[port])
                    .map_err(ProfileError::Generator)?;
                self.profiles.insert(port, profile);
            }
        }

        self.max_rate = self.rate;
        self.min_rate = 0.0;
        self.tmp_throughput = 0.0;
        self.tmp_drop = 0.0;

        let mult = self.multiplier(self.rate);
        info!("Start traffic at rate {} (multiplier {})", self.rate, mult);
        self.restart(generator, &mult)
    }

    /// Evaluate the finished trial from `samples` and start the next one.
    ///
    /// A trial passes when its drop, in percent, is at most `tolerance`. A
    /// drop below `tol_min` continues the search upwards, a drop above
    /// `tolerance` downwards. A drop inside `[tol_min, tolerance]` ends the
    /// search, no new trial is started.
    pub fn get_drop_percentage<G: TrafficGenerator>(
        &mut self,
        generator: &mut G,
        samples: &PortSamples,
        tol_min: f64,
        tolerance: f64,
    ) -> Result<(Status, DropSample), ProfileError> {
        let mut in_packets = 0_u64;
        let mut out_packets = 0_u64;
        let mut rx_throughput = 0.0;
        let mut tx_throughput = 0.0;

        for sample in samples.values() {
            in_packets += sample.in_packets;
            out_packets += sample.out_packets;
            rx_throughput += sample.rx_throughput;
            tx_throughput += sample.tx_throughput;
        }

        let drop_percent = if out_packets == 0 {
            warn!("No traffic is flowing");
            100.0
        } else {
            round5(in_packets.abs_diff(out_packets) as f64 / out_packets as f64 * 100.0)
        };

        if self.config.correlated_traffic {
            rx_throughput *= 2.0;
        }
        let rx_throughput = round_to(rx_throughput, 2);
        let mut output = DropSample {
            tx_throughput: round_to(tx_throughput, 2),
            rx_throughput,
            current_drop_percentage: drop_percent,
            throughput: self.tmp_throughput,
            drop_percentage: self.tmp_drop,
            latency: average_latency(samples),
        };

        if drop_percent > tolerance && self.tmp_throughput == 0.0 {
            output.throughput = rx_throughput;
            output.drop_percentage = drop_percent;
        }

        let mut status = Status::Running;
        if self.first_run {
            // Rates are per port, like the stream rates the multiplier scales.
            let ports = samples.len().max(1) as f64;
            self.rate = out_packets as f64 / ports / self.config.trial_duration.as_secs_f64();
            self.max_rate = self.max_rate.max(self.rate);
            self.first_run = false;
            if drop_percent <= tolerance {
                status = Status::Completed;
            }
        }

        debug!(
            "Drop {}% at rate {}, interval [{}, {}]",
            drop_percent, self.rate, self.min_rate, self.max_rate
        );

        if drop_percent > tolerance {
            self.max_rate = self.rate;
        } else if drop_percent < tol_min {
            self.min_rate = self.rate;
            if drop_percent >= self.tmp_drop {
                self.tmp_drop = drop_percent;
                self.tmp_throughput = rx_throughput;
                output.throughput = rx_throughput;
                output.drop_percentage = drop_percent;
            }
        } else {
            output.throughput = rx_throughput;
            output.drop_percentage = drop_percent;
            return Ok((status, output));
        }

        let mult = self.get_multiplier();
        generator
            .clear_stats(&self.ports)
            .map_err(ProfileError::Generator)?;
        self.restart(generator, &mult)?;

        Ok((status, output))
    }

    /// [`Rfc2544Profile::get_drop_percentage`] with the configured tolerance band.
    pub fn update<G: TrafficGenerator>(
        &mut self,
        generator: &mut G,
        samples: &PortSamples,
    ) -> Result<(Status, DropSample), ProfileError> {
        let (low, high) = (self.config.tolerance_low, self.config.tolerance_high);
        self.get_drop_percentage(generator, samples, low, high)
    }

    /// Move the rate to the middle of the interval, returns the generator multiplier.
    pub fn get_multiplier(&mut self) -> String {
        self.rate = round_to((self.max_rate + self.min_rate) / 2.0, 2);
        self.multiplier(self.rate)
    }

    /// Rate per port and multiplier of a latency trial at half `throughput`.
    pub fn calculate_pps(&self, throughput: f64) -> (f64, f64) {
        let pps = round_to(throughput / 2.0, 2);
        let multiplier = if pps == 0.0 {
            0.0
        } else {
            round_to(self.rate / pps, 2)
        };
        (pps, multiplier)
    }

    /// Start a latency trial at half of `throughput`.
    ///
    /// Installs one latency tagged stream per frame size on every port.
    pub fn execute_latency<G: TrafficGenerator>(
        &mut self,
        generator: &mut G,
        throughput: f64,
    ) -> Result<(), ProfileError> {
        if self.ports.is_empty() {
            self.ports = generator.my_ports();
            if self.ports.is_empty() {
                return Err(ProfileError::NoPorts);
            }
        }

        let (pps, multiplier) = self.calculate_pps(throughput);
        info!("Latency trial at {} pps, multiplier {}", pps, multiplier);

        let imix = create_imix_data(&self.config.framesize);
        let mut pg_ids = PortPgIdMap::new();

        for port in self.ports.clone() {
            pg_ids.add_port(port);
            let streams = imix
                .iter()
                .map(|(size, percentage)| StreamSpec {
                    frame_size: *size,
                    percentage: *percentage,
                    pps: pps * percentage / 100.0,
                    pg_id: pg_ids.increase_pg_id(Some(port)),
                    flows: self.config.flows,
                })
                .collect();
            let profile = StreamProfile { port, streams };
            generator
                .add_streams(&profile, &[port])
                .map_err(ProfileError::Generator)?;
        }
        self.port_pg_id = pg_ids;

        generator
            .clear_stats(&self.ports)
            .map_err(ProfileError::Generator)?;
        self.restart(generator, &format!("{:?}", multiplier))
    }

    fn create_profile(&mut self, port: u16) -> StreamProfile {
        let imix = create_imix_data(&self.config.framesize);

        let streams = imix
            .into_iter()
            .map(|(frame_size, percentage)| {
                let pg_id = if self.config.enable_latency {
                    self.port_pg_id.increase_pg_id(Some(port))
                } else {
                    None
                };
                StreamSpec {
                    frame_size,
                    percentage,
                    pps: self.config.pps * percentage / 100.0,
                    pg_id,
                    flows: self.config.flows,
                }
            })
            .collect();

        StreamProfile { port, streams }
    }

    fn multiplier(&self, rate: f64) -> String {
        format!("{:?}", round_to(rate / self.config.pps, 2))
    }

    fn restart<G: TrafficGenerator>(&self, generator: &mut G, mult: &str) -> Result<(), ProfileError> {
        generator
            .start(&self.ports, mult, self.config.trial_duration, true)
            .map_err(ProfileError::Generator)
    }
}

fn average_latency(samples: &PortSamples) -> Option<LatencySummary> {
    let latencies: Vec<_> = samples.values().filter_map(|s| s.latency).collect();
    if latencies.is_empty() {
        return None;
    }

    let n = latencies.len() as f64;
    let sum = latencies.iter().fold((0.0, 0.0, 0.0), |acc, l| {
        (acc.0 + l.min, acc.1 + l.avg, acc.2 + l.max)
    });

    Some(LatencySummary {
        min: sum.0 / n,
        avg: sum.1 / n,
        max: sum.2 / n,
    })
}
