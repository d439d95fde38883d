//! Simulated system under test.
//!
//! [`SimulatedLink`] forwards traffic up to a capacity and drops the excess,
//! optionally with random loss on top. It stands in for a traffic generator
//! and device pair in tests and examples, both as a [`Measurer`] and as a
//! [`TrafficGenerator`].
//!
//! ```
//! use std::time::Duration;
//! use mlrsearch::sim::{LinkConfig, Probability, SimulatedLink};
//! use mlrsearch::Measurer;
//!
//! let mut link = SimulatedLink::new(
//!     LinkConfig::new()
//!         .capacity(1000.0)
//!         .loss(Probability::new(0.01))
//!         .seed(42),
//! );
//!
//! let trial = link.measure(Duration::from_secs(1), 2000.0, false).unwrap();
//! assert_eq!(trial.sent, 2000);
//! assert!(trial.loss >= 1000);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use fastrand::Rng;

use crate::profile::{PortSample, PortSamples, StreamProfile, TrafficGenerator};
use crate::report::LatencySummary;
use crate::search::{BoxError, Measurer, Trial};

/// Probability in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Probability(pub f32);

impl Probability {
    pub const ZERO: Probability = Probability(0.0);
    pub const ONE: Probability = Probability(1.0);

    pub fn new(value: f32) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&value),
            "Probability must be in 0.0..=1.0"
        );
        Probability(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

/// Configuration of a [`SimulatedLink`].
///
/// Default: unlimited capacity, no loss, no latency, ports 0 and 1, seed 0.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub(crate) capacity: Option<f64>,
    pub(crate) loss: Probability,
    pub(crate) latency: Option<LatencySummary>,
    pub(crate) ports: Vec<u16>,
    pub(crate) seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self {
            capacity: None,
            loss: Probability::ZERO,
            latency: None,
            ports: vec![0, 1],
            seed: 0,
        }
    }

    /// Set the highest rate, in packets per second, forwarded without loss.
    ///
    /// Everything offered above it is dropped. For a generator session this
    /// applies per port.
    pub fn capacity(mut self, pps: f64) -> Self {
        self.capacity = Some(pps);
        self
    }

    /// Set the probability that a forwarded packet is lost anyway.
    ///
    /// The actual loss of a trial varies randomly around the expected value.
    pub fn loss(mut self, probability: Probability) -> Self {
        self.loss = probability;
        self
    }

    /// Set the latency reported for trials that ask for it.
    pub fn latency(mut self, latency: LatencySummary) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set the ports of the generator session.
    pub fn ports(mut self, ports: &[u16]) -> Self {
        self.ports = ports.to_vec();
        self
    }

    /// Set seed for the random number generator.
    ///
    /// The same seed gives the same losses for the same trials.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Running {
    ports: Vec<u16>,
    mult: f64,
    duration: Duration,
}

/// A capacity limited, optionally lossy, link.
#[derive(Debug)]
pub struct SimulatedLink {
    config: LinkConfig,
    rng: Rng,
    trials: Vec<(Duration, f64)>,
    streams: BTreeMap<u16, Vec<StreamProfile>>,
    running: Option<Running>,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new(LinkConfig::default())
    }
}

impl SimulatedLink {
    pub fn new(config: LinkConfig) -> Self {
        let rng = Rng::with_seed(config.seed);
        SimulatedLink {
            config,
            rng,
            trials: vec![],
            streams: BTreeMap::new(),
            running: None,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Duration and offered rate of every trial measured so far.
    pub fn trials(&self) -> &[(Duration, f64)] {
        &self.trials
    }

    /// Streams installed on `port`.
    pub fn streams(&self, port: u16) -> &[StreamProfile] {
        self.streams.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Multiplier of the traffic started last, if any.
    pub fn multiplier(&self) -> Option<f64> {
        self.running.as_ref().map(|r| r.mult)
    }

    /// Counters of the traffic started last, one sample per port.
    ///
    /// Ports are named `xe0`, `xe1` and so on. Without running traffic the
    /// samples are empty.
    pub fn port_samples(&mut self) -> PortSamples {
        let mut samples = PortSamples::new();
        let Some(running) = self.running.clone() else {
            return samples;
        };

        let secs = running.duration.as_secs_f64();

        for port in running.ports {
            let streams = self.streams.get(&port).map(Vec::as_slice).unwrap_or(&[]);
            let rate: f64 = streams.iter().map(StreamProfile::pps).sum::<f64>() * running.mult;
            let tagged = streams
                .iter()
                .flat_map(|p| &p.streams)
                .any(|s| s.pg_id.is_some());

            let (sent, loss) = self.transfer(running.duration, rate);
            let received = sent - loss;

            samples.insert(
                format!("xe{}", port),
                PortSample {
                    in_packets: received,
                    out_packets: sent,
                    rx_throughput: received as f64 / secs,
                    tx_throughput: sent as f64 / secs,
                    latency: if tagged { self.config.latency } else { None },
                },
            );
        }

        samples
    }

    fn transfer(&mut self, duration: Duration, rate: f64) -> (u64, u64) {
        let secs = duration.as_secs_f64();
        let sent = (rate * secs).round() as u64;

        let forwarded = match self.config.capacity {
            Some(capacity) => sent.min((capacity * secs).round() as u64),
            None => sent,
        };

        let p = f64::from(self.config.loss.value());
        let random = if p > 0.0 {
            let expected = forwarded as f64 * p;
            ((expected * (0.5 + self.rng.f64())).round() as u64).min(forwarded)
        } else {
            0
        };

        (sent, sent - forwarded + random)
    }
}

impl Measurer for SimulatedLink {
    fn measure(
        &mut self,
        duration: Duration,
        transmit_rate: f64,
        latency: bool,
    ) -> Result<Trial, BoxError> {
        self.trials.push((duration, transmit_rate));
        let (sent, loss) = self.transfer(duration, transmit_rate);

        let latency = match (latency, self.config.latency) {
            (true, Some(l)) => vec![l.to_string(), l.to_string()],
            _ => vec![],
        };

        Ok(Trial {
            sent,
            loss,
            latency,
        })
    }
}

impl TrafficGenerator for SimulatedLink {
    fn my_ports(&self) -> Vec<u16> {
        self.config.ports.clone()
    }

    fn add_streams(&mut self, profile: &StreamProfile, ports: &[u16]) -> Result<(), BoxError> {
        for port in ports {
            self.streams.entry(*port).or_default().push(profile.clone());
        }
        Ok(())
    }

    fn start(
        &mut self,
        ports: &[u16],
        mult: &str,
        duration: Duration,
        force: bool,
    ) -> Result<(), BoxError> {
        if self.running.is_some() && !force {
            return Err("traffic already running".into());
        }

        let mult: f64 = mult.parse()?;
        self.running = Some(Running {
            ports: ports.to_vec(),
            mult,
            duration,
        });
        Ok(())
    }

    fn clear_stats(&mut self, _ports: &[u16]) -> Result<(), BoxError> {
        Ok(())
    }
}
