#![allow(unused)]
use std::sync::Once;
use std::time::Duration;

use mlrsearch::error::BoxError;
use mlrsearch::sim::{LinkConfig, SimulatedLink};
use mlrsearch::{Measurer, Trial};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

/// Line rate of 10GE with 64 byte frames.
pub const LINE_RATE: f64 = 14_880_952.0;

/// A link forwarding up to `capacity` packets per second without loss.
pub fn link(capacity: f64) -> SimulatedLink {
    SimulatedLink::new(LinkConfig::new().capacity(capacity))
}

/// A measurer that always fails.
pub struct Broken;

impl Measurer for Broken {
    fn measure(&mut self, _: Duration, _: f64, _: bool) -> Result<Trial, BoxError> {
        Err("generator unreachable".into())
    }
}

/// A measurer whose trials lose a fixed fraction of everything sent.
pub struct Leaky(pub f64);

impl Measurer for Leaky {
    fn measure(&mut self, d: Duration, rate: f64, _: bool) -> Result<Trial, BoxError> {
        let sent = (rate * d.as_secs_f64()).round() as u64;
        let loss = (sent as f64 * self.0).round() as u64;
        Ok(Trial {
            sent,
            loss,
            latency: vec![],
        })
    }
}
