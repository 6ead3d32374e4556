//! Built-in telemetry simulator.
//!
//! Stands in for the telemetry server when no headset or sculpture is
//! around.  [`SimConnector`] hands out in-memory links and starts a generator
//! task behind each one that pushes synthetic `eeg_data` payloads through the
//! regular [`crate::classify`] path.  Commands sent back are logged, so the
//! whole pipeline can be watched without hardware.

use std::f64::consts::PI;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::channel::{Connector, MemoryConnector, MemoryPeer, Subscription};
use crate::classify::classify_value;
use crate::error::ChannelError;
use crate::types::ChannelEvent;

/// Simulator tunables.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Time between samples.  Default: 500 ms.
    pub interval: Duration,
    /// Fixed RNG seed for reproducible runs; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            seed: None,
        }
    }
}

/// Generate one raw `eeg_data` payload at time `t` (seconds).
///
/// Each band drifts on its own slow sinusoid so that ranges switch on and off
/// every few seconds:
///
/// | Band  | Mean | Swing | Period |
/// |-------|------|-------|--------|
/// | alpha | 10   | ±5    | 20 s   |
/// | beta  | 15   | ±10   | 33 s   |
/// | theta | 6    | ±3    | 27 s   |
/// | delta | 3    | ±2    | 41 s   |
/// | gamma | 1    | ±0.8  | 13 s   |
///
/// PSD follows a 45 s cycle between 10 and 50.  Uniform noise of ±10 % is
/// added on top and powers are clamped at zero.
pub fn sim_payload(t: f64, rng: &mut impl Rng) -> Value {
    let mut wave = |mean: f64, swing: f64, period: f64| {
        let base = mean + swing * (2.0 * PI * t / period).sin();
        (base * (1.0 + rng.gen_range(-0.1..0.1))).max(0.0)
    };
    let alpha = wave(10.0, 5.0, 20.0);
    let beta = wave(15.0, 10.0, 33.0);
    let theta = wave(6.0, 3.0, 27.0);
    let delta = wave(3.0, 2.0, 41.0);
    let gamma = wave(1.0, 0.8, 13.0);
    let psd = wave(30.0, 20.0, 45.0);
    let paf = 10.0 + 0.5 * (2.0 * PI * t / 17.0).sin();
    json!({
        "alpha": alpha,
        "beta": beta,
        "theta": theta,
        "delta": delta,
        "gamma": gamma,
        "alpha_beta_ratio": if beta > 0.0 { alpha / beta } else { 0.0 },
        "alpha_delta_ratio": if delta > 0.0 { alpha / delta } else { 0.0 },
        "peak_alpha_freq": paf,
        "psd": psd,
    })
}

/// Drive `peer` with synthetic samples until the client goes away.
///
/// Sends `Connected` first, then one sample per `interval`.  Commands the
/// client emits are drained and logged on every tick.
pub fn spawn_simulator(mut peer: MemoryPeer, config: SimConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        if peer.events.send(ChannelEvent::Connected).await.is_err() {
            return;
        }
        let mut ticker = tokio::time::interval(config.interval);
        let dt = config.interval.as_secs_f64();
        let mut t = 0.0_f64;
        loop {
            ticker.tick().await;
            for command in peer.drain_commands() {
                info!("controller ← {command}");
            }
            if peer.is_closed() {
                debug!("simulated link closed by client");
                return;
            }
            let event = match classify_value(&sim_payload(t, &mut rng)) {
                Ok(sample) => ChannelEvent::Sample(sample),
                Err(e) => {
                    warn!("simulator produced a bad sample: {e}");
                    continue;
                }
            };
            if peer.events.send(event).await.is_err() {
                return;
            }
            t += dt;
        }
    })
}

/// Connector backed by the simulator; every connect starts a fresh generator.
pub struct SimConnector {
    config: SimConfig,
    links: MemoryConnector,
    task: Option<JoinHandle<()>>,
}

impl SimConnector {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            links: MemoryConnector::new(),
            task: None,
        }
    }
}

impl Connector for SimConnector {
    fn connect(&mut self) -> impl Future<Output = Result<Subscription, ChannelError>> + Send {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let peer = self.links.push_link();
        self.task = Some(spawn_simulator(peer, self.config.clone()));
        info!("Connected to simulated telemetry server");
        self.links.connect()
    }
}

impl Drop for SimConnector {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
