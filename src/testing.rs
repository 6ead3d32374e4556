//! Fakes for exercising the pipeline without a network or an audio device.
//!
//! Used by the unit tests and the `tests/` integration suite.  Only built
//! under `cfg(test)` or with the `testing` feature.

use std::collections::BTreeSet;

use crate::audio::AudioBackend;
use crate::error::AudioResourceError;
use crate::types::{AudioClip, TelemetrySample};

/// Audio backend that records every call and fails on request.
///
/// Failures are scripted per `(clip id, operation)` pair, e.g.
/// `fail_on("rain", "play")`.
#[derive(Debug, Default)]
pub struct ScriptedAudioBackend {
    failures: BTreeSet<(String, &'static str)>,
    open: BTreeSet<String>,
    calls: Vec<String>,
    loads: usize,
    unloads: usize,
}

impl ScriptedAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail for `clip` from now on.
    pub fn fail_on(&mut self, clip: &str, op: &'static str) {
        self.failures.insert((clip.to_owned(), op));
    }

    /// Stop failing `op` for `clip`.
    pub fn heal(&mut self, clip: &str, op: &'static str) {
        self.failures.remove(&(clip.to_owned(), op));
    }

    /// Handles loaded and not yet unloaded.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    /// `"op:clip"` strings in call order.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Number of successful loads and unloads so far.
    pub fn balance(&self) -> (usize, usize) {
        (self.loads, self.unloads)
    }

    fn step(&mut self, clip: &str, op: &'static str) -> Result<(), AudioResourceError> {
        self.calls.push(format!("{op}:{clip}"));
        if !self.failures.contains(&(clip.to_owned(), op)) {
            return Ok(());
        }
        Err(if op == "load" {
            AudioResourceError::Load {
                clip: clip.to_owned(),
                reason: "scripted failure".into(),
            }
        } else {
            AudioResourceError::Playback {
                clip: clip.to_owned(),
                op,
                reason: "scripted failure".into(),
            }
        })
    }
}

impl AudioBackend for ScriptedAudioBackend {
    type Handle = String;

    fn load(&mut self, clip: &AudioClip) -> Result<String, AudioResourceError> {
        self.step(&clip.id, "load")?;
        assert!(
            self.open.insert(clip.id.clone()),
            "clip {} loaded twice without unload",
            clip.id
        );
        self.loads += 1;
        Ok(clip.id.clone())
    }

    fn play(&mut self, handle: &mut String) -> Result<(), AudioResourceError> {
        self.step(handle, "play")
    }

    fn pause(&mut self, handle: &mut String) -> Result<(), AudioResourceError> {
        self.step(handle, "pause")
    }

    fn stop(&mut self, handle: &mut String) -> Result<(), AudioResourceError> {
        self.step(handle, "stop")
    }

    fn set_looping(&mut self, handle: &mut String, _looping: bool) -> Result<(), AudioResourceError> {
        self.step(handle, "set_looping")
    }

    fn unload(&mut self, handle: String) -> Result<(), AudioResourceError> {
        // The handle is gone whether or not the backend complains about it.
        assert!(self.open.remove(&handle), "clip {handle} unloaded twice");
        self.unloads += 1;
        self.step(&handle, "unload")
    }
}

/// A sample with the given band powers and PSD; other fields are zero.
pub fn sample(alpha: f64, beta: f64, theta: f64, delta: f64, gamma: f64, psd: f64) -> TelemetrySample {
    let mut s = TelemetrySample {
        alpha,
        beta,
        theta,
        delta,
        gamma,
        dominant_band: None,
        alpha_beta_ratio: if beta > 0.0 { alpha / beta } else { 0.0 },
        alpha_delta_ratio: if delta > 0.0 { alpha / delta } else { 0.0 },
        peak_alpha_freq: 0.0,
        psd,
        timestamp: 0.0,
    };
    s.dominant_band = crate::classify::dominant_band(&s);
    s
}
