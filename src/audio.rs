//! Audio cue controller.
//!
//! Each [`AudioCueSet`] names a PSD window and the clips that loop while the
//! latest sample sits inside it.  The controller keeps at most one playback
//! instance per clip id and talks to the platform's audio stack through the
//! [`AudioBackend`] trait, whose every operation may fail on its own.
//!
//! Handle discipline: every handle returned by [`AudioBackend::load`] is
//! passed to [`AudioBackend::unload`] exactly once, whether playback
//! succeeded, failed half-way, or the session is being torn down.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use crate::diagnostics::RollingLog;
use crate::error::AudioResourceError;
use crate::types::{AudioClip, AudioCueSet, ClipSource, RangeConfiguration, TelemetrySample};

/// The operations the controller needs from an audio stack.
pub trait AudioBackend {
    /// Opaque handle to a loaded clip.
    type Handle;

    fn load(&mut self, clip: &AudioClip) -> Result<Self::Handle, AudioResourceError>;
    fn play(&mut self, handle: &mut Self::Handle) -> Result<(), AudioResourceError>;
    fn pause(&mut self, handle: &mut Self::Handle) -> Result<(), AudioResourceError>;
    fn stop(&mut self, handle: &mut Self::Handle) -> Result<(), AudioResourceError>;
    fn set_looping(&mut self, handle: &mut Self::Handle, looping: bool)
        -> Result<(), AudioResourceError>;
    /// Release the handle.  Called exactly once per successful `load`.
    fn unload(&mut self, handle: Self::Handle) -> Result<(), AudioResourceError>;
}

/// Does a cue set's trigger condition hold?
///
/// Requires a sample whose PSD lies in `[psd_low, psd_high]`; a cue set linked
/// to a range configuration additionally requires that range to be active.
pub fn cue_triggered(
    cue: &AudioCueSet,
    sample: Option<&TelemetrySample>,
    active: &[RangeConfiguration],
) -> bool {
    let Some(sample) = sample else {
        return false;
    };
    let in_window = cue.psd_low <= sample.psd && sample.psd <= cue.psd_high;
    let linked = match &cue.range_id {
        Some(id) => active.iter().any(|r| &r.id == id),
        None => true,
    };
    in_window && linked
}

/// Starts, loops and stops clips so that exactly the triggered ones play.
pub struct AudioCueController<B: AudioBackend> {
    backend: B,
    playing: BTreeMap<String, B::Handle>,
    errors: RollingLog,
    failures: usize,
}

impl<B: AudioBackend> AudioCueController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            playing: BTreeMap::new(),
            errors: RollingLog::default(),
            failures: 0,
        }
    }

    /// Reconcile playback with the current trigger state.
    ///
    /// Clips whose trigger no longer holds are stopped and released; newly
    /// triggered clips are loaded, set to loop and started.  A clip that is
    /// already playing is left alone.  A failing clip is skipped without
    /// affecting the others.
    pub fn update(
        &mut self,
        cues: &[AudioCueSet],
        sample: Option<&TelemetrySample>,
        active: &[RangeConfiguration],
    ) {
        let mut wanted: BTreeMap<&str, &AudioClip> = BTreeMap::new();
        for cue in cues.iter().filter(|c| cue_triggered(c, sample, active)) {
            for clip in &cue.clips {
                wanted.entry(clip.id.as_str()).or_insert(clip);
            }
        }

        let stale: Vec<String> = self
            .playing
            .keys()
            .filter(|id| !wanted.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.stop_clip(&id);
        }

        for (id, clip) in wanted {
            if !self.playing.contains_key(id) {
                self.start_clip(clip);
            }
        }
    }

    /// Start one clip unless it is already playing.
    pub fn start_clip(&mut self, clip: &AudioClip) {
        if self.playing.contains_key(&clip.id) {
            debug!("audio: {} already playing", clip.id);
            return;
        }
        let mut handle = match self.backend.load(clip) {
            Ok(h) => h,
            Err(e) => {
                self.record(e);
                return;
            }
        };
        let started = self
            .backend
            .set_looping(&mut handle, true)
            .and_then(|()| self.backend.play(&mut handle));
        match started {
            Ok(()) => {
                info!("audio: playing {} ({})", clip.id, describe(&clip.source));
                self.playing.insert(clip.id.clone(), handle);
            }
            Err(e) => {
                self.record(e);
                if let Err(e) = self.backend.unload(handle) {
                    self.record(e);
                }
            }
        }
    }

    /// Stop and release one clip.  Unknown ids are ignored.
    pub fn stop_clip(&mut self, id: &str) {
        let Some(mut handle) = self.playing.remove(id) else {
            return;
        };
        if let Err(e) = self.backend.stop(&mut handle) {
            self.record(e);
        }
        if let Err(e) = self.backend.unload(handle) {
            self.record(e);
        }
        info!("audio: stopped {id}");
    }

    /// Stop and release every clip.  Keeps going past individual failures and
    /// returns how many operations failed.
    pub fn stop_all(&mut self) -> usize {
        let before = self.failures;
        let ids: Vec<String> = self.playing.keys().cloned().collect();
        for id in ids {
            self.stop_clip(&id);
        }
        self.failures - before
    }

    /// Ids of the clips currently playing, sorted.
    pub fn playing(&self) -> BTreeSet<String> {
        self.playing.keys().cloned().collect()
    }

    /// Recent playback failures, newest first.
    pub fn errors(&self) -> &RollingLog {
        &self.errors
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn record(&mut self, e: AudioResourceError) {
        warn!("audio: {e}");
        self.failures += 1;
        self.errors.push(e.to_string());
    }
}

fn describe(source: &ClipSource) -> String {
    match source {
        ClipSource::Preset(name) => format!("preset {name}"),
        ClipSource::Uri(uri) => uri.clone(),
    }
}

// ── LogAudioBackend ───────────────────────────────────────────────────────────

/// Backend for hosts without an audio device: every call succeeds and is
/// logged, and the number of live handles is tracked.
#[derive(Debug, Default)]
pub struct LogAudioBackend {
    open: usize,
}

impl LogAudioBackend {
    /// Handles loaded but not yet unloaded.
    pub fn open_handles(&self) -> usize {
        self.open
    }
}

impl AudioBackend for LogAudioBackend {
    type Handle = String;

    fn load(&mut self, clip: &AudioClip) -> Result<String, AudioResourceError> {
        self.open += 1;
        debug!("audio(log): load {} from {}", clip.id, describe(&clip.source));
        Ok(clip.id.clone())
    }

    fn play(&mut self, handle: &mut String) -> Result<(), AudioResourceError> {
        info!("audio(log): ▶ {handle}");
        Ok(())
    }

    fn pause(&mut self, handle: &mut String) -> Result<(), AudioResourceError> {
        info!("audio(log): ⏸ {handle}");
        Ok(())
    }

    fn stop(&mut self, handle: &mut String) -> Result<(), AudioResourceError> {
        info!("audio(log): ⏹ {handle}");
        Ok(())
    }

    fn set_looping(&mut self, handle: &mut String, looping: bool) -> Result<(), AudioResourceError> {
        debug!("audio(log): loop {handle} = {looping}");
        Ok(())
    }

    fn unload(&mut self, handle: String) -> Result<(), AudioResourceError> {
        self.open = self.open.saturating_sub(1);
        debug!("audio(log): unload {handle}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample, ScriptedAudioBackend};

    fn clip(id: &str) -> AudioClip {
        AudioClip {
            id: id.into(),
            name: id.into(),
            source: ClipSource::Preset(id.into()),
        }
    }

    fn cue(id: &str, low: f64, high: f64, clips: &[&str]) -> AudioCueSet {
        AudioCueSet {
            id: id.into(),
            psd_low: low,
            psd_high: high,
            range_id: None,
            clips: clips.iter().map(|c| clip(c)).collect(),
        }
    }

    #[test]
    fn plays_clips_of_triggered_sets_and_loops_them() {
        let cues = vec![cue("calm", 0.0, 10.0, &["rain"]), cue("busy", 10.0, 20.0, &["drums"])];
        let mut ctl = AudioCueController::new(ScriptedAudioBackend::new());
        ctl.update(&cues, Some(&sample(1.0, 1.0, 1.0, 1.0, 1.0, 5.0)), &[]);
        assert_eq!(ctl.playing(), BTreeSet::from(["rain".to_string()]));
        assert_eq!(
            ctl.backend().calls(),
            &["load:rain", "set_looping:rain", "play:rain"]
        );
    }

    #[test]
    fn already_playing_clip_is_not_restarted() {
        let cues = vec![cue("calm", 0.0, 10.0, &["rain"]), cue("also", 0.0, 10.0, &["rain"])];
        let mut ctl = AudioCueController::new(ScriptedAudioBackend::new());
        let s = sample(1.0, 1.0, 1.0, 1.0, 1.0, 5.0);
        ctl.update(&cues, Some(&s), &[]);
        ctl.update(&cues, Some(&s), &[]);
        ctl.start_clip(&clip("rain"));
        assert_eq!(ctl.backend().balance(), (1, 0));
    }

    #[test]
    fn leaving_the_window_stops_and_releases() {
        let cues = vec![cue("calm", 0.0, 10.0, &["rain"])];
        let mut ctl = AudioCueController::new(ScriptedAudioBackend::new());
        ctl.update(&cues, Some(&sample(1.0, 1.0, 1.0, 1.0, 1.0, 5.0)), &[]);
        ctl.update(&cues, Some(&sample(1.0, 1.0, 1.0, 1.0, 1.0, 50.0)), &[]);
        assert!(ctl.playing().is_empty());
        assert_eq!(ctl.backend().open_handles(), 0);
    }

    #[test]
    fn linked_cue_needs_its_range_active() {
        let mut linked = cue("calm", 0.0, 10.0, &["rain"]);
        linked.range_id = Some("r1".into());
        let s = sample(1.0, 1.0, 1.0, 1.0, 1.0, 5.0);
        assert!(!cue_triggered(&linked, Some(&s), &[]));
        assert!(!cue_triggered(&linked, None, &[]));
    }

    #[test]
    fn a_failing_clip_is_skipped_and_released() {
        let cues = vec![cue("calm", 0.0, 10.0, &["rain", "wind", "birds"])];
        let mut backend = ScriptedAudioBackend::new();
        backend.fail_on("rain", "play");
        backend.fail_on("wind", "load");
        let mut ctl = AudioCueController::new(backend);
        ctl.update(&cues, Some(&sample(1.0, 1.0, 1.0, 1.0, 1.0, 5.0)), &[]);
        assert_eq!(ctl.playing(), BTreeSet::from(["birds".to_string()]));
        // rain was loaded, failed to play and was unloaded again
        assert_eq!(ctl.backend().open_handles(), 1);
        assert_eq!(ctl.errors().len(), 2);
    }

    #[test]
    fn stop_all_releases_everything_despite_failures() {
        let cues = vec![cue("calm", 0.0, 10.0, &["rain", "wind"])];
        let mut ctl = AudioCueController::new(ScriptedAudioBackend::new());
        ctl.update(&cues, Some(&sample(1.0, 1.0, 1.0, 1.0, 1.0, 5.0)), &[]);
        ctl.backend_mut().fail_on("rain", "stop");
        ctl.backend_mut().fail_on("wind", "unload");
        assert_eq!(ctl.stop_all(), 2);
        assert!(ctl.playing().is_empty());
        assert_eq!(ctl.backend().open_handles(), 0);
        assert_eq!(ctl.backend().balance(), (2, 2));
    }

    #[test]
    fn log_backend_balances_handles() {
        let cues = vec![cue("calm", 0.0, 10.0, &["rain"])];
        let mut ctl = AudioCueController::new(LogAudioBackend::default());
        ctl.update(&cues, Some(&sample(1.0, 1.0, 1.0, 1.0, 1.0, 5.0)), &[]);
        assert_eq!(ctl.backend().open_handles(), 1);
        ctl.stop_all();
        assert_eq!(ctl.backend().open_handles(), 0);
    }
}
