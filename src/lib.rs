//! # neurosculpt
//!
//! Live EEG-band-to-actuator activation engine for a kinesthetic light and
//! sound sculpture.
//!
//! A telemetry server streams band powers (alpha, beta, theta, delta, gamma)
//! as Socket.IO `eeg_data` events.  Each sample is classified, matched
//! against the range configurations of the selected scene, and every active
//! range is encoded as a `CONFIG` command on the `control_command` event.
//! Audio cue sets start and stop looping clips alongside.
//!
//! ```text
//! eeg_data ─► classify ─► matcher ─┬─► command ─► session ─► control_command
//!                                  └─► audio cue controller ─► audio backend
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use neurosculpt::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SceneStore::load("scenes.json")?;
//!     let config = store.get("cfg-1")?;
//!     let ctx = SessionContext::from_source(&store, config)?;
//!
//!     let mut session = ActuationSession::new(ctx, AudioCueController::new(LogAudioBackend::default()));
//!     let mut connector = WsConnector::new(ChannelConfig {
//!         server: "http://192.168.1.224:5001".into(),
//!         ..Default::default()
//!     });
//!     let ctrl_c = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     session.run(&mut connector, ctrl_c).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Using as a library dependency
//!
//! ```toml
//! [dependencies]
//! # Full build (includes the ratatui dashboard):
//! neurosculpt = "0.1"
//!
//! # Library only, skips ratatui / crossterm:
//! neurosculpt = { version = "0.1", default-features = false }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`types`] | Samples, range configurations, audio cues, channel events |
//! | [`classify`] | Raw `eeg_data` payload → [`types::TelemetrySample`] |
//! | [`matcher`] | Active Set computation |
//! | [`command`] | Actuator command grammar and panel numbering |
//! | [`session`] | The play-session state machine and its async driver |
//! | [`audio`] | Audio cue controller and the [`audio::AudioBackend`] seam |
//! | [`channel`] | Socket.IO WebSocket client and the in-memory connector |
//! | [`protocol`] | Engine.IO / Socket.IO frame encoding |
//! | [`scene`] | Scene files and the range-configuration source |
//! | [`simulate`] | Synthetic telemetry for running without hardware |
//! | [`diagnostics`] | Bounded newest-first log |
//! | [`error`] | Error types |
//! | `testing` | Scripted fakes for tests (feature `testing`) |

pub mod audio;
pub mod channel;
pub mod classify;
pub mod command;
pub mod diagnostics;
pub mod error;
pub mod matcher;
pub mod protocol;
pub mod scene;
pub mod session;
pub mod simulate;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Session ───────────────────────────────────────────────────────────────
    pub use crate::session::{ActuationSession, SessionContext, SessionSettings, SessionSnapshot};

    // ── Channel ───────────────────────────────────────────────────────────────
    pub use crate::channel::{
        ChannelConfig, CommandSink, Connector, MemoryConnector, Subscription, WsConnector,
    };
    pub use crate::simulate::{SimConfig, SimConnector};

    // ── Scenes and audio ──────────────────────────────────────────────────────
    pub use crate::audio::{AudioBackend, AudioCueController, LogAudioBackend};
    pub use crate::scene::{Configuration, RangeSource, SceneStore};

    // ── Data types ────────────────────────────────────────────────────────────
    pub use crate::types::{
        AudioClip, AudioCueSet, Band, ChannelEvent, ClipSource, ConnectionStatus, Direction,
        Panel, RangeConfiguration, Rgb, SessionState, TelemetrySample,
    };

    // ── Errors ────────────────────────────────────────────────────────────────
    pub use crate::error::{
        AudioResourceError, ChannelError, ColorDecodeError, ConfigError, MalformedSampleError,
    };
}
