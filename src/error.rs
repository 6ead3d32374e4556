//! Error taxonomy for the activation pipeline.
//!
//! Every error here is handled by the component that raises it: a bad sample
//! is dropped, a bad colour falls back to white, a failed clip is skipped and
//! a dead channel flips the session status.  None of them tear down the
//! process; the binaries wrap whatever reaches them in `anyhow`.

use thiserror::Error;

/// A telemetry payload that could not be turned into a
/// [`crate::types::TelemetrySample`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedSampleError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not a finite non-negative number: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

/// A range configuration colour that is not `#rrggbb`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot decode colour {0:?} as #rrggbb")]
pub struct ColorDecodeError(pub String);

/// Failures of the telemetry/control channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("connect to {url} timed out after {secs} s")]
    Timeout { url: String, secs: u64 },
    #[error("gave up after {0} connection attempts")]
    RetriesExhausted(u32),
    #[error("server did not acknowledge the connection within {0:?}")]
    Unacknowledged(std::time::Duration),
    #[error("server rejected the namespace connection: {0}")]
    Rejected(String),
    #[error("channel closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failures reported by an [`crate::audio::AudioBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioResourceError {
    #[error("clip {clip} failed to load: {reason}")]
    Load { clip: String, reason: String },
    #[error("clip {clip} failed to {op}: {reason}")]
    Playback {
        clip: String,
        op: &'static str,
        reason: String,
    },
}

/// A Socket.IO / Engine.IO text frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownPacket(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketPacket(char),
    #[error("malformed event payload: {0}")]
    BadEvent(String),
}

/// Problems with a scene file or the records inside it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read scene file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse scene file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration {0:?} not found")]
    UnknownConfiguration(String),
    #[error("configuration {config}: {reason}")]
    Invalid { config: String, reason: String },
}
