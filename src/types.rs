use std::fmt;

use serde::{Deserialize, Serialize};

// ── Bands ─────────────────────────────────────────────────────────────────────

/// One of the five classical EEG frequency bands.
///
/// | Band | Range | Device code |
/// |---|---|---|
/// | Alpha | 8–12 Hz | 1 |
/// | Beta | 12–30 Hz | 2 |
/// | Theta | 4–8 Hz | 3 |
/// | Delta | < 4 Hz | 4 |
/// | Gamma | 30–50 Hz | 5 |
///
/// "No dominant band" is expressed as `Option<Band>::None` and carries code `0`
/// on the wire (see [`band_code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Alpha,
    Beta,
    Theta,
    Delta,
    Gamma,
}

impl Band {
    /// All bands in tie-break order.
    pub const ALL: [Band; 5] = [Band::Alpha, Band::Beta, Band::Theta, Band::Delta, Band::Gamma];

    /// Lower-case keyword, as used in telemetry payloads and signal names.
    pub fn keyword(self) -> &'static str {
        match self {
            Band::Alpha => "alpha",
            Band::Beta => "beta",
            Band::Theta => "theta",
            Band::Delta => "delta",
            Band::Gamma => "gamma",
        }
    }

    /// Parse an exact band keyword, ignoring case and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Band> {
        let s = s.trim();
        Band::ALL
            .into_iter()
            .find(|b| s.eq_ignore_ascii_case(b.keyword()))
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Numeric code the actuator firmware uses for a dominant band; `None` is `0`.
pub fn band_code(band: Option<Band>) -> u8 {
    match band {
        None => 0,
        Some(Band::Alpha) => 1,
        Some(Band::Beta) => 2,
        Some(Band::Theta) => 3,
        Some(Band::Delta) => 4,
        Some(Band::Gamma) => 5,
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

/// A normalised telemetry sample produced by [`crate::classify`].
///
/// Samples are pushed by the telemetry server at irregular intervals and are
/// never mutated after classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
    pub delta: f64,
    pub gamma: f64,
    /// Band with the highest power, as reported by the server or computed
    /// by the classifier when the server leaves it out.
    pub dominant_band: Option<Band>,
    pub alpha_beta_ratio: f64,
    pub alpha_delta_ratio: f64,
    /// Peak alpha frequency in Hz.
    pub peak_alpha_freq: f64,
    /// Power spectral density; drives the audio cue sets.
    pub psd: f64,
    /// Wall-clock time in milliseconds since the Unix epoch.
    pub timestamp: f64,
}

impl TelemetrySample {
    /// Power of a single band.
    pub fn power(&self, band: Band) -> f64 {
        match band {
            Band::Alpha => self.alpha,
            Band::Beta => self.beta,
            Band::Theta => self.theta,
            Band::Delta => self.delta,
            Band::Gamma => self.gamma,
        }
    }
}

// ── Range configuration ───────────────────────────────────────────────────────

/// Travel direction of the actuated panels.
///
/// Parsing is lenient: `"up"` in any case is [`Direction::Up`], anything else
/// is [`Direction::Down`], which matches what the firmware does with the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Direction {
    Up,
    #[default]
    Down,
}

impl Direction {
    /// Wire code: `up → 1`, everything else `→ 0`.
    pub fn code(self) -> u8 {
        match self {
            Direction::Up => 1,
            Direction::Down => 0,
        }
    }
}

impl From<&str> for Direction {
    fn from(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("up") {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

impl From<String> for Direction {
    fn from(s: String) -> Self {
        Direction::from(s.as_str())
    }
}

/// An 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb { r: 255, g: 255, b: 255 };
}

/// A `(row, col)` cell of the sculpture's panel grid, zero-based.
///
/// Scene files written by the mobile app store panels as `"row-col"` strings;
/// `{ "row": 1, "col": 2 }` objects are accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PanelRepr", into = "String")]
pub struct Panel {
    pub row: u32,
    pub col: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PanelRepr {
    Text(String),
    Coord { row: u32, col: u32 },
}

impl TryFrom<PanelRepr> for Panel {
    type Error = String;

    fn try_from(repr: PanelRepr) -> Result<Self, Self::Error> {
        match repr {
            PanelRepr::Coord { row, col } => Ok(Panel { row, col }),
            PanelRepr::Text(s) => s.parse(),
        }
    }
}

impl std::str::FromStr for Panel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (row, col) = s
            .split_once('-')
            .ok_or_else(|| format!("panel {s:?} is not \"row-col\""))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| format!("panel {s:?}: {e}"))
        };
        Ok(Panel {
            row: parse(row)?,
            col: parse(col)?,
        })
    }
}

impl From<Panel> for String {
    fn from(p: Panel) -> Self {
        format!("{}-{}", p.row, p.col)
    }
}

/// One user-defined activation range and the light scene it triggers.
///
/// Field names follow the records the mobile app stores; `setting_name` and
/// `signal` are accepted as aliases for `signal_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConfiguration {
    pub id: String,
    /// Free-text signal label such as `"Alpha (8 - 12 Hz)"`.
    #[serde(alias = "setting_name", alias = "signal", default)]
    pub signal_name: String,
    /// Explicit band.  Takes precedence over keyword matching on
    /// `signal_name` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<Band>,
    pub lower_range: f64,
    pub upper_range: f64,
    /// Percent, 0–100.
    pub brightness: f64,
    /// Metres per second, 0–1.5.
    pub speed: f64,
    #[serde(default)]
    pub direction: Direction,
    /// `#rrggbb`; anything else is sent as white.
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub selected_panels: Vec<Panel>,
}

// ── Audio cues ────────────────────────────────────────────────────────────────

/// Where an audio clip comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipSource {
    /// A clip bundled with the installation, referenced by a static name.
    Preset(String),
    /// An uploaded clip, referenced by URI.
    Uri(String),
}

/// A single playable clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClip {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub source: ClipSource,
}

/// A set of clips that loop while the sample PSD sits inside
/// `[psd_low, psd_high]`.
///
/// When `range_id` is set the linked range configuration must also be active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioCueSet {
    pub id: String,
    pub psd_low: f64,
    pub psd_high: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_id: Option<String>,
    #[serde(default)]
    pub clips: Vec<AudioClip>,
}

// ── Channel events ────────────────────────────────────────────────────────────

/// Typed events yielded by a telemetry subscription.
///
/// Consumers receive these through the `mpsc::Receiver` inside a
/// [`crate::channel::Subscription`].  The sequence always starts with
/// `Connected` (or `Error` when the namespace handshake is refused) and ends
/// with `Disconnected` or `Error`; nothing arrives afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server acknowledged the namespace connection.
    Connected,
    /// A classified `eeg_data` payload.  Malformed payloads never show up
    /// here; the reader drops and logs them.
    Sample(TelemetrySample),
    /// The channel failed mid-session.
    Error(String),
    /// The server or transport closed the channel.
    Disconnected,
}

// ── Session status ────────────────────────────────────────────────────────────

/// User-visible connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        })
    }
}

/// Lifecycle of an [`crate::session::ActuationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Live,
}
