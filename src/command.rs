//! Actuator command grammar.
//!
//! The sculpture controller accepts whitespace-separated ASCII commands on
//! the `control_command` event.  The grammar carries no version tag, so the
//! token order and the panel numbering below must not change:
//!
//! ```text
//! CONFIG <brightness> <speed> <direction> <r> <g> <b> <panel_count> <panel_id_1> … <panel_id_n>
//! STOP
//! START
//! EEG <alpha> <beta> <theta> <delta> <gamma> <dominant_band_code>
//! ```
//!
//! * `direction` is `1` for up and `0` otherwise.
//! * Panel ids are 1-based and row-major: `row * grid_x + col + 1`.
//! * Numbers in `CONFIG` are printed in their shortest form (`50`, `0.5`);
//!   `EEG` powers always carry two decimals.

use std::fmt;

use log::warn;

use crate::error::ColorDecodeError;
use crate::types::{band_code, Direction, Panel, RangeConfiguration, Rgb, TelemetrySample};

/// Wire sentinel that switches every panel off.
pub const STOP: &str = "STOP";

/// Wire sentinel sent once when a play session goes live.
pub const START: &str = "START";

/// A single actuator instruction.
///
/// `Display` renders the exact wire string.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Config {
        brightness: f64,
        speed: f64,
        direction: Direction,
        color: Rgb,
        panels: Vec<u32>,
    },
    Stop,
    Start,
    /// Mirror of the current band powers for the controller's own display.
    Eeg {
        alpha: f64,
        beta: f64,
        theta: f64,
        delta: f64,
        gamma: f64,
        dominant_code: u8,
    },
}

impl Command {
    /// Build the `CONFIG` command for one range configuration.
    ///
    /// Panels outside the `grid_x × grid_y` grid are skipped with a warning;
    /// their row-major index would land on a different, valid panel.
    pub fn config(range: &RangeConfiguration, grid_x: u32, grid_y: u32) -> Command {
        let panels = range
            .selected_panels
            .iter()
            .filter_map(|p| {
                if p.col < grid_x && p.row < grid_y {
                    Some(panel_index(p.row, p.col, grid_x))
                } else {
                    warn!(
                        "range {}: panel {}-{} is outside the {grid_x}x{grid_y} grid, skipped",
                        range.id, p.row, p.col
                    );
                    None
                }
            })
            .collect();
        Command::Config {
            brightness: range.brightness,
            speed: range.speed,
            direction: range.direction,
            color: decode_color_or_white(&range.color),
            panels,
        }
    }

    /// Build the `EEG` mirror command for a sample.
    pub fn eeg(sample: &TelemetrySample) -> Command {
        Command::Eeg {
            alpha: sample.alpha,
            beta: sample.beta,
            theta: sample.theta,
            delta: sample.delta,
            gamma: sample.gamma,
            dominant_code: band_code(sample.dominant_band),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Config {
                brightness,
                speed,
                direction,
                color,
                panels,
            } => {
                write!(
                    f,
                    "CONFIG {brightness} {speed} {} {} {} {} {}",
                    direction.code(),
                    color.r,
                    color.g,
                    color.b,
                    panels.len()
                )?;
                for id in panels {
                    write!(f, " {id}")?;
                }
                Ok(())
            }
            Command::Stop => f.write_str(STOP),
            Command::Start => f.write_str(START),
            Command::Eeg {
                alpha,
                beta,
                theta,
                delta,
                gamma,
                dominant_code,
            } => write!(
                f,
                "EEG {alpha:.2} {beta:.2} {theta:.2} {delta:.2} {gamma:.2} {dominant_code}"
            ),
        }
    }
}

/// Encode one active range configuration as a `CONFIG` wire string.
///
/// ```
/// # use neurosculpt::command::encode;
/// # use neurosculpt::types::{Direction, Panel, RangeConfiguration};
/// let range = RangeConfiguration {
///     id: "r1".into(),
///     signal_name: "Alpha (8-12Hz)".into(),
///     band: None,
///     lower_range: 8.0,
///     upper_range: 12.0,
///     brightness: 80.0,
///     speed: 0.5,
///     direction: Direction::Up,
///     color: "#47313E".into(),
///     selected_panels: vec![Panel { row: 0, col: 0 }, Panel { row: 1, col: 2 }],
/// };
/// assert_eq!(encode(&range, 3, 2), "CONFIG 80 0.5 1 71 49 62 2 1 6");
/// ```
pub fn encode(range: &RangeConfiguration, grid_x: u32, grid_y: u32) -> String {
    Command::config(range, grid_x, grid_y).to_string()
}

/// 1-based, row-major panel id used by the controller firmware.
pub fn panel_index(row: u32, col: u32, grid_x: u32) -> u32 {
    row * grid_x + col + 1
}

/// Panel id for a [`Panel`].
pub fn panel_id(panel: Panel, grid_x: u32) -> u32 {
    panel_index(panel.row, panel.col, grid_x)
}

/// Parse `#rrggbb` (the `#` is optional, hex digits in either case).
pub fn parse_hex_color(hex: &str) -> Result<Rgb, ColorDecodeError> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ColorDecodeError(hex.to_owned()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| ColorDecodeError(hex.to_owned()))
    };
    Ok(Rgb {
        r: channel(0)?,
        g: channel(2)?,
        b: channel(4)?,
    })
}

/// [`parse_hex_color`], falling back to white with a logged warning.
pub fn decode_color_or_white(hex: &str) -> Rgb {
    parse_hex_color(hex).unwrap_or_else(|e| {
        warn!("{e}; sending white instead");
        Rgb::WHITE
    })
}
