//! Scene records and the range-configuration source.
//!
//! The mobile app owns these records; this crate only reads them.  A scene
//! file is a JSON array of [`Configuration`] objects:
//!
//! ```json
//! [
//!   {
//!     "id": "cfg-1",
//!     "name": "Living room",
//!     "x": 4, "y": 3,
//!     "ranges": [
//!       { "id": "r1", "signal_name": "Alpha (8 - 12 Hz)",
//!         "lower_range": 8, "upper_range": 12,
//!         "brightness": 80, "speed": 0.5, "direction": "up",
//!         "color": "#47313E", "selected_panels": ["0-0", "1-2"] }
//!     ],
//!     "audio": [
//!       { "id": "a1", "psd_low": 0, "psd_high": 40,
//!         "clips": [ { "id": "rain", "source": { "preset": "rain" } } ] }
//!     ]
//!   }
//! ]
//! ```

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{AudioCueSet, RangeConfiguration};

/// Upper bound of the brightness percentage.
pub const MAX_BRIGHTNESS: f64 = 100.0;

/// Upper bound of the panel speed in m/s.
pub const MAX_SPEED: f64 = 1.5;

/// Most panels a grid may have: every 1-based panel id must fit in a `u32`.
pub const MAX_PANELS: u64 = u32::MAX as u64;

/// A sculpture configuration: grid geometry plus its range and audio records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Panels per row.
    #[serde(alias = "x")]
    pub grid_x: u32,
    /// Number of rows.
    #[serde(alias = "y")]
    pub grid_y: u32,
    /// Installation height; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub ranges: Vec<RangeConfiguration>,
    #[serde(default)]
    pub audio: Vec<AudioCueSet>,
}

impl Configuration {
    /// Check the invariants the activation engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            config: self.id.clone(),
            reason,
        };
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(invalid(format!(
                "grid {}x{} has no panels",
                self.grid_x, self.grid_y
            )));
        }
        if u64::from(self.grid_x) * u64::from(self.grid_y) > MAX_PANELS {
            return Err(invalid(format!(
                "grid {}x{} has more than {MAX_PANELS} panels",
                self.grid_x, self.grid_y
            )));
        }
        for r in &self.ranges {
            if !(r.lower_range <= r.upper_range) {
                return Err(invalid(format!(
                    "range {}: lower_range {} exceeds upper_range {}",
                    r.id, r.lower_range, r.upper_range
                )));
            }
            if !(0.0..=MAX_BRIGHTNESS).contains(&r.brightness) {
                return Err(invalid(format!(
                    "range {}: brightness {} is outside 0-{MAX_BRIGHTNESS}",
                    r.id, r.brightness
                )));
            }
            if !(0.0..=MAX_SPEED).contains(&r.speed) {
                return Err(invalid(format!(
                    "range {}: speed {} is outside 0-{MAX_SPEED}",
                    r.id, r.speed
                )));
            }
        }
        for a in &self.audio {
            if !(a.psd_low <= a.psd_high) {
                return Err(invalid(format!(
                    "audio set {}: psd_low {} exceeds psd_high {}",
                    a.id, a.psd_low, a.psd_high
                )));
            }
        }
        Ok(())
    }
}

/// Read access to the range configurations of a parent configuration.
pub trait RangeSource {
    fn ranges_for(&self, config_id: &str) -> Result<Vec<RangeConfiguration>, ConfigError>;
}

/// In-memory store of validated configurations, usually loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct SceneStore {
    configurations: Vec<Configuration>,
}

impl SceneStore {
    /// Build a store, validating every configuration.
    pub fn new(configurations: Vec<Configuration>) -> Result<Self, ConfigError> {
        for c in &configurations {
            c.validate()?;
        }
        Ok(Self { configurations })
    }

    /// Parse a JSON scene document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::new(serde_json::from_str(json)?)
    }

    /// Load a JSON scene file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::from_json(&text)?;
        info!(
            "loaded {} configuration(s) from {}",
            store.configurations.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn configurations(&self) -> &[Configuration] {
        &self.configurations
    }

    pub fn get(&self, config_id: &str) -> Result<&Configuration, ConfigError> {
        self.configurations
            .iter()
            .find(|c| c.id == config_id)
            .ok_or_else(|| ConfigError::UnknownConfiguration(config_id.to_owned()))
    }
}

impl RangeSource for SceneStore {
    fn ranges_for(&self, config_id: &str) -> Result<Vec<RangeConfiguration>, ConfigError> {
        self.get(config_id).map(|c| c.ranges.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r##"[
        {
            "id": "cfg-1",
            "name": "Living room",
            "x": 4, "y": 3,
            "ranges": [
                { "id": "r1", "signal_name": "Alpha (8 - 12 Hz)",
                  "lower_range": 8, "upper_range": 12,
                  "brightness": 80, "speed": 0.5, "direction": "up",
                  "color": "#47313E", "selected_panels": ["0-0", "1-2"] }
            ],
            "audio": [
                { "id": "a1", "psd_low": 0, "psd_high": 40,
                  "clips": [ { "id": "rain", "source": { "preset": "rain" } } ] }
            ]
        }
    ]"##;

    #[test]
    fn loads_app_records() {
        let store = SceneStore::from_json(SCENE).unwrap();
        let cfg = store.get("cfg-1").unwrap();
        assert_eq!((cfg.grid_x, cfg.grid_y), (4, 3));
        assert_eq!(store.ranges_for("cfg-1").unwrap().len(), 1);
        assert_eq!(cfg.audio[0].clips[0].id, "rain");
        assert!(matches!(
            store.ranges_for("nope"),
            Err(ConfigError::UnknownConfiguration(_))
        ));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let bad = SCENE.replace("\"lower_range\": 8", "\"lower_range\": 20");
        assert!(matches!(
            SceneStore::from_json(&bad),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn out_of_bounds_brightness_and_speed_are_rejected() {
        let bright = SCENE.replace("\"brightness\": 80", "\"brightness\": 180");
        assert!(SceneStore::from_json(&bright).is_err());
        let fast = SCENE.replace("\"speed\": 0.5", "\"speed\": 2");
        assert!(SceneStore::from_json(&fast).is_err());
    }

    #[test]
    fn empty_grid_is_rejected() {
        let flat = SCENE.replace("\"y\": 3", "\"y\": 0");
        assert!(SceneStore::from_json(&flat).is_err());
    }

    #[test]
    fn grid_with_unaddressable_panels_is_rejected() {
        let huge = SCENE
            .replace("\"x\": 4", "\"x\": 65536")
            .replace("\"y\": 3", "\"y\": 65536");
        match SceneStore::from_json(&huge) {
            Err(ConfigError::Invalid { reason, .. }) => {
                assert!(reason.contains("65536x65536"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
        // The largest grid whose last panel id is still u32::MAX.
        let edge = SCENE
            .replace("\"x\": 4", "\"x\": 65535")
            .replace("\"y\": 3", "\"y\": 65537");
        assert!(SceneStore::from_json(&edge).is_ok());
    }

    #[test]
    fn missing_file_reports_the_path() {
        match SceneStore::load("/definitely/not/here.json") {
            Err(ConfigError::Io { path, .. }) => assert!(path.contains("not/here")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
