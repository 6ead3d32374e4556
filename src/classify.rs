//! Band classifier: turns raw `eeg_data` payloads into [`TelemetrySample`]s.
//!
//! The telemetry server is not strict about its payload shape, so the
//! classifier accepts both spellings it has been seen to use:
//!
//! | Field | Accepted keys | Required |
//! |---|---|---|
//! | band powers | `alpha` / `alpha_band` (same for beta, theta, delta, gamma) | yes |
//! | dominant band | `dominant_band` | no, computed from powers |
//! | ratios | `alpha_beta_ratio`, `alpha_delta_ratio` | no, `0` |
//! | peak alpha | `peak_alpha_freq` / `frequency` | no, `0` |
//! | PSD | `psd` | no, `0` |
//! | timestamp | `timestamp` (ms since epoch) | no, wall clock |
//!
//! A payload may arrive either as a JSON object or as a string holding a
//! JSON object; both are handled.  Classification is stateless and a failure
//! only affects the one message.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::error::MalformedSampleError;
use crate::types::{Band, TelemetrySample};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

/// Classify a payload given as text.
pub fn classify_str(raw: &str) -> Result<TelemetrySample, MalformedSampleError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| MalformedSampleError::InvalidJson(e.to_string()))?;
    classify_value(&value)
}

/// Classify a payload given as an already-decoded JSON value.
///
/// A `Value::String` is decoded once more as JSON text.
pub fn classify_value(raw: &Value) -> Result<TelemetrySample, MalformedSampleError> {
    match raw {
        Value::Object(map) => classify_object(map),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => classify_object(&map),
            Ok(_) => Err(MalformedSampleError::NotAnObject),
            Err(e) => Err(MalformedSampleError::InvalidJson(e.to_string())),
        },
        _ => Err(MalformedSampleError::NotAnObject),
    }
}

fn classify_object(map: &Map<String, Value>) -> Result<TelemetrySample, MalformedSampleError> {
    let alpha = band_power(map, "alpha", "alpha_band")?;
    let beta = band_power(map, "beta", "beta_band")?;
    let theta = band_power(map, "theta", "theta_band")?;
    let delta = band_power(map, "delta", "delta_band")?;
    let gamma = band_power(map, "gamma", "gamma_band")?;

    let mut sample = TelemetrySample {
        alpha,
        beta,
        theta,
        delta,
        gamma,
        dominant_band: None,
        alpha_beta_ratio: optional_number(map, &["alpha_beta_ratio"])?,
        alpha_delta_ratio: optional_number(map, &["alpha_delta_ratio"])?,
        peak_alpha_freq: optional_number(map, &["peak_alpha_freq", "frequency"])?,
        psd: optional_number(map, &["psd"])?,
        timestamp: match map.get("timestamp").and_then(Value::as_f64) {
            Some(ts) if ts.is_finite() => ts,
            _ => now_ms(),
        },
    };

    // The server's label wins when it names a real band; "none" or garbage
    // falls through to the computed maximum.
    sample.dominant_band = map
        .get("dominant_band")
        .and_then(Value::as_str)
        .and_then(Band::parse)
        .or_else(|| dominant_band(&sample));

    Ok(sample)
}

/// Band with the greatest power.
///
/// Ties keep the earlier band in [`Band::ALL`] order.  Returns `None` when
/// every band is at zero.
pub fn dominant_band(sample: &TelemetrySample) -> Option<Band> {
    let mut best: Option<(Band, f64)> = None;
    for band in Band::ALL {
        let p = sample.power(band);
        if p > 0.0 && best.map_or(true, |(_, bp)| p > bp) {
            best = Some((band, p));
        }
    }
    best.map(|(b, _)| b)
}

/// One-line summary pushed into the session's rolling log.
pub fn format_log_line(sample: &TelemetrySample) -> String {
    let dominant = sample
        .dominant_band
        .map(|b| b.keyword())
        .unwrap_or("none");
    format!(
        "[{:.0}] {dominant:5}  α={:.2} β={:.2} θ={:.2} δ={:.2} γ={:.2}  PAF={:.2}Hz  PSD={:.2}",
        sample.timestamp,
        sample.alpha,
        sample.beta,
        sample.theta,
        sample.delta,
        sample.gamma,
        sample.peak_alpha_freq,
        sample.psd,
    )
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn band_power(
    map: &Map<String, Value>,
    key: &'static str,
    alias: &'static str,
) -> Result<f64, MalformedSampleError> {
    let (field, value) = match (map.get(key), map.get(alias)) {
        (Some(v), _) => (key, v),
        (None, Some(v)) => (alias, v),
        (None, None) => return Err(MalformedSampleError::MissingField(key)),
    };
    finite_non_negative(field, value)
}

fn optional_number(
    map: &Map<String, Value>,
    keys: &[&'static str],
) -> Result<f64, MalformedSampleError> {
    for &key in keys {
        match map.get(key) {
            None | Some(Value::Null) => continue,
            Some(v) => {
                return v.as_f64().filter(|n| n.is_finite()).ok_or_else(|| {
                    MalformedSampleError::InvalidNumber {
                        field: key,
                        value: v.to_string(),
                    }
                })
            }
        }
    }
    Ok(0.0)
}

fn finite_non_negative(field: &'static str, value: &Value) -> Result<f64, MalformedSampleError> {
    match value.as_f64() {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(n),
        _ => Err(MalformedSampleError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_payload_is_classified() {
        let s = classify_value(&json!({
            "alpha": 10.0, "beta": 5.0, "theta": 2.0, "delta": 1.0, "gamma": 0.5,
            "dominant_band": "Alpha", "psd": 42.5, "timestamp": 1000.0
        }))
        .unwrap();
        assert_eq!(s.alpha, 10.0);
        assert_eq!(s.dominant_band, Some(Band::Alpha));
        assert_eq!(s.psd, 42.5);
        assert_eq!(s.timestamp, 1000.0);
    }

    #[test]
    fn string_payload_and_band_aliases() {
        let raw = json!(
            r#"{"alpha_band":1,"beta_band":7,"theta_band":2,"delta_band":0,"gamma_band":3,"frequency":10.5}"#
        );
        let s = classify_value(&raw).unwrap();
        assert_eq!(s.beta, 7.0);
        assert_eq!(s.peak_alpha_freq, 10.5);
        assert_eq!(s.dominant_band, Some(Band::Beta));
    }

    #[test]
    fn dominant_band_none_is_recomputed() {
        let s = classify_str(
            r#"{"alpha":1,"beta":1,"theta":4,"delta":4,"gamma":0,"dominant_band":"none"}"#,
        )
        .unwrap();
        // theta and delta tie; theta comes first
        assert_eq!(s.dominant_band, Some(Band::Theta));
    }

    #[test]
    fn all_zero_has_no_dominant_band() {
        let s = classify_str(r#"{"alpha":0,"beta":0,"theta":0,"delta":0,"gamma":0}"#).unwrap();
        assert_eq!(s.dominant_band, None);
    }

    #[test]
    fn missing_or_invalid_fields_are_rejected() {
        assert_eq!(
            classify_str(r#"{"alpha":1,"beta":1,"theta":1,"delta":1}"#),
            Err(MalformedSampleError::MissingField("gamma"))
        );
        assert!(matches!(
            classify_str(r#"{"alpha":"x","beta":1,"theta":1,"delta":1,"gamma":1}"#),
            Err(MalformedSampleError::InvalidNumber { field: "alpha", .. })
        ));
        assert!(matches!(
            classify_str(r#"{"alpha":-1,"beta":1,"theta":1,"delta":1,"gamma":1}"#),
            Err(MalformedSampleError::InvalidNumber { .. })
        ));
        assert!(matches!(
            classify_str(r#"{"alpha":1,"beta":1,"theta":1,"delta":1,"gamma":1,"psd":"loud"}"#),
            Err(MalformedSampleError::InvalidNumber { field: "psd", .. })
        ));
        assert_eq!(classify_value(&json!(3)), Err(MalformedSampleError::NotAnObject));
        assert!(matches!(
            classify_str("{not json"),
            Err(MalformedSampleError::InvalidJson(_))
        ));
    }

    #[test]
    fn log_line_mentions_dominant_band_and_psd() {
        let s = classify_str(
            r#"{"alpha":10,"beta":5,"theta":2,"delta":1,"gamma":0.5,"psd":3.25,"timestamp":7}"#,
        )
        .unwrap();
        let line = format_log_line(&s);
        assert!(line.starts_with("[7] alpha"));
        assert!(line.contains("PSD=3.25"));
    }
}
