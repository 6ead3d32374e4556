//! Raw Socket.IO frames in, `control_command` frames out.

use neurosculpt::classify::classify_value;
use neurosculpt::command::{decode_color_or_white, encode};
use neurosculpt::matcher::match_ranges;
use neurosculpt::protocol::{decode_packet, encode_control_command, Packet, EEG_DATA_EVENT};
use neurosculpt::scene::{RangeSource, SceneStore};
use neurosculpt::types::Rgb;

const SCENE: &str = r##"[
    { "id": "hall", "name": "Hall", "x": 5, "y": 2,
      "ranges": [
        { "id": "a", "signal_name": "Alpha (8-12Hz)", "lower_range": 8, "upper_range": 12,
          "brightness": 100, "speed": 1.5, "direction": "Up", "color": "#47313E",
          "selected_panels": ["0-4", "1-0"] },
        { "id": "b", "signal_name": "Beta (12-30Hz)", "lower_range": 12, "upper_range": 30,
          "brightness": 20, "speed": 0.25, "direction": "down", "color": "notacolor",
          "selected_panels": [{ "row": 1, "col": 4 }] }
      ] }
]"##;

fn commands_for(frame: &str) -> Vec<String> {
    let store = SceneStore::from_json(SCENE).unwrap();
    let ranges = store.ranges_for("hall").unwrap();
    let Packet::Event { name, payload } = decode_packet(frame).unwrap() else {
        panic!("not an event: {frame}");
    };
    assert_eq!(name, EEG_DATA_EVENT);
    let sample = classify_value(&payload).unwrap();
    match_ranges(&ranges, &sample)
        .iter()
        .map(|r| encode_control_command(&encode(r, 5, 2)))
        .collect()
}

#[test]
fn alpha_sample_activates_only_the_alpha_range() {
    let frame = r#"42["eeg_data",{"alpha":10,"beta":5,"theta":2,"delta":1,"gamma":0.5,"dominant_band":"alpha","psd":12.5}]"#;
    assert_eq!(
        commands_for(frame),
        vec![r#"42["control_command","CONFIG 100 1.5 1 71 49 62 2 5 6"]"#.to_string()]
    );
}

#[test]
fn string_encoded_payload_takes_the_same_path() {
    let frame = r#"42["eeg_data","{\"alpha\":3,\"beta\":20,\"theta\":2,\"delta\":1,\"gamma\":0.5}"]"#;
    assert_eq!(
        commands_for(frame),
        vec![r#"42["control_command","CONFIG 20 0.25 0 255 255 255 1 10"]"#.to_string()]
    );
}

#[test]
fn malformed_sample_is_rejected_before_matching() {
    let Packet::Event { payload, .. } =
        decode_packet(r#"42["eeg_data",{"alpha":"high","beta":5,"theta":2,"delta":1,"gamma":0.5}]"#)
            .unwrap()
    else {
        panic!("not an event");
    };
    assert!(classify_value(&payload).is_err());
}

#[test]
fn colour_scenarios() {
    assert_eq!(decode_color_or_white("#47313E"), Rgb { r: 71, g: 49, b: 62 });
    assert_eq!(decode_color_or_white("notacolor"), Rgb::WHITE);
}
