//! Socket.IO wire framing for the telemetry/control channel.
//!
//! The telemetry server speaks Socket.IO v5 over Engine.IO v4 on a plain
//! WebSocket transport.  Every WebSocket text message is one Engine.IO packet:
//!
//! ```text
//! byte 0     : engine.io packet type ('0' open, '1' close, '2' ping, '3' pong, '4' message, '6' noop)
//! bytes 1..N : packet data
//! ```
//!
//! A `'4'` message carries one Socket.IO packet:
//!
//! ```text
//! byte 0     : socket.io packet type ('0' connect, '1' disconnect, '2' event, '4' connect error)
//! [/nsp,]    : optional namespace, only for non-default namespaces
//! [digits]   : optional ack id
//! JSON       : payload; for events a JSON array `["name", arg, …]`
//! ```
//!
//! Only the default namespace is used and acknowledgements are never
//! requested, so outbound frames are just `40` (connect) and
//! `42["control_command","…"]` (emit).

use serde_json::Value;

use crate::error::ProtocolError;

// ── Event names ───────────────────────────────────────────────────────────────

/// Inbound event carrying one telemetry sample.
pub const EEG_DATA_EVENT: &str = "eeg_data";

/// Outbound event carrying one actuator command string.
pub const CONTROL_COMMAND_EVENT: &str = "control_command";

/// Engine.IO protocol revision requested in the handshake URL.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Path the Socket.IO server is mounted on.
pub const SOCKET_IO_PATH: &str = "/socket.io/";

// ── Packets ───────────────────────────────────────────────────────────────────

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake; carries the JSON handshake object.
    Open(Value),
    /// Engine.IO close.
    Close,
    /// Server heartbeat; must be answered with [`PONG`].
    Ping,
    Pong,
    Noop,
    /// Socket.IO namespace connection acknowledged.
    Connect,
    /// Socket.IO namespace disconnect.
    Disconnect,
    /// Socket.IO namespace connection refused; carries the server's message.
    ConnectError(String),
    /// Socket.IO event with its first argument (or `Null` when none).
    Event { name: String, payload: Value },
    /// Any other well-formed packet (acks, binary placeholders, upgrades).
    Other,
}

/// Client frame answering a server ping.
pub const PONG: &str = "3";

/// Client frame joining the default namespace.
pub const CONNECT_DEFAULT_NAMESPACE: &str = "40";

/// Build the WebSocket URL for a Socket.IO server address.
///
/// `http`/`https` schemes become `ws`/`wss`; an address without a scheme is
/// treated as `ws`.  A trailing path other than `/` is kept as-is, which lets
/// callers pass a fully-formed URL.
///
/// ```
/// # use neurosculpt::protocol::websocket_url;
/// assert_eq!(
///     websocket_url("http://192.168.1.224:5001"),
///     "ws://192.168.1.224:5001/socket.io/?EIO=4&transport=websocket"
/// );
/// ```
pub fn websocket_url(server: &str) -> String {
    let (scheme, rest) = match server.split_once("://") {
        Some(("https", rest)) | Some(("wss", rest)) => ("wss", rest),
        Some((_, rest)) => ("ws", rest),
        None => ("ws", server),
    };
    let rest = rest.trim_end_matches('/');
    if rest.contains('/') {
        return format!("{scheme}://{rest}");
    }
    format!(
        "{scheme}://{rest}{SOCKET_IO_PATH}?EIO={ENGINE_IO_VERSION}&transport=websocket"
    )
}

/// Encode a Socket.IO event emit on the default namespace.
///
/// ```
/// # use neurosculpt::protocol::encode_event;
/// # use serde_json::json;
/// assert_eq!(encode_event("control_command", &json!("STOP")), r#"42["control_command","STOP"]"#);
/// ```
pub fn encode_event(name: &str, payload: &Value) -> String {
    let frame = Value::Array(vec![Value::String(name.to_owned()), payload.clone()]);
    format!("42{frame}")
}

/// Encode an actuator command for the `control_command` event.
pub fn encode_control_command(command: &str) -> String {
    encode_event(CONTROL_COMMAND_EVENT, &Value::String(command.to_owned()))
}

/// Decode one WebSocket text message.
pub fn decode_packet(frame: &str) -> Result<Packet, ProtocolError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let data = chars.as_str();
    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(data).unwrap_or(Value::Null))),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(data),
        '5' => Ok(Packet::Other),
        '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::UnknownPacket(other)),
    }
}

fn decode_socket_packet(data: &str) -> Result<Packet, ProtocolError> {
    let mut chars = data.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let mut rest = chars.as_str();

    // Namespace: "/admin,", only present for non-default namespaces.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(i) => &rest[i + 1..],
            None => "",
        };
    }
    // Ack id: leading digits before the JSON payload.
    rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(rest),
        '4' => {
            let message = match serde_json::from_str::<Value>(rest) {
                Ok(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| rest.to_owned()),
                Ok(Value::String(s)) => s,
                _ => rest.to_owned(),
            };
            Ok(Packet::ConnectError(message))
        }
        '3' | '5' | '6' => Ok(Packet::Other),
        other => Err(ProtocolError::UnknownSocketPacket(other)),
    }
}

fn decode_event(json: &str) -> Result<Packet, ProtocolError> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| ProtocolError::BadEvent(e.to_string()))?;
    let Value::Array(mut items) = value else {
        return Err(ProtocolError::BadEvent("event payload is not an array".into()));
    };
    if items.is_empty() {
        return Err(ProtocolError::BadEvent("event array is empty".into()));
    }
    let name = match items.remove(0) {
        Value::String(s) => s,
        other => return Err(ProtocolError::BadEvent(format!("event name {other} is not a string"))),
    };
    let payload = if items.is_empty() {
        Value::Null
    } else {
        items.swap_remove(0)
    };
    Ok(Packet::Event { name, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn engine_io_control_packets() {
        assert_eq!(decode_packet("2"), Ok(Packet::Ping));
        assert_eq!(decode_packet("3"), Ok(Packet::Pong));
        assert_eq!(decode_packet("1"), Ok(Packet::Close));
        assert_eq!(decode_packet("6"), Ok(Packet::Noop));
        assert_eq!(decode_packet(""), Err(ProtocolError::Empty));
        assert_eq!(decode_packet("9"), Err(ProtocolError::UnknownPacket('9')));
        match decode_packet(r#"0{"sid":"abc","pingInterval":25000}"#) {
            Ok(Packet::Open(v)) => assert_eq!(v["sid"], "abc"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn socket_io_connect_and_errors() {
        assert_eq!(decode_packet(r#"40{"sid":"xyz"}"#), Ok(Packet::Connect));
        assert_eq!(decode_packet("41"), Ok(Packet::Disconnect));
        assert_eq!(
            decode_packet(r#"44{"message":"Not authorized"}"#),
            Ok(Packet::ConnectError("Not authorized".into()))
        );
    }

    #[test]
    fn events_with_object_and_string_payloads() {
        assert_eq!(
            decode_packet(r#"42["eeg_data",{"alpha":1}]"#),
            Ok(Packet::Event {
                name: "eeg_data".into(),
                payload: json!({"alpha": 1})
            })
        );
        assert_eq!(
            decode_packet(r#"42["eeg_data","{\"alpha\":1}"]"#),
            Ok(Packet::Event {
                name: "eeg_data".into(),
                payload: json!("{\"alpha\":1}")
            })
        );
        assert_eq!(
            decode_packet(r#"42["ping_only"]"#),
            Ok(Packet::Event {
                name: "ping_only".into(),
                payload: Value::Null
            })
        );
    }

    #[test]
    fn namespace_and_ack_id_are_skipped() {
        assert_eq!(
            decode_packet(r#"42/telemetry,17["eeg_data",3]"#),
            Ok(Packet::Event {
                name: "eeg_data".into(),
                payload: json!(3)
            })
        );
    }

    #[test]
    fn malformed_events_are_rejected() {
        assert!(matches!(decode_packet("42{}"), Err(ProtocolError::BadEvent(_))));
        assert!(matches!(decode_packet("42[]"), Err(ProtocolError::BadEvent(_))));
        assert!(matches!(decode_packet("42[1,2]"), Err(ProtocolError::BadEvent(_))));
        assert!(matches!(decode_packet("42[\"x\""), Err(ProtocolError::BadEvent(_))));
    }

    #[test]
    fn outbound_frames() {
        assert_eq!(
            encode_control_command("CONFIG 80 0.5 1 71 49 62 1 3"),
            r#"42["control_command","CONFIG 80 0.5 1 71 49 62 1 3"]"#
        );
        assert_eq!(CONNECT_DEFAULT_NAMESPACE, "40");
    }

    #[test]
    fn websocket_urls() {
        assert_eq!(
            websocket_url("https://sculpture.local"),
            "wss://sculpture.local/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            websocket_url("localhost:5001/"),
            "ws://localhost:5001/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            websocket_url("ws://host:1/socket.io/?EIO=4&transport=websocket"),
            "ws://host:1/socket.io/?EIO=4&transport=websocket"
        );
    }
}
