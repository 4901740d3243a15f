//! Socket.IO-over-WebSocket text framing.
//!
//! The simulator talks Socket.IO, which layers two packet types over each
//! WebSocket text frame:
//!
//! | Frame | Meaning |
//! |---|---|
//! | `0{...}` | Engine.IO open (server → client, carries the session id) |
//! | `1` | Engine.IO close |
//! | `2` / `3` | Engine.IO ping / pong |
//! | `40` | Socket.IO connect to the default namespace |
//! | `41` | Socket.IO disconnect |
//! | `42["name", payload]` | Socket.IO event |
//!
//! Namespaces (`42/ns,[...]`) and ack ids (`4217[...]`) are parsed and
//! tolerated. Binary attachments are not supported.

use drivelink_types::DriveError;
use serde_json::{Value, json};

/// Engine.IO protocol revision, negotiated through the `EIO` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVersion {
    /// Socket.IO 2.x clients: the server attaches the default namespace on
    /// open and the client drives the heartbeat.
    V3,
    /// Socket.IO 3.x/4.x clients: the client attaches explicitly and the
    /// server drives the heartbeat.
    V4,
}

impl EngineVersion {
    /// Read `EIO=<n>` from a request query string. Defaults to [`V4`].
    ///
    /// [`V4`]: EngineVersion::V4
    pub fn from_query(query: Option<&str>) -> Self {
        let eio = query
            .unwrap_or("")
            .split('&')
            .find_map(|pair| pair.strip_prefix("EIO="));
        match eio {
            Some("3") => Self::V3,
            _ => Self::V4,
        }
    }
}

/// One decoded WebSocket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open,
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// The Socket.IO packet carried by an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack: Option<u64>,
        name: String,
        /// First argument after the event name, if any.
        payload: Option<Value>,
    },
    Ack {
        namespace: String,
        ack: Option<u64>,
    },
    ConnectError {
        namespace: String,
    },
}

/// Decode one WebSocket text frame.
///
/// # Errors
///
/// Returns [`DriveError::Decode`] for empty frames, unknown packet types,
/// binary packets and event bodies that are not `["name", ...]` arrays.
pub fn decode(text: &str) -> Result<EnginePacket, DriveError> {
    let (kind, rest) = split_type(text)?;
    match kind {
        '0' => Ok(EnginePacket::Open),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => decode_socket(rest).map(EnginePacket::Message),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(DriveError::Decode(format!("unknown engine packet type {other:?}"))),
    }
}

fn split_type(text: &str) -> Result<(char, &str), DriveError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| DriveError::Decode("empty packet".to_string()))?;
    Ok((kind, chars.as_str()))
}

fn decode_socket(text: &str) -> Result<SocketPacket, DriveError> {
    let (kind, rest) = split_type(text)?;
    if matches!(kind, '5' | '6') {
        return Err(DriveError::Decode("binary socket packets are not supported".to_string()));
    }

    let (namespace, rest) = match rest.strip_prefix('/') {
        Some(_) => match rest.find(',') {
            Some(end) => (&rest[..end], &rest[end + 1..]),
            None => (rest, ""),
        },
        None => ("/", rest),
    };
    let namespace = namespace.to_string();

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let ack = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let body = &rest[digits..];

    match kind {
        '0' => Ok(SocketPacket::Connect { namespace }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let (name, payload) = decode_event_body(body)?;
            Ok(SocketPacket::Event {
                namespace,
                ack,
                name,
                payload,
            })
        }
        '3' => Ok(SocketPacket::Ack { namespace, ack }),
        '4' => Ok(SocketPacket::ConnectError { namespace }),
        other => Err(DriveError::Decode(format!("unknown socket packet type {other:?}"))),
    }
}

fn decode_event_body(body: &str) -> Result<(String, Option<Value>), DriveError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| DriveError::Decode(format!("event body is not JSON: {e}")))?;
    let Value::Array(mut items) = value else {
        return Err(DriveError::Decode("event body must be a JSON array".to_string()));
    };
    if items.is_empty() {
        return Err(DriveError::Decode("event body is an empty array".to_string()));
    }
    let payload = if items.len() > 1 { Some(items.swap_remove(1)) } else { None };
    match items.swap_remove(0) {
        Value::String(name) => Ok((name, payload)),
        other => Err(DriveError::Decode(format!("event name must be a string, got {other}"))),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Encoding
// ────────────────────────────────────────────────────────────────────────────

/// Engine.IO open packet announcing the session and its heartbeat timings.
pub fn encode_open(sid: &str, ping_interval_ms: u64, ping_timeout_ms: u64) -> String {
    let handshake = json!({
        "sid": sid,
        "upgrades": [],
        "pingInterval": ping_interval_ms,
        "pingTimeout": ping_timeout_ms,
    });
    format!("0{handshake}")
}

/// Socket.IO connect acknowledgement for the default namespace.
pub fn encode_connect(version: EngineVersion, sid: &str) -> String {
    match version {
        EngineVersion::V3 => "40".to_string(),
        EngineVersion::V4 => format!("40{}", json!({ "sid": sid })),
    }
}

/// Socket.IO event on the default namespace.
pub fn encode_event(name: &str, payload: &Value) -> String {
    format!("42{}", json!([name, payload]))
}

pub fn encode_ping() -> String {
    "2".to_string()
}

/// Answer a ping, echoing its data.
pub fn encode_pong(data: &str) -> String {
    format!("3{data}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_engine_control_packets() {
        assert_eq!(decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(decode("2hello").unwrap(), EnginePacket::Ping("hello".to_string()));
        assert_eq!(decode("3").unwrap(), EnginePacket::Pong(String::new()));
        assert_eq!(decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(decode("6").unwrap(), EnginePacket::Noop);
    }

    #[test]
    fn decodes_connect_and_disconnect() {
        assert_eq!(
            decode("40").unwrap(),
            EnginePacket::Message(SocketPacket::Connect { namespace: "/".to_string() })
        );
        assert_eq!(
            decode("40/admin,").unwrap(),
            EnginePacket::Message(SocketPacket::Connect { namespace: "/admin".to_string() })
        );
        assert_eq!(
            decode("41").unwrap(),
            EnginePacket::Message(SocketPacket::Disconnect { namespace: "/".to_string() })
        );
    }

    #[test]
    fn decodes_event_with_payload() {
        let packet = decode(r#"42["telemetry",{"speed":"1.5","image":"abc"}]"#).unwrap();
        let EnginePacket::Message(SocketPacket::Event { namespace, ack, name, payload }) = packet else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/");
        assert_eq!(ack, None);
        assert_eq!(name, "telemetry");
        assert_eq!(payload.unwrap()["speed"], "1.5");
    }

    #[test]
    fn decodes_event_with_namespace_and_ack() {
        let packet = decode(r#"42/cars,17["manual",{}]"#).unwrap();
        let EnginePacket::Message(SocketPacket::Event { namespace, ack, name, .. }) = packet else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/cars");
        assert_eq!(ack, Some(17));
        assert_eq!(name, "manual");
    }

    #[test]
    fn event_without_payload_has_none() {
        let packet = decode(r#"42["connect"]"#).unwrap();
        assert!(matches!(
            packet,
            EnginePacket::Message(SocketPacket::Event { payload: None, .. })
        ));
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        for bad in ["", "9", "42", "42{}", "42[]", "42[1,2]", r#"451-["x",{}]"#, "4x"] {
            let err = decode(bad).unwrap_err();
            assert!(matches!(err, DriveError::Decode(_)), "frame {bad:?} gave {err:?}");
        }
    }

    #[test]
    fn encodes_steer_event() {
        let frame = encode_event("steer", &json!({"steering_angle": "0", "throttle": "0"}));
        assert!(frame.starts_with("42[\"steer\","));
        let back = decode(&frame).unwrap();
        let EnginePacket::Message(SocketPacket::Event { name, payload, .. }) = back else {
            panic!("expected event");
        };
        assert_eq!(name, "steer");
        assert_eq!(payload.unwrap()["throttle"], "0");
    }

    #[test]
    fn open_packet_carries_sid_and_timings() {
        let frame = encode_open("abc", 25000, 20000);
        let handshake: Value = serde_json::from_str(&frame[1..]).unwrap();
        assert_eq!(handshake["sid"], "abc");
        assert_eq!(handshake["pingInterval"], 25000);
        assert_eq!(handshake["pingTimeout"], 20000);
    }

    #[test]
    fn connect_ack_depends_on_version() {
        assert_eq!(encode_connect(EngineVersion::V3, "abc"), "40");
        assert_eq!(encode_connect(EngineVersion::V4, "abc"), r#"40{"sid":"abc"}"#);
    }

    #[test]
    fn version_from_query() {
        assert_eq!(EngineVersion::from_query(Some("EIO=3&transport=websocket")), EngineVersion::V3);
        assert_eq!(EngineVersion::from_query(Some("transport=websocket&EIO=4")), EngineVersion::V4);
        assert_eq!(EngineVersion::from_query(None), EngineVersion::V4);
    }

    #[test]
    fn pong_echoes_ping_data() {
        assert_eq!(encode_pong("hello"), "3hello");
        assert_eq!(encode_ping(), "2");
    }
}
