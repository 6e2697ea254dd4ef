//! Text frames of Socket.IO v5 over Engine.IO v4, default namespace only.

use crate::errors::{Error, Result};
use serde_json::Value;

/// Query appended to the socket URL when it does not name the endpoint itself.
pub const HANDSHAKE_QUERY: &str = "/socket.io/?EIO=4&transport=websocket";

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        data: Value,
        ack: Option<u64>,
    },
    Ack { id: u64, data: Value },
    ConnectError(Value),
}

pub fn encode(packet: &Packet) -> String {
    match packet {
        Packet::Open(data) => format!("0{}", data),
        Packet::Close => "1".to_string(),
        Packet::Ping => "2".to_string(),
        Packet::Pong => "3".to_string(),
        Packet::Noop => "6".to_string(),
        Packet::Connect(None) => "40".to_string(),
        Packet::Connect(Some(auth)) => format!("40{}", auth),
        Packet::Disconnect => "41".to_string(),
        Packet::Event { name, data, ack } => {
            let payload = Value::Array(vec![Value::String(name.clone()), data.clone()]);
            match ack {
                Some(id) => format!("42{}{}", id, payload),
                None => format!("42{}", payload),
            }
        }
        Packet::Ack { id, data } => format!("43{}{}", id, data),
        Packet::ConnectError(data) => format!("44{}", data),
    }
}

fn json_or_null(text: &str) -> Result<Value> {
    if text.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(text)?)
}

pub fn decode(frame: &str) -> Result<Packet> {
    let mut chars = frame.chars();
    let packet = match chars.next() {
        Some('0') => Packet::Open(json_or_null(chars.as_str())?),
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') => Packet::Pong,
        Some('6') => Packet::Noop,
        Some('4') => decode_message(chars.as_str())?,
        _ => return Err(Error::Emit(format!("unsupported frame {:?}", frame))),
    };
    Ok(packet)
}

fn decode_message(body: &str) -> Result<Packet> {
    let mut chars = body.chars();
    let kind = chars.next();
    // an explicit "/," namespace prefix is the default one
    let rest = chars.as_str();
    let rest = rest.strip_prefix("/,").unwrap_or(rest);

    match kind {
        Some('0') => {
            let data = json_or_null(rest)?;
            Ok(Packet::Connect((!data.is_null()).then_some(data)))
        }
        Some('1') => Ok(Packet::Disconnect),
        Some('2') => {
            let (ack, payload) = split_ack_id(rest)?;
            let mut items = match serde_json::from_str::<Value>(payload)? {
                Value::Array(items) => items.into_iter(),
                other => return Err(Error::Emit(format!("event payload is not an array: {}", other))),
            };
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => return Err(Error::Emit(format!("event without a name: {}", payload))),
            };
            Ok(Packet::Event {
                name,
                data: items.next().unwrap_or(Value::Null),
                ack,
            })
        }
        Some('3') => match split_ack_id(rest)? {
            (Some(id), payload) => Ok(Packet::Ack {
                id,
                data: json_or_null(payload)?,
            }),
            (None, _) => Err(Error::Emit(format!("ack without an id: 4{}", body))),
        },
        Some('4') => Ok(Packet::ConnectError(json_or_null(rest)?)),
        _ => Err(Error::Emit(format!("unsupported message 4{}", body))),
    }
}

/// Leading ack id, if any, and the JSON that follows it.
fn split_ack_id(text: &str) -> Result<(Option<u64>, &str)> {
    let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return Ok((None, text));
    }
    let id = text[..digits]
        .parse::<u64>()
        .map_err(|e| Error::Emit(format!("bad ack id in {:?}: {}", text, e)))?;
    Ok((Some(id), &text[digits..]))
}

/// Human-readable text of an `exception` event or a connect error.
pub fn error_message(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        Value::Object(fields) => match fields.get("message") {
            Some(Value::String(text)) => text.clone(),
            _ => data.to_string(),
        },
        other => other.to_string(),
    }
}

/// Websocket URL for a configured socket root.
pub fn socket_endpoint(socket_url: &str) -> String {
    let url = socket_url.trim_end_matches('/');
    let url = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    };

    if url.contains("/socket.io") {
        url
    } else {
        format!("{}{}", url, HANDSHAKE_QUERY)
    }
}
