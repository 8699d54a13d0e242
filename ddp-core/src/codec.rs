//! EJSON codec: JSON extended with tagged objects for types JSON has no
//! native representation for.
//!
//! Three tags are recognized:
//! - `{"$date": <ms since epoch>}` for timestamps.
//! - `{"$binary": <base64>}` for byte strings.
//! - `{"$type": <name>, "$value": <ejson>}` for any other custom type a
//!   collection or method declares.
//!
//! `encode`/`decode` round-trip any composition of
//! `{number, string, bool, null, array, object, date, binary}`. This is
//! tested directly below and exercised transitively by every wire-level
//! integration test, since every DDP frame is an EJSON object.
//!
//! Frame payloads additionally get the SockJS outer envelope: a JSON array
//! of strings, each string itself an EJSON-encoded frame
//! (`encode_frames`/`decode_frames`).

use crate::error::{Error, Result};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// An EJSON value: a JSON value extended with `Date`, `Binary`, and a
/// catch-all `Type` tag for application-defined extension types.
#[derive(Debug, Clone, PartialEq)]
pub enum Ejson {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    Type { name: String, value: Box<Ejson> },
    Array(Vec<Ejson>),
    Object(Vec<(String, Ejson)>),
}

const BASE64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::STANDARD;

/// Encode an `Ejson` value into its plain-JSON wire representation.
pub fn encode(value: &Ejson) -> Value {
    match value {
        Ejson::Null => Value::Null,
        Ejson::Bool(b) => Value::Bool(*b),
        Ejson::Number(n) => Value::Number(n.clone()),
        Ejson::String(s) => Value::String(s.clone()),
        Ejson::Date(dt) => {
            let mut obj = Map::new();
            obj.insert("$date".to_string(), Value::from(dt.timestamp_millis()));
            Value::Object(obj)
        }
        Ejson::Binary(bytes) => {
            let mut obj = Map::new();
            obj.insert("$binary".to_string(), Value::String(BASE64.encode(bytes)));
            Value::Object(obj)
        }
        Ejson::Type { name, value } => {
            let mut obj = Map::new();
            obj.insert("$type".to_string(), Value::String(name.clone()));
            obj.insert("$value".to_string(), encode(value));
            Value::Object(obj)
        }
        Ejson::Array(items) => Value::Array(items.iter().map(encode).collect()),
        Ejson::Object(fields) => {
            let mut obj = Map::new();
            for (k, v) in fields {
                obj.insert(k.clone(), encode(v));
            }
            Value::Object(obj)
        }
    }
}

/// Decode a plain-JSON wire value into `Ejson`, recognizing the `$date`,
/// `$binary`, and `$type`/`$value` tags.
pub fn decode(value: &Value) -> Result<Ejson> {
    match value {
        Value::Null => Ok(Ejson::Null),
        Value::Bool(b) => Ok(Ejson::Bool(*b)),
        Value::Number(n) => Ok(Ejson::Number(n.clone())),
        Value::String(s) => Ok(Ejson::String(s.clone())),
        Value::Array(items) => items.iter().map(decode).collect::<Result<_>>().map(Ejson::Array),
        Value::Object(obj) => decode_object(obj),
    }
}

fn decode_object(obj: &Map<String, Value>) -> Result<Ejson> {
    if obj.len() == 1 {
        if let Some(ms) = obj.get("$date") {
            let ms = ms
                .as_i64()
                .ok_or_else(|| Error::Codec("$date value must be an integer".into()))?;
            let dt = Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| Error::Codec("$date value out of range".into()))?;
            return Ok(Ejson::Date(dt));
        }
        if let Some(Value::String(b64)) = obj.get("$binary") {
            let bytes = BASE64
                .decode(b64)
                .map_err(|e| Error::Codec(format!("invalid $binary payload: {e}")))?;
            return Ok(Ejson::Binary(bytes));
        }
    }

    if obj.len() == 2 {
        if let (Some(Value::String(name)), Some(inner)) = (obj.get("$type"), obj.get("$value")) {
            return Ok(Ejson::Type {
                name: name.clone(),
                value: Box::new(decode(inner)?),
            });
        }
    }

    let mut fields = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        fields.push((k.clone(), decode(v)?));
    }
    Ok(Ejson::Object(fields))
}

/// Encode a sequence of frames into the outer SockJS envelope:
/// a JSON array of strings, each one an EJSON-encoded frame.
pub fn encode_frames(frames: &[Value]) -> String {
    let strings: Vec<Value> = frames
        .iter()
        .map(|f| Value::String(f.to_string()))
        .collect();
    Value::Array(strings).to_string()
}

/// Decode a SockJS `a[...]` envelope back into its constituent frames.
pub fn decode_frames(payload: &str) -> Result<Vec<Value>> {
    let outer: Value = serde_json::from_str(payload)
        .map_err(|e| Error::Codec(format!("invalid SockJS envelope: {e}")))?;
    let items = outer
        .as_array()
        .ok_or_else(|| Error::Codec("SockJS envelope must be a JSON array".into()))?;
    items
        .iter()
        .map(|item| {
            let s = item
                .as_str()
                .ok_or_else(|| Error::Codec("SockJS envelope entries must be strings".into()))?;
            serde_json::from_str(s).map_err(|e| Error::Codec(format!("invalid frame json: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(value: Ejson) {
        let encoded = encode(&value);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn roundtrips_primitives() {
        roundtrip(Ejson::Null);
        roundtrip(Ejson::Bool(true));
        roundtrip(Ejson::Number(serde_json::Number::from(42)));
        roundtrip(Ejson::String("hello".into()));
    }

    #[test]
    fn roundtrips_date() {
        let dt = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        roundtrip(Ejson::Date(dt));
    }

    #[test]
    fn roundtrips_binary() {
        roundtrip(Ejson::Binary(vec![0, 1, 2, 255, 254, 253]));
    }

    #[test]
    fn roundtrips_custom_type_tag() {
        roundtrip(Ejson::Type {
            name: "oid".into(),
            value: Box::new(Ejson::String("abc123".into())),
        });
    }

    #[test]
    fn roundtrips_nested_array_and_object() {
        let value = Ejson::Object(vec![
            (
                "items".into(),
                Ejson::Array(vec![
                    Ejson::Number(serde_json::Number::from(1)),
                    Ejson::Binary(vec![9, 8, 7]),
                ]),
            ),
            ("when".into(), Ejson::Date(Utc.timestamp_millis_opt(0).unwrap())),
        ]);
        roundtrip(value);
    }

    #[test]
    fn date_encodes_as_tagged_object() {
        let dt = Utc.timestamp_millis_opt(1000).unwrap();
        let encoded = encode(&Ejson::Date(dt));
        assert_eq!(encoded, json!({"$date": 1000}));
    }

    #[test]
    fn binary_encodes_as_base64() {
        let encoded = encode(&Ejson::Binary(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(encoded, json!({"$binary": "3q2+7w=="}));
    }

    #[test]
    fn frames_roundtrip_through_sockjs_envelope() {
        let frames = vec![json!({"msg": "ping"}), json!({"msg": "pong", "id": "x"})];
        let payload = encode_frames(&frames);
        assert!(payload.starts_with('['));
        let decoded = decode_frames(&payload).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn decode_rejects_non_array_envelope() {
        assert!(decode_frames("{}").is_err());
    }
}
