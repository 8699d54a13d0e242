//! DDP wire message types.
//!
//! Every frame on the wire is an EJSON object with a `msg` discriminator.
//! `ClientFrame` covers the messages a connection may receive;
//! `ServerFrame` covers the messages a connection may send. Both are
//! `#[serde(tag = "msg", rename_all = "lowercase")]` enums, so
//! `serde_json::from_value`/`to_value` produce exactly the wire shapes in
//! with no intermediate mapping step.
//!
//! Protocol versions a `connect` may negotiate, preference order first.
pub const SUPPORTED_VERSIONS: &[&str] = &["1", "pre2", "pre1"];
/// The version the server proposes in `failed` when negotiation fails.
pub const PREFERRED_VERSION: &str = "1";

use crate::error::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame sent by a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Open the session. `support` lists versions the client is willing to
    /// speak, most-preferred first.
    Connect {
        version: String,
        support: Vec<String>,
    },
    /// Keepalive, optionally correlated with an id.
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Keepalive reply, optionally correlated with an id.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Subscribe to a publication under a client-chosen subscription id.
    Sub {
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    /// Tear down a previously opened subscription.
    Unsub { id: String },
    /// Invoke a registered method.
    Method {
        id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
        #[serde(rename = "randomSeed", skip_serializing_if = "Option::is_none")]
        random_seed: Option<String>,
    },
}

/// A frame sent by the server to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Handshake accepted; `session` is the connection's opaque id.
    Connected { session: String },
    /// Handshake rejected: no mutually supported version. `version` is the
    /// server's preferred version, offered so the client can retry.
    Failed { version: String },
    /// Keepalive, optionally correlated with an id.
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Keepalive reply, optionally correlated with an id.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// A subscription was torn down, by request or by error.
    Nosub {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    /// Initial sync for the named subscription ids is complete.
    Ready { subs: Vec<String> },
    /// A record entered the remote's visible set.
    Added {
        collection: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<Value>,
    },
    /// Fields changed on a record already in the remote's visible set.
    Changed {
        collection: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cleared: Option<Vec<String>>,
    },
    /// A record left the remote's visible set. Carries no `fields`.
    Removed { collection: String, id: String },
    /// The outcome of a `method` invocation.
    Result {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    /// Queued immediately after `result`: tells the client its local method
    /// stub for `id` is now safe to discard (the server has a definitive
    /// answer and any further writes were already applied).
    Updated { methods: Vec<String> },
    /// A frame-level protocol violation: malformed message, unknown `msg`,
    /// or a schema mismatch on a known one. Always carries the `400` status
    /// (§7): a violation of frame shape itself, as opposed to a method or
    /// subscription outcome, is always a bad request.
    Error {
        error: u16,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "offendingMessage")]
        offending_message: Option<Value>,
    },
}

impl ServerFrame {
    /// Convert an `Error` into the `error` frame sent for a malformed or
    /// unrecognized client message. Use `Result::error`/`Nosub::error` for
    /// errors scoped to a method call or subscription instead.
    pub fn protocol_error(reason: impl Into<String>, offending: Option<Value>) -> Self {
        ServerFrame::Error {
            error: 400,
            reason: reason.into(),
            offending_message: offending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connect_frame_round_trips() {
        let frame = ClientFrame::Connect {
            version: "1".into(),
            support: vec!["1".into(), "pre2".into(), "pre1".into()],
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["msg"], "connect");
        let back: ClientFrame = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn sub_frame_parses_from_wire_json() {
        let raw = json!({"msg": "sub", "id": "s1", "name": "tasks", "params": {"limit": 10}});
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::Sub { id, name, params } => {
                assert_eq!(id, "s1");
                assert_eq!(name, "tasks");
                assert_eq!(params, Some(json!({"limit": 10})));
            }
            other => panic!("expected Sub, got {other:?}"),
        }
    }

    #[test]
    fn method_frame_carries_optional_random_seed() {
        let raw = json!({"msg": "method", "id": "m1", "method": "tasks.add", "randomSeed": "abc"});
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::Method { random_seed, .. } => assert_eq!(random_seed.as_deref(), Some("abc")),
            other => panic!("expected Method, got {other:?}"),
        }
    }

    #[test]
    fn connected_frame_serializes_with_msg_discriminator() {
        let frame = ServerFrame::Connected { session: "abc12345678901234".into() };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["msg"], "connected");
        assert_eq!(value["session"], "abc12345678901234");
    }

    #[test]
    fn removed_frame_omits_fields() {
        let frame = ServerFrame::Removed {
            collection: "tasks".into(),
            id: "r1".into(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("fields").is_none());
    }

    #[test]
    fn result_frame_omits_absent_error_and_result() {
        let frame = ServerFrame::Result {
            id: "m1".into(),
            result: Some(json!(42)),
            error: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["result"], 42);
    }

    #[test]
    fn result_frame_with_error_carries_wire_error() {
        let frame = ServerFrame::Result {
            id: "m1".into(),
            result: None,
            error: Some(WireError::not_found("Method not found: tasks.bogus")),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["error"]["error"], 404);
    }

    #[test]
    fn ready_frame_lists_sub_ids() {
        let frame = ServerFrame::Ready { subs: vec!["s1".into()] };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["subs"], json!(["s1"]));
    }

    #[test]
    fn protocol_error_frame_carries_400_status() {
        let frame = ServerFrame::protocol_error("missing field 'name'", None);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["msg"], "error");
        assert_eq!(value["error"], 400);
    }

    #[test]
    fn unknown_msg_discriminator_fails_to_parse() {
        let raw = json!({"msg": "not-a-real-message"});
        let parsed: Result<ClientFrame, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }
}
