//! Compute-server wire protocol.
//!
//! Outbound traffic is a single envelope type, `execute_request`. Inbound
//! traffic arrives as poll batches whose `content` array holds messages tagged
//! by `msg_type`. Decoding is total: a malformed message becomes a typed
//! message with the offending fields set to `None`, and the handler for that
//! field does nothing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SingleCellError};
use crate::ids::{BlockId, IdGenerator, InteractId, MsgId, SessionId};

/// Interpreter mode flag carried by every `execute_request`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    #[default]
    Sage,
    Python,
}

/// Outbound `execute_request` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub parent_header: serde_json::Map<String, Value>,
    pub header: RequestHeader,
    pub msg_type: String,
    pub content: ExecuteContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    pub msg_id: MsgId,
    pub session: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteContent {
    pub code: String,
    pub mode: ExecMode,
}

pub const EXECUTE_REQUEST: &str = "execute_request";

impl ExecuteRequest {
    /// Build an `execute_request`. A fresh `msg_id` is generated unless one is supplied.
    pub fn new(
        session: &SessionId,
        code: impl Into<String>,
        mode: ExecMode,
        msg_id: Option<MsgId>,
        ids: &dyn IdGenerator,
    ) -> Self {
        Self {
            parent_header: serde_json::Map::new(),
            header: RequestHeader {
                msg_id: msg_id.unwrap_or_else(|| MsgId::generate(ids)),
                session: session.clone(),
            },
            msg_type: EXECUTE_REQUEST.to_string(),
            content: ExecuteContent {
                code: code.into(),
                mode,
            },
        }
    }

    pub fn msg_id(&self) -> &MsgId {
        &self.header.msg_id
    }
}

/// Submit endpoint acknowledgement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitAck {
    #[serde(default)]
    pub computation_id: Option<String>,
}

/// One decoded poll response.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    pub computation_id: Option<String>,
    pub messages: Vec<Message>,
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Server-reported position in the session's message stream.
    pub sequence: Option<u64>,
    /// `parent_header.msg_id`: the request that produced this message.
    pub parent_msg_id: Option<MsgId>,
    /// Explicit render target, when the server names one.
    pub output_block: Option<BlockId>,
    pub body: MessageBody,
    /// The message exactly as received.
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Stream {
        name: Option<String>,
        data: Option<String>,
    },
    Pyout {
        text: Option<String>,
    },
    DisplayData {
        svg: Option<String>,
        html: Option<String>,
    },
    Pyerr {
        traceback: Option<Vec<String>>,
    },
    ExecuteReply {
        status: Option<String>,
        traceback: Option<Vec<String>>,
    },
    Extension(Extension),
    Unknown {
        msg_type: Option<String>,
    },
}

/// Side-channel messages nested inside `msg_type: "extension"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Extension {
    Files {
        files: Option<Vec<String>>,
    },
    SessionEnd,
    InteractPrepare {
        interact_id: Option<InteractId>,
        /// The `{interact_id, controls, layout}` payload, left for the interact layer to decode.
        payload: Value,
    },
    Unknown {
        msg_type: Option<String>,
    },
}

impl MessageBody {
    /// Wire tag, with extensions reported as `extension.<sub-tag>`.
    pub fn tag(&self) -> String {
        match self {
            Self::Stream { .. } => "stream".into(),
            Self::Pyout { .. } => "pyout".into(),
            Self::DisplayData { .. } => "display_data".into(),
            Self::Pyerr { .. } => "pyerr".into(),
            Self::ExecuteReply { .. } => "execute_reply".into(),
            Self::Extension(Extension::Files { .. }) => "extension.files".into(),
            Self::Extension(Extension::SessionEnd) => "extension.session_end".into(),
            Self::Extension(Extension::InteractPrepare { .. }) => {
                "extension.interact_prepare".into()
            }
            Self::Extension(Extension::Unknown { msg_type }) => {
                format!("extension.{}", msg_type.as_deref().unwrap_or("?"))
            }
            Self::Unknown { msg_type } => msg_type.clone().unwrap_or_else(|| "?".into()),
        }
    }
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn lines_at(value: &Value, pointer: &str) -> Option<Vec<String>> {
    value.pointer(pointer).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    })
}

fn decode_extension(value: &Value) -> Extension {
    match value.pointer("/content/msg_type").and_then(Value::as_str) {
        Some("files") => Extension::Files {
            files: lines_at(value, "/content/files"),
        },
        Some("session_end") => Extension::SessionEnd,
        Some("interact_prepare") => {
            // The payload is nested one level deeper in most servers, but
            // some emit it inline next to the sub-tag.
            let payload = value
                .pointer("/content/content")
                .filter(|p| p.is_object())
                .or_else(|| value.get("content"))
                .cloned()
                .unwrap_or(Value::Null);
            let interact_id = match payload.get("interact_id") {
                Some(Value::String(s)) => Some(InteractId::from(s.as_str())),
                Some(Value::Number(n)) => Some(InteractId::from(n.to_string())),
                _ => None,
            };
            Extension::InteractPrepare {
                interact_id,
                payload,
            }
        }
        other => {
            debug!(msg_type = ?other, "Unrecognized extension");
            Extension::Unknown {
                msg_type: other.map(str::to_string),
            }
        }
    }
}

/// Decode the submit endpoint's reply. `computation_id` may be a string or a number.
pub fn decode_ack(value: &Value) -> Result<SubmitAck> {
    let Value::Object(obj) = value else {
        return Err(SingleCellError::Protocol(format!(
            "submit reply is not an object: {value}"
        )));
    };
    let computation_id = match obj.get("computation_id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    Ok(SubmitAck { computation_id })
}

/// Decode one inbound message. Never fails.
pub fn decode_message(value: &Value) -> Message {
    let body = match value.get("msg_type").and_then(Value::as_str) {
        Some("stream") => MessageBody::Stream {
            name: str_at(value, "/content/name"),
            data: str_at(value, "/content/data").or_else(|| str_at(value, "/content/text")),
        },
        Some("pyout") => MessageBody::Pyout {
            text: str_at(value, "/content/data/text~1plain"),
        },
        Some("display_data") => MessageBody::DisplayData {
            svg: str_at(value, "/content/data/image~1svg+xml"),
            html: str_at(value, "/content/data/text~1html"),
        },
        Some("pyerr") => MessageBody::Pyerr {
            traceback: lines_at(value, "/content/traceback"),
        },
        Some("execute_reply") => MessageBody::ExecuteReply {
            status: str_at(value, "/content/status"),
            traceback: lines_at(value, "/content/traceback"),
        },
        Some("extension") => MessageBody::Extension(decode_extension(value)),
        other => {
            debug!(msg_type = ?other, "Unrecognized message type");
            MessageBody::Unknown {
                msg_type: other.map(str::to_string),
            }
        }
    };

    Message {
        sequence: value.get("sequence").and_then(Value::as_u64),
        parent_msg_id: str_at(value, "/parent_header/msg_id").map(MsgId::from),
        output_block: str_at(value, "/output_block").map(BlockId::from),
        body,
        raw: value.clone(),
    }
}

/// Decode a poll response body. Accepts `{computation_id?, content: [...]}`,
/// a bare array of messages, or anything else as an empty batch.
pub fn decode_batch(value: &Value) -> PollBatch {
    let (computation_id, content) = match value {
        Value::Object(obj) => (
            obj.get("computation_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            obj.get("content").and_then(Value::as_array),
        ),
        Value::Array(items) => (None, Some(items)),
        _ => (None, None),
    };

    PollBatch {
        computation_id,
        messages: content
            .map(|items| items.iter().map(decode_message).collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ids::SequentialGenerator;

    #[test]
    fn test_decode_ack_accepts_numeric_ids() {
        let ack = decode_ack(&json!({"computation_id": "abc"})).unwrap();
        assert_eq!(ack.computation_id.as_deref(), Some("abc"));
        let ack = decode_ack(&json!({"computation_id": 17})).unwrap();
        assert_eq!(ack.computation_id.as_deref(), Some("17"));
        assert!(decode_ack(&json!({})).unwrap().computation_id.is_none());
        assert!(matches!(
            decode_ack(&json!([])),
            Err(SingleCellError::Protocol(_))
        ));
    }

    #[test]
    fn test_execute_request_shape() {
        let ids = SequentialGenerator::new("m");
        let session = SessionId::from("s-1");
        let req = ExecuteRequest::new(&session, "print 1", ExecMode::Sage, None, &ids);
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(
            json,
            json!({
                "parent_header": {},
                "header": {"msg_id": "m-1", "session": "s-1"},
                "msg_type": "execute_request",
                "content": {"code": "print 1", "mode": "sage"}
            })
        );
    }

    #[test]
    fn test_execute_request_reuses_supplied_msg_id() {
        let ids = SequentialGenerator::new("m");
        let session = SessionId::from("s-1");
        let req = ExecuteRequest::new(
            &session,
            "f()",
            ExecMode::Python,
            Some(MsgId::from("orig")),
            &ids,
        );
        assert_eq!(req.msg_id().as_str(), "orig");
        assert_eq!(ids.generate(), "m-1", "no id should have been consumed");
    }

    #[test]
    fn test_decode_stream() {
        let msg = decode_message(&json!({
            "msg_type": "stream",
            "sequence": 3,
            "parent_header": {"msg_id": "m-1"},
            "content": {"name": "stdout", "data": "hi\n"}
        }));
        assert_eq!(msg.sequence, Some(3));
        assert_eq!(msg.parent_msg_id.as_ref().map(MsgId::as_str), Some("m-1"));
        assert_eq!(
            msg.body,
            MessageBody::Stream {
                name: Some("stdout".into()),
                data: Some("hi\n".into())
            }
        );
    }

    #[test]
    fn test_decode_mime_bundles() {
        let msg = decode_message(&json!({
            "msg_type": "display_data",
            "content": {"data": {"image/svg+xml": "<svg/>", "text/html": "<b>x</b>"}}
        }));
        assert_eq!(
            msg.body,
            MessageBody::DisplayData {
                svg: Some("<svg/>".into()),
                html: Some("<b>x</b>".into())
            }
        );

        let msg = decode_message(&json!({
            "msg_type": "pyout",
            "content": {"data": {"text/plain": "2"}}
        }));
        assert_eq!(msg.body, MessageBody::Pyout { text: Some("2".into()) });
    }

    #[test]
    fn test_decode_malformed_fields_are_none() {
        let msg = decode_message(&json!({"msg_type": "pyerr", "content": {"traceback": "oops"}}));
        assert_eq!(msg.body, MessageBody::Pyerr { traceback: None });
        assert!(msg.parent_msg_id.is_none());
        assert!(msg.sequence.is_none());

        let msg = decode_message(&json!("not even an object"));
        assert_eq!(msg.body, MessageBody::Unknown { msg_type: None });
    }

    #[test]
    fn test_decode_extensions() {
        let files = decode_message(&json!({
            "msg_type": "extension",
            "content": {"msg_type": "files", "files": ["a.png", "b.txt"]}
        }));
        assert_eq!(
            files.body,
            MessageBody::Extension(Extension::Files {
                files: Some(vec!["a.png".into(), "b.txt".into()])
            })
        );

        let end = decode_message(&json!({
            "msg_type": "extension",
            "content": {"msg_type": "session_end"}
        }));
        assert_eq!(end.body, MessageBody::Extension(Extension::SessionEnd));

        let other = decode_message(&json!({
            "msg_type": "extension",
            "content": {"msg_type": "interact_end"}
        }));
        assert_eq!(other.body.tag(), "extension.interact_end");
    }

    #[test]
    fn test_decode_interact_prepare_nested_and_inline() {
        let nested = decode_message(&json!({
            "msg_type": "extension",
            "content": {
                "msg_type": "interact_prepare",
                "content": {"interact_id": "77", "controls": {}, "layout": []}
            }
        }));
        let MessageBody::Extension(Extension::InteractPrepare {
            interact_id,
            payload,
        }) = nested.body
        else {
            panic!("expected interact_prepare");
        };
        assert_eq!(interact_id.unwrap().as_str(), "77");
        assert!(payload.get("controls").is_some());

        let inline = decode_message(&json!({
            "msg_type": "extension",
            "content": {"msg_type": "interact_prepare", "interact_id": 12, "controls": {}}
        }));
        let MessageBody::Extension(Extension::InteractPrepare { interact_id, .. }) = inline.body
        else {
            panic!("expected interact_prepare");
        };
        assert_eq!(interact_id.unwrap().as_str(), "12");
    }

    #[test]
    fn test_decode_batch_variants() {
        let batch = decode_batch(&json!({
            "computation_id": "s-1",
            "content": [
                {"msg_type": "pyout", "content": {"data": {"text/plain": "1"}}},
                {"msg_type": "mystery"}
            ]
        }));
        assert_eq!(batch.computation_id.as_deref(), Some("s-1"));
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.messages[1].body.tag(), "mystery");

        assert!(decode_batch(&json!([])).messages.is_empty());
        assert!(decode_batch(&json!({})).messages.is_empty());
        assert!(decode_batch(&Value::Null).messages.is_empty());
    }
}
