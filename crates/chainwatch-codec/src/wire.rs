//! Wire-format types: JSON-RPC 2.0 envelope plus the Blockbook dialect normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard JSON-RPC 2.0 error codes used throughout the hub.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const UNKNOWN_RESPONSE_ID: i64 = -32603;
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// An outgoing or incoming call/notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Absent for notifications, present for calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// An outgoing or incoming reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl ResponseFrame {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// The dialect a given transport speaks. Standard is plain JSON-RPC 2.0;
/// Blockbook swaps `result` for `data`, carries errors inside `data`, and
/// reuses the subscribe call's id as the envelope id for push notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Standard,
    Blockbook,
}

/// What a parsed inbound frame turned out to be, after dialect normalization.
pub enum Incoming {
    Request(RequestFrame),
    Response(ResponseFrame),
    /// Unparseable: caller must reply with `-32600`/id null.
    Malformed,
}

/// Parse and normalize one inbound text frame.
pub fn parse_incoming(text: &str, dialect: Dialect) -> Incoming {
    let Ok(mut val) = serde_json::from_str::<Value>(text) else {
        return Incoming::Malformed;
    };

    if dialect == Dialect::Blockbook {
        normalize_blockbook(&mut val);
    }

    let obj = match val.as_object() {
        Some(o) => o,
        None => return Incoming::Malformed,
    };

    if obj.contains_key("method") {
        match serde_json::from_value::<RequestFrame>(val.clone()) {
            Ok(req) => Incoming::Request(req),
            Err(_) => Incoming::Malformed,
        }
    } else if obj.contains_key("result") || obj.contains_key("error") {
        match serde_json::from_value::<ResponseFrame>(val) {
            Ok(resp) => Incoming::Response(resp),
            Err(_) => Incoming::Malformed,
        }
    } else {
        Incoming::Malformed
    }
}

/// Rewrite a Blockbook-dialect envelope into the canonical `result`/`error` shape.
fn normalize_blockbook(val: &mut Value) {
    let Some(obj) = val.as_object_mut() else {
        return;
    };
    if obj.contains_key("method") {
        // Requests/notifications are already in the standard shape for Blockbook.
        return;
    }
    if let Some(data) = obj.remove("data") {
        if let Some(data_obj) = data.as_object() {
            if data_obj.contains_key("error") {
                obj.insert("error".into(), data_obj["error"].clone());
            } else {
                obj.insert("result".into(), data);
            }
        } else {
            obj.insert("result".into(), data);
        }
    }
}

/// Serialize a frame that should be sent in the given dialect.
pub fn serialize_response(resp: &ResponseFrame, dialect: Dialect) -> String {
    match dialect {
        Dialect::Standard => serde_json::to_string(resp).unwrap_or_default(),
        Dialect::Blockbook => {
            let mut val = serde_json::json!({
                "id": resp.id,
            });
            if let Some(err) = &resp.error {
                val["data"] = serde_json::json!({ "error": err });
            } else {
                val["data"] = resp.result.clone().unwrap_or(Value::Null);
            }
            val.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_request() {
        let text = r#"{"jsonrpc":"2.0","method":"subscribe","params":[],"id":1}"#;
        match parse_incoming(text, Dialect::Standard) {
            Incoming::Request(r) => {
                assert_eq!(r.method, "subscribe");
                assert_eq!(r.id, Some(Value::from(1)));
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn parses_standard_response() {
        let text = r#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#;
        match parse_incoming(text, Dialect::Standard) {
            Incoming::Response(r) => {
                assert_eq!(r.result, Some(Value::String("ok".into())));
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn malformed_text_is_malformed() {
        assert!(matches!(parse_incoming("not json", Dialect::Standard), Incoming::Malformed));
    }

    #[test]
    fn malformed_object_without_method_or_result_is_malformed() {
        assert!(matches!(
            parse_incoming(r#"{"foo":"bar"}"#, Dialect::Standard),
            Incoming::Malformed
        ));
    }

    #[test]
    fn blockbook_data_becomes_result() {
        let text = r#"{"id":"sub-1","data":{"address":"bc1abc"}}"#;
        match parse_incoming(text, Dialect::Blockbook) {
            Incoming::Response(r) => {
                assert_eq!(r.result, Some(serde_json::json!({"address":"bc1abc"})));
                assert!(r.error.is_none());
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn blockbook_data_error_becomes_top_level_error() {
        let text = r#"{"id":"sub-1","data":{"error":{"code":-1,"message":"bad"}}}"#;
        match parse_incoming(text, Dialect::Blockbook) {
            Incoming::Response(r) => {
                assert!(r.result.is_none());
                assert_eq!(r.error.unwrap().code, -1);
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn serialize_blockbook_response_uses_data_key() {
        let resp = ResponseFrame::ok(Value::from(1), serde_json::json!({"x": 1}));
        let text = serialize_response(&resp, Dialect::Blockbook);
        assert!(text.contains("\"data\""));
        assert!(!text.contains("\"result\""));
    }
}
