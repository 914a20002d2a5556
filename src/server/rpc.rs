//! JSON-RPC 2.0 framing for the stdio transport.
//!
//! One JSON object per line, each way. Protocol-level `error` objects are
//! reserved for framing and dispatch failures; tool failures travel inside a
//! successful response as `result.isError = true` (the MCP convention).

use serde::Deserialize;
use serde_json::{json, Value};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

/// An incoming request frame. `id` is `None` for notifications.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.id == Some(Value::Null)
    }
}

/// Parse one input line. On failure the caller gets the ready-to-write
/// parse-error frame instead.
pub fn parse_line(line: &str) -> Result<Request, String> {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => Ok(request),
        Err(e) => Err(error_frame(
            Value::Null,
            PARSE_ERROR,
            &format!("parse error: {e}"),
        )),
    }
}

/// A successful response frame, serialized to one line.
pub fn result_frame(id: Value, result: Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
}

/// A protocol-level error frame, serialized to one line.
pub fn error_frame(id: Value, code: i64, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
    .to_string()
}

/// The MCP tool-result payload. Tool failures set `isError`, never an RPC
/// error object.
pub fn tool_result(text: &str, is_error: bool) -> Value {
    let mut result = json!({
        "content": [ { "type": "text", "text": text } ]
    });
    if is_error {
        result["isError"] = json!(true);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_request_frame() {
        let request = parse_line(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_stats"}}"#,
        )
        .unwrap();
        assert_eq!(request.method, "tools/call");
        assert_eq!(request.id, Some(json!(1)));
        assert!(!request.is_notification());
    }

    #[test]
    fn notifications_have_no_id() {
        let request =
            parse_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(request.is_notification());
    }

    #[test]
    fn malformed_json_yields_parse_error_frame() {
        let frame = parse_line("{not json").unwrap_err();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["error"]["code"], PARSE_ERROR);
        assert_eq!(value["id"], Value::Null);
    }

    #[test]
    fn tool_errors_ride_inside_results() {
        let result = tool_result("rejected: too short", true);
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "rejected: too short");

        let ok = tool_result("stored", false);
        assert!(ok.get("isError").is_none());
    }

    #[test]
    fn frames_are_single_lines() {
        let frame = result_frame(json!(7), json!({"ok": true}));
        assert!(!frame.contains('\n'));
        let frame = error_frame(json!(7), METHOD_NOT_FOUND, "unknown method");
        assert!(!frame.contains('\n'));
    }
}
