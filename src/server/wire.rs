//! Line-delimited JSON frames.
//!
//! Inbound: `{"id": <string|number>?, "method": "...", "params": {...}?}`
//! Outbound: `{"id": <echoed id>, "result": <envelope>}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::{BridgeError, Outcome, Params, RequestId, Response};

/// Discovery method answered with the tool list.
pub const LIST_TOOLS: &str = "tools/list";

/// Discovery method answered with the resource list.
pub const LIST_RESOURCES: &str = "resources/list";

// ─── Frames ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl InboundFrame {
    /// The id to echo back. Frames without an id get a generated one.
    pub fn client_id(&self) -> Value {
        match &self.id {
            Some(id) if !id.is_null() => id.clone(),
            _ => Value::String(RequestId::generate().to_string()),
        }
    }

    /// Params as a map. `null` or absent params are empty.
    pub fn params(&self) -> Result<Params, BridgeError> {
        match &self.params {
            None | Some(Value::Null) => Ok(Params::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(other) => Err(BridgeError::Decode {
                reason: format!("params must be an object, got {}", type_name(other)),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    pub id: Value,
    pub result: Value,
}

impl OutboundFrame {
    pub fn new(id: Value, response: &Response) -> Self {
        Self {
            id,
            result: response.to_envelope(),
        }
    }

    /// A failure frame for a request that never reached dispatch.
    pub fn failure(id: Value, err: &BridgeError) -> Self {
        let response = Response::new(RequestId::new(render_id(&id)), Outcome::failure(err));
        Self::new(id, &response)
    }

    /// One line of output, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// Decode one request line.
pub fn decode(line: &[u8]) -> Result<InboundFrame, BridgeError> {
    serde_json::from_slice(line).map_err(|e| BridgeError::Decode { reason: e.to_string() })
}

/// Render a client id for logs and correlation keys.
pub fn render_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Answer a discovery method from registry capabilities, if `method` is one.
pub fn discovery_response(method: &str, capabilities: &Value) -> Option<Outcome> {
    let key = match method {
        LIST_TOOLS => "tools",
        LIST_RESOURCES => "resources",
        _ => return None,
    };
    let mut payload = Params::new();
    payload.insert(
        key.into(),
        capabilities.get(key).cloned().unwrap_or_else(|| Value::Array(Vec::new())),
    );
    Some(Outcome::Success(payload))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_frame() {
        let line = br#"{"id": 7, "method": "create_scene", "params": {"sceneName": "Foo"}}"#;
        let frame = decode(line).unwrap();
        assert_eq!(frame.client_id(), json!(7));
        assert_eq!(frame.method, "create_scene");
        assert_eq!(frame.params().unwrap()["sceneName"], "Foo");
    }

    #[test]
    fn test_missing_id_is_generated() {
        let frame = decode(br#"{"method": "get_scenes"}"#).unwrap();
        let id = frame.client_id();
        assert!(id.as_str().unwrap().starts_with("bridge-"));
        assert!(frame.params().unwrap().is_empty());
    }

    #[test]
    fn test_non_object_params_rejected() {
        let frame = decode(br#"{"id": "a", "method": "load_scene", "params": [1, 2]}"#).unwrap();
        let err = frame.params().unwrap_err();
        assert!(err.to_string().contains("params must be an object, got array"));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = decode(b"not json").unwrap_err();
        assert!(matches!(err, BridgeError::Decode { .. }));
    }

    #[test]
    fn test_failure_frame_shape() {
        let err = BridgeError::Decode { reason: "bad".into() };
        let frame = OutboundFrame::failure(Value::Null, &err);
        let line = frame.to_line().unwrap();
        assert!(line.ends_with('\n'));

        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["id"], Value::Null);
        assert_eq!(parsed["result"]["success"], false);
        assert_eq!(parsed["result"]["errorType"], "internal");
    }

    #[test]
    fn test_discovery_response() {
        let caps = json!({ "tools": [{ "name": "a" }], "resources": [] });
        match discovery_response(LIST_TOOLS, &caps) {
            Some(Outcome::Success(payload)) => assert_eq!(payload["tools"][0]["name"], "a"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(discovery_response("create_scene", &caps).is_none());
    }

    #[test]
    fn test_render_id() {
        assert_eq!(render_id(&json!("abc")), "abc");
        assert_eq!(render_id(&json!(42)), "42");
    }
}
