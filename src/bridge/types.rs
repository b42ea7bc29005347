//! Request, response, and descriptor metadata types shared across the bridge.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::classify;
use super::errors::{BridgeError, ErrorKind};

/// Operation parameters: a JSON object with order-irrelevant keys.
pub type Params = Map<String, Value>;

/// Message used when a successful payload carries none of its own.
const DEFAULT_SUCCESS_MESSAGE: &str = "Operation completed successfully";

// ─── RequestId ───────────────────────────────────────────────────────────────

/// Monotonic counter for bridge-assigned request ids.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Correlation id linking a request to its eventual response.
///
/// Either supplied by the caller or assigned by the bridge (`bridge-<n>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh bridge-assigned id.
    pub fn generate() -> Self {
        Self(format!(
            "bridge-{}",
            NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─── Request / Response ──────────────────────────────────────────────────────

/// A decoded call into the bridge.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Params,
}

impl Request {
    /// Build a request with a bridge-assigned id.
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    pub fn with_id(id: impl Into<RequestId>, method: impl Into<String>, params: Params) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Terminal result of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Params),
    Failure { kind: ErrorKind, message: String },
}

impl Outcome {
    /// Classify `err` into a failure outcome.
    pub fn failure(err: &BridgeError) -> Self {
        let c = classify::classify(err);
        Self::Failure {
            kind: c.kind,
            message: c.message,
        }
    }

    pub fn from_result(result: Result<Params, BridgeError>) -> Self {
        match result {
            Ok(payload) => Self::Success(payload),
            Err(e) => Self::failure(&e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Error kind for failures, `None` for success.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// The single response produced for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Outcome,
}

impl Response {
    pub fn new(id: RequestId, outcome: Outcome) -> Self {
        Self { id, outcome }
    }

    /// Render the client-facing envelope.
    ///
    /// Success: `{ success: true, message, ...payload }`.
    /// Failure: `{ success: false, error, errorType }`.
    pub fn to_envelope(&self) -> Value {
        match &self.outcome {
            Outcome::Success(payload) => {
                let mut body = payload.clone();
                body.insert("success".into(), Value::Bool(true));
                if !matches!(body.get("message"), Some(Value::String(_))) {
                    body.insert(
                        "message".into(),
                        Value::String(DEFAULT_SUCCESS_MESSAGE.into()),
                    );
                }
                Value::Object(body)
            }
            Outcome::Failure { kind, message } => serde_json::json!({
                "success": false,
                "error": message,
                "errorType": kind.as_str(),
            }),
        }
    }
}

// ─── Descriptor Metadata ─────────────────────────────────────────────────────

/// Whether a handler returns its result directly or signals it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
}

/// Descriptive category of an operation. Not interpreted by dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// A potentially state-mutating action.
    Tool,
    /// A read addressed by a URI-like pattern, e.g. `unity://scenes/{sceneType}`.
    Resource { uri_template: String },
}

impl OperationKind {
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
