//! Bridge error types and the wire-level error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── ErrorKind ───────────────────────────────────────────────────────────────

/// Closed set of failure categories carried in every failure envelope as
/// `errorType`.
///
/// Clients must treat names they do not recognize as [`ErrorKind::Internal`];
/// deserializing an unknown name does exactly that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input, detected before the host is touched.
    InvalidParameter,
    /// Unknown operation, or a sub-resource the handler could not locate.
    NotFound,
    /// Two operations registered under the same name.
    DuplicateName,
    /// Two in-flight requests share a correlation id.
    DuplicateId,
    /// The handler ran and failed on its own terms.
    ExecutionFailure,
    /// Anything uncategorized.
    #[serde(other)]
    Internal,
}

impl ErrorKind {
    /// Stable wire name (`"invalid_parameter"`, `"not_found"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "invalid_parameter",
            Self::NotFound => "not_found",
            Self::DuplicateName => "duplicate_name",
            Self::DuplicateId => "duplicate_id",
            Self::ExecutionFailure => "execution_failure",
            Self::Internal => "internal",
        }
    }

    /// Parse a wire name, falling back to `Internal` for anything unknown.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "invalid_parameter" => Self::InvalidParameter,
            "not_found" => Self::NotFound,
            "duplicate_name" => Self::DuplicateName,
            "duplicate_id" => Self::DuplicateId,
            "execution_failure" => Self::ExecutionFailure,
            _ => Self::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── BridgeError ─────────────────────────────────────────────────────────────

/// Errors raised anywhere in the dispatch pipeline.
///
/// Handler-facing variants (`InvalidParameter`, `NotFound`, `ExecutionFailed`)
/// display their message verbatim so that the text a handler chooses is the
/// text the client sees.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No operation is registered under this name.
    #[error("unknown operation: '{name}'{}", did_you_mean(.suggestions))]
    UnknownOperation {
        name: String,
        suggestions: Vec<String>,
    },

    /// Request parameters failed validation.
    #[error("{reason}")]
    InvalidParameter { reason: String },

    /// A named sub-resource could not be located by the handler.
    #[error("{message}")]
    NotFound { message: String },

    /// An operation with this name is already registered.
    #[error("operation '{name}' is already registered")]
    DuplicateName { name: String },

    /// A request with this id is already awaiting completion.
    #[error("request id '{id}' is already in flight")]
    DuplicateId { id: String },

    /// The handler ran and reported failure.
    #[error("{message}")]
    ExecutionFailed { message: String },

    /// The host loop is not accepting work (stopped or never started).
    #[error("host context unavailable: {reason}")]
    HostUnavailable { reason: String },

    /// A handler panicked while running in host context.
    #[error("operation panicked: {message}")]
    HandlerPanicked { message: String },

    /// An asynchronous operation did not complete within the configured limit.
    #[error("request '{id}' timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// An inbound frame could not be decoded.
    #[error("failed to decode request: {reason}")]
    Decode { reason: String },

    /// Internal consistency failure.
    #[error("{message}")]
    Internal { message: String },
}

impl BridgeError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownOperation { .. } | Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::DuplicateName { .. } => ErrorKind::DuplicateName,
            Self::DuplicateId { .. } => ErrorKind::DuplicateId,
            Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailure,
            Self::HostUnavailable { .. }
            | Self::HandlerPanicked { .. }
            | Self::Timeout { .. }
            | Self::Decode { .. }
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

fn did_you_mean(suggestions: &[String]) -> String {
    match suggestions {
        [] => String::new(),
        [only] => format!(". Did you mean '{only}'?"),
        many => format!(
            ". Did you mean one of: {}?",
            many.iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names_roundtrip_through_serde() {
        let json = serde_json::to_string(&ErrorKind::ExecutionFailure).unwrap();
        assert_eq!(json, "\"execution_failure\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::ExecutionFailure);
    }

    #[test]
    fn test_unknown_kind_parses_as_internal() {
        let kind: ErrorKind = serde_json::from_str("\"scene_exists\"").unwrap();
        assert_eq!(kind, ErrorKind::Internal);
        assert_eq!(ErrorKind::from_wire("no_such_kind"), ErrorKind::Internal);
    }

    #[test]
    fn test_handler_messages_display_verbatim() {
        let err = BridgeError::invalid("Scene name is required");
        assert_eq!(err.to_string(), "Scene name is required");
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_unknown_operation_lists_suggestions() {
        let err = BridgeError::UnknownOperation {
            name: "create_scen".into(),
            suggestions: vec!["create_scene".into()],
        };
        assert_eq!(
            err.to_string(),
            "unknown operation: 'create_scen'. Did you mean 'create_scene'?"
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let bare = BridgeError::UnknownOperation {
            name: "frobnicate".into(),
            suggestions: vec![],
        };
        assert_eq!(bare.to_string(), "unknown operation: 'frobnicate'");
    }

    #[test]
    fn test_timeout_and_panic_are_internal() {
        let timeout = BridgeError::Timeout {
            id: "7".into(),
            timeout_ms: 50,
        };
        let panicked = BridgeError::HandlerPanicked {
            message: "boom".into(),
        };
        assert_eq!(timeout.kind(), ErrorKind::Internal);
        assert_eq!(panicked.kind(), ErrorKind::Internal);
    }
}
