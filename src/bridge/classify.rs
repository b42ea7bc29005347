//! Error classification.
//!
//! Every failure that crosses the bridge boundary is reduced to an
//! [`ErrorKind`] plus a human-readable message here. Classification is total:
//! whatever goes in, a [`Classified`] value comes out.

use std::any::Any;

use super::errors::{BridgeError, ErrorKind};

/// A failure reduced to its wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ErrorKind,
    pub message: String,
}

impl Classified {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Classify a bridge error. Each variant maps to a fixed kind.
pub fn classify(err: &BridgeError) -> Classified {
    Classified::new(err.kind(), err.to_string())
}

/// Classify an arbitrary error value.
///
/// Walks the source chain looking for a [`BridgeError`] so that a wrapped
/// handler error keeps its category. I/O failures are treated as the handler
/// failing on its own terms; JSON errors as decode problems. Anything else is
/// `Internal` with the top-level message.
pub fn classify_error(err: &(dyn std::error::Error + 'static)) -> Classified {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(bridge) = e.downcast_ref::<BridgeError>() {
            return classify(bridge);
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Classified::new(ErrorKind::ExecutionFailure, io.to_string());
        }
        if let Some(json) = e.downcast_ref::<serde_json::Error>() {
            return classify(&BridgeError::Decode {
                reason: json.to_string(),
            });
        }
        current = e.source();
    }
    Classified::new(ErrorKind::Internal, err.to_string())
}

/// Classify a panic payload captured with `catch_unwind`.
pub fn classify_panic(payload: &(dyn Any + Send)) -> Classified {
    classify(&panic_error(payload))
}

/// Convert a panic payload into a [`BridgeError::HandlerPanicked`].
pub fn panic_error(payload: &(dyn Any + Send)) -> BridgeError {
    BridgeError::HandlerPanicked {
        message: panic_message(payload),
    }
}

/// Extract the message from a panic payload (`&str` or `String` payloads).
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapper: {inner}")]
    struct Wrapper {
        #[source]
        inner: BridgeError,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("something odd")]
    struct Odd;

    #[test]
    fn test_classify_bridge_error_keeps_kind() {
        let c = classify(&BridgeError::not_found("Scene not found: Foo"));
        assert_eq!(c.kind, ErrorKind::NotFound);
        assert_eq!(c.message, "Scene not found: Foo");
    }

    #[test]
    fn test_classify_error_finds_wrapped_bridge_error() {
        let err = Wrapper {
            inner: BridgeError::execution("Failed to save scene: A"),
        };
        let c = classify_error(&err);
        assert_eq!(c.kind, ErrorKind::ExecutionFailure);
        assert_eq!(c.message, "Failed to save scene: A");
    }

    #[test]
    fn test_classify_io_error_is_execution_failure() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let c = classify_error(&err);
        assert_eq!(c.kind, ErrorKind::ExecutionFailure);
        assert!(c.message.contains("read-only volume"));
    }

    #[test]
    fn test_classify_json_error_is_internal_decode() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let c = classify_error(&err);
        assert_eq!(c.kind, ErrorKind::Internal);
        assert!(c.message.starts_with("failed to decode request"));
    }

    #[test]
    fn test_classify_unknown_error_is_internal() {
        let c = classify_error(&Odd);
        assert_eq!(c.kind, ErrorKind::Internal);
        assert_eq!(c.message, "something odd");
    }

    #[test]
    fn test_classify_panic_payloads() {
        let static_str: Box<dyn Any + Send> = Box::new("static boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        let other: Box<dyn Any + Send> = Box::new(42_u32);

        assert_eq!(classify_panic(&*static_str).kind, ErrorKind::Internal);
        assert!(classify_panic(&*static_str).message.contains("static boom"));
        assert!(classify_panic(&*owned).message.contains("owned boom"));
        assert!(classify_panic(&*other).message.contains("non-string"));
    }

    #[test]
    fn test_classify_caught_panic() {
        let payload = std::panic::catch_unwind(|| panic!("handler exploded")).unwrap_err();
        let c = classify_panic(&*payload);
        assert_eq!(c.kind, ErrorKind::Internal);
        assert_eq!(c.message, "operation panicked: handler exploded");
    }
}
