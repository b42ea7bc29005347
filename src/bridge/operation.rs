//! The contract every tool and resource implements.

use std::sync::Arc;

use serde_json::Value;

use super::completion::Completion;
use super::errors::BridgeError;
use super::host::HostCx;
use super::types::{ExecutionMode, OperationKind, Params};

/// An operation that produces its result before returning.
pub trait SyncOperation<H: 'static>: Send + Sync + 'static {
    /// Operation-specific checks run before the host is touched.
    fn validate(&self, _params: &Params) -> Result<(), BridgeError> {
        Ok(())
    }

    fn invoke(&self, host: &mut HostCx<'_, H>, params: Params) -> Result<Params, BridgeError>;
}

/// An operation that is started on the host and signals its result later
/// through the [`Completion`] it is given.
pub trait AsyncOperation<H: 'static>: Send + Sync + 'static {
    /// Operation-specific checks run before the host is touched.
    fn validate(&self, _params: &Params) -> Result<(), BridgeError> {
        Ok(())
    }

    fn start(&self, host: &mut HostCx<'_, H>, params: Params, done: Completion<H>);
}

/// The handler behind a descriptor. The variant fixes the execution mode.
pub enum Handler<H: 'static> {
    Sync(Arc<dyn SyncOperation<H>>),
    Async(Arc<dyn AsyncOperation<H>>),
}

impl<H: 'static> Handler<H> {
    pub fn sync(op: impl SyncOperation<H>) -> Self {
        Self::Sync(Arc::new(op))
    }

    pub fn asynchronous(op: impl AsyncOperation<H>) -> Self {
        Self::Async(Arc::new(op))
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Sync(_) => ExecutionMode::Sync,
            Self::Async(_) => ExecutionMode::Async,
        }
    }

    pub(crate) fn validate(&self, params: &Params) -> Result<(), BridgeError> {
        match self {
            Self::Sync(op) => op.validate(params),
            Self::Async(op) => op.validate(params),
        }
    }
}

impl<H: 'static> Clone for Handler<H> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(op) => Self::Sync(Arc::clone(op)),
            Self::Async(op) => Self::Async(Arc::clone(op)),
        }
    }
}

/// Catalog entry for one tool or resource. Immutable once registered.
pub struct OperationDescriptor<H: 'static> {
    pub name: String,
    pub description: String,
    pub kind: OperationKind,
    /// JSON-schema subset describing `params` (`type`, `properties`,
    /// `required`, `enum`).
    pub params_schema: Value,
    pub handler: Handler<H>,
}

impl<H: 'static> OperationDescriptor<H> {
    pub fn tool(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Handler<H>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OperationKind::Tool,
            params_schema: serde_json::json!({ "type": "object" }),
            handler,
        }
    }

    pub fn resource(
        name: impl Into<String>,
        uri_template: impl Into<String>,
        description: impl Into<String>,
        handler: Handler<H>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: OperationKind::Resource {
                uri_template: uri_template.into(),
            },
            params_schema: serde_json::json!({ "type": "object" }),
            handler,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.params_schema = schema;
        self
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.handler.mode()
    }
}

impl<H: 'static> std::fmt::Debug for OperationDescriptor<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mode", &self.execution_mode())
            .finish_non_exhaustive()
    }
}
