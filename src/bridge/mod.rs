//! Dispatch bridge between concurrent clients and a single-threaded host.
//!
//! This module handles:
//! - The operation catalog (`Registry`) and the tool/resource contract
//! - Routing and validating requests (`Dispatcher`)
//! - Marshalling host-affecting work onto the host context (`ExecutionBridge`)
//! - Matching async completions to their requests (`CorrelationTable`)
//! - Reducing every failure to the wire taxonomy (`classify`)

pub mod classify;
pub mod completion;
pub mod correlation;
pub mod dispatcher;
pub mod errors;
pub mod host;
pub mod operation;
pub mod registry;
pub mod types;

// Re-exports for convenience
pub use completion::Completion;
pub use correlation::{CorrelationTable, PendingCall};
pub use dispatcher::{DispatchSettings, Dispatcher, Ticket};
pub use errors::{BridgeError, ErrorKind};
pub use host::{host_channel, spawn_host_thread, DrainPolicy, ExecutionBridge, HostCx, HostLoop};
pub use operation::{AsyncOperation, Handler, OperationDescriptor, SyncOperation};
pub use registry::{Registry, RegistryBuilder};
pub use types::{ExecutionMode, OperationKind, Outcome, Params, Request, RequestId, Response};
