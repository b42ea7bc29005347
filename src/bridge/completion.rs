//! Single-use completion handle given to asynchronous operations.

use std::sync::Arc;

use super::correlation::CorrelationTable;
use super::errors::{BridgeError, ErrorKind};
use super::host::{ExecutionBridge, HostCx};
use super::types::{Outcome, Params, RequestId};

/// Resolves one pending asynchronous request.
///
/// Consumed by [`complete`](Self::complete), so it can be used at most once.
/// Off the host thread, resolution is routed back through the host queue;
/// on it, resolution is immediate. Dropping a handle without completing it
/// fails the request with `internal` rather than leaving it outstanding.
pub struct Completion<H: 'static> {
    id: RequestId,
    pending: Arc<CorrelationTable>,
    bridge: ExecutionBridge<H>,
    settled: bool,
}

impl<H: 'static> Completion<H> {
    pub(crate) fn new(
        id: RequestId,
        pending: Arc<CorrelationTable>,
        bridge: ExecutionBridge<H>,
    ) -> Self {
        Self {
            id,
            pending,
            bridge,
            settled: false,
        }
    }

    /// Id of the request this handle completes.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Complete the request with `result`.
    pub fn complete(mut self, result: Result<Params, BridgeError>) {
        self.settled = true;
        self.deliver(Outcome::from_result(result));
    }

    /// Run `work` in host context, then complete with its result.
    ///
    /// For operations that finish elsewhere (a worker thread, a timer) but
    /// must read or write host state to build their result.
    pub fn complete_on_host<F>(self, work: F)
    where
        F: FnOnce(&mut HostCx<'_, H>) -> Result<Params, BridgeError> + Send + 'static,
    {
        if self.bridge.is_closed() {
            self.complete(Err(BridgeError::HostUnavailable {
                reason: "host loop stopped before completion".into(),
            }));
            return;
        }
        let bridge = self.bridge.clone();
        // If the job never runs, dropping it drops `self`, which fails the request.
        let _ = bridge.submit(move |cx| {
            let result = work(cx);
            self.complete(result);
        });
    }

    fn deliver(&self, outcome: Outcome) {
        if self.bridge.is_host_thread() {
            self.pending.resolve(&self.id, outcome);
            return;
        }

        let pending = Arc::clone(&self.pending);
        let id = self.id.clone();
        let routed = self.bridge.submit(move |_cx| {
            pending.resolve(&id, outcome);
        });
        if routed.is_err() {
            tracing::warn!(id = %self.id, "host loop gone; resolving completion directly");
            self.pending.resolve(
                &self.id,
                Outcome::Failure {
                    kind: ErrorKind::Internal,
                    message: "host loop stopped before completion could be delivered".into(),
                },
            );
        }
    }
}

impl<H: 'static> Drop for Completion<H> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let message = if std::thread::panicking() {
            "operation panicked before completing"
        } else {
            "operation finished without reporting a result"
        };
        tracing::warn!(id = %self.id, reason = message, "completion dropped unresolved");
        self.deliver(Outcome::Failure {
            kind: ErrorKind::Internal,
            message: message.into(),
        });
    }
}

impl<H: 'static> std::fmt::Debug for Completion<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
