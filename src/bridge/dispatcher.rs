//! Request dispatch.
//!
//! Turns a decoded [`Request`] into exactly one [`Response`]:
//!
//! 1. Resolve `method` in the [`Registry`] (miss → `not_found`).
//! 2. Validate params: the operation's own `validate` hook, then its schema
//!    (failure → `invalid_parameter`, host never touched).
//! 3. Sync operations are marshalled through [`ExecutionBridge::call`].
//! 4. Async operations get a [`CorrelationTable`] entry and are started on
//!    the host with a [`Completion`] that resolves that entry.
//!
//! [`Dispatcher::submit`] does steps 1–4 without waiting for the host and
//! returns a [`Ticket`]; awaiting the ticket yields the response.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::completion::Completion;
use super::correlation::CorrelationTable;
use super::errors::BridgeError;
use super::host::ExecutionBridge;
use super::operation::Handler;
use super::registry::Registry;
use super::types::{Outcome, Params, Request, RequestId, Response};

// ─── Settings ────────────────────────────────────────────────────────────────

/// Dispatch tunables.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// Upper bound on waiting for an async completion. `None` waits forever.
    pub async_timeout: Option<Duration>,
}

// ─── Ticket ──────────────────────────────────────────────────────────────────

enum TicketState {
    Ready(Outcome),
    Sync(BoxFuture<'static, Result<Params, BridgeError>>),
    Scheduled {
        rx: oneshot::Receiver<Outcome>,
        pending: Arc<CorrelationTable>,
        timeout: Option<Duration>,
    },
}

/// Claim on the single response for an accepted request.
///
/// Dropping a ticket for an async request abandons it; the reaper reclaims
/// its correlation entry.
pub struct Ticket {
    id: RequestId,
    method: String,
    state: TicketState,
}

impl Ticket {
    fn ready(id: RequestId, method: String, outcome: Outcome) -> Self {
        Self {
            id,
            method,
            state: TicketState::Ready(outcome),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Whether the outcome was decided without reaching the host.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, TicketState::Ready(_))
    }

    /// Whether this ticket owns a correlation entry, i.e. an accepted async
    /// request that [`Dispatcher::cancel`] can withdraw.
    pub fn is_scheduled(&self) -> bool {
        matches!(self.state, TicketState::Scheduled { .. })
    }

    /// Wait for the response. `None` only if the request was cancelled.
    pub async fn response(self) -> Option<Response> {
        let Ticket { id, method, state } = self;
        let outcome = match state {
            TicketState::Ready(outcome) => outcome,
            TicketState::Sync(fut) => Outcome::from_result(fut.await),
            TicketState::Scheduled {
                mut rx,
                pending,
                timeout,
            } => {
                let received = match timeout {
                    None => (&mut rx).await,
                    Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                        Ok(received) => received,
                        Err(_) if pending.cancel(&id) => Ok(Outcome::failure(&BridgeError::Timeout {
                            id: id.to_string(),
                            timeout_ms: limit.as_millis() as u64,
                        })),
                        // Lost the race with completion or cancellation.
                        Err(_) => rx.await,
                    },
                };
                match received {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::debug!(
                            id = %id,
                            method = %method,
                            "request cancelled; no response"
                        );
                        return None;
                    }
                }
            }
        };

        match &outcome {
            Outcome::Success(_) => tracing::debug!(id = %id, method = %method, "request completed"),
            Outcome::Failure { kind, message } => tracing::warn!(
                id = %id,
                method = %method,
                error_type = %kind,
                error = %message,
                "request failed"
            ),
        }
        Some(Response::new(id, outcome))
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            TicketState::Ready(_) => "ready",
            TicketState::Sync(_) => "sync",
            TicketState::Scheduled { .. } => "scheduled",
        };
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("state", &state)
            .finish()
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Routes requests to operations through the host bridge.
pub struct Dispatcher<H: 'static> {
    registry: Arc<Registry<H>>,
    bridge: ExecutionBridge<H>,
    pending: Arc<CorrelationTable>,
    settings: DispatchSettings,
}

impl<H: 'static> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            bridge: self.bridge.clone(),
            pending: Arc::clone(&self.pending),
            settings: self.settings.clone(),
        }
    }
}

impl<H: 'static> Dispatcher<H> {
    pub fn new(
        registry: Arc<Registry<H>>,
        bridge: ExecutionBridge<H>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            bridge,
            pending: Arc::new(CorrelationTable::new()),
            settings,
        }
    }

    /// Accept a request. Never waits on the host.
    pub fn submit(&self, request: Request) -> Ticket {
        let Request { id, method, params } = request;
        tracing::debug!(id = %id, method = %method, "request received");

        let descriptor = match self.registry.lookup(&method) {
            Ok(d) => d,
            Err(e) => return Ticket::ready(id, method, Outcome::failure(&e)),
        };

        if let Err(e) = descriptor
            .handler
            .validate(&params)
            .and_then(|()| self.registry.validate_params(&method, &params))
        {
            return Ticket::ready(id, method, Outcome::failure(&e));
        }

        match &descriptor.handler {
            Handler::Sync(op) => {
                let op = Arc::clone(op);
                let fut = self.bridge.call(move |cx| op.invoke(cx, params));
                Ticket {
                    id,
                    method,
                    state: TicketState::Sync(fut.boxed()),
                }
            }
            Handler::Async(op) => {
                let (tx, rx) = oneshot::channel();
                if let Err(e) = self.pending.insert(id.clone(), tx) {
                    return Ticket::ready(id, method, Outcome::failure(&e));
                }

                let done =
                    Completion::new(id.clone(), Arc::clone(&self.pending), self.bridge.clone());
                let op = Arc::clone(op);
                // On failure the job (and the completion inside it) is dropped,
                // which resolves the entry as a failure.
                if let Err(e) = self.bridge.submit(move |cx| op.start(cx, params, done)) {
                    tracing::warn!(
                        id = %id,
                        method = %method,
                        error = %e,
                        "could not schedule async operation"
                    );
                }

                Ticket {
                    id,
                    method,
                    state: TicketState::Scheduled {
                        rx,
                        pending: Arc::clone(&self.pending),
                        timeout: self.settings.async_timeout,
                    },
                }
            }
        }
    }

    /// Accept a request and wait for its response.
    pub async fn dispatch(&self, request: Request) -> Option<Response> {
        self.submit(request).response().await
    }

    /// Cancel a scheduled async request. Its response is suppressed; work
    /// already running on the host still runs to completion. Returns `false`
    /// if the request had already completed or was never scheduled.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let cancelled = self.pending.cancel(id);
        if cancelled {
            tracing::debug!(id = %id, "request cancelled");
        }
        cancelled
    }

    /// Async requests still awaiting completion.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn registry(&self) -> &Registry<H> {
        &self.registry
    }

    pub fn bridge(&self) -> &ExecutionBridge<H> {
        &self.bridge
    }

    pub fn capabilities(&self) -> Value {
        self.registry.capabilities()
    }

    /// One sweep of correlation garbage collection: drop entries whose
    /// waiter is gone and, when a timeout is configured, fail entries older
    /// than it. Returns `(reaped, expired)`.
    pub fn sweep(&self) -> (usize, usize) {
        let reaped = self.pending.reap_abandoned();
        let expired = self
            .settings
            .async_timeout
            .map_or(0, |limit| self.pending.expire_older_than(limit).len());
        if reaped + expired > 0 {
            tracing::info!(reaped, expired, remaining = self.pending.len(), "correlation sweep");
        }
        (reaped, expired)
    }

    /// Run [`sweep`](Self::sweep) every `interval` on the current runtime.
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if dispatcher.bridge.is_closed() {
                    break;
                }
                dispatcher.sweep();
            }
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::errors::ErrorKind;
    use crate::bridge::host::{host_channel, spawn_host_thread, DrainPolicy, HostCx, HostLoop};
    use crate::bridge::operation::{AsyncOperation, OperationDescriptor, SyncOperation};
    use crate::bridge::registry::RegistryBuilder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host state recording concurrent entry into handler bodies.
    #[derive(Default)]
    struct Desk {
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        log: Vec<String>,
        parked: Vec<Completion<Desk>>,
    }

    struct Record;

    impl SyncOperation<Desk> for Record {
        fn validate(&self, params: &Params) -> Result<(), BridgeError> {
            match params.get("tag") {
                Some(Value::String(_)) => Ok(()),
                _ => Err(BridgeError::invalid("tag is required")),
            }
        }

        fn invoke(
            &self,
            host: &mut HostCx<'_, Desk>,
            params: Params,
        ) -> Result<Params, BridgeError> {
            let now = host.active.fetch_add(1, Ordering::SeqCst) + 1;
            host.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
            let tag = params["tag"].as_str().unwrap_or_default().to_string();
            host.log.push(tag.clone());
            host.active.fetch_sub(1, Ordering::SeqCst);

            let mut out = Params::new();
            out.insert("tag".into(), Value::String(tag));
            Ok(out)
        }
    }

    struct Fail;

    impl SyncOperation<Desk> for Fail {
        fn invoke(
            &self,
            _host: &mut HostCx<'_, Desk>,
            _params: Params,
        ) -> Result<Params, BridgeError> {
            Err(BridgeError::execution("Failed to save scene: A"))
        }
    }

    struct Explode;

    impl SyncOperation<Desk> for Explode {
        fn invoke(
            &self,
            _host: &mut HostCx<'_, Desk>,
            _params: Params,
        ) -> Result<Params, BridgeError> {
            panic!("handler blew up")
        }
    }

    /// Completes on the next host cycle.
    struct NextCycle;

    impl AsyncOperation<Desk> for NextCycle {
        fn start(&self, host: &mut HostCx<'_, Desk>, _params: Params, done: Completion<Desk>) {
            host.delay_call(move |cx| {
                cx.log.push("completed".into());
                done.complete(Ok(Params::new()));
            });
        }
    }

    /// Holds its completion in host state until told otherwise.
    struct Park;

    impl AsyncOperation<Desk> for Park {
        fn start(&self, host: &mut HostCx<'_, Desk>, _params: Params, done: Completion<Desk>) {
            host.parked.push(done);
        }
    }

    /// Completes from a worker thread.
    struct Worker;

    impl AsyncOperation<Desk> for Worker {
        fn start(&self, _host: &mut HostCx<'_, Desk>, _params: Params, done: Completion<Desk>) {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                done.complete_on_host(|cx| {
                    cx.log.push("worker".into());
                    let mut out = Params::new();
                    out.insert("entries".into(), json!(cx.log.len()));
                    Ok(out)
                });
            });
        }
    }

    struct Forget;

    impl AsyncOperation<Desk> for Forget {
        fn start(&self, _host: &mut HostCx<'_, Desk>, _params: Params, _done: Completion<Desk>) {}
    }

    fn registry() -> Arc<Registry<Desk>> {
        let mut b = RegistryBuilder::new();
        b.register(
            OperationDescriptor::tool("record", "record a tag", Handler::sync(Record))
                .with_schema(json!({
                    "type": "object",
                    "properties": { "tag": { "type": "string" } },
                    "required": ["tag"]
                })),
        )
        .unwrap();
        b.register(OperationDescriptor::tool("fail", "always fails", Handler::sync(Fail)))
            .unwrap();
        b.register(OperationDescriptor::tool("explode", "panics", Handler::sync(Explode)))
            .unwrap();
        b.register(OperationDescriptor::tool("next_cycle", "", Handler::asynchronous(NextCycle)))
            .unwrap();
        b.register(OperationDescriptor::tool("park", "", Handler::asynchronous(Park)))
            .unwrap();
        b.register(OperationDescriptor::tool("worker", "", Handler::asynchronous(Worker)))
            .unwrap();
        b.register(OperationDescriptor::tool("forget", "", Handler::asynchronous(Forget)))
            .unwrap();
        Arc::new(b.build())
    }

    fn manual(settings: DispatchSettings) -> (Dispatcher<Desk>, HostLoop<Desk>) {
        let (bridge, host) = host_channel(Desk::default(), DrainPolicy::UntilEmpty);
        (Dispatcher::new(registry(), bridge, settings), host)
    }

    fn threaded() -> (Dispatcher<Desk>, std::thread::JoinHandle<Desk>) {
        let (bridge, host) = host_channel(Desk::default(), DrainPolicy::OnePerCycle);
        let handle = spawn_host_thread(host, Duration::from_millis(1)).unwrap();
        (Dispatcher::new(registry(), bridge, DispatchSettings::default()), handle)
    }

    fn req(method: &str, params: Value) -> Request {
        Request::new(method, params.as_object().cloned().unwrap_or_default())
    }

    fn failure(resp: &Response) -> (ErrorKind, String) {
        match &resp.outcome {
            Outcome::Failure { kind, message } => (*kind, message.clone()),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_found() {
        let (d, _host) = manual(DispatchSettings::default());
        let ticket = d.submit(req("frobnicate", json!({})));
        assert!(ticket.is_ready());
        assert!(!ticket.is_scheduled());
        let resp = ticket.response().await.unwrap();
        assert_eq!(failure(&resp).0, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_invalid_params_never_reach_host() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(req("record", json!({})));
        assert!(ticket.is_ready());
        assert_eq!(host.tick().drained, 0);

        let resp = ticket.response().await.unwrap();
        assert_eq!(failure(&resp), (ErrorKind::InvalidParameter, "tag is required".into()));
        assert!(host.state().log.is_empty());
    }

    #[tokio::test]
    async fn test_sync_dispatch_returns_payload() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(req("record", json!({ "tag": "alpha" })));
        host.tick();
        let resp = ticket.response().await.unwrap();
        let expected = json!({ "tag": "alpha" }).as_object().cloned().unwrap();
        assert_eq!(resp.outcome, Outcome::Success(expected));
        assert_eq!(host.state().log, vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_handler_failure_is_classified() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(req("fail", json!({})));
        host.tick();
        let resp = ticket.response().await.unwrap();
        assert_eq!(
            failure(&resp),
            (ErrorKind::ExecutionFailure, "Failed to save scene: A".into())
        );
    }

    #[tokio::test]
    async fn test_handler_panic_is_internal_and_host_survives() {
        let (d, mut host) = manual(DispatchSettings::default());
        let boom = d.submit(req("explode", json!({})));
        let after = d.submit(req("record", json!({ "tag": "still-alive" })));
        host.tick();

        let (kind, message) = failure(&boom.response().await.unwrap());
        assert_eq!(kind, ErrorKind::Internal);
        assert!(message.contains("handler blew up"));
        assert!(after.response().await.unwrap().outcome.is_success());
    }

    #[tokio::test]
    async fn test_async_completion_on_next_cycle() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(req("next_cycle", json!({})));
        assert_eq!(d.pending_count(), 1);

        host.tick(); // start
        assert_eq!(d.pending_count(), 1);
        host.tick(); // deferred completion runs on host, resolves inline

        let resp = ticket.response().await.unwrap();
        assert!(resp.outcome.is_success());
        assert_eq!(d.pending_count(), 0);
        assert_eq!(host.state().log, vec!["completed"]);
    }

    #[tokio::test]
    async fn test_caller_supplied_duplicate_id_rejected() {
        let (d, mut host) = manual(DispatchSettings::default());
        let first = d.submit(Request::with_id("same", "park", Params::new()));
        let second = d.submit(Request::with_id("same", "park", Params::new()));
        assert!(first.is_scheduled());
        assert!(!second.is_scheduled());
        let resp = second.response().await.unwrap();
        assert_eq!(failure(&resp).0, ErrorKind::DuplicateId);

        host.tick();
        let parked = host.state_mut().parked.pop().unwrap();
        parked.complete(Ok(Params::new()));
        host.tick();
        assert!(first.response().await.unwrap().outcome.is_success());
    }

    #[tokio::test]
    async fn test_cancel_before_completion_suppresses_response() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(Request::with_id("c1", "park", Params::new()));
        host.tick();

        assert!(d.cancel(&RequestId::new("c1")));
        assert_eq!(d.pending_count(), 0);
        assert!(ticket.response().await.is_none());

        // A late completion is a harmless no-op.
        let parked = host.state_mut().parked.pop().unwrap();
        parked.complete(Ok(Params::new()));
        host.tick();
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_has_no_effect() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(Request::with_id("c2", "next_cycle", Params::new()));
        host.tick();
        host.tick();

        assert!(!d.cancel(&RequestId::new("c2")));
        assert!(ticket.response().await.unwrap().outcome.is_success());
    }

    #[tokio::test]
    async fn test_dropped_completion_fails_request() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(req("forget", json!({})));
        host.tick();
        let (kind, _) = failure(&ticket.response().await.unwrap());
        assert_eq!(kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_async_timeout_fails_and_clears_entry() {
        let (d, mut host) = manual(DispatchSettings {
            async_timeout: Some(Duration::from_millis(20)),
        });
        let ticket = d.submit(req("park", json!({})));
        host.tick();

        let (kind, message) = failure(&ticket.response().await.unwrap());
        assert_eq!(kind, ErrorKind::Internal);
        assert!(message.contains("timed out"));
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_reaps_abandoned_tickets() {
        let (d, mut host) = manual(DispatchSettings::default());
        let ticket = d.submit(req("park", json!({})));
        host.tick();
        drop(ticket);

        assert_eq!(d.sweep(), (1, 0));
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_completion_from_worker_thread() {
        let (d, handle) = threaded();
        let resp = d.dispatch(req("worker", json!({}))).await.unwrap();
        match resp.outcome {
            Outcome::Success(payload) => assert_eq!(payload["entries"], 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        d.bridge().shutdown();
        let host = handle.join().unwrap();
        assert_eq!(host.log, vec!["worker"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sync_calls_never_overlap() {
        let (d, handle) = threaded();
        let calls: Vec<_> = (0..32)
            .map(|i| {
                let d = d.clone();
                let request = req("record", json!({ "tag": format!("t{i}") }));
                tokio::spawn(async move { d.dispatch(request).await })
            })
            .collect();

        for (i, call) in calls.into_iter().enumerate() {
            let resp = call.await.unwrap().unwrap();
            match resp.outcome {
                Outcome::Success(payload) => assert_eq!(payload["tag"], format!("t{i}")),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        d.bridge().shutdown();
        let host = handle.join().unwrap();
        assert_eq!(host.log.len(), 32);
        assert_eq!(host.max_active.load(Ordering::SeqCst), 1);
    }
}
