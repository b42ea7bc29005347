//! Host-context execution.
//!
//! The host's state lives inside a single [`HostLoop`], owned by one thread.
//! Everything else reaches that state through an [`ExecutionBridge`], which
//! appends work to a FIFO queue the loop drains once per cycle.
//!
//! # Ordering
//!
//! * Work submitted through one bridge handle runs in submission order.
//! * Across handles the only guarantee is queue order.
//! * At most one job body runs at a time; jobs are never preempted.
//! * Callbacks deferred with [`HostCx::delay_call`] run at the start of the
//!   next cycle, before newly queued work.
//!
//! # Re-entrancy
//!
//! A job receives a [`HostCx`], which is the proof that the caller is already
//! in host context. [`HostCx::run_on_host`] executes inline instead of
//! queueing, so work started from inside a job can never wait on itself.
//! [`ExecutionBridge::call`] refuses to queue from host context for the same
//! reason.

use std::cell::Cell;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;

use super::classify;
use super::errors::BridgeError;

/// A unit of host-affecting work.
pub type HostJob<H> = Box<dyn FnOnce(&mut HostCx<'_, H>) + Send + 'static>;

/// Name given to the dedicated host thread.
pub const HOST_THREAD_NAME: &str = "host-main";

thread_local! {
    static ON_HOST: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside a host cycle.
pub fn on_host_thread() -> bool {
    ON_HOST.with(|flag| flag.get())
}

/// Marks the current thread as in host context for the guard's lifetime.
struct HostContextGuard {
    previous: bool,
}

impl HostContextGuard {
    fn enter() -> Self {
        Self {
            previous: ON_HOST.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for HostContextGuard {
    fn drop(&mut self) {
        ON_HOST.with(|flag| flag.set(self.previous));
    }
}

// ─── DrainPolicy ─────────────────────────────────────────────────────────────

/// How many queued jobs a single host cycle may run.
///
/// This is the host's scheduling decision; the bridge only guarantees order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Exactly one queued job per cycle.
    OnePerCycle,
    /// Everything queued at the time the cycle runs, plus anything those jobs queue.
    #[default]
    UntilEmpty,
    /// At most `n` jobs per cycle (`n` is clamped to at least 1).
    Budget(usize),
}

impl DrainPolicy {
    fn limit(self) -> usize {
        match self {
            Self::OnePerCycle => 1,
            Self::UntilEmpty => usize::MAX,
            Self::Budget(n) => n.max(1),
        }
    }
}

// ─── ExecutionBridge ─────────────────────────────────────────────────────────

enum HostMessage<H: 'static> {
    Run(HostJob<H>),
    Shutdown,
}

/// Cloneable handle for scheduling work onto the host context.
pub struct ExecutionBridge<H: 'static> {
    tx: mpsc::UnboundedSender<HostMessage<H>>,
}

impl<H: 'static> Clone for ExecutionBridge<H> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<H: 'static> std::fmt::Debug for ExecutionBridge<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionBridge")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<H: 'static> ExecutionBridge<H> {
    /// Queue `job` for the host context without waiting for it.
    ///
    /// Called from inside a job this still queues; use
    /// [`HostCx::run_on_host`] for inline execution.
    pub fn submit<F>(&self, job: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut HostCx<'_, H>) + Send + 'static,
    {
        self.tx
            .send(HostMessage::Run(Box::new(job)))
            .map_err(|_| BridgeError::HostUnavailable {
                reason: "host loop has stopped".into(),
            })
    }

    /// Run `work` on the host and resolve with its result.
    ///
    /// The job is queued immediately, before the returned future is first
    /// polled. A panic inside `work` is caught on the host and surfaces as
    /// [`BridgeError::HandlerPanicked`]; the host loop keeps running.
    ///
    /// From inside a host job the call fails at once with
    /// [`BridgeError::Internal`] instead of queueing, since waiting on it
    /// would stall the host thread. Use [`HostCx::run_on_host`] there.
    pub fn call<T, F>(
        &self,
        work: F,
    ) -> impl Future<Output = Result<T, BridgeError>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&mut HostCx<'_, H>) -> Result<T, BridgeError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued = if on_host_thread() {
            tracing::warn!("host call made from inside a host job; rejected");
            Err(BridgeError::Internal {
                message: "host job cannot wait on the host; use HostCx::run_on_host".into(),
            })
        } else {
            self.submit(move |cx| {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| work(cx))) {
                    Ok(result) => result,
                    Err(payload) => {
                        let err = classify::panic_error(&*payload);
                        tracing::error!(error = %err, "host call panicked");
                        Err(err)
                    }
                };
                // Receiver gone means the caller stopped waiting; the work still ran.
                let _ = tx.send(result);
            })
        };

        async move {
            queued?;
            rx.await.map_err(|_| BridgeError::HostUnavailable {
                reason: "host loop stopped before running the call".into(),
            })?
        }
    }

    /// Ask the host loop to stop after the work queued ahead of this request.
    pub fn shutdown(&self) {
        let _ = self.tx.send(HostMessage::Shutdown);
    }

    /// Whether the host loop has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether the caller is running inside a host cycle.
    pub fn is_host_thread(&self) -> bool {
        on_host_thread()
    }
}

// ─── HostCx ──────────────────────────────────────────────────────────────────

/// Host-context token handed to every job.
///
/// Dereferences to the host state. Holding one means the code is running on
/// the host thread inside a cycle.
pub struct HostCx<'a, H: 'static> {
    state: &'a mut H,
    deferred: &'a mut Vec<HostJob<H>>,
    bridge: &'a ExecutionBridge<H>,
}

impl<'a, H: 'static> HostCx<'a, H> {
    /// Run `work` inline. This is the re-entrant path: already on the host,
    /// so nothing is queued.
    pub fn run_on_host<T>(&mut self, work: impl FnOnce(&mut HostCx<'_, H>) -> T) -> T {
        work(self)
    }

    /// Defer `job` to the start of the next host cycle.
    pub fn delay_call<F>(&mut self, job: F)
    where
        F: FnOnce(&mut HostCx<'_, H>) + Send + 'static,
    {
        self.deferred.push(Box::new(job));
    }

    /// A bridge handle for scheduling work from outside host context later.
    pub fn bridge(&self) -> ExecutionBridge<H> {
        self.bridge.clone()
    }

    pub fn state(&mut self) -> &mut H {
        &mut *self.state
    }
}

impl<H: 'static> Deref for HostCx<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &*self.state
    }
}

impl<H: 'static> DerefMut for HostCx<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut *self.state
    }
}

// ─── HostLoop ────────────────────────────────────────────────────────────────

/// Summary of one host cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Deferred callbacks run at the start of the cycle.
    pub deferred: usize,
    /// Queued jobs drained during the cycle.
    pub drained: usize,
}

/// The single consumer of host work. Owns the host state.
pub struct HostLoop<H: 'static> {
    state: H,
    rx: mpsc::UnboundedReceiver<HostMessage<H>>,
    bridge: ExecutionBridge<H>,
    deferred: Vec<HostJob<H>>,
    policy: DrainPolicy,
    stopped: bool,
}

/// Create a host loop owning `state` and a bridge feeding it.
pub fn host_channel<H: 'static>(
    state: H,
    policy: DrainPolicy,
) -> (ExecutionBridge<H>, HostLoop<H>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let bridge = ExecutionBridge { tx };
    let host = HostLoop {
        state,
        rx,
        bridge: bridge.clone(),
        deferred: Vec::new(),
        policy,
        stopped: false,
    };
    (bridge, host)
}

impl<H: 'static> HostLoop<H> {
    /// Run one host cycle: deferred callbacks first, then queued work per
    /// the drain policy.
    pub fn tick(&mut self) -> CycleReport {
        let _guard = HostContextGuard::enter();
        let mut report = CycleReport::default();

        for job in std::mem::take(&mut self.deferred) {
            self.run_job(job);
            report.deferred += 1;
        }

        let limit = self.policy.limit();
        while report.drained < limit {
            match self.rx.try_recv() {
                Ok(HostMessage::Run(job)) => {
                    self.run_job(job);
                    report.drained += 1;
                }
                Ok(HostMessage::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.stopped = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        report
    }

    fn run_job(&mut self, job: HostJob<H>) {
        let mut cx = HostCx {
            state: &mut self.state,
            deferred: &mut self.deferred,
            bridge: &self.bridge,
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut cx))) {
            tracing::error!(
                panic = %classify::panic_message(&*payload),
                "host job panicked; continuing"
            );
        }
    }

    /// Tick every `interval` until [`ExecutionBridge::shutdown`] is observed.
    /// Returns the host state.
    pub fn run(mut self, interval: Duration) -> H {
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            policy = ?self.policy,
            "host loop started"
        );

        while !self.stopped {
            let started = Instant::now();
            self.tick();
            if self.stopped {
                break;
            }
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        tracing::info!(
            abandoned_deferred = self.deferred.len(),
            "host loop stopped"
        );
        self.state
    }

    pub fn state(&self) -> &H {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut H {
        &mut self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Deferred callbacks waiting for the next cycle.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

/// Start `host` on the dedicated host thread.
pub fn spawn_host_thread<H: Send + 'static>(
    host: HostLoop<H>,
    interval: Duration,
) -> std::io::Result<JoinHandle<H>> {
    std::thread::Builder::new()
        .name(HOST_THREAD_NAME.into())
        .spawn(move || host.run(interval))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::errors::ErrorKind;

    #[test]
    fn test_submitted_jobs_run_in_fifo_order() {
        let (bridge, mut host) = host_channel(Vec::<u32>::new(), DrainPolicy::UntilEmpty);
        for i in 0..5 {
            bridge.submit(move |cx| cx.push(i)).unwrap();
        }
        let report = host.tick();
        assert_eq!(report.drained, 5);
        assert_eq!(host.state(), &vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_one_per_cycle_drains_single_job() {
        let (bridge, mut host) = host_channel(0_u32, DrainPolicy::OnePerCycle);
        for _ in 0..3 {
            bridge.submit(|cx| **cx += 1).unwrap();
        }
        assert_eq!(host.tick().drained, 1);
        assert_eq!(*host.state(), 1);
        host.tick();
        host.tick();
        assert_eq!(*host.state(), 3);
        assert_eq!(host.tick().drained, 0);
    }

    #[test]
    fn test_budget_policy_caps_cycle() {
        let (bridge, mut host) = host_channel(0_u32, DrainPolicy::Budget(2));
        for _ in 0..5 {
            bridge.submit(|cx| **cx += 1).unwrap();
        }
        assert_eq!(host.tick().drained, 2);
        assert_eq!(host.tick().drained, 2);
        assert_eq!(host.tick().drained, 1);
    }

    #[test]
    fn test_delay_call_runs_next_cycle_before_queue() {
        let (bridge, mut host) = host_channel(Vec::<&'static str>::new(), DrainPolicy::UntilEmpty);
        bridge
            .submit(|cx| {
                cx.push("job");
                cx.delay_call(|cx| cx.push("deferred"));
            })
            .unwrap();
        host.tick();
        assert_eq!(host.state(), &vec!["job"]);
        assert_eq!(host.deferred_len(), 1);

        bridge.submit(|cx| cx.push("queued")).unwrap();
        let report = host.tick();
        assert_eq!(report, CycleReport { deferred: 1, drained: 1 });
        assert_eq!(host.state(), &vec!["job", "deferred", "queued"]);
    }

    #[test]
    fn test_run_on_host_executes_inline() {
        let (bridge, mut host) = host_channel(Vec::<u32>::new(), DrainPolicy::UntilEmpty);
        bridge
            .submit(|cx| {
                cx.push(1);
                let len = cx.run_on_host(|inner| {
                    inner.push(2);
                    inner.len()
                });
                cx.push(len as u32 * 10);
            })
            .unwrap();
        assert_eq!(host.tick().drained, 1);
        assert_eq!(host.state(), &vec![1, 2, 20]);
    }

    #[test]
    fn test_host_flag_set_only_inside_cycle() {
        assert!(!on_host_thread());
        let (bridge, mut host) = host_channel(false, DrainPolicy::UntilEmpty);
        bridge.submit(|cx| **cx = on_host_thread()).unwrap();
        host.tick();
        assert!(*host.state());
        assert!(!on_host_thread());
    }

    #[test]
    fn test_panicking_job_does_not_stop_loop() {
        let (bridge, mut host) = host_channel(0_u32, DrainPolicy::UntilEmpty);
        bridge.submit(|_| panic!("bad job")).unwrap();
        bridge.submit(|cx| **cx += 1).unwrap();
        assert_eq!(host.tick().drained, 2);
        assert_eq!(*host.state(), 1);
        assert!(!host.is_stopped());
    }

    #[tokio::test]
    async fn test_call_returns_work_result() {
        let (bridge, mut host) = host_channel(41_u32, DrainPolicy::UntilEmpty);
        let fut = bridge.call(|cx| {
            **cx += 1;
            Ok(**cx)
        });
        host.tick();
        assert_eq!(fut.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_call_surfaces_panic_as_internal() {
        let (bridge, mut host) = host_channel((), DrainPolicy::UntilEmpty);
        let fut = bridge.call(|_| -> Result<(), BridgeError> { panic!("kaboom") });
        host.tick();
        let err = fut.await.unwrap_err();
        assert!(matches!(err, BridgeError::HandlerPanicked { .. }));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_call_from_host_job_fails_without_queueing() {
        use futures::FutureExt;

        let (bridge, mut host) =
            host_channel(None::<Result<u32, BridgeError>>, DrainPolicy::UntilEmpty);
        bridge
            .submit(|cx| {
                let nested = cx.bridge().call(|_| Ok(7_u32));
                **cx = nested.now_or_never();
            })
            .unwrap();

        assert_eq!(host.tick().drained, 1);
        match host.state() {
            Some(Err(err)) => {
                assert_eq!(err.kind(), ErrorKind::Internal);
                assert!(err.to_string().contains("run_on_host"));
            }
            other => panic!("expected an immediate failure, got {other:?}"),
        }
        assert_eq!(host.tick().drained, 0);
    }

    #[tokio::test]
    async fn test_call_after_shutdown_reports_host_unavailable() {
        let (bridge, mut host) = host_channel((), DrainPolicy::UntilEmpty);
        bridge.shutdown();
        host.tick();
        assert!(host.is_stopped());
        drop(host);

        let err = bridge.call(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, BridgeError::HostUnavailable { .. }));
    }

    #[test]
    fn test_shutdown_drains_work_queued_before_it() {
        let (bridge, host) = host_channel(0_u32, DrainPolicy::OnePerCycle);
        bridge.submit(|cx| **cx += 1).unwrap();
        bridge.submit(|cx| **cx += 1).unwrap();
        bridge.shutdown();
        let handle = spawn_host_thread(host, Duration::from_millis(1)).unwrap();
        assert_eq!(handle.join().unwrap(), 2);
    }

    #[test]
    fn test_host_thread_is_named() {
        let (bridge, host) = host_channel(String::new(), DrainPolicy::UntilEmpty);
        bridge
            .submit(|cx| {
                **cx = std::thread::current().name().unwrap_or_default().to_string();
            })
            .unwrap();
        bridge.shutdown();
        let handle = spawn_host_thread(host, Duration::from_millis(1)).unwrap();
        assert_eq!(handle.join().unwrap(), HOST_THREAD_NAME);
    }
}
