//! Correlation of in-flight asynchronous requests with their completions.
//!
//! Entries are sharded by id, so insert/resolve/cancel on distinct ids never
//! contend, while operations on the same id are mutually exclusive.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use super::errors::BridgeError;
use super::types::{Outcome, RequestId};

/// An asynchronous request awaiting its completion.
#[derive(Debug)]
pub struct PendingCall {
    pub id: RequestId,
    completion: oneshot::Sender<Outcome>,
    pub created_at: Instant,
}

impl PendingCall {
    /// Whether whoever was waiting for this call has gone away.
    pub fn is_abandoned(&self) -> bool {
        self.completion.is_closed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Maps in-flight request ids to the handle that delivers their outcome.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: DashMap<RequestId, PendingCall>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call. Fails if `id` is already in flight.
    pub fn insert(
        &self,
        id: RequestId,
        completion: oneshot::Sender<Outcome>,
    ) -> Result<(), BridgeError> {
        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateId { id: id.to_string() }),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    id,
                    completion,
                    created_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    /// Deliver `outcome` to the waiter for `id` and remove the entry.
    ///
    /// Returns `false` (and does nothing) when no entry exists, so a second
    /// resolve of the same id is harmless.
    pub fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        let Some((_, call)) = self.entries.remove(id) else {
            tracing::debug!(id = %id, "resolve for unknown or finished request ignored");
            return false;
        };
        if call.completion.send(outcome).is_err() {
            tracing::debug!(id = %id, "completion arrived after waiter went away");
        }
        true
    }

    /// Remove the entry for `id` without delivering anything.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose waiter has gone away. Returns how many were removed.
    pub fn reap_abandoned(&self) -> usize {
        let mut reaped = 0;
        self.entries.retain(|id, call| {
            if call.is_abandoned() {
                tracing::debug!(
                    id = %id,
                    age_ms = call.age().as_millis() as u64,
                    "reaping abandoned request"
                );
                reaped += 1;
                false
            } else {
                true
            }
        });
        reaped
    }

    /// Fail every entry older than `max_age` with a timeout and remove it.
    /// Returns the expired ids.
    pub fn expire_older_than(&self, max_age: Duration) -> Vec<RequestId> {
        let stale: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().age() >= max_age)
            .map(|entry| entry.key().clone())
            .collect();

        let timeout_ms = max_age.as_millis() as u64;
        stale
            .into_iter()
            .filter(|id| {
                self.resolve(
                    id,
                    Outcome::failure(&BridgeError::Timeout {
                        id: id.to_string(),
                        timeout_ms,
                    }),
                )
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::errors::ErrorKind;
    use crate::bridge::types::Params;

    fn id(s: &str) -> RequestId {
        RequestId::new(s)
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let table = CorrelationTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        table.insert(id("a"), tx1).unwrap();
        let err = table.insert(id("a"), tx2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateId);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve_delivers_once() {
        let table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert(id("a"), tx).unwrap();

        assert!(table.resolve(&id("a"), Outcome::Success(Params::new())));
        assert!(!table.resolve(&id("a"), Outcome::failure(&BridgeError::internal("late"))));

        assert_eq!(rx.try_recv().unwrap(), Outcome::Success(Params::new()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_unknown_id_is_noop() {
        let table = CorrelationTable::new();
        assert!(!table.resolve(&id("ghost"), Outcome::Success(Params::new())));
    }

    #[test]
    fn test_cancel_removes_without_delivery() {
        let table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert(id("a"), tx).unwrap();

        assert!(table.cancel(&id("a")));
        assert!(!table.contains(&id("a")));
        // Sender dropped with no value.
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(!table.cancel(&id("a")));
    }

    #[test]
    fn test_reap_abandoned_only_removes_closed_waiters() {
        let table = CorrelationTable::new();
        let (tx_live, _rx_live) = oneshot::channel();
        let (tx_gone, rx_gone) = oneshot::channel();
        table.insert(id("live"), tx_live).unwrap();
        table.insert(id("gone"), tx_gone).unwrap();
        drop(rx_gone);

        assert_eq!(table.reap_abandoned(), 1);
        assert!(table.contains(&id("live")));
        assert!(!table.contains(&id("gone")));
    }

    #[test]
    fn test_expire_older_than_fails_stale_entries() {
        let table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert(id("slow"), tx).unwrap();

        assert!(table.expire_older_than(Duration::from_secs(3600)).is_empty());
        let expired = table.expire_older_than(Duration::ZERO);
        assert_eq!(expired, vec![id("slow")]);
        assert!(table.is_empty());

        match rx.try_recv().unwrap() {
            Outcome::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::Internal);
                assert!(message.contains("timed out"));
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[test]
    fn test_distinct_ids_from_many_threads() {
        let table = std::sync::Arc::new(CorrelationTable::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let (tx, _rx) = oneshot::channel();
                        let key = RequestId::new(format!("{t}-{i}"));
                        table.insert(key.clone(), tx).unwrap();
                        assert!(table.cancel(&key));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(table.is_empty());
    }
}
