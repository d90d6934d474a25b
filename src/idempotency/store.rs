//! In-memory idempotency store
//!
//! Reference implementation of the transport-side contract for repeated
//! idempotency keys:
//!
//! - the first request for a `(route, key)` pair executes the operation;
//! - concurrent requests with the same pair wait on that execution and
//!   receive its stored response instead of running again;
//! - later requests within the retention window replay the stored response;
//! - a failed execution stores nothing, so the next request executes.
//!
//! Production deployments back this with a shared database; the locking
//! discipline (one in-flight execution per key) must be the same.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::idempotency::key::IdempotencyKey;

/// Default retention window for stored responses
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Response recorded for an idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// HTTP status of the original execution
    pub status: u16,
    /// Response body of the original execution
    pub body: serde_json::Value,
}

/// Response handed back by [`InMemoryIdempotencyStore::execute`]
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotentResponse {
    /// Stored or freshly produced response
    pub response: StoredResponse,
    /// True when this caller did not execute the operation
    pub replayed: bool,
}

struct Entry {
    created: Instant,
    cell: Arc<OnceCell<StoredResponse>>,
}

type EntryKey = (String, String);

/// Idempotency store keeping responses in process memory
pub struct InMemoryIdempotencyStore {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<EntryKey, Entry>>,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, 100_000)
    }
}

impl InMemoryIdempotencyStore {
    /// Create a store with a retention window and a size bound
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` at most once per `(route, key)` within the retention window
    pub async fn execute<F, Fut, E>(
        &self,
        route: &str,
        key: &IdempotencyKey,
        op: F,
    ) -> Result<IdempotentResponse, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StoredResponse, E>>,
    {
        let pending = PendingEntry {
            entries: &self.entries,
            cell: self.cell_for(route, key),
            key: (route.to_string(), key.as_str().to_string()),
        };

        let mut executed = false;
        let response = pending
            .cell
            .get_or_try_init(|| {
                executed = true;
                op()
            })
            .await?
            .clone();

        if executed {
            tracing::debug!(route, idempotency_key = %key, "Idempotent operation executed");
        } else {
            tracing::info!(
                route,
                idempotency_key = %key,
                status = response.status,
                "Replaying stored response for idempotency key"
            );
        }

        Ok(IdempotentResponse {
            response,
            replayed: !executed,
        })
    }

    /// Stored response for `(route, key)`, if completed and not expired
    pub fn get(&self, route: &str, key: &IdempotencyKey) -> Option<StoredResponse> {
        let entries = self.entries.lock();
        let entry = entries.get(&(route.to_string(), key.as_str().to_string()))?;
        if entry.created.elapsed() >= self.ttl {
            return None;
        }
        entry.cell.get().cloned()
    }

    /// Number of tracked keys, including in-flight ones
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no keys are tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries older than the retention window; returns how many
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.created.elapsed() < ttl);
        before - entries.len()
    }

    fn cell_for(&self, route: &str, key: &IdempotencyKey) -> Arc<OnceCell<StoredResponse>> {
        let entry_key = (route.to_string(), key.as_str().to_string());
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&entry_key) {
            if entry.created.elapsed() < self.ttl {
                return entry.cell.clone();
            }
        }

        if entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.created.elapsed() < ttl);
        }
        if entries.len() >= self.max_entries {
            // Evict the oldest completed or abandoned entry; in-flight ones keep their lock
            let oldest = entries
                .iter()
                .filter(|(_, entry)| {
                    entry.cell.initialized() || Arc::strong_count(&entry.cell) == 1
                })
                .min_by_key(|(_, entry)| entry.created)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        let cell = Arc::new(OnceCell::new());
        entries.insert(
            entry_key,
            Entry {
                created: Instant::now(),
                cell: cell.clone(),
            },
        );
        cell
    }
}

/// Entry an `execute` call is waiting on or running.
///
/// If the call ends without a stored response (the operation failed or the
/// caller was cancelled) and nobody else holds the cell, the entry is removed
/// so failures never occupy the store.
struct PendingEntry<'a> {
    entries: &'a Mutex<HashMap<EntryKey, Entry>>,
    key: EntryKey,
    cell: Arc<OnceCell<StoredResponse>>,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.cell.initialized() {
            return;
        }
        let mut entries = self.entries.lock();
        // One reference in the map, one here
        let abandoned = entries.get(&self.key).is_some_and(|entry| {
            Arc::ptr_eq(&entry.cell, &self.cell) && Arc::strong_count(&entry.cell) == 2
        });
        if abandoned {
            entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    fn created(id: &str) -> StoredResponse {
        StoredResponse {
            status: 201,
            body: serde_json::json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn test_second_call_replays() {
        let store = InMemoryIdempotencyStore::default();
        let k = key("order-1");

        let first = store
            .execute("POST /v1/payments", &k, || async {
                Ok::<_, std::convert::Infallible>(created("pay_1"))
            })
            .await
            .unwrap();
        assert!(!first.replayed);

        let second = store
            .execute("POST /v1/payments", &k, || async {
                Ok::<_, std::convert::Infallible>(created("pay_2"))
            })
            .await
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.response, created("pay_1"));
    }

    #[tokio::test]
    async fn test_routes_are_separate() {
        let store = InMemoryIdempotencyStore::default();
        let k = key("same-key");

        store
            .execute("POST /v1/payments", &k, || async {
                Ok::<_, std::convert::Infallible>(created("pay_1"))
            })
            .await
            .unwrap();
        let refund = store
            .execute("POST /v1/refunds", &k, || async {
                Ok::<_, std::convert::Infallible>(created("re_1"))
            })
            .await
            .unwrap();

        assert!(!refund.replayed);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_stored() {
        let store = InMemoryIdempotencyStore::default();
        let k = key("flaky");

        let err = store
            .execute("POST /v1/payouts", &k, || async { Err::<StoredResponse, _>("upstream 503") })
            .await
            .unwrap_err();
        assert_eq!(err, "upstream 503");
        assert!(store.get("POST /v1/payouts", &k).is_none());

        let retry = store
            .execute("POST /v1/payouts", &k, || async { Ok::<_, &str>(created("po_1")) })
            .await
            .unwrap();
        assert!(!retry.replayed);
        assert_eq!(store.get("POST /v1/payouts", &k), Some(created("po_1")));
    }

    #[tokio::test]
    async fn test_concurrent_requests_execute_once() {
        let store = Arc::new(InMemoryIdempotencyStore::default());
        let executions = Arc::new(AtomicU32::new(0));
        let mut tasks = Vec::new();

        for _ in 0..10 {
            let store = store.clone();
            let executions = executions.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .execute("POST /v1/payments", &key("concurrent"), || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, std::convert::Infallible>(created("pay_once"))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut replayed = 0;
        for task in tasks {
            let result = task.await.unwrap();
            assert_eq!(result.response, created("pay_once"));
            if result.replayed {
                replayed += 1;
            }
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(replayed, 9);
    }

    #[tokio::test]
    async fn test_expired_entries_execute_again() {
        let store = InMemoryIdempotencyStore::new(Duration::from_millis(10), 100);
        let k = key("short-lived");

        store
            .execute("POST /v1/payments", &k, || async {
                Ok::<_, std::convert::Infallible>(created("pay_1"))
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("POST /v1/payments", &k).is_none());
        let again = store
            .execute("POST /v1/payments", &k, || async {
                Ok::<_, std::convert::Infallible>(created("pay_2"))
            })
            .await
            .unwrap();
        assert!(!again.replayed);
        assert_eq!(again.response, created("pay_2"));
    }

    #[tokio::test]
    async fn test_failed_operations_do_not_grow_store() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(3600), 3);

        for i in 0..50 {
            let err = store
                .execute("POST /v1/payouts", &key(&format!("k-{i}")), || async {
                    Err::<StoredResponse, _>("503")
                })
                .await
                .unwrap_err();
            assert_eq!(err, "503");
        }
        assert!(store.is_empty());

        for i in 0..5 {
            store
                .execute("POST /v1/payouts", &key(&format!("ok-{i}")), || async {
                    Ok::<_, &str>(created("po"))
                })
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_execution_releases_key() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(3600), 3);
        let k = key("cancelled");

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            store.execute("POST /v1/payments", &k, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, std::convert::Infallible>(created("pay_slow"))
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(store.is_empty());

        let retry = store
            .execute("POST /v1/payments", &k, || async {
                Ok::<_, std::convert::Infallible>(created("pay_retry"))
            })
            .await
            .unwrap();
        assert!(!retry.replayed);
        assert_eq!(retry.response, created("pay_retry"));
    }

    #[tokio::test]
    async fn test_waiter_runs_after_failed_execution() {
        let store = Arc::new(InMemoryIdempotencyStore::default());
        let k = key("shared");

        let first = {
            let store = store.clone();
            let k = k.clone();
            tokio::spawn(async move {
                store
                    .execute("POST /v1/payments", &k, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<StoredResponse, _>("upstream 503")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = store
            .execute("POST /v1/payments", &k, || async { Ok::<_, &str>(created("pay_2")) })
            .await
            .unwrap();
        assert!(first.await.unwrap().is_err());
        assert!(!second.replayed);
        assert_eq!(store.get("POST /v1/payments", &k), Some(created("pay_2")));
    }

    #[tokio::test]
    async fn test_purge_and_bound() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60), 3);

        for i in 0..5 {
            store
                .execute("POST /v1/payments", &key(&format!("k-{i}")), || async {
                    Ok::<_, std::convert::Infallible>(created("pay"))
                })
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.purge_expired(), 0);
        assert!(!store.is_empty());
    }
}
