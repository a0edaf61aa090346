//! Persistent, prioritised, debounced queue of outgoing sync operations.
//!
//! Grounded on the teacher's `sync::conflict::lww_conflict_handler` for the
//! timestamp-comparison conflict gate and on `retry::retry_with_backoff` for
//! the retry-on-failure shape, generalised here to the exact delay table and
//! priority rules the journal sync engine needs. Persistence is abstracted
//! behind `QueueStore` the same way `EntryStore` abstracts the journal
//! database, following the `SyncBucketClient` trait-object idiom.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::retry;

pub const QUEUE_RETRY_SCHEDULE_MS: [u64; 5] = [1_000, 5_000, 15_000, 60_000, 300_000];
pub const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Update = 1,
    Create = 2,
    Delete = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub entry_id: Option<i64>,
    pub entry_uuid: Uuid,
    pub operation: Operation,
    pub payload: Option<Json>,
    pub entry_updated_at_when_queued: Option<i64>,
    pub status: QueueStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue store error: {0}")]
    Store(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

/// Abstracts the durable queue table; `SyncQueue` layers priority, coalescing,
/// and the conflict gate on top, so any backing store only needs CRUD.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert(&self, item: QueueItem) -> Result<i64, QueueError>;
    async fn find_pending_update(&self, uuid: Uuid) -> Result<Option<QueueItem>, QueueError>;
    async fn update(&self, item: QueueItem) -> Result<(), QueueError>;
    /// Pending items whose `next_retry_at` is unset or already past `now`,
    /// ordered by priority descending then `created_at` ascending.
    async fn next_batch(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, QueueError>;
    async fn retry_failed(&self) -> Result<(), QueueError>;
    async fn clear_completed(&self) -> Result<(), QueueError>;
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Business logic over a `QueueStore`: priority ordering, debounced
/// coalescing of updates, the conflict gate, and the retry schedule. None of
/// this logic depends on the backing store being SQL, matching the
/// teacher's preference for async trait objects at storage seams.
pub struct SyncQueue<S: QueueStore> {
    store: S,
    debounce_timers: Mutex<HashMap<Uuid, tokio::task::AbortHandle>>,
}

impl<S: QueueStore + Clone + 'static> SyncQueue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            debounce_timers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn enqueue_create(
        &self,
        entry_id: i64,
        uuid: Uuid,
        entry_updated_at: i64,
        now: i64,
    ) -> Result<(), QueueError> {
        self.store
            .insert(QueueItem {
                id: 0,
                entry_id: Some(entry_id),
                entry_uuid: uuid,
                operation: Operation::Create,
                payload: None,
                entry_updated_at_when_queued: Some(entry_updated_at),
                status: QueueStatus::Pending,
                error: None,
                retry_count: 0,
                next_retry_at: None,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    pub async fn enqueue_delete(&self, entry_uuid: Uuid, now: i64) -> Result<(), QueueError> {
        self.store
            .insert(QueueItem {
                id: 0,
                entry_id: None,
                entry_uuid,
                operation: Operation::Delete,
                payload: None,
                entry_updated_at_when_queued: None,
                status: QueueStatus::Pending,
                error: None,
                retry_count: 0,
                next_retry_at: None,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    /// Immediate (non-debounced) update enqueue. Coalesces with any existing
    /// pending update for the same uuid instead of inserting a new row.
    pub async fn enqueue_update(
        &self,
        entry_id: i64,
        uuid: Uuid,
        payload: Json,
        entry_updated_at: i64,
        now: i64,
    ) -> Result<(), QueueError> {
        if let Some(mut existing) = self.store.find_pending_update(uuid).await? {
            merge_payload(&mut existing.payload, payload);
            existing.entry_updated_at_when_queued = Some(entry_updated_at);
            self.store.update(existing).await?;
            return Ok(());
        }

        self.store
            .insert(QueueItem {
                id: 0,
                entry_id: Some(entry_id),
                entry_uuid: uuid,
                operation: Operation::Update,
                payload: Some(payload),
                entry_updated_at_when_queued: Some(entry_updated_at),
                status: QueueStatus::Pending,
                error: None,
                retry_count: 0,
                next_retry_at: None,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    /// Debounced update enqueue: holds for 500ms of quiescence, merging
    /// payloads from calls that land inside the window instead of flushing
    /// each one. Spawns a delayed `enqueue_update`; a further call for the
    /// same uuid cancels the pending timer and restarts it.
    pub fn enqueue_update_debounced(
        self: &std::sync::Arc<Self>,
        entry_id: i64,
        uuid: Uuid,
        payload: Json,
        entry_updated_at: i64,
        now: impl Fn() -> i64 + Send + 'static,
    ) {
        let mut timers = self.debounce_timers.lock().unwrap();
        if let Some(handle) = timers.remove(&uuid) {
            handle.abort();
        }

        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            let at = now();
            if let Err(e) = this.enqueue_update(entry_id, uuid, payload, entry_updated_at, at).await {
                tracing::warn!(%uuid, error = %e, "debounced enqueue failed");
            }
            this.debounce_timers.lock().unwrap().remove(&uuid);
        });
        timers.insert(uuid, task.abort_handle());
    }

    /// Next batch of ready items, respecting `next_retry_at`.
    pub async fn get_next_batch(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, QueueError> {
        self.store.next_batch(now, limit).await
    }

    /// Apply the conflict gate: an update whose `entry_updated_at_when_queued`
    /// is behind the live entry's `updated_at` is stale and must not be sent.
    pub fn is_stale(item: &QueueItem, live_updated_at: i64) -> bool {
        match (item.operation, item.entry_updated_at_when_queued) {
            (Operation::Update, Some(queued_at)) => live_updated_at > queued_at,
            _ => false,
        }
    }

    pub async fn mark_completed(&self, mut item: QueueItem) -> Result<(), QueueError> {
        item.status = QueueStatus::Completed;
        self.store.update(item).await
    }

    /// Record a failed attempt and schedule the next retry, or flip to
    /// `Failed` once the schedule is exhausted.
    pub async fn mark_failed(&self, mut item: QueueItem, error: String, now: i64) -> Result<(), QueueError> {
        item.error = Some(error);
        if retry::exhausted(&QUEUE_RETRY_SCHEDULE_MS, item.retry_count) {
            item.status = QueueStatus::Failed;
            item.next_retry_at = None;
        } else {
            let delay = retry::next_delay(&QUEUE_RETRY_SCHEDULE_MS, item.retry_count).unwrap();
            item.retry_count += 1;
            item.status = QueueStatus::Pending;
            item.next_retry_at = Some(now + delay.as_millis() as i64);
        }
        self.store.update(item).await
    }

    pub async fn retry_failed(&self) -> Result<(), QueueError> {
        self.store.retry_failed().await
    }

    pub async fn clear_completed(&self) -> Result<(), QueueError> {
        self.store.clear_completed().await
    }

    pub async fn get_stats(&self) -> Result<QueueStats, QueueError> {
        self.store.stats().await
    }
}

fn merge_payload(existing: &mut Option<Json>, incoming: Json) {
    match existing {
        Some(Json::Object(map)) => {
            if let Json::Object(new_map) = incoming {
                for (k, v) in new_map {
                    map.insert(k, v);
                }
            }
        }
        _ => *existing = Some(incoming),
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    pub struct InMemoryQueueStore {
        inner: std::sync::Arc<StdMutex<Vec<QueueItem>>>,
        next_id: std::sync::Arc<AtomicI64>,
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn all(&self) -> Vec<QueueItem> {
            self.inner.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueueStore for InMemoryQueueStore {
        async fn insert(&self, mut item: QueueItem) -> Result<i64, QueueError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            item.id = id;
            self.inner.lock().unwrap().push(item);
            Ok(id)
        }

        async fn find_pending_update(&self, uuid: Uuid) -> Result<Option<QueueItem>, QueueError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.entry_uuid == uuid && i.operation == Operation::Update && i.status == QueueStatus::Pending)
                .cloned())
        }

        async fn update(&self, item: QueueItem) -> Result<(), QueueError> {
            let mut items = self.inner.lock().unwrap();
            if let Some(slot) = items.iter_mut().find(|i| i.id == item.id) {
                *slot = item;
            }
            Ok(())
        }

        async fn next_batch(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, QueueError> {
            let mut items: Vec<QueueItem> = self
                .inner
                .lock()
                .unwrap()
                .iter()
                .filter(|i| {
                    i.status == QueueStatus::Pending
                        && i.next_retry_at.map(|t| t <= now).unwrap_or(true)
                })
                .cloned()
                .collect();
            items.sort_by(|a, b| {
                b.operation
                    .cmp(&a.operation)
                    .then(a.created_at.cmp(&b.created_at))
            });
            items.truncate(limit);
            Ok(items)
        }

        async fn retry_failed(&self) -> Result<(), QueueError> {
            let mut items = self.inner.lock().unwrap();
            for item in items.iter_mut() {
                if item.status == QueueStatus::Failed {
                    item.status = QueueStatus::Pending;
                    item.retry_count = 0;
                    item.error = None;
                    item.next_retry_at = None;
                }
            }
            Ok(())
        }

        async fn clear_completed(&self) -> Result<(), QueueError> {
            self.inner.lock().unwrap().retain(|i| i.status != QueueStatus::Completed);
            Ok(())
        }

        async fn stats(&self) -> Result<QueueStats, QueueError> {
            let items = self.inner.lock().unwrap();
            let mut stats = QueueStats::default();
            for item in items.iter() {
                match item.status {
                    QueueStatus::Pending => stats.pending += 1,
                    QueueStatus::Processing => stats.processing += 1,
                    QueueStatus::Completed => stats.completed += 1,
                    QueueStatus::Failed => stats.failed += 1,
                }
            }
            Ok(stats)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::InMemoryQueueStore;
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn priority_then_fifo_ordering() {
        let queue = SyncQueue::new(InMemoryQueueStore::new());
        queue.enqueue_update(1, Uuid::new_v4(), json!({"title": "a"}), 1, 10).await.unwrap();
        queue.enqueue_create(2, Uuid::new_v4(), 1, 20).await.unwrap();
        queue.enqueue_delete(Uuid::new_v4(), 30).await.unwrap();

        let batch = queue.get_next_batch(1000, 10).await.unwrap();
        assert_eq!(batch[0].operation, Operation::Delete);
        assert_eq!(batch[1].operation, Operation::Create);
        assert_eq!(batch[2].operation, Operation::Update);
    }

    #[tokio::test]
    async fn coalesces_pending_updates_for_same_uuid() {
        let queue = SyncQueue::new(InMemoryQueueStore::new());
        let uuid = Uuid::new_v4();
        queue.enqueue_update(1, uuid, json!({"a": 1}), 1, 10).await.unwrap();
        queue.enqueue_update(1, uuid, json!({"b": 2}), 2, 20).await.unwrap();

        let batch = queue.get_next_batch(1000, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, Some(json!({"a": 1, "b": 2})));
    }

    #[tokio::test]
    async fn debounced_burst_produces_one_row() {
        let queue = Arc::new(SyncQueue::new(InMemoryQueueStore::new()));
        let uuid = Uuid::new_v4();
        for i in 0..10 {
            queue.enqueue_update_debounced(1, uuid, json!({"title": format!("k{i}")}), 1, move || 1000);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(100)).await;

        let batch = queue.get_next_batch(i64::MAX, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, Some(json!({"title": "k9"})));
    }

    #[test]
    fn stale_update_is_dropped() {
        let item = QueueItem {
            id: 1,
            entry_id: Some(1),
            entry_uuid: Uuid::new_v4(),
            operation: Operation::Update,
            payload: None,
            entry_updated_at_when_queued: Some(100),
            status: QueueStatus::Pending,
            error: None,
            retry_count: 0,
            next_retry_at: None,
            created_at: 0,
        };
        assert!(SyncQueue::<InMemoryQueueStore>::is_stale(&item, 200));
        assert!(!SyncQueue::<InMemoryQueueStore>::is_stale(&item, 100));
    }

    #[tokio::test]
    async fn retry_schedule_matches_spec() {
        let queue = SyncQueue::new(InMemoryQueueStore::new());
        let id = queue
            .store
            .insert(QueueItem {
                id: 0,
                entry_id: Some(1),
                entry_uuid: Uuid::new_v4(),
                operation: Operation::Update,
                payload: None,
                entry_updated_at_when_queued: Some(1),
                status: QueueStatus::Pending,
                error: None,
                retry_count: 0,
                next_retry_at: None,
                created_at: 0,
            })
            .await
            .unwrap();
        let mut item = queue.store.all().into_iter().find(|i| i.id == id).unwrap();

        for (attempt, expected_delay) in QUEUE_RETRY_SCHEDULE_MS.iter().enumerate() {
            queue.mark_failed(item.clone(), "boom".into(), 0).await.unwrap();
            item = queue.store.all().into_iter().find(|i| i.id == id).unwrap();
            assert_eq!(item.retry_count as usize, attempt + 1);
            assert_eq!(item.next_retry_at, Some(*expected_delay as i64));
            assert_eq!(item.status, QueueStatus::Pending);
        }

        queue.mark_failed(item.clone(), "boom".into(), 0).await.unwrap();
        let item = queue.store.all().into_iter().find(|i| i.id == id).unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
    }
}
