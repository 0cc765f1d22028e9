//! Process-wide batching writer for hydrated scores.
//!
//! Every job shares one queue, so a score submitted through two channels at the
//! same moment is still caught by the working-set check. Records move from the
//! buffer to an in-flight set while their batch is being written, and stay
//! visible to `contains` until the write settles. Scores whose write did not
//! land are remembered until the job that queued them collects them with
//! `take_settlements`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info};

use crate::app::ports::{ScoreImportedHook, ScoreStore};
use crate::common::error::StoreError;
use crate::domain::ScoreRecord;
use crate::observability::metrics::QueueMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued, and reaching capacity wrote the batch out.
    Flushed(FlushReport),
    /// A record with the same `scoreID` is already buffered or being written.
    Duplicate,
}

/// What one flush wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub inserted: Vec<String>,
    /// Rejected by the store because another writer got there first.
    pub conflicted: Vec<String>,
}

/// A batch the store refused. None of `score_ids` were written.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("writing a batch of {} scores failed: {source}", .score_ids.len())]
pub struct FlushError {
    pub source: StoreError,
    pub score_ids: Vec<String>,
}

/// Fate of a queued score that was not inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Conflicted,
    Failed,
}

#[derive(Default)]
struct QueueState {
    buffer: Vec<ScoreRecord>,
    queued_ids: HashSet<String>,
    in_flight: HashSet<String>,
    settled: HashMap<String, Settlement>,
}

pub struct InsertQueue {
    store: Arc<dyn ScoreStore>,
    capacity: usize,
    state: Mutex<QueueState>,
    written: Notify,
    hooks: Vec<Arc<dyn ScoreImportedHook>>,
}

impl InsertQueue {
    pub fn new(store: Arc<dyn ScoreStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            written: Notify::new(),
            hooks: Vec::new(),
        }
    }

    /// Register a listener fired once per inserted score, after its flush.
    pub fn with_hook(mut self, hook: Arc<dyn ScoreImportedHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `score_id` is buffered or part of a batch being written.
    pub async fn contains(&self, score_id: &str) -> bool {
        let state = self.state.lock().await;
        state.queued_ids.contains(score_id) || state.in_flight.contains(score_id)
    }

    /// Buffer a record, flushing synchronously once the buffer reaches capacity.
    ///
    /// The flush result is returned to the caller that triggered it. Other
    /// records in that batch which did not land are kept for their owners'
    /// `take_settlements`.
    pub async fn enqueue(&self, record: ScoreRecord) -> Result<EnqueueOutcome, FlushError> {
        let score_id = record.score_id.clone();
        let batch = {
            let mut state = self.state.lock().await;
            if state.queued_ids.contains(&score_id) || state.in_flight.contains(&score_id) {
                debug!(%score_id, "score already queued");
                return Ok(EnqueueOutcome::Duplicate);
            }

            state.queued_ids.insert(score_id.clone());
            state.buffer.push(record);

            if state.buffer.len() < self.capacity {
                return Ok(EnqueueOutcome::Queued);
            }
            Self::take_batch(&mut state)
        };

        debug!(size = batch.len(), "insert queue reached capacity, flushing");
        let report = self.write_batch(batch, Some(&score_id)).await?;
        Ok(EnqueueOutcome::Flushed(report))
    }

    /// Write out whatever is buffered. Called unconditionally at job end.
    pub async fn flush(&self) -> Result<FlushReport, FlushError> {
        let batch = {
            let mut state = self.state.lock().await;
            Self::take_batch(&mut state)
        };
        self.write_batch(batch, None).await
    }

    /// Wait until none of `score_ids` is being written, then hand back the ones
    /// that did not land. Collected settlements are forgotten.
    pub async fn take_settlements(&self, score_ids: &[String]) -> HashMap<String, Settlement> {
        loop {
            let written = self.written.notified();
            {
                let mut state = self.state.lock().await;
                if !score_ids.iter().any(|id| state.in_flight.contains(id)) {
                    return score_ids
                        .iter()
                        .filter_map(|id| state.settled.remove_entry(id))
                        .collect();
                }
            }
            written.await;
        }
    }

    fn take_batch(state: &mut QueueState) -> Vec<ScoreRecord> {
        let batch = std::mem::take(&mut state.buffer);
        let ids = std::mem::take(&mut state.queued_ids);
        state.in_flight.extend(ids);
        batch
    }

    /// `reporter` is the record whose enqueue triggered this write; its fate
    /// goes back through the return value instead of the settlement map.
    async fn write_batch(
        &self,
        batch: Vec<ScoreRecord>,
        reporter: Option<&str>,
    ) -> Result<FlushReport, FlushError> {
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let started = Instant::now();
        let result = self.insert_with_conflict_fallback(&batch).await;

        {
            let mut state = self.state.lock().await;
            for record in &batch {
                state.in_flight.remove(&record.score_id);
            }
            let unsettled: Vec<(&String, Settlement)> = match &result {
                Ok(report) => report
                    .conflicted
                    .iter()
                    .map(|id| (id, Settlement::Conflicted))
                    .collect(),
                Err(_) => batch.iter().map(|r| (&r.score_id, Settlement::Failed)).collect(),
            };
            for (id, settlement) in unsettled {
                if reporter != Some(id.as_str()) {
                    state.settled.insert(id.clone(), settlement);
                }
            }
        }
        self.written.notify_waiters();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!(size = batch.len(), "failed to write score batch: {}", e);
                QueueMetrics::record_flush_error();
                return Err(FlushError {
                    source: e,
                    score_ids: batch.into_iter().map(|r| r.score_id).collect(),
                });
            }
        };

        QueueMetrics::record_flush(
            report.inserted.len(),
            report.conflicted.len(),
            started.elapsed().as_secs_f64(),
        );
        info!(
            inserted = report.inserted.len(),
            conflicted = report.conflicted.len(),
            "flushed score batch"
        );

        if !self.hooks.is_empty() {
            let inserted: HashSet<&str> = report.inserted.iter().map(String::as_str).collect();
            for record in batch.iter().filter(|r| inserted.contains(r.score_id.as_str())) {
                for hook in &self.hooks {
                    hook.on_score_imported(record).await;
                }
            }
        }

        Ok(report)
    }

    /// Bulk insert. If another writer raced us, retry record by record so only
    /// the colliding scores are dropped.
    async fn insert_with_conflict_fallback(
        &self,
        batch: &[ScoreRecord],
    ) -> Result<FlushReport, StoreError> {
        match self.store.insert_scores(batch).await {
            Ok(()) => Ok(FlushReport {
                inserted: batch.iter().map(|r| r.score_id.clone()).collect(),
                conflicted: Vec::new(),
            }),
            Err(StoreError::Conflict(reason)) => {
                info!(
                    size = batch.len(),
                    "bulk insert hit a uniqueness conflict ({}), retrying per record", reason
                );
                let mut report = FlushReport::default();
                for record in batch {
                    match self.store.insert_score(record).await {
                        Ok(()) => report.inserted.push(record.score_id.clone()),
                        Err(StoreError::Conflict(_)) => {
                            debug!(score_id = %record.score_id, "score was written by a concurrent import");
                            report.conflicted.push(record.score_id.clone());
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::in_memory::InMemoryStore;
    use crate::testing::score_record;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl ScoreImportedHook for CountingHook {
        async fn on_score_imported(&self, _record: &ScoreRecord) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn reaching_capacity_flushes_exactly_once() {
        let store = Arc::new(InMemoryStore::new());
        let queue = InsertQueue::new(store.clone(), 4);

        for i in 0..4 {
            queue.enqueue(score_record(&format!("R{}", i), "c", 1)).await.unwrap();
        }
        assert_eq!(store.score_count(), 4);
        assert_eq!(store.bulk_insert_calls(), 1);
        assert!(queue.is_empty().await);

        queue.enqueue(score_record("R4", "c", 1)).await.unwrap();
        assert_eq!(queue.len().await, 1);
        assert_eq!(store.bulk_insert_calls(), 1);
    }

    #[tokio::test]
    async fn explicit_flush_drains_partial_batch() {
        let store = Arc::new(InMemoryStore::new());
        let queue = InsertQueue::new(store.clone(), 4);

        for i in 0..3 {
            queue.enqueue(score_record(&format!("R{}", i), "c", 1)).await.unwrap();
        }
        assert_eq!(store.score_count(), 0);

        let report = queue.flush().await.unwrap();
        assert_eq!(report.inserted.len(), 3);
        assert_eq!(store.score_count(), 3);
        assert!(queue.is_empty().await);
        assert!(!queue.contains("R0").await);

        let empty = queue.flush().await.unwrap();
        assert_eq!(empty, FlushReport::default());
    }

    #[tokio::test]
    async fn colliding_records_in_working_set_are_duplicates() {
        let store = Arc::new(InMemoryStore::new());
        let queue = InsertQueue::new(store.clone(), 10);

        assert_eq!(
            queue.enqueue(score_record("R1", "c", 1)).await.unwrap(),
            EnqueueOutcome::Queued
        );
        assert_eq!(
            queue.enqueue(score_record("R1", "c", 1)).await.unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn conflict_drops_only_the_colliding_record() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_score(&score_record("R2", "c", 1)).await.unwrap();

        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let queue = InsertQueue::new(store.clone(), 10).with_hook(hook.clone());
        for id in ["R1", "R2", "R3"] {
            queue.enqueue(score_record(id, "c", 1)).await.unwrap();
        }

        let report = queue.flush().await.unwrap();
        assert_eq!(report.inserted, vec!["R1".to_string(), "R3".to_string()]);
        assert_eq!(report.conflicted, vec!["R2".to_string()]);
        assert_eq!(store.score_count(), 3);
        assert_eq!(hook.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced_and_clears_in_flight() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_writes(true);
        let queue = InsertQueue::new(store.clone(), 10);
        queue.enqueue(score_record("R1", "c", 1)).await.unwrap();

        let err = queue.flush().await.unwrap_err();
        assert!(matches!(err.source, StoreError::Backend(_)));
        assert_eq!(err.score_ids, vec!["R1".to_string()]);
        assert!(!queue.contains("R1").await);
    }

    #[tokio::test]
    async fn capacity_flush_returns_its_report() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_score(&score_record("R1", "c", 1)).await.unwrap();
        let queue = InsertQueue::new(store.clone(), 1);

        let outcome = queue.enqueue(score_record("R1", "c", 1)).await.unwrap();
        assert_eq!(
            outcome,
            EnqueueOutcome::Flushed(FlushReport {
                inserted: vec![],
                conflicted: vec!["R1".to_string()],
            })
        );
        // The caller already saw its own conflict.
        assert!(queue.take_settlements(&["R1".to_string()]).await.is_empty());
    }

    #[tokio::test]
    async fn conflicts_in_a_capacity_flush_are_settled_for_earlier_records() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_score(&score_record("R1", "c", 1)).await.unwrap();
        let queue = InsertQueue::new(store.clone(), 2);

        assert_eq!(
            queue.enqueue(score_record("R1", "c", 1)).await.unwrap(),
            EnqueueOutcome::Queued
        );
        let outcome = queue.enqueue(score_record("R2", "c", 1)).await.unwrap();
        assert!(matches!(
            outcome,
            EnqueueOutcome::Flushed(ref r) if r.inserted == vec!["R2".to_string()]
        ));

        let ids = vec!["R1".to_string(), "R2".to_string()];
        let settled = queue.take_settlements(&ids).await;
        assert_eq!(settled.len(), 1);
        assert_eq!(settled.get("R1"), Some(&Settlement::Conflicted));
    }

    #[tokio::test]
    async fn failed_capacity_flush_settles_the_whole_batch() {
        let store = Arc::new(InMemoryStore::new());
        let queue = InsertQueue::new(store.clone(), 2);

        assert_eq!(
            queue.enqueue(score_record("R1", "c", 1)).await.unwrap(),
            EnqueueOutcome::Queued
        );
        store.fail_writes(true);
        let err = queue.enqueue(score_record("R2", "c", 1)).await.unwrap_err();
        assert_eq!(err.score_ids, vec!["R1".to_string(), "R2".to_string()]);
        assert_eq!(store.score_count(), 0);
        assert!(queue.is_empty().await);

        let settled = queue.take_settlements(&["R1".to_string()]).await;
        assert_eq!(settled.get("R1"), Some(&Settlement::Failed));
        // Collected once.
        assert!(queue.take_settlements(&["R1".to_string()]).await.is_empty());
        assert_eq!(queue.flush().await.unwrap(), FlushReport::default());
    }
}
