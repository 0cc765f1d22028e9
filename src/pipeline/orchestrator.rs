//! Runs one import job: drives the producer through convert, hydrate and queue,
//! collecting one outcome per converted result, then flushes the shared queue.

use chrono::Utc;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::app::ports::{CatalogLookup, OrphanRecord, ScoreStore};
use crate::common::constants::{INTERNAL_FAILURE_MESSAGE, INTERNAL_SERVICE_MESSAGE, ORPHAN_ID_PREFIX};
use crate::common::error::ImportFatalError;
use crate::domain::{ImportContext, ImportType, ScoreRecord, UserId};
use crate::observability::metrics::ImportMetrics;
use crate::pipeline::processing::calculated_data::CalculatedDataEngine;
use crate::pipeline::processing::converters::{ConversionResult, ConverterFailure, ScoreConverter};
use crate::pipeline::processing::hydrate::{HydrateOutcome, ScoreHydrator};
use crate::pipeline::processing::insert_queue::{InsertQueue, Settlement};

/// Everything needed to run one import for one user from one source.
pub struct ImportJob {
    pub user_id: UserId,
    pub context: ImportContext,
    pub producer: BoxStream<'static, Result<Value, ImportFatalError>>,
    pub converter: Arc<dyn ScoreConverter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutcomeKind {
    Imported,
    Duplicate,
    DataNotFound,
    Invalid,
    InternalError,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Imported => "Imported",
            OutcomeKind::Duplicate => "Duplicate",
            OutcomeKind::DataNotFound => "DataNotFound",
            OutcomeKind::Invalid => "Invalid",
            OutcomeKind::InternalError => "InternalError",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "orphanID", skip_serializing_if = "Option::is_none")]
    pub orphan_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub kind: OutcomeKind,
    pub message: Option<String>,
    pub content: OutcomeContent,
}

impl ImportOutcome {
    fn new(success: bool, kind: OutcomeKind, message: impl Into<String>) -> Self {
        Self {
            success,
            kind,
            message: Some(message.into()),
            content: OutcomeContent::default(),
        }
    }

    fn internal(message: &str) -> Self {
        Self::new(false, OutcomeKind::InternalError, message)
    }
}

/// What a finished (or fatally stopped) job reports back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    #[serde(rename = "importID")]
    pub import_id: String,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub import_type: ImportType,
    pub outcomes: Vec<ImportOutcome>,
    /// Results dropped on purpose: skipped by the converter or blacklisted.
    pub skipped: usize,
    /// Why the job stopped early. Outcomes collected before that are kept.
    pub fatal: Option<String>,
    #[serde(rename = "chartIDs")]
    pub chart_ids: BTreeSet<String>,
    #[serde(rename = "scoreIDs")]
    pub score_ids: Vec<String>,
    pub time_started: i64,
    pub time_finished: i64,
}

impl JobReport {
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }
}

/// One import per user at a time.
#[derive(Clone, Default)]
pub struct ImportLocks {
    held: Arc<Mutex<HashSet<UserId>>>,
}

impl ImportLocks {
    pub fn try_acquire(&self, user_id: UserId) -> Option<ImportLockGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(user_id) {
            return None;
        }
        Some(ImportLockGuard {
            held: self.held.clone(),
            user_id,
        })
    }

    pub fn is_locked(&self, user_id: UserId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user_id)
    }
}

pub struct ImportLockGuard {
    held: Arc<Mutex<HashSet<UserId>>>,
    user_id: UserId,
}

impl Drop for ImportLockGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
    }
}

enum ItemResult {
    Reported(ImportOutcome),
    Skipped,
}

pub struct ImportOrchestrator {
    catalog: Arc<dyn CatalogLookup>,
    store: Arc<dyn ScoreStore>,
    queue: Arc<InsertQueue>,
    hydrator: ScoreHydrator,
    locks: ImportLocks,
}

impl ImportOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogLookup>,
        store: Arc<dyn ScoreStore>,
        queue: Arc<InsertQueue>,
        engine: Arc<CalculatedDataEngine>,
    ) -> Self {
        let hydrator = ScoreHydrator::new(store.clone(), queue.clone(), engine);
        Self {
            catalog,
            store,
            queue,
            hydrator,
            locks: ImportLocks::default(),
        }
    }

    pub fn queue(&self) -> Arc<InsertQueue> {
        self.queue.clone()
    }

    pub fn locks(&self) -> &ImportLocks {
        &self.locks
    }

    /// Run a job to producer exhaustion. Only a lock conflict or a failure to
    /// read the user's blacklist is returned as an error; anything fatal after
    /// consumption started ends up in `JobReport::fatal`.
    #[instrument(skip(self, job), fields(user_id = job.user_id, import_type = %job.context.import_type))]
    pub async fn run(&self, job: ImportJob) -> Result<JobReport, ImportFatalError> {
        let ImportJob {
            user_id,
            context,
            mut producer,
            converter,
        } = job;

        let _guard = self
            .locks
            .try_acquire(user_id)
            .ok_or(ImportFatalError::ImportInProgress(user_id))?;

        let started = Instant::now();
        let mut report = JobReport {
            import_id: Uuid::new_v4().to_string(),
            user_id,
            import_type: context.import_type,
            outcomes: Vec::new(),
            skipped: 0,
            fatal: None,
            chart_ids: BTreeSet::new(),
            score_ids: Vec::new(),
            time_started: Utc::now().timestamp_millis(),
            time_finished: 0,
        };
        info!("📥 Starting {} import {} for user {}", context.import_type, report.import_id, user_id);

        let blacklist = self.store.blacklisted_score_ids(user_id).await?;

        let mut in_flight = FuturesUnordered::new();
        let mut producer_done = false;
        let mut fatal: Option<ImportFatalError> = None;

        loop {
            tokio::select! {
                next = producer.next(), if !producer_done => match next {
                    Some(Ok(data)) => {
                        in_flight.push(self.process_item(user_id, &context, converter.as_ref(), data, &blacklist));
                    }
                    Some(Err(e)) => {
                        error!("❌ Import {} stopped: {}", report.import_id, e);
                        fatal = Some(e);
                        producer_done = true;
                    }
                    None => producer_done = true,
                },
                Some(results) = in_flight.next(), if !in_flight.is_empty() => {
                    for result in results {
                        self.record(&mut report, result);
                    }
                },
                else => break,
            }
        }

        if let Err(e) = self.queue.flush().await {
            error!("❌ Final flush for import {} failed: {}", report.import_id, e);
            fatal.get_or_insert(ImportFatalError::Store(e.source));
        }

        // Any flush this job's scores went through, including ones triggered
        // by other jobs sharing the queue.
        let settled = self.queue.take_settlements(&report.score_ids).await;
        if !settled.is_empty() {
            settle_outcomes(&mut report, &settled);
        }
        for outcome in &report.outcomes {
            ImportMetrics::record_outcome(context.import_type.as_str(), outcome.kind.as_str());
        }

        report.fatal = fatal.map(|e| e.to_string());
        report.time_finished = Utc::now().timestamp_millis();
        ImportMetrics::record_job(
            context.import_type.as_str(),
            report.fatal.is_some(),
            started.elapsed().as_secs_f64(),
        );

        info!(
            "✅ Import {} finished: {} imported, {} duplicate, {} not found, {} invalid, {} errors, {} skipped",
            report.import_id,
            report.count(OutcomeKind::Imported),
            report.count(OutcomeKind::Duplicate),
            report.count(OutcomeKind::DataNotFound),
            report.count(OutcomeKind::Invalid),
            report.count(OutcomeKind::InternalError),
            report.skipped
        );
        Ok(report)
    }

    fn record(&self, report: &mut JobReport, result: ItemResult) {
        let outcome = match result {
            ItemResult::Skipped => {
                report.skipped += 1;
                return;
            }
            ItemResult::Reported(outcome) => outcome,
        };

        if let Some(score) = &outcome.content.score {
            report.chart_ids.insert(score.chart_id.clone());
            report.score_ids.push(score.score_id.clone());
        }
        report.outcomes.push(outcome);
    }

    async fn process_item(
        &self,
        user_id: UserId,
        context: &ImportContext,
        converter: &dyn ScoreConverter,
        data: Value,
        blacklist: &HashSet<String>,
    ) -> Vec<ItemResult> {
        let converted = AssertUnwindSafe(converter.convert(&data, context, self.catalog.as_ref()))
            .catch_unwind()
            .await;

        let results = match converted {
            Ok(results) => results,
            Err(_) => {
                error!("converter for {} panicked", context.import_type);
                return vec![ItemResult::Reported(ImportOutcome::internal(INTERNAL_FAILURE_MESSAGE))];
            }
        };

        let mut out = Vec::with_capacity(results.len());
        for result in results {
            out.push(self.process_result(user_id, context, &data, result, blacklist).await);
        }
        out
    }

    async fn process_result(
        &self,
        user_id: UserId,
        context: &ImportContext,
        data: &Value,
        result: ConversionResult,
        blacklist: &HashSet<String>,
    ) -> ItemResult {
        let success = match result {
            Ok(success) => success,
            Err(failure) => return self.process_failure(user_id, context, data, failure).await,
        };

        match self.hydrator.hydrate_and_queue(user_id, success, blacklist).await {
            Ok(HydrateOutcome::Queued(record)) => {
                let mut outcome = ImportOutcome::new(
                    true,
                    OutcomeKind::Imported,
                    format!("Imported score {}.", record.score_id),
                );
                outcome.content.score = Some(record);
                ItemResult::Reported(outcome)
            }
            Ok(HydrateOutcome::Duplicate { score_id }) => {
                debug!(%score_id, "duplicate score");
                ItemResult::Reported(ImportOutcome::new(
                    true,
                    OutcomeKind::Duplicate,
                    format!("Score {} already exists.", score_id),
                ))
            }
            Ok(HydrateOutcome::Blacklisted { .. }) => ItemResult::Skipped,
            Err(e) => {
                error!("hydrating a {} score failed: {}", context.import_type, e);
                ItemResult::Reported(ImportOutcome::internal(INTERNAL_SERVICE_MESSAGE))
            }
        }
    }

    async fn process_failure(
        &self,
        user_id: UserId,
        context: &ImportContext,
        data: &Value,
        failure: ConverterFailure,
    ) -> ItemResult {
        match failure {
            ConverterFailure::DataNotFound {
                message,
                data: orphan_data,
                context: orphan_context,
            } => {
                warn!("{} [{}]", message, context.import_type);
                let orphan_id = self
                    .store_orphan(user_id, context, orphan_data, orphan_context.clone(), &message)
                    .await;
                let mut outcome = ImportOutcome::new(false, OutcomeKind::DataNotFound, message);
                outcome.content.context = Some(orphan_context);
                outcome.content.orphan_id = orphan_id;
                ItemResult::Reported(outcome)
            }
            ConverterFailure::InvalidDatapoint { message, field } => {
                info!("Invalid datapoint: {}", message);
                let mut outcome = ImportOutcome::new(false, OutcomeKind::Invalid, message);
                outcome.content.field = field;
                ItemResult::Reported(outcome)
            }
            ConverterFailure::AlreadyExists => {
                debug!("converter reported an existing score");
                ItemResult::Reported(ImportOutcome::new(true, OutcomeKind::Duplicate, "Score already exists."))
            }
            ConverterFailure::SkipIntentionally(reason) => {
                debug!(%reason, datum = %data, "skipped datum");
                ItemResult::Skipped
            }
            ConverterFailure::Internal(detail) => {
                error!("converter failure in {}: {}", context.import_type, detail);
                ItemResult::Reported(ImportOutcome::internal(INTERNAL_FAILURE_MESSAGE))
            }
        }
    }

    /// Keep unresolvable data so it can be re-imported once the catalog knows
    /// about it. Returns the orphan id when storing succeeded.
    async fn store_orphan(
        &self,
        user_id: UserId,
        context: &ImportContext,
        data: Value,
        orphan_context: Value,
        message: &str,
    ) -> Option<String> {
        let orphan_id = orphan_id(user_id, context.import_type, &data, &orphan_context);
        let orphan = OrphanRecord {
            orphan_id: orphan_id.clone(),
            import_type: context.import_type,
            user_id,
            game: context.game,
            data,
            context: orphan_context,
            message: message.to_string(),
            time_inserted: Utc::now().timestamp_millis(),
        };

        match self.store.insert_orphan(&orphan).await {
            Ok(true) => {
                ImportMetrics::record_orphan();
                Some(orphan_id)
            }
            Ok(false) => {
                debug!(%orphan_id, "orphan already stored");
                Some(orphan_id)
            }
            Err(e) => {
                error!("failed to store orphan {}: {}", orphan_id, e);
                None
            }
        }
    }
}

/// Content hash of an unresolvable datum, so resubmitting it stores one orphan.
pub fn orphan_id(user_id: UserId, import_type: ImportType, data: &Value, context: &Value) -> String {
    let payload = json!({
        "importType": import_type,
        "userID": user_id,
        "data": data,
        "context": context,
    });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    format!("{}{}", ORPHAN_ID_PREFIX, hex::encode(hasher.finalize()))
}

/// Relabel imported scores that never landed: another writer inserted them
/// first, or their batch failed to write.
fn settle_outcomes(report: &mut JobReport, settled: &HashMap<String, Settlement>) {
    for outcome in &mut report.outcomes {
        let settlement = match (outcome.kind, &outcome.content.score) {
            (OutcomeKind::Imported, Some(score)) => settled.get(&score.score_id).copied(),
            _ => None,
        };
        match settlement {
            Some(Settlement::Conflicted) => {
                outcome.kind = OutcomeKind::Duplicate;
                outcome.content.score = None;
                outcome.message = Some("Score already exists.".to_string());
            }
            Some(Settlement::Failed) => {
                *outcome = ImportOutcome::internal(INTERNAL_SERVICE_MESSAGE);
            }
            None => {}
        }
    }
    report.score_ids.retain(|id| !settled.contains_key(id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Game;

    #[test]
    fn locks_are_per_user_and_released_on_drop() {
        let locks = ImportLocks::default();
        let guard = locks.try_acquire(1).unwrap();
        assert!(locks.try_acquire(1).is_none());
        assert!(locks.try_acquire(2).is_some());
        assert!(locks.is_locked(1));
        drop(guard);
        assert!(!locks.is_locked(1));
        assert!(locks.try_acquire(1).is_some());
    }

    #[test]
    fn orphan_ids_are_content_hashes() {
        let data = json!({"identifier": "x"});
        let ctx = json!({"game": Game::Iidx});
        let a = orphan_id(1, ImportType::FileBatchManual, &data, &ctx);
        assert!(a.starts_with('O'));
        assert_eq!(a.len(), 65);
        assert_eq!(a, orphan_id(1, ImportType::FileBatchManual, &data, &ctx));
        assert_ne!(a, orphan_id(2, ImportType::FileBatchManual, &data, &ctx));
        assert_ne!(a, orphan_id(1, ImportType::IrDirectManual, &data, &ctx));
    }

    #[test]
    fn outcomes_serialize_in_report_shape() {
        let mut outcome = ImportOutcome::new(false, OutcomeKind::Invalid, "Invalid percent of 120.");
        outcome.content.field = Some("score".into());
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["kind"], "Invalid");
        assert_eq!(v["content"]["field"], "score");
        assert!(v["content"].get("score").is_none());
    }
}
