use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::app::ports::{KaiAuth, OrphanRecord, ScoreStore, TokenStore};
use crate::common::error::StoreError;
use crate::domain::{Game, PbRecord, Playtype, ScoreRecord, UserId};

/// In-memory score store for development/testing
#[derive(Default)]
pub struct InMemoryStore {
    scores: Arc<Mutex<HashMap<String, ScoreRecord>>>,
    pbs: Arc<Mutex<HashMap<(UserId, String), PbRecord>>>,
    orphans: Arc<Mutex<HashMap<String, OrphanRecord>>>,
    blacklist: Arc<Mutex<HashMap<UserId, HashSet<String>>>>,
    tokens: Arc<Mutex<HashMap<(UserId, String), KaiAuth>>>,
    bulk_inserts: AtomicUsize,
    failing: AtomicBool,
    stale_reads: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score_count(&self) -> usize {
        self.scores.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// Number of `insert_scores` calls that reached the store.
    pub fn bulk_insert_calls(&self) -> usize {
        self.bulk_inserts.load(Ordering::SeqCst)
    }

    /// Make every write fail with a backend error.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `score_exists` answer false, like a replica that has not caught
    /// up with another writer yet.
    pub fn stale_reads(&self, stale: bool) {
        self.stale_reads.store(stale, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ScoreStore for InMemoryStore {
    async fn score_exists(&self, score_id: &str) -> Result<bool, StoreError> {
        if self.stale_reads.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(lock(&self.scores)?.contains_key(score_id))
    }

    async fn insert_scores(&self, records: &[ScoreRecord]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.bulk_inserts.fetch_add(1, Ordering::SeqCst);

        let mut scores = lock(&self.scores)?;
        let mut batch_ids = HashSet::new();
        for r in records {
            if scores.contains_key(&r.score_id) || !batch_ids.insert(r.score_id.as_str()) {
                return Err(StoreError::Conflict(format!("duplicate scoreID {}", r.score_id)));
            }
        }
        for r in records {
            scores.insert(r.score_id.clone(), r.clone());
        }
        debug!("Inserted {} scores", records.len());
        Ok(())
    }

    async fn insert_score(&self, record: &ScoreRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut scores = lock(&self.scores)?;
        if scores.contains_key(&record.score_id) {
            return Err(StoreError::Conflict(format!("duplicate scoreID {}", record.score_id)));
        }
        scores.insert(record.score_id.clone(), record.clone());
        Ok(())
    }

    async fn scores_on_chart(&self, user_id: UserId, chart_id: &str) -> Result<Vec<ScoreRecord>, StoreError> {
        let scores = lock(&self.scores)?;
        let mut found: Vec<ScoreRecord> = scores
            .values()
            .filter(|s| s.user_id == user_id && s.chart_id == chart_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.score_id.cmp(&b.score_id));
        Ok(found)
    }

    async fn upsert_pb(&self, pb: &PbRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.pbs)?.insert((pb.user_id, pb.chart_id.clone()), pb.clone());
        Ok(())
    }

    async fn delete_pb(&self, user_id: UserId, chart_id: &str) -> Result<(), StoreError> {
        lock(&self.pbs)?.remove(&(user_id, chart_id.to_string()));
        Ok(())
    }

    async fn get_pb(&self, user_id: UserId, chart_id: &str) -> Result<Option<PbRecord>, StoreError> {
        Ok(lock(&self.pbs)?.get(&(user_id, chart_id.to_string())).cloned())
    }

    async fn pbs_for_user(&self, user_id: UserId, game: Game, playtype: Playtype) -> Result<Vec<PbRecord>, StoreError> {
        Ok(lock(&self.pbs)?
            .values()
            .filter(|pb| pb.user_id == user_id && pb.game == game && pb.playtype == playtype)
            .cloned()
            .collect())
    }

    async fn blacklisted_score_ids(&self, user_id: UserId) -> Result<HashSet<String>, StoreError> {
        Ok(lock(&self.blacklist)?.get(&user_id).cloned().unwrap_or_default())
    }

    async fn blacklist_score(&self, user_id: UserId, score_id: &str) -> Result<(), StoreError> {
        lock(&self.blacklist)?
            .entry(user_id)
            .or_default()
            .insert(score_id.to_string());
        Ok(())
    }

    async fn insert_orphan(&self, orphan: &OrphanRecord) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut orphans = lock(&self.orphans)?;
        if orphans.contains_key(&orphan.orphan_id) {
            return Ok(false);
        }
        orphans.insert(orphan.orphan_id.clone(), orphan.clone());
        Ok(true)
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn load_kai_auth(&self, user_id: UserId, service: &str) -> Result<Option<KaiAuth>, StoreError> {
        Ok(lock(&self.tokens)?.get(&(user_id, service.to_string())).cloned())
    }

    async fn save_kai_auth(&self, user_id: UserId, service: &str, auth: &KaiAuth) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.tokens)?.insert((user_id, service.to_string()), auth.clone());
        Ok(())
    }
}
