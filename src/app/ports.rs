use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::common::error::StoreError;
use crate::domain::{
    Chart, Game, ImportType, PbRecord, Playtype, ScoreRecord, Song, UserId,
};

// Catalog-side ports

/// Natural keys a converter may resolve a chart by.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartQuery<'a> {
    InGameId {
        in_game_id: i64,
        difficulty: &'a str,
        version: Option<&'a str>,
    },
    SongDifficulty {
        song_id: u32,
        difficulty: &'a str,
        version: Option<&'a str>,
    },
    Hash(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SongQuery<'a> {
    Id(u32),
    Title(&'a str),
}

/// Read-only chart/song catalog.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn find_chart(
        &self,
        game: Game,
        playtype: Playtype,
        query: ChartQuery<'_>,
    ) -> Result<Option<Chart>, StoreError>;

    async fn find_song(&self, game: Game, query: SongQuery<'_>) -> Result<Option<Song>, StoreError>;

    async fn find_chart_by_id(&self, game: Game, chart_id: &str) -> Result<Option<Chart>, StoreError>;

    /// Scores of the reference population on a chart, if one is tracked.
    async fn reference_scores(&self, chart_id: &str) -> Result<Option<Vec<f64>>, StoreError>;
}

// Persistence ports

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanRecord {
    #[serde(rename = "orphanID")]
    pub orphan_id: String,
    pub import_type: ImportType,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub game: Game,
    pub data: Value,
    pub context: Value,
    pub message: String,
    pub time_inserted: i64,
}

#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn score_exists(&self, score_id: &str) -> Result<bool, StoreError>;

    /// Insert every record or none. A duplicate `score_id` yields `StoreError::Conflict`.
    async fn insert_scores(&self, records: &[ScoreRecord]) -> Result<(), StoreError>;

    async fn insert_score(&self, record: &ScoreRecord) -> Result<(), StoreError>;

    async fn scores_on_chart(&self, user_id: UserId, chart_id: &str) -> Result<Vec<ScoreRecord>, StoreError>;

    async fn upsert_pb(&self, pb: &PbRecord) -> Result<(), StoreError>;

    async fn delete_pb(&self, user_id: UserId, chart_id: &str) -> Result<(), StoreError>;

    async fn get_pb(&self, user_id: UserId, chart_id: &str) -> Result<Option<PbRecord>, StoreError>;

    async fn pbs_for_user(&self, user_id: UserId, game: Game, playtype: Playtype) -> Result<Vec<PbRecord>, StoreError>;

    async fn blacklisted_score_ids(&self, user_id: UserId) -> Result<HashSet<String>, StoreError>;

    async fn blacklist_score(&self, user_id: UserId, score_id: &str) -> Result<(), StoreError>;

    /// Returns false when an orphan with the same id was already stored.
    async fn insert_orphan(&self, orphan: &OrphanRecord) -> Result<bool, StoreError>;
}

/// Bearer credentials for a Kai-like service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KaiAuth {
    pub access_token: String,
    pub refresh_token: String,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load_kai_auth(&self, user_id: UserId, service: &str) -> Result<Option<KaiAuth>, StoreError>;

    async fn save_kai_auth(&self, user_id: UserId, service: &str, auth: &KaiAuth) -> Result<(), StoreError>;
}

// Ingest-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, String>;

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, String>;
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub bytes: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Notified once per score that actually reached the store.
#[async_trait]
pub trait ScoreImportedHook: Send + Sync {
    async fn on_score_imported(&self, record: &ScoreRecord);
}
