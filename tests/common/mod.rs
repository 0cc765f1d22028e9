#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;

use score_ingest::app::ports::{CatalogLookup, ScoreStore};
use score_ingest::domain::{Chart, ChartData, Game, Playtype, Song};
use score_ingest::infra::{InMemoryCatalog, InMemoryStore};
use score_ingest::pipeline::orchestrator::ImportOrchestrator;
use score_ingest::pipeline::processing::calculated_data::CalculatedDataEngine;
use score_ingest::pipeline::processing::insert_queue::InsertQueue;
use score_ingest::pipeline::processing::pb::PbProcessor;

/// One IIDX song with an SP ANOTHER chart: 1000 notes, in-game id 1017, version 27.
pub fn catalog() -> Arc<InMemoryCatalog> {
    let songs = vec![Song {
        id: 1017,
        game: Game::Iidx,
        title: "RUGGED ASH".into(),
        artist: "SYUNN".into(),
        alt_titles: vec![],
    }];
    let charts = vec![Chart {
        chart_id: "ash-another".into(),
        song_id: 1017,
        game: Game::Iidx,
        playtype: Playtype::SP,
        difficulty: "ANOTHER".into(),
        level: "12".into(),
        level_num: 12.0,
        is_primary: true,
        versions: vec!["27".into()],
        in_game_id: Some(1017),
        hash: None,
        data: ChartData {
            notecount: Some(1000),
            ..Default::default()
        },
        tierlist: vec![],
    }];
    Arc::new(InMemoryCatalog::new(songs, charts))
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub catalog: Arc<dyn CatalogLookup>,
    pub engine: Arc<CalculatedDataEngine>,
    pub orchestrator: ImportOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(store: Arc<InMemoryStore>) -> Self {
        let catalog: Arc<dyn CatalogLookup> = catalog();
        let engine = Arc::new(CalculatedDataEngine::new(catalog.clone()));
        let score_store: Arc<dyn ScoreStore> = store.clone();
        let queue = Arc::new(InsertQueue::new(score_store.clone(), 2));
        let orchestrator = ImportOrchestrator::new(catalog.clone(), score_store, queue, engine.clone());
        Self {
            store,
            catalog,
            engine,
            orchestrator,
        }
    }

    pub fn pb_processor(&self) -> PbProcessor {
        PbProcessor::new(self.store.clone(), self.catalog.clone(), self.engine.clone())
    }
}

pub fn batch_score(score: u32, lamp: &str, title: &str) -> Value {
    json!({
        "score": score,
        "lamp": lamp,
        "matchType": "songTitle",
        "identifier": title,
        "difficulty": "ANOTHER",
        "timeAchieved": 1_600_000_000_000i64,
    })
}

pub fn batch_document(scores: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "meta": {"game": "iidx", "playtype": "SP", "service": "test"},
        "scores": scores,
    }))
    .expect("serializable document")
}
