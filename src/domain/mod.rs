//! Canonical score, chart and personal-best shapes shared by every stage of the
//! import pipeline.

pub mod game_config;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use game_config::{get_gpt_config, GamePtConfig};

pub type UserId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Iidx,
    Bms,
    Sdvx,
    Ddr,
    Chunithm,
    Gitadora,
    Museca,
}

impl Game {
    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Iidx => "iidx",
            Game::Bms => "bms",
            Game::Sdvx => "sdvx",
            Game::Ddr => "ddr",
            Game::Chunithm => "chunithm",
            Game::Gitadora => "gitadora",
            Game::Museca => "museca",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_lowercase())).ok()
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mode a chart is played in. Not every game supports every playtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Playtype {
    SP,
    DP,
    Single,
    Gita,
    Dora,
    #[serde(rename = "7K")]
    K7,
    #[serde(rename = "14K")]
    K14,
}

impl Playtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Playtype::SP => "SP",
            Playtype::DP => "DP",
            Playtype::Single => "Single",
            Playtype::Gita => "Gita",
            Playtype::Dora => "Dora",
            Playtype::K7 => "7K",
            Playtype::K14 => "14K",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }
}

impl fmt::Display for Playtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every source format the pipeline knows how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportType {
    #[serde(rename = "file/batch-manual")]
    FileBatchManual,
    #[serde(rename = "file/eamusement-iidx-csv")]
    FileEamusementIidxCsv,
    #[serde(rename = "ir/direct-manual")]
    IrDirectManual,
    #[serde(rename = "ir/fervidex")]
    IrFervidex,
    #[serde(rename = "api/flo-iidx")]
    ApiFloIidx,
    #[serde(rename = "api/eag-iidx")]
    ApiEagIidx,
}

impl ImportType {
    pub const ALL: [ImportType; 6] = [
        ImportType::FileBatchManual,
        ImportType::FileEamusementIidxCsv,
        ImportType::IrDirectManual,
        ImportType::IrFervidex,
        ImportType::ApiFloIidx,
        ImportType::ApiEagIidx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::FileBatchManual => "file/batch-manual",
            ImportType::FileEamusementIidxCsv => "file/eamusement-iidx-csv",
            ImportType::IrDirectManual => "ir/direct-manual",
            ImportType::IrFervidex => "ir/fervidex",
            ImportType::ApiFloIidx => "api/flo-iidx",
            ImportType::ApiEagIidx => "api/eag-iidx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Config key of the Kai-like service backing an `api/*` import type.
    pub fn kai_service(&self) -> Option<&'static str> {
        match self {
            ImportType::ApiFloIidx => Some("flo"),
            ImportType::ApiEagIidx => Some("eag"),
            _ => None,
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierlistKind {
    Lamp,
    Score,
}

/// Curated difficulty value for a chart. `key` names the lamp a lamp-tier applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierlistEntry {
    pub kind: TierlistKind,
    #[serde(default)]
    pub key: Option<String>,
    pub value: f64,
}

/// Reference data some charts carry for world-record relative metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    #[serde(default)]
    pub notecount: Option<u32>,
    #[serde(default)]
    pub kaiden_average: Option<f64>,
    #[serde(default)]
    pub world_record: Option<f64>,
    #[serde(default)]
    pub bpi_coefficient: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    #[serde(rename = "chartID")]
    pub chart_id: String,
    #[serde(rename = "songID")]
    pub song_id: u32,
    pub game: Game,
    pub playtype: Playtype,
    pub difficulty: String,
    pub level: String,
    pub level_num: f64,
    #[serde(default = "default_true")]
    pub is_primary: bool,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default, rename = "inGameID")]
    pub in_game_id: Option<i64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub data: ChartData,
    #[serde(default)]
    pub tierlist: Vec<TierlistEntry>,
}

fn default_true() -> bool {
    true
}

impl Chart {
    pub fn score_tier(&self) -> Option<f64> {
        self.tierlist
            .iter()
            .find(|t| t.kind == TierlistKind::Score)
            .map(|t| t.value)
    }

    pub fn lamp_tiers(&self) -> impl Iterator<Item = (&str, f64)> {
        self.tierlist
            .iter()
            .filter(|t| t.kind == TierlistKind::Lamp)
            .filter_map(|t| t.key.as_deref().map(|k| (k, t.value)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: u32,
    pub game: Game,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub alt_titles: Vec<String>,
}

/// Optional per-play counters. Which ones are present depends on game and source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_combo: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bp: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combo_break: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gauge: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gauge_history: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ex_score: Option<u32>,
}

/// Scoring fields a converter produces, before any derived index is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryScoreData {
    pub score: f64,
    pub percent: f64,
    pub grade: String,
    pub lamp: String,
    #[serde(default)]
    pub judgements: BTreeMap<String, u32>,
    #[serde(default)]
    pub hit_meta: HitMeta,
}

/// A source-agnostic score, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryScore {
    pub game: Game,
    pub service: String,
    pub import_type: ImportType,
    pub comment: Option<String>,
    /// Unix milliseconds.
    pub time_achieved: Option<i64>,
    pub score_data: DryScoreData,
    #[serde(default)]
    pub score_meta: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreData {
    pub score: f64,
    pub percent: f64,
    pub grade: String,
    pub grade_index: usize,
    pub lamp: String,
    pub lamp_index: usize,
    pub judgements: BTreeMap<String, u32>,
    pub hit_meta: HitMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedData {
    pub rating: f64,
    pub lamp_rating: f64,
    pub game_specific: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    #[serde(rename = "scoreID")]
    pub score_id: String,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "chartID")]
    pub chart_id: String,
    #[serde(rename = "songID")]
    pub song_id: u32,
    pub game: Game,
    pub playtype: Playtype,
    pub is_primary: bool,
    pub service: String,
    pub import_type: ImportType,
    pub comment: Option<String>,
    pub highlight: bool,
    pub time_achieved: Option<i64>,
    pub time_added: i64,
    pub score_data: ScoreData,
    pub score_meta: BTreeMap<String, Value>,
    pub calculated_data: CalculatedData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxBest {
    pub name: String,
    #[serde(rename = "scoreID")]
    pub score_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedFrom {
    #[serde(rename = "scorePB")]
    pub score_pb: String,
    #[serde(rename = "lampPB")]
    pub lamp_pb: String,
    #[serde(default)]
    pub other: Vec<AuxBest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbRecord {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "chartID")]
    pub chart_id: String,
    #[serde(rename = "songID")]
    pub song_id: u32,
    pub game: Game,
    pub playtype: Playtype,
    pub is_primary: bool,
    pub highlight: bool,
    pub time_achieved: Option<i64>,
    pub comments: Vec<String>,
    pub composed_from: ComposedFrom,
    pub score_data: ScoreData,
    pub calculated_data: CalculatedData,
}

/// Per-job context handed to converters alongside each raw datum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportContext {
    pub game: Game,
    pub playtype: Option<Playtype>,
    pub service: String,
    pub version: Option<String>,
    pub import_type: ImportType,
    /// When a pushed score reached us, for sources that do not timestamp plays.
    #[serde(default)]
    pub time_received: Option<i64>,
}
