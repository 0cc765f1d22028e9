//! Converter for rows of the official e-amusement IIDX score CSV. One row holds
//! every difficulty of a song, so a row yields zero to five scores.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ConversionResult, ConversionSuccess, ConverterFailure, ScoreConverter};
use crate::app::ports::{CatalogLookup, ChartQuery, SongQuery};
use crate::domain::{
    get_gpt_config, DryScore, DryScoreData, Game, HitMeta, ImportContext, Song,
};
use crate::pipeline::processing::score_utils::{generic_grade_and_percent, parse_local_timestamp};

const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";
const JST_OFFSET_HOURS: i32 = 9;
const MAX_BP: u32 = 9999;

/// One difficulty column group of a CSV row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EamusementDifficultyCells {
    pub difficulty: String,
    pub level: String,
    pub exscore: String,
    pub pgreat: String,
    pub great: String,
    pub bp: String,
    pub lamp: String,
}

/// A parsed CSV row, as produced by the CSV file parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EamusementRow {
    pub title: String,
    pub timestamp: String,
    pub has_beginner_and_legg: bool,
    pub scores: Vec<EamusementDifficultyCells>,
}

fn resolve_lamp(lamp: &str) -> Option<&'static str> {
    match lamp {
        "NO PLAY" => Some("NO PLAY"),
        "FAILED" => Some("FAILED"),
        "ASSIST CLEAR" => Some("ASSIST CLEAR"),
        "EASY CLEAR" => Some("EASY CLEAR"),
        "CLEAR" => Some("CLEAR"),
        "HARD CLEAR" => Some("HARD CLEAR"),
        "EX HARD CLEAR" => Some("EX HARD CLEAR"),
        "FULLCOMBO CLEAR" => Some("FULL COMBO"),
        _ => None,
    }
}

fn parse_count(raw: &str, what: &str, chart: &str) -> Result<u32, ConverterFailure> {
    raw.trim().parse::<u32>().map_err(|_| {
        ConverterFailure::invalid_field(format!("{} - Invalid {} of {}", chart, what, raw), what)
    })
}

/// Strip the pre-HEROIC VERSE "†" LEGGENDARIA title suffix.
fn strip_legacy_leggendaria(title: &str) -> Option<&str> {
    title
        .strip_suffix("†LEGGENDARIA")
        .or_else(|| title.strip_suffix('†'))
        .map(|t| t.trim_end())
}

pub struct EamusementIidxCsvConverter;

impl Default for EamusementIidxCsvConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl EamusementIidxCsvConverter {
    pub fn new() -> Self {
        Self
    }

    async fn convert_cells(
        &self,
        row: &EamusementRow,
        cells: &EamusementDifficultyCells,
        song: &Song,
        legacy_leggendaria: bool,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> ConversionResult {
        let playtype = ctx
            .playtype
            .ok_or_else(|| ConverterFailure::Internal("CSV context without playtype".into()))?;
        let difficulty = if legacy_leggendaria {
            "LEGGENDARIA"
        } else {
            cells.difficulty.as_str()
        };
        let version = ctx.version.as_deref().unwrap_or("unknown");
        let chart_name = format!("{} ({} {} [v{}])", song.title, playtype, difficulty, version);

        if cells.level.is_empty() || cells.level == "0" {
            return Err(ConverterFailure::skip("Chart has a level of 0."));
        }
        if cells.exscore.trim() == "0" {
            return Err(ConverterFailure::skip("Score has an exscore of 0."));
        }
        if difficulty == "BEGINNER" {
            return Err(ConverterFailure::skip("BEGINNER charts are not tracked."));
        }

        let chart = catalog
            .find_chart(
                Game::Iidx,
                playtype,
                ChartQuery::SongDifficulty {
                    song_id: song.id,
                    difficulty,
                    version: ctx.version.as_deref(),
                },
            )
            .await?
            .ok_or_else(|| {
                ConverterFailure::not_found(format!("Could not find chart for {}", chart_name), data, ctx)
            })?;

        let exscore = parse_count(&cells.exscore, "exscore", &chart_name)?;
        let pgreat = parse_count(&cells.pgreat, "pgreat", &chart_name)?;
        let great = parse_count(&cells.great, "great", &chart_name)?;
        if pgreat * 2 + great != exscore {
            return Err(ConverterFailure::invalid(format!(
                "{} - PGreats * 2 + Greats did not equal EXScore ({} * 2 + {} != {}).",
                chart_name, pgreat, great, exscore
            )));
        }

        let lamp = resolve_lamp(&cells.lamp).ok_or_else(|| {
            ConverterFailure::invalid_field(
                format!("{} - Invalid Lamp of {}.", chart_name, cells.lamp),
                "lamp",
            )
        })?;

        // Unplayed difficulties show up as "---".
        let bp = match cells.bp.trim().parse::<u32>() {
            Ok(bp) if bp <= MAX_BP => Some(bp),
            Ok(bp) => {
                return Err(ConverterFailure::invalid_field(
                    format!("{} - Invalid BP of {}.", chart_name, bp),
                    "bp",
                ))
            }
            Err(_) => None,
        };

        let gpt = get_gpt_config(Game::Iidx, playtype)
            .ok_or_else(|| ConverterFailure::Internal(format!("no config for iidx {}", playtype)))?;
        let (percent, grade) = generic_grade_and_percent(gpt, f64::from(exscore), &chart)?;

        let mut judgements = BTreeMap::new();
        judgements.insert("pgreat".to_string(), pgreat);
        judgements.insert("great".to_string(), great);

        let dry_score = DryScore {
            game: Game::Iidx,
            service: ctx.service.clone(),
            import_type: ctx.import_type,
            comment: None,
            time_achieved: parse_local_timestamp(&row.timestamp, CSV_TIMESTAMP_FORMAT, JST_OFFSET_HOURS),
            score_data: DryScoreData {
                score: f64::from(exscore),
                percent,
                grade,
                lamp: lamp.to_string(),
                judgements,
                hit_meta: HitMeta {
                    bp,
                    ..Default::default()
                },
            },
            score_meta: BTreeMap::new(),
        };

        Ok(ConversionSuccess {
            dry_score,
            chart,
            song: song.clone(),
        })
    }
}

#[async_trait]
impl ScoreConverter for EamusementIidxCsvConverter {
    async fn convert(
        &self,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> Vec<ConversionResult> {
        let row: EamusementRow = match serde_json::from_value(data.clone()) {
            Ok(row) => row,
            Err(e) => {
                return vec![Err(ConverterFailure::Internal(format!(
                    "CSV parser produced an unreadable row: {}",
                    e
                )))]
            }
        };

        let (title, legacy_leggendaria) = match strip_legacy_leggendaria(&row.title) {
            Some(stripped) if !row.has_beginner_and_legg => (stripped, true),
            _ => (row.title.as_str(), false),
        };

        let song = match catalog.find_song(Game::Iidx, SongQuery::Title(title)).await {
            Ok(Some(song)) => song,
            Ok(None) => {
                return vec![Err(ConverterFailure::not_found(
                    format!("Could not find song for {}.", title),
                    data,
                    ctx,
                ))]
            }
            Err(e) => return vec![Err(e.into())],
        };

        let mut results = Vec::with_capacity(row.scores.len());
        for cells in &row.scores {
            results.push(
                self.convert_cells(&row, cells, &song, legacy_leggendaria, data, ctx, catalog)
                    .await,
            );
        }
        results
    }
}
