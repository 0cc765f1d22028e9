//! Converter for the generic manual JSON format, used both by file uploads and
//! by direct submissions.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{
    song_for_chart, ConversionResult, ConversionSuccess, ConverterFailure, ScoreConverter,
};
use crate::app::ports::{CatalogLookup, ChartQuery, SongQuery};
use crate::domain::{
    get_gpt_config, Chart, DryScore, DryScoreData, HitMeta, ImportContext, Song,
};
use crate::pipeline::processing::score_utils::generic_grade_and_percent;

static CHART_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{32,64}$").unwrap());

/// Anything below this is almost certainly unix seconds rather than milliseconds.
const MIN_MILLISECOND_TIMESTAMP: i64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
    SongTitle,
    #[serde(rename = "songID")]
    SongId,
    #[serde(rename = "inGameID")]
    InGameId,
    ChartHash,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchManualScore {
    pub score: f64,
    pub lamp: String,
    pub match_type: MatchType,
    pub identifier: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub time_achieved: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub judgements: BTreeMap<String, u32>,
    #[serde(default)]
    pub hit_meta: HitMeta,
    #[serde(default)]
    pub score_meta: BTreeMap<String, Value>,
}

fn require_difficulty(score: &BatchManualScore) -> Result<&str, ConverterFailure> {
    score.difficulty.as_deref().ok_or_else(|| {
        ConverterFailure::invalid_field(
            format!("matchType {:?} requires a difficulty.", score.match_type),
            "difficulty",
        )
    })
}

pub struct BatchManualConverter;

impl Default for BatchManualConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchManualConverter {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(
        &self,
        score: &BatchManualScore,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> Result<(Chart, Song), ConverterFailure> {
        let playtype = ctx
            .playtype
            .ok_or_else(|| ConverterFailure::Internal("batch-manual context without playtype".into()))?;
        let version = ctx.version.as_deref();

        match score.match_type {
            MatchType::SongTitle | MatchType::SongId => {
                let difficulty = require_difficulty(score)?;
                let query = if score.match_type == MatchType::SongTitle {
                    SongQuery::Title(&score.identifier)
                } else {
                    let id: u32 = score.identifier.parse().map_err(|_| {
                        ConverterFailure::invalid_field(
                            format!("Invalid songID {}.", score.identifier),
                            "identifier",
                        )
                    })?;
                    SongQuery::Id(id)
                };

                let song = catalog.find_song(ctx.game, query).await?.ok_or_else(|| {
                    ConverterFailure::not_found(
                        format!("Cannot find song with identifier {}.", score.identifier),
                        data,
                        ctx,
                    )
                })?;

                let chart = catalog
                    .find_chart(
                        ctx.game,
                        playtype,
                        ChartQuery::SongDifficulty {
                            song_id: song.id,
                            difficulty,
                            version,
                        },
                    )
                    .await?
                    .ok_or_else(|| {
                        ConverterFailure::not_found(
                            format!(
                                "Cannot find chart for {} ({} {}).",
                                song.title, playtype, difficulty
                            ),
                            data,
                            ctx,
                        )
                    })?;

                Ok((chart, song))
            }
            MatchType::InGameId => {
                let difficulty = require_difficulty(score)?;
                let in_game_id: i64 = score.identifier.parse().map_err(|_| {
                    ConverterFailure::invalid_field(
                        format!("Invalid inGameID {}.", score.identifier),
                        "identifier",
                    )
                })?;

                let chart = catalog
                    .find_chart(
                        ctx.game,
                        playtype,
                        ChartQuery::InGameId {
                            in_game_id,
                            difficulty,
                            version,
                        },
                    )
                    .await?
                    .ok_or_else(|| {
                        ConverterFailure::not_found(
                            format!(
                                "Cannot find chart with inGameID {} ({} {}).",
                                in_game_id, playtype, difficulty
                            ),
                            data,
                            ctx,
                        )
                    })?;

                song_for_chart(catalog, ctx.game, chart).await
            }
            MatchType::ChartHash => {
                if !CHART_HASH.is_match(&score.identifier) {
                    return Err(ConverterFailure::invalid_field(
                        format!("Invalid chart hash {}.", score.identifier),
                        "identifier",
                    ));
                }

                let hash = score.identifier.to_lowercase();
                let chart = catalog
                    .find_chart(ctx.game, playtype, ChartQuery::Hash(&hash))
                    .await?
                    .ok_or_else(|| {
                        ConverterFailure::not_found(
                            format!("Cannot find chart with hash {}.", hash),
                            data,
                            ctx,
                        )
                    })?;

                song_for_chart(catalog, ctx.game, chart).await
            }
        }
    }

    async fn convert_one(
        &self,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> ConversionResult {
        let score: BatchManualScore = serde_json::from_value(data.clone())
            .map_err(|e| ConverterFailure::invalid(format!("Invalid score: {}.", e)))?;

        let playtype = ctx
            .playtype
            .ok_or_else(|| ConverterFailure::Internal("batch-manual context without playtype".into()))?;
        let gpt = get_gpt_config(ctx.game, playtype).ok_or_else(|| {
            ConverterFailure::Internal(format!("no config for {} {}", ctx.game, playtype))
        })?;

        if gpt.lamp_index(&score.lamp).is_none() {
            return Err(ConverterFailure::invalid_field(
                format!("Invalid lamp {} for {} {}.", score.lamp, ctx.game, playtype),
                "lamp",
            ));
        }

        if let Some(difficulty) = score.difficulty.as_deref() {
            if !gpt.supports_difficulty(difficulty) {
                return Err(ConverterFailure::invalid_field(
                    format!("Invalid difficulty {}.", difficulty),
                    "difficulty",
                ));
            }
        }

        if let Some(ts) = score.time_achieved {
            if ts < MIN_MILLISECOND_TIMESTAMP {
                return Err(ConverterFailure::invalid_field(
                    format!("timeAchieved {} looks like seconds, expected milliseconds.", ts),
                    "timeAchieved",
                ));
            }
        }

        let (chart, song) = self.resolve(&score, data, ctx, catalog).await?;
        let (percent, grade) = generic_grade_and_percent(gpt, score.score, &chart)?;

        let dry_score = DryScore {
            game: ctx.game,
            service: ctx.service.clone(),
            import_type: ctx.import_type,
            comment: score.comment,
            time_achieved: score.time_achieved,
            score_data: DryScoreData {
                score: score.score,
                percent,
                grade,
                lamp: score.lamp,
                judgements: score.judgements,
                hit_meta: score.hit_meta,
            },
            score_meta: score.score_meta,
        };

        Ok(ConversionSuccess {
            dry_score,
            chart,
            song,
        })
    }
}

#[async_trait]
impl ScoreConverter for BatchManualConverter {
    async fn convert(
        &self,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> Vec<ConversionResult> {
        vec![self.convert_one(data, ctx, catalog).await]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChartData, Game, ImportType, Playtype};
    use crate::infra::catalog::InMemoryCatalog;
    use serde_json::json;

    fn catalog() -> InMemoryCatalog {
        let song = Song {
            id: 1,
            game: Game::Iidx,
            title: "5.1.1.".into(),
            artist: "dj nagureo".into(),
            alt_titles: vec![],
        };
        let chart = Chart {
            chart_id: "c511a".into(),
            song_id: 1,
            game: Game::Iidx,
            playtype: Playtype::SP,
            difficulty: "ANOTHER".into(),
            level: "10".into(),
            level_num: 10.0,
            is_primary: true,
            versions: vec!["27".into()],
            in_game_id: Some(1000),
            hash: None,
            data: ChartData {
                notecount: Some(786),
                ..Default::default()
            },
            tierlist: vec![],
        };
        InMemoryCatalog::new(vec![song], vec![chart])
    }

    fn ctx() -> ImportContext {
        ImportContext {
            game: Game::Iidx,
            playtype: Some(Playtype::SP),
            service: "test (BATCH-MANUAL)".into(),
            version: None,
            import_type: ImportType::FileBatchManual,
            time_received: None,
        }
    }

    #[tokio::test]
    async fn converts_by_song_title() {
        let data = json!({
            "score": 1200,
            "lamp": "HARD CLEAR",
            "matchType": "songTitle",
            "identifier": "5.1.1.",
            "difficulty": "ANOTHER",
            "judgements": { "pgreat": 500, "great": 200 }
        });
        let mut results = BatchManualConverter::new()
            .convert(&data, &ctx(), &catalog())
            .await;
        let success = results.remove(0).unwrap();
        assert_eq!(success.chart.chart_id, "c511a");
        assert_eq!(success.dry_score.score_data.grade, "A");
        assert_eq!(success.dry_score.score_data.judgements["pgreat"], 500);
    }

    #[tokio::test]
    async fn unknown_song_is_data_not_found() {
        let data = json!({
            "score": 1200,
            "lamp": "CLEAR",
            "matchType": "songTitle",
            "identifier": "not a song",
            "difficulty": "ANOTHER"
        });
        let results = BatchManualConverter::new()
            .convert(&data, &ctx(), &catalog())
            .await;
        assert!(matches!(
            results[0],
            Err(ConverterFailure::DataNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn out_of_range_score_and_lamp_are_invalid() {
        let conv = BatchManualConverter::new();
        let too_high = json!({
            "score": 2000,
            "lamp": "CLEAR",
            "matchType": "inGameID",
            "identifier": "1000",
            "difficulty": "ANOTHER"
        });
        let bad_lamp = json!({
            "score": 100,
            "lamp": "PERFECT",
            "matchType": "inGameID",
            "identifier": "1000",
            "difficulty": "ANOTHER"
        });
        let seconds = json!({
            "score": 100,
            "lamp": "CLEAR",
            "matchType": "inGameID",
            "identifier": "1000",
            "difficulty": "ANOTHER",
            "timeAchieved": 1_600_000_000
        });

        for data in [too_high, bad_lamp, seconds] {
            let results = conv.convert(&data, &ctx(), &catalog()).await;
            assert!(matches!(
                results[0],
                Err(ConverterFailure::InvalidDatapoint { .. })
            ));
        }
    }

    #[tokio::test]
    async fn malformed_hash_is_rejected_before_lookup() {
        let data = json!({
            "score": 100,
            "lamp": "CLEAR",
            "matchType": "chartHash",
            "identifier": "zz"
        });
        let results = BatchManualConverter::new()
            .convert(&data, &ctx(), &catalog())
            .await;
        assert!(matches!(
            &results[0],
            Err(ConverterFailure::InvalidDatapoint { field: Some(f), .. }) if f == "identifier"
        ));
    }

    #[test]
    fn chart_hash_accepts_md5_and_sha256_hex() {
        assert!(CHART_HASH.is_match(&"a".repeat(32)));
        assert!(CHART_HASH.is_match(&"F0".repeat(32)));
        assert!(!CHART_HASH.is_match(&"a".repeat(31)));
        assert!(!CHART_HASH.is_match(&"g".repeat(32)));
    }
}
