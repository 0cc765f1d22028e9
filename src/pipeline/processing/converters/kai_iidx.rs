//! Converter for IIDX play-history items served by Kai-like APIs.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{
    song_for_chart, ConversionResult, ConversionSuccess, ConverterFailure, ScoreConverter,
};
use crate::app::ports::{CatalogLookup, ChartQuery};
use crate::domain::{
    get_gpt_config, DryScore, DryScoreData, Game, HitMeta, ImportContext, Playtype,
};
use crate::pipeline::processing::score_utils::{generic_grade_and_percent, parse_rfc3339_millis};

const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 20..=28;
const KNOWN_VERSIONS: std::ops::RangeInclusive<u32> = 9..=28;

const KAI_LAMPS: [&str; 8] = [
    "NO PLAY",
    "FAILED",
    "ASSIST CLEAR",
    "EASY CLEAR",
    "CLEAR",
    "HARD CLEAR",
    "EX HARD CLEAR",
    "FULL COMBO",
];

/// Pre-HEROIC VERSE LEGGENDARIA charts had their own music ids. Maps them onto
/// the base song.
const OLD_LEGGENDARIA_IDS: &[(i64, i64)] = &[
    (1100, 1017),
    (4100, 4005),
    (4101, 4001),
    (5100, 5014),
    (11100, 11032),
    (11101, 11012),
    (12100, 12002),
    (13100, 13010),
    (14100, 14009),
    (14101, 14046),
    (15101, 15023),
    (15102, 15007),
    (15104, 15004),
    (15105, 15045),
    (16101, 16050),
    (16102, 16045),
    (16103, 16031),
    (16104, 16015),
    (17101, 17060),
    (18100, 18025),
    (18103, 18011),
    (19100, 19063),
    (20103, 20100),
    (20104, 20039),
    (20105, 20068),
    (20106, 20024),
    (20107, 20019),
    (21100, 21012),
    (21101, 21059),
    (21102, 21069),
    (21103, 21073),
    (21104, 21052),
    (21105, 21048),
    (21106, 21050),
    (21107, 21029),
    (22101, 22008),
    (22102, 22013),
    (22103, 22024),
    (22104, 22027),
    (22105, 22031),
    (22106, 22089),
    (22107, 22006),
    (23100, 23054),
    (23101, 23031),
    (24100, 24041),
    (24101, 24011),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum PlayStyle {
    Single,
    Double,
}

#[derive(Debug, Deserialize)]
struct KaiIidxScore {
    music_id: i64,
    play_style: PlayStyle,
    difficulty: String,
    version_played: u32,
    lamp: usize,
    ex_score: u32,
    #[serde(default)]
    miss_count: Option<i64>,
    #[serde(default)]
    fast_count: Option<u32>,
    #[serde(default)]
    slow_count: Option<u32>,
    timestamp: String,
}

pub struct KaiIidxConverter;

impl Default for KaiIidxConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl KaiIidxConverter {
    pub fn new() -> Self {
        Self
    }

    async fn convert_one(
        &self,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> ConversionResult {
        let score: KaiIidxScore = serde_json::from_value(data.clone())
            .map_err(|e| ConverterFailure::invalid(format!("Invalid Kai IIDX score: {}.", e)))?;

        if score.music_id <= 0 {
            return Err(ConverterFailure::invalid_field("music_id must be positive.", "music_id"));
        }
        if !KNOWN_VERSIONS.contains(&score.version_played) {
            return Err(ConverterFailure::invalid_field(
                format!("Invalid version_played {}.", score.version_played),
                "version_played",
            ));
        }
        if !SUPPORTED_VERSIONS.contains(&score.version_played) {
            return Err(ConverterFailure::invalid(format!(
                "Unsupported version {}.",
                score.version_played
            )));
        }
        let lamp = KAI_LAMPS.get(score.lamp).ok_or_else(|| {
            ConverterFailure::invalid_field(format!("Invalid lamp {}.", score.lamp), "lamp")
        })?;
        let miss_count = match score.miss_count {
            None | Some(-1) => None,
            Some(n) if n >= 0 => Some(n as u32),
            Some(n) => {
                return Err(ConverterFailure::invalid_field(
                    format!("Invalid miss_count {}.", n),
                    "miss_count",
                ))
            }
        };

        let playtype = match score.play_style {
            PlayStyle::Single => Playtype::SP,
            PlayStyle::Double => Playtype::DP,
        };
        if ctx.playtype.is_some_and(|wanted| wanted != playtype) {
            return Err(ConverterFailure::skip(format!("Not importing {} scores.", playtype)));
        }

        let (music_id, difficulty) = match OLD_LEGGENDARIA_IDS
            .iter()
            .find(|(old, _)| *old == score.music_id)
        {
            Some((_, new)) => (*new, "LEGGENDARIA".to_string()),
            None => (score.music_id, score.difficulty.clone()),
        };

        if difficulty == "BEGINNER" {
            return Err(ConverterFailure::skip("BEGINNER charts are not tracked."));
        }

        let version = score.version_played.to_string();
        let chart = catalog
            .find_chart(
                Game::Iidx,
                playtype,
                ChartQuery::InGameId {
                    in_game_id: music_id,
                    difficulty: &difficulty,
                    version: Some(&version),
                },
            )
            .await?
            .ok_or_else(|| {
                ConverterFailure::not_found(
                    format!(
                        "Could not find chart with songID {} ({} {} - Version {})",
                        music_id, playtype, difficulty, score.version_played
                    ),
                    data,
                    ctx,
                )
            })?;

        let (chart, song) = song_for_chart(catalog, Game::Iidx, chart).await?;

        let gpt = get_gpt_config(Game::Iidx, playtype)
            .ok_or_else(|| ConverterFailure::Internal(format!("no config for iidx {}", playtype)))?;
        let (percent, grade) = generic_grade_and_percent(gpt, f64::from(score.ex_score), &chart)?;

        let time_achieved = parse_rfc3339_millis(&score.timestamp);
        if time_achieved.is_none() {
            return Err(ConverterFailure::invalid_field(
                format!("Invalid timestamp {}.", score.timestamp),
                "timestamp",
            ));
        }

        let dry_score = DryScore {
            game: Game::Iidx,
            service: ctx.service.clone(),
            import_type: ctx.import_type,
            comment: None,
            time_achieved,
            score_data: DryScoreData {
                score: f64::from(score.ex_score),
                percent,
                grade,
                lamp: lamp.to_string(),
                judgements: BTreeMap::new(),
                hit_meta: HitMeta {
                    fast: score.fast_count,
                    slow: score.slow_count,
                    bp: miss_count,
                    ..Default::default()
                },
            },
            score_meta: BTreeMap::new(),
        };

        Ok(ConversionSuccess {
            dry_score,
            chart,
            song,
        })
    }
}

#[async_trait]
impl ScoreConverter for KaiIidxConverter {
    async fn convert(
        &self,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> Vec<ConversionResult> {
        vec![self.convert_one(data, ctx, catalog).await]
    }
}
