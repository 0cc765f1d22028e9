//! Converter for scores pushed by the fervidex IIDX client hook.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{
    song_for_chart, ConversionResult, ConversionSuccess, ConverterFailure, ScoreConverter,
};
use crate::app::ports::{CatalogLookup, ChartQuery};
use crate::domain::{
    get_gpt_config, DryScore, DryScoreData, Game, HitMeta, ImportContext, Playtype,
};
use crate::pipeline::processing::score_utils::generic_grade_and_percent;

static CHART_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(sp|dp)([bnhal])$").unwrap());

const FERVIDEX_LAMPS: [&str; 8] = [
    "NO PLAY",
    "FAILED",
    "ASSIST CLEAR",
    "EASY CLEAR",
    "CLEAR",
    "HARD CLEAR",
    "EX HARD CLEAR",
    "FULL COMBO",
];

/// Values above this in a gauge history are sentinel noise from the client.
const GAUGE_SENTINEL: f64 = 200.0;

/// Scripted Long moved from ANOTHER 21201 to LEGGENDARIA 12250.
const SCRIPTED_LONG_OLD_ID: i64 = 21201;
const SCRIPTED_LONG_NEW_ID: i64 = 12250;

#[derive(Debug, Default, Deserialize)]
struct FervidexOptions {
    #[serde(default)]
    gauge: Option<String>,
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    style_2p: Option<String>,
    #[serde(default)]
    assist: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FervidexScore {
    chart: String,
    entry_id: i64,
    #[serde(default)]
    chart_sha256: Option<String>,
    #[serde(default)]
    custom: bool,
    ex_score: u32,
    pgreat: u32,
    great: u32,
    good: u32,
    bad: u32,
    poor: u32,
    #[serde(default)]
    fast: Option<u32>,
    #[serde(default)]
    slow: Option<u32>,
    #[serde(default)]
    combo_break: Option<u32>,
    #[serde(default)]
    gauge: Vec<f64>,
    clear_type: usize,
    #[serde(default)]
    dead: Option<Value>,
    #[serde(default)]
    option: FervidexOptions,
}

fn split_chart_code(code: &str) -> Result<(Playtype, &'static str), ConverterFailure> {
    let caps = CHART_CODE
        .captures(code)
        .ok_or_else(|| ConverterFailure::Internal(format!("Invalid fervidex difficulty of {}", code)))?;

    let playtype = if &caps[1] == "sp" {
        Playtype::SP
    } else {
        Playtype::DP
    };

    let difficulty = match &caps[2] {
        "n" => "NORMAL",
        "h" => "HYPER",
        "a" => "ANOTHER",
        "l" => "LEGGENDARIA",
        _ => return Err(ConverterFailure::skip("BEGINNER charts are not supported.")),
    };

    Ok((playtype, difficulty))
}

fn tachify_gauge(v: Option<&str>) -> &'static str {
    match v {
        Some("ASSISTED_EASY") => "ASSISTED EASY",
        Some("EASY") => "EASY",
        Some("HARD") => "HARD",
        Some("EX_HARD") => "EX-HARD",
        _ => "NORMAL",
    }
}

fn tachify_range(v: Option<&str>) -> &'static str {
    match v {
        Some("HIDDEN_PLUS") => "HIDDEN+",
        Some("LIFT") => "LIFT",
        Some("LIFT_SUD_PLUS") => "LIFT SUD+",
        Some("SUDDEN_PLUS") => "SUDDEN+",
        Some("SUD_PLUS_HID_PLUS") => "SUD+ HID+",
        _ => "NONE",
    }
}

fn tachify_random(v: Option<&str>) -> &'static str {
    match v {
        Some("RANDOM") => "RANDOM",
        Some("S_RANDOM") => "S-RANDOM",
        Some("R_RANDOM") => "R-RANDOM",
        Some("MIRROR") => "MIRROR",
        _ => "NONRAN",
    }
}

fn tachify_assist(v: Option<&str>) -> &'static str {
    match v {
        Some("FULL_ASSIST") | Some("ASCR_LEGACY") => "FULL ASSIST",
        Some("AUTO_SCRATCH") => "AUTO SCRATCH",
        Some("LEGACY_NOTE") => "LEGACY NOTE",
        _ => "NO ASSIST",
    }
}

pub struct FervidexConverter;

impl Default for FervidexConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl FervidexConverter {
    pub fn new() -> Self {
        Self
    }

    async fn convert_one(
        &self,
        data: &Value,
        ctx: &ImportContext,
        catalog: &dyn CatalogLookup,
    ) -> ConversionResult {
        let score: FervidexScore = serde_json::from_value(data.clone())
            .map_err(|e| ConverterFailure::invalid(format!("Invalid fervidex score: {}.", e)))?;

        let (playtype, mut difficulty) = split_chart_code(&score.chart)?;
        let mut entry_id = score.entry_id;
        if entry_id == SCRIPTED_LONG_OLD_ID && difficulty == "ANOTHER" {
            entry_id = SCRIPTED_LONG_NEW_ID;
            difficulty = "LEGGENDARIA";
        }

        let lamp = FERVIDEX_LAMPS.get(score.clear_type).ok_or_else(|| {
            ConverterFailure::invalid_field(
                format!("Invalid clear_type {}.", score.clear_type),
                "clear_type",
            )
        })?;

        let chart = if score.custom {
            let hash = score
                .chart_sha256
                .as_deref()
                .filter(|h| !h.trim().is_empty())
                .ok_or_else(|| {
                    ConverterFailure::invalid("Score has no chart_sha256 but is a custom?")
                })?;
            catalog
                .find_chart(Game::Iidx, playtype, ChartQuery::Hash(hash))
                .await?
        } else {
            catalog
                .find_chart(
                    Game::Iidx,
                    playtype,
                    ChartQuery::InGameId {
                        in_game_id: entry_id,
                        difficulty,
                        version: ctx.version.as_deref(),
                    },
                )
                .await?
        };

        let chart = chart.ok_or_else(|| {
            ConverterFailure::not_found(
                format!(
                    "Could not find chart with songID {} ({} {} [{}])",
                    entry_id,
                    playtype,
                    difficulty,
                    ctx.version.as_deref().unwrap_or("unknown")
                ),
                data,
                ctx,
            )
        })?;
        let (chart, song) = song_for_chart(catalog, Game::Iidx, chart).await?;

        let gauge_history: Vec<Option<f64>> = score
            .gauge
            .iter()
            .map(|g| if *g > GAUGE_SENTINEL { None } else { Some(*g) })
            .collect();
        let gauge = gauge_history.last().copied().flatten();
        if gauge.unwrap_or(0.0) > 100.0 {
            return Err(ConverterFailure::invalid_field(
                format!("Invalid value of gauge {:?}.", gauge),
                "gauge",
            ));
        }

        let bp = if score.dead.is_some() {
            None
        } else {
            Some(score.bad + score.poor)
        };

        let gpt = get_gpt_config(Game::Iidx, playtype)
            .ok_or_else(|| ConverterFailure::Internal(format!("no config for iidx {}", playtype)))?;
        let (percent, grade) = generic_grade_and_percent(gpt, f64::from(score.ex_score), &chart)?;

        let judgements: BTreeMap<String, u32> = [
            ("pgreat", score.pgreat),
            ("great", score.great),
            ("good", score.good),
            ("bad", score.bad),
            ("poor", score.poor),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let opts = &score.option;
        let random = if playtype == Playtype::SP {
            json!(tachify_random(opts.style.as_deref()))
        } else {
            json!([
                tachify_random(opts.style.as_deref()),
                tachify_random(opts.style_2p.as_deref())
            ])
        };

        let mut score_meta = BTreeMap::new();
        score_meta.insert("assist".to_string(), json!(tachify_assist(opts.assist.as_deref())));
        score_meta.insert("gauge".to_string(), json!(tachify_gauge(opts.gauge.as_deref())));
        score_meta.insert("random".to_string(), random);
        score_meta.insert("range".to_string(), json!(tachify_range(opts.range.as_deref())));

        let dry_score = DryScore {
            game: Game::Iidx,
            service: "Fervidex".to_string(),
            import_type: ctx.import_type,
            comment: None,
            time_achieved: ctx.time_received,
            score_data: DryScoreData {
                score: f64::from(score.ex_score),
                percent,
                grade,
                lamp: lamp.to_string(),
                judgements,
                hit_meta: HitMeta {
                    fast: score.fast,
                    slow: score.slow,
                    bp,
                    combo_break: score.combo_break,
                    gauge,
                    gauge_history: Some(gauge_history),
                    ..Default::default()
                },
            },
            score_meta,
        };

        Ok(ConversionSuccess {
            dry_score,
            chart,
            song,
        })
    }
}

#[async_trait]
impl ScoreConverter for FervidexConverter {
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
    use crate::domain::{Chart, ChartData, ImportType, Song};
    use crate::infra::catalog::InMemoryCatalog;

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
            playtype: None,
            service: "Fervidex".into(),
            version: Some("27".into()),
            import_type: ImportType::IrFervidex,
            time_received: Some(1_620_000_000_000),
        }
    }

    fn payload(chart: &str) -> Value {
        json!({
            "chart": chart,
            "entry_id": 1000,
            "ex_score": 1200,
            "pgreat": 500,
            "great": 200,
            "good": 50,
            "bad": 10,
            "poor": 26,
            "fast": 30,
            "slow": 40,
            "gauge": [22, 50, 255, 80],
            "clear_type": 4,
            "option": { "gauge": "EX_HARD", "style": "S_RANDOM" }
        })
    }

    #[tokio::test]
    async fn converts_push_payload() {
        let mut results = FervidexConverter::new()
            .convert(&payload("spa"), &ctx(), &catalog())
            .await;
        let success = results.remove(0).unwrap();
        let sd = &success.dry_score.score_data;
        assert_eq!(sd.lamp, "CLEAR");
        assert_eq!(sd.hit_meta.bp, Some(36));
        assert_eq!(sd.hit_meta.gauge, Some(80.0));
        assert_eq!(
            sd.hit_meta.gauge_history.as_ref().unwrap()[2],
            None,
            "sentinel gauge values are nulled"
        );
        assert_eq!(success.dry_score.score_meta["gauge"], json!("EX-HARD"));
        assert_eq!(success.dry_score.score_meta["random"], json!("S-RANDOM"));
        assert_eq!(success.dry_score.time_achieved, Some(1_620_000_000_000));
    }

    #[tokio::test]
    async fn beginner_is_skipped() {
        let results = FervidexConverter::new()
            .convert(&payload("spb"), &ctx(), &catalog())
            .await;
        assert!(matches!(results[0], Err(ConverterFailure::SkipIntentionally(_))));
    }

    #[tokio::test]
    async fn final_gauge_over_100_is_invalid() {
        let mut data = payload("spa");
        data["gauge"] = json!([50, 150]);
        let results = FervidexConverter::new().convert(&data, &ctx(), &catalog()).await;
        assert!(matches!(results[0], Err(ConverterFailure::InvalidDatapoint { .. })));
    }

    #[tokio::test]
    async fn custom_chart_without_hash_is_invalid() {
        let mut data = payload("spa");
        data["custom"] = json!(true);
        let results = FervidexConverter::new().convert(&data, &ctx(), &catalog()).await;
        assert!(matches!(results[0], Err(ConverterFailure::InvalidDatapoint { .. })));
    }

    #[test]
    fn chart_codes_split_into_playtype_and_difficulty() {
        assert!(matches!(split_chart_code("spa"), Ok((Playtype::SP, "ANOTHER"))));
        assert!(matches!(split_chart_code("dpl"), Ok((Playtype::DP, "LEGGENDARIA"))));
        assert!(matches!(split_chart_code("spb"), Err(ConverterFailure::SkipIntentionally(_))));
        assert!(matches!(split_chart_code("xpa"), Err(ConverterFailure::Internal(_))));
    }
}
