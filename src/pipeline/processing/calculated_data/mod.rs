//! Derived analytics attached to every score: skill rating, lamp rating and the
//! specialty metrics a game defines.

pub mod stats;

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::app::ports::CatalogLookup;
use crate::domain::game_config::{GameSpecificMetric, RatingParameters, RatingStrategy};
use crate::domain::{CalculatedData, Chart, DryScoreData, GamePtConfig, ScoreData};

/// Ratings above this come from broken chart levels, not from skill.
const MAX_REASONABLE_RATING: f64 = 1000.0;

/// The scoring fields a metric reads.
#[derive(Debug, Clone, Copy)]
pub struct MetricInput<'a> {
    pub score: f64,
    pub percent: f64,
    pub grade: &'a str,
    pub lamp: &'a str,
}

impl<'a> From<&'a DryScoreData> for MetricInput<'a> {
    fn from(d: &'a DryScoreData) -> Self {
        Self {
            score: d.score,
            percent: d.percent,
            grade: &d.grade,
            lamp: &d.lamp,
        }
    }
}

impl<'a> From<&'a ScoreData> for MetricInput<'a> {
    fn from(d: &'a ScoreData) -> Self {
        Self {
            score: d.score,
            percent: d.percent,
            grade: &d.grade,
            lamp: &d.lamp,
        }
    }
}

/// Universal piecewise rating curve.
pub fn curve_rating(params: RatingParameters, percent: f64, level: f64) -> f64 {
    let pct = percent / 100.0;

    let value = if pct < params.pivot_percent {
        let exp = params.fail_harshness * level;
        pct.powf(exp) * level / params.pivot_percent.powf(exp)
    } else {
        (params.clear_exp_multiplier * level * (pct - params.pivot_percent)).cosh() + (level - 1.0)
    };

    if !value.is_finite() || value > MAX_REASONABLE_RATING {
        0.0
    } else {
        value
    }
}

/// Skill rating of a score. A score tierlist value overrides the chart level.
pub fn rating(gpt: &GamePtConfig, input: MetricInput<'_>, chart: &Chart) -> f64 {
    let level = chart.score_tier().unwrap_or(chart.level_num);

    match gpt.rating {
        RatingStrategy::Curve(params) => curve_rating(params, input.percent, level),
        RatingStrategy::Chunithm => stats::chunithm_rating(input.score, level),
        RatingStrategy::Gitadora => stats::gitadora_skill(input.percent, level),
    }
}

/// Rating of the lamp alone. A clear is worth at least the chart level. Lamp
/// tier values are not ordered by lamp, so every reachable tier is considered.
pub fn lamp_rating(gpt: &GamePtConfig, lamp: &str, chart: &Chart) -> f64 {
    let lamp_index = match gpt.lamp_index(lamp) {
        Some(i) => i,
        None => return 0.0,
    };

    let floor = if lamp_index >= gpt.clear_lamp_index() {
        chart.level_num
    } else {
        0.0
    };

    chart
        .lamp_tiers()
        .filter_map(|(key, value)| gpt.lamp_index(key).map(|i| (i, value)))
        .filter(|(tier_index, _)| *tier_index <= lamp_index)
        .map(|(_, value)| value)
        .fold(floor, f64::max)
}

/// Computes `CalculatedData` for scores and composed PBs.
pub struct CalculatedDataEngine {
    catalog: Arc<dyn CatalogLookup>,
}

impl CalculatedDataEngine {
    pub fn new(catalog: Arc<dyn CatalogLookup>) -> Self {
        Self { catalog }
    }

    pub async fn calculate(
        &self,
        gpt: &GamePtConfig,
        input: MetricInput<'_>,
        chart: &Chart,
    ) -> CalculatedData {
        let mut game_specific = BTreeMap::new();
        for metric in gpt.game_specific {
            let value = self.game_specific_metric(*metric, gpt, input, chart).await;
            game_specific.insert(metric.key().to_string(), value);
        }

        CalculatedData {
            rating: rating(gpt, input, chart),
            lamp_rating: lamp_rating(gpt, input.lamp, chart),
            game_specific,
        }
    }

    /// One specialty metric. Missing reference data nulls this entry only.
    pub async fn game_specific_metric(
        &self,
        metric: GameSpecificMetric,
        _gpt: &GamePtConfig,
        input: MetricInput<'_>,
        chart: &Chart,
    ) -> Option<f64> {
        match metric {
            GameSpecificMetric::Bpi => {
                let data = &chart.data;
                let max = f64::from(data.notecount?) * 2.0;
                stats::bpi(
                    data.kaiden_average?,
                    data.world_record?,
                    input.score,
                    max,
                    data.bpi_coefficient,
                )
            }
            GameSpecificMetric::KaidenPercentile => {
                match self.catalog.reference_scores(&chart.chart_id).await {
                    Ok(Some(population)) => stats::percentile_below(input.score, &population),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(chart_id = %chart.chart_id, "reference population lookup failed: {}", e);
                        None
                    }
                }
            }
            GameSpecificMetric::Vf6 => {
                stats::vf6(chart.level_num, input.percent, input.grade, input.lamp)
            }
            GameSpecificMetric::Mfcp => stats::mfcp(input.lamp, &chart.difficulty, chart.level_num),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{get_gpt_config, ChartData, Game, Playtype, TierlistEntry, TierlistKind};
    use crate::infra::catalog::InMemoryCatalog;

    fn chart(game: Game, playtype: Playtype, level: f64, tierlist: Vec<TierlistEntry>) -> Chart {
        Chart {
            chart_id: "chart".into(),
            song_id: 1,
            game,
            playtype,
            difficulty: "ANOTHER".into(),
            level: level.to_string(),
            level_num: level,
            is_primary: true,
            versions: vec![],
            in_game_id: None,
            hash: None,
            data: ChartData {
                notecount: Some(1000),
                kaiden_average: Some(1600.0),
                world_record: Some(1900.0),
                bpi_coefficient: None,
            },
            tierlist,
        }
    }

    fn lamp_tier(lamp: &str, value: f64) -> TierlistEntry {
        TierlistEntry {
            kind: TierlistKind::Lamp,
            key: Some(lamp.into()),
            value,
        }
    }

    const PARAMS: [RatingParameters; 3] = [
        RatingParameters {
            fail_harshness: 0.3,
            pivot_percent: 0.7777,
            clear_exp_multiplier: 1.0,
        },
        RatingParameters {
            fail_harshness: 0.5,
            pivot_percent: 0.7777,
            clear_exp_multiplier: 0.75,
        },
        RatingParameters {
            fail_harshness: 0.9,
            pivot_percent: 0.9,
            clear_exp_multiplier: 1.0,
        },
    ];

    #[test]
    fn curve_is_monotonic_in_percent() {
        for params in PARAMS {
            for level in 1..=15 {
                let level = f64::from(level);
                let mut prev = curve_rating(params, 0.0, level);
                for step in 1..=1000 {
                    let pct = f64::from(step) / 10.0;
                    let cur = curve_rating(params, pct, level);
                    assert!(
                        cur + 1e-9 >= prev,
                        "rating fell from {} to {} at {}% level {}",
                        prev,
                        cur,
                        pct,
                        level
                    );
                    prev = cur;
                }
            }
        }
    }

    #[test]
    fn curve_is_continuous_at_pivot() {
        for params in PARAMS {
            for level in [1.0, 7.5, 12.0] {
                let pivot = params.pivot_percent * 100.0;
                let below = curve_rating(params, pivot - 1e-7, level);
                let at = curve_rating(params, pivot, level);
                assert!((below - at).abs() < 1e-4, "{} vs {}", below, at);
                assert!((at - level).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn unreasonable_ratings_clamp_to_zero() {
        let params = PARAMS[0];
        assert_eq!(curve_rating(params, 100.0, 5000.0), 0.0);
    }

    #[test]
    fn score_tier_overrides_level() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let tiered = chart(
            Game::Iidx,
            Playtype::SP,
            12.0,
            vec![TierlistEntry {
                kind: TierlistKind::Score,
                key: None,
                value: 12.6,
            }],
        );
        let input = MetricInput {
            score: 1555.4,
            percent: 77.77,
            grade: "AA",
            lamp: "CLEAR",
        };
        assert!((rating(gpt, input, &tiered) - 12.6).abs() < 1e-3);
    }

    #[test]
    fn lamp_rating_scans_non_monotone_tiers() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let c = chart(
            Game::Iidx,
            Playtype::SP,
            12.0,
            vec![
                lamp_tier("EASY CLEAR", 11.2),
                lamp_tier("HARD CLEAR", 12.7),
                lamp_tier("EX HARD CLEAR", 12.4),
            ],
        );
        assert_eq!(lamp_rating(gpt, "EX HARD CLEAR", &c), 12.7);
        assert_eq!(lamp_rating(gpt, "FULL COMBO", &c), 12.7);
        assert_eq!(lamp_rating(gpt, "CLEAR", &c), 12.0);
        assert_eq!(lamp_rating(gpt, "EASY CLEAR", &c), 11.2);
        assert_eq!(lamp_rating(gpt, "FAILED", &c), 0.0);
    }

    #[test]
    fn clear_below_every_tier_keeps_the_level() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let c = chart(Game::Iidx, Playtype::SP, 10.0, vec![lamp_tier("HARD CLEAR", 10.6)]);
        assert_eq!(lamp_rating(gpt, "CLEAR", &c), 10.0);
        assert_eq!(lamp_rating(gpt, "HARD CLEAR", &c), 10.6);
        assert_eq!(lamp_rating(gpt, "EASY CLEAR", &c), 0.0);
    }

    #[test]
    fn tier_below_the_level_does_not_lower_a_clear() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let c = chart(Game::Iidx, Playtype::SP, 10.0, vec![lamp_tier("HARD CLEAR", 9.4)]);
        assert_eq!(lamp_rating(gpt, "HARD CLEAR", &c), 10.0);
    }

    #[test]
    fn lamp_rating_falls_back_to_level_on_clear() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let c = chart(Game::Iidx, Playtype::SP, 11.0, vec![]);
        assert_eq!(lamp_rating(gpt, "CLEAR", &c), 11.0);
        assert_eq!(lamp_rating(gpt, "EASY CLEAR", &c), 0.0);
    }

    #[tokio::test]
    async fn missing_reference_data_nulls_only_that_metric() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let engine = CalculatedDataEngine::new(Arc::new(InMemoryCatalog::new(vec![], vec![])));
        let mut c = chart(Game::Iidx, Playtype::SP, 12.0, vec![]);
        c.data.world_record = None;

        let input = MetricInput {
            score: 1700.0,
            percent: 85.0,
            grade: "AAA",
            lamp: "CLEAR",
        };
        let calc = engine.calculate(gpt, input, &c).await;
        assert_eq!(calc.game_specific.get("BPI"), Some(&None));
        assert_eq!(calc.game_specific.get("K%"), Some(&None));
        assert!(calc.rating > 12.0);
        assert_eq!(calc.lamp_rating, 12.0);
    }

    #[tokio::test]
    async fn percentile_reads_reference_population() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let mut catalog = InMemoryCatalog::new(vec![], vec![]);
        catalog.set_reference_scores("chart", vec![1500.0, 1650.0, 1800.0, 1900.0]);
        let engine = CalculatedDataEngine::new(Arc::new(catalog));
        let c = chart(Game::Iidx, Playtype::SP, 12.0, vec![]);

        let input = MetricInput {
            score: 1700.0,
            percent: 85.0,
            grade: "AAA",
            lamp: "CLEAR",
        };
        let calc = engine.calculate(gpt, input, &c).await;
        assert_eq!(calc.game_specific["K%"], Some(50.0));
        assert!(calc.game_specific["BPI"].unwrap() > 0.0);
    }

    #[tokio::test]
    async fn chunithm_uses_its_own_rating() {
        let gpt = get_gpt_config(Game::Chunithm, Playtype::Single).unwrap();
        let engine = CalculatedDataEngine::new(Arc::new(InMemoryCatalog::new(vec![], vec![])));
        let c = chart(Game::Chunithm, Playtype::Single, 13.5, vec![]);
        let input = MetricInput {
            score: 1_007_500.0,
            percent: 100.75,
            grade: "SSS",
            lamp: "CLEAR",
        };
        let calc = engine.calculate(gpt, input, &c).await;
        assert_eq!(calc.rating, 15.5);
        assert!(calc.game_specific.is_empty());
    }
}
