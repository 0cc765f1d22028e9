//! Personal-best projection: one record per (user, chart) composed from the
//! best score and the best lamp.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::calculated_data::{CalculatedDataEngine, MetricInput};
use crate::app::ports::{CatalogLookup, ScoreStore};
use crate::common::error::{IngestError, Result};
use crate::domain::game_config::{AuxBestKind, MetricMerge};
use crate::domain::{
    get_gpt_config, AuxBest, CalculatedData, Chart, ComposedFrom, GamePtConfig, PbRecord,
    ScoreRecord, UserId,
};

fn by_score(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    a.score_data
        .score
        .total_cmp(&b.score_data.score)
        .then(a.score_data.lamp_index.cmp(&b.score_data.lamp_index))
        .then_with(|| b.score_id.cmp(&a.score_id))
}

fn by_lamp(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    a.score_data
        .lamp_index
        .cmp(&b.score_data.lamp_index)
        .then(a.score_data.score.total_cmp(&b.score_data.score))
        .then_with(|| b.score_id.cmp(&a.score_id))
}

pub struct PbCompositor {
    engine: Arc<CalculatedDataEngine>,
}

impl PbCompositor {
    pub fn new(engine: Arc<CalculatedDataEngine>) -> Self {
        Self { engine }
    }

    /// Derive the PB for one chart from every score the user has on it.
    pub async fn compose(&self, chart: &Chart, scores: &[ScoreRecord]) -> Result<Option<PbRecord>> {
        let gpt = get_gpt_config(chart.game, chart.playtype).ok_or(IngestError::UnknownGamePlaytype {
            game: chart.game,
            playtype: chart.playtype,
        })?;

        let (score_pb, lamp_pb) = match (
            scores.iter().max_by(|a, b| by_score(a, b)),
            scores.iter().max_by(|a, b| by_lamp(a, b)),
        ) {
            (Some(s), Some(l)) => (s, l),
            _ => return Ok(None),
        };

        let mut pb = PbRecord {
            user_id: score_pb.user_id,
            chart_id: chart.chart_id.clone(),
            song_id: score_pb.song_id,
            game: chart.game,
            playtype: chart.playtype,
            is_primary: chart.is_primary,
            highlight: score_pb.highlight || lamp_pb.highlight,
            time_achieved: score_pb.time_achieved.max(lamp_pb.time_achieved),
            comments: Vec::new(),
            composed_from: ComposedFrom {
                score_pb: score_pb.score_id.clone(),
                lamp_pb: lamp_pb.score_id.clone(),
                other: Vec::new(),
            },
            score_data: score_pb.score_data.clone(),
            calculated_data: score_pb.calculated_data.clone(),
        };

        for comment in [&score_pb.comment, &lamp_pb.comment].into_iter().flatten() {
            if !pb.comments.contains(comment) {
                pb.comments.push(comment.clone());
            }
        }

        if score_pb.score_id != lamp_pb.score_id {
            pb.score_data.lamp = lamp_pb.score_data.lamp.clone();
            pb.score_data.lamp_index = lamp_pb.score_data.lamp_index;
            if gpt.lamp_side_hit_meta {
                let lamp_meta = &lamp_pb.score_data.hit_meta;
                pb.score_data.hit_meta.gauge = lamp_meta.gauge;
                pb.score_data.hit_meta.gauge_history = lamp_meta.gauge_history.clone();
                pb.score_data.hit_meta.combo_break = lamp_meta.combo_break;
            }
            pb.calculated_data = self.merge_calculated(gpt, chart, &pb, score_pb, lamp_pb).await;
        }

        for aux in gpt.aux_bests {
            apply_aux_best(*aux, scores, lamp_pb, &mut pb);
        }

        Ok(Some(pb))
    }

    async fn merge_calculated(
        &self,
        gpt: &GamePtConfig,
        chart: &Chart,
        pb: &PbRecord,
        score_pb: &ScoreRecord,
        lamp_pb: &ScoreRecord,
    ) -> CalculatedData {
        let mut merged = CalculatedData {
            rating: score_pb.calculated_data.rating,
            lamp_rating: lamp_pb.calculated_data.lamp_rating,
            game_specific: Default::default(),
        };

        for metric in gpt.game_specific {
            let key = metric.key();
            let value = match metric.pb_merge() {
                MetricMerge::FromScorePb => score_pb.calculated_data.game_specific.get(key).copied().flatten(),
                MetricMerge::FromLampPb => lamp_pb.calculated_data.game_specific.get(key).copied().flatten(),
                MetricMerge::Recompute => {
                    let input = MetricInput::from(&pb.score_data);
                    self.engine.game_specific_metric(*metric, gpt, input, chart).await
                }
            };
            merged.game_specific.insert(key.to_string(), value);
        }

        merged
    }
}

fn apply_aux_best(kind: AuxBestKind, scores: &[ScoreRecord], lamp_pb: &ScoreRecord, pb: &mut PbRecord) {
    match kind {
        AuxBestKind::LowestBp => {
            let best = scores
                .iter()
                .filter_map(|s| s.score_data.hit_meta.bp.map(|bp| (bp, s)))
                .min_by(|(a, sa), (b, sb)| a.cmp(b).then_with(|| sa.score_id.cmp(&sb.score_id)));

            let (bp, best) = match best {
                Some(found) => found,
                None => return,
            };

            if best.score_id == pb.composed_from.score_pb || pb.score_data.hit_meta.bp == Some(bp) {
                return;
            }
            pb.score_data.hit_meta.bp = Some(bp);
            if best.score_id != lamp_pb.score_id {
                pb.composed_from.other.push(AuxBest {
                    name: kind.name().to_string(),
                    score_id: best.score_id.clone(),
                });
            }
        }
        AuxBestKind::BestExScore => {
            let best = scores
                .iter()
                .filter_map(|s| s.score_data.hit_meta.ex_score.map(|ex| (ex, s)))
                .max_by(|(a, sa), (b, sb)| a.cmp(b).then_with(|| sb.score_id.cmp(&sa.score_id)));

            if let Some((ex, best)) = best {
                pb.score_data.hit_meta.ex_score = Some(ex);
                pb.composed_from.other.push(AuxBest {
                    name: kind.name().to_string(),
                    score_id: best.score_id.clone(),
                });
            }
        }
    }
}

/// Counts from one PB pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PbPassReport {
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// Re-derives PBs for the charts an import touched.
pub struct PbProcessor {
    store: Arc<dyn ScoreStore>,
    catalog: Arc<dyn CatalogLookup>,
    compositor: PbCompositor,
}

impl PbProcessor {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        catalog: Arc<dyn CatalogLookup>,
        engine: Arc<CalculatedDataEngine>,
    ) -> Self {
        Self {
            store,
            catalog,
            compositor: PbCompositor::new(engine),
        }
    }

    #[instrument(skip(self, chart_ids), fields(charts = chart_ids.len()))]
    pub async fn process(&self, user_id: UserId, chart_ids: &BTreeSet<String>) -> Result<PbPassReport> {
        let mut report = PbPassReport::default();

        for chart_id in chart_ids {
            let scores = self.store.scores_on_chart(user_id, chart_id).await?;

            let game = match scores.first() {
                Some(s) => s.game,
                None => {
                    debug!(%chart_id, "no scores left on chart, removing PB");
                    self.store.delete_pb(user_id, chart_id).await?;
                    report.removed += 1;
                    continue;
                }
            };

            let chart = match self.catalog.find_chart_by_id(game, chart_id).await? {
                Some(chart) => chart,
                None => {
                    warn!(%chart_id, "chart vanished from the catalog, PB left untouched");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.compositor.compose(&chart, &scores).await? {
                Some(pb) => {
                    self.store.upsert_pb(&pb).await?;
                    report.updated += 1;
                }
                None => report.skipped += 1,
            }
        }

        info!(
            "🏁 PB pass complete: {} updated, {} removed, {} skipped",
            report.updated, report.removed, report.skipped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Game, Playtype};
    use crate::infra::catalog::InMemoryCatalog;
    use crate::testing::{iidx_chart, sdvx_chart, scored};

    fn compositor() -> PbCompositor {
        PbCompositor::new(Arc::new(CalculatedDataEngine::new(Arc::new(
            InMemoryCatalog::new(vec![], vec![]),
        ))))
    }

    #[tokio::test]
    async fn composes_score_and_lamp_from_different_records() {
        let chart = iidx_chart();
        let best_score = scored("Rscore", 1800.0, "EASY CLEAR", 3, &chart);
        let best_lamp = scored("Rlamp", 1400.0, "EX HARD CLEAR", 6, &chart);
        let neither = scored("Rmid", 1500.0, "CLEAR", 4, &chart);

        let pb = compositor()
            .compose(&chart, &[neither, best_lamp.clone(), best_score.clone()])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(pb.score_data.score, 1800.0);
        assert_eq!(pb.score_data.percent, best_score.score_data.percent);
        assert_eq!(pb.score_data.grade, best_score.score_data.grade);
        assert_eq!(pb.score_data.lamp, "EX HARD CLEAR");
        assert_eq!(pb.score_data.lamp_index, 6);
        assert_eq!(pb.composed_from.score_pb, "Rscore");
        assert_eq!(pb.composed_from.lamp_pb, "Rlamp");
        assert!(pb.composed_from.other.is_empty());
        assert_eq!(pb.calculated_data.rating, best_score.calculated_data.rating);
        assert_eq!(pb.calculated_data.lamp_rating, best_lamp.calculated_data.lamp_rating);
    }

    #[tokio::test]
    async fn single_best_record_is_copied() {
        let chart = iidx_chart();
        let best = scored("Rbest", 1800.0, "FULL COMBO", 7, &chart);
        let worse = scored("Rworse", 1200.0, "CLEAR", 4, &chart);

        let pb = compositor()
            .compose(&chart, &[worse, best.clone()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pb.score_data, best.score_data);
        assert_eq!(pb.calculated_data, best.calculated_data);
        assert_eq!(pb.composed_from.score_pb, pb.composed_from.lamp_pb);
        assert!(pb.composed_from.other.is_empty());
    }

    #[tokio::test]
    async fn lamp_ties_break_on_score() {
        let chart = iidx_chart();
        let low = scored("Ra", 1200.0, "HARD CLEAR", 5, &chart);
        let high = scored("Rb", 1300.0, "HARD CLEAR", 5, &chart);
        let pb = compositor().compose(&chart, &[high, low]).await.unwrap().unwrap();
        assert_eq!(pb.composed_from.lamp_pb, "Rb");
    }

    #[tokio::test]
    async fn lowest_bp_from_a_third_score_is_recorded() {
        let chart = iidx_chart();
        let mut best_score = scored("Rscore", 1800.0, "CLEAR", 4, &chart);
        best_score.score_data.hit_meta.bp = Some(20);
        let mut best_lamp = scored("Rlamp", 1400.0, "HARD CLEAR", 5, &chart);
        best_lamp.score_data.hit_meta.bp = Some(15);
        let mut low_bp = scored("Rbp", 1300.0, "EASY CLEAR", 3, &chart);
        low_bp.score_data.hit_meta.bp = Some(4);

        let pb = compositor()
            .compose(&chart, &[best_score, best_lamp, low_bp])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pb.score_data.hit_meta.bp, Some(4));
        assert_eq!(pb.composed_from.other.len(), 1);
        assert_eq!(pb.composed_from.other[0].name, "Best BP");
        assert_eq!(pb.composed_from.other[0].score_id, "Rbp");
    }

    #[tokio::test]
    async fn lowest_bp_on_lamp_pb_is_copied_without_aux_pointer() {
        let chart = iidx_chart();
        let mut best_score = scored("Rscore", 1800.0, "CLEAR", 4, &chart);
        best_score.score_data.hit_meta.bp = Some(20);
        let mut best_lamp = scored("Rlamp", 1400.0, "HARD CLEAR", 5, &chart);
        best_lamp.score_data.hit_meta.bp = Some(3);

        let pb = compositor()
            .compose(&chart, &[best_score, best_lamp])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pb.score_data.hit_meta.bp, Some(3));
        assert!(pb.composed_from.other.is_empty());
    }

    #[tokio::test]
    async fn sdvx_recomputes_volforce_from_the_composite() {
        let chart = sdvx_chart();
        let best_score = scored("Rscore", 9_950_000.0, "CLEAR", 1, &chart);
        let mut best_lamp = scored("Rlamp", 9_500_000.0, "ULTIMATE CHAIN", 3, &chart);
        best_lamp.score_data.hit_meta.ex_score = Some(3000);

        let pb = compositor()
            .compose(&chart, &[best_score.clone(), best_lamp.clone()])
            .await
            .unwrap()
            .unwrap();

        let vf = pb.calculated_data.game_specific["VF6"].unwrap();
        assert!(vf > best_score.calculated_data.game_specific["VF6"].unwrap());
        assert!(vf > best_lamp.calculated_data.game_specific["VF6"].unwrap());
        assert_eq!(pb.composed_from.other[0].name, "exScorePB");
        assert_eq!(pb.composed_from.other[0].score_id, "Rlamp");
        assert_eq!(chart.game, Game::Sdvx);
        assert_eq!(chart.playtype, Playtype::Single);
    }

    #[tokio::test]
    async fn no_scores_means_no_pb() {
        let chart = iidx_chart();
        assert!(compositor().compose(&chart, &[]).await.unwrap().is_none());
    }
}
