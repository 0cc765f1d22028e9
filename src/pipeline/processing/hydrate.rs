//! Turns a converted score into a persisted `ScoreRecord` and hands it to the
//! insert queue.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::calculated_data::CalculatedDataEngine;
use super::converters::ConversionSuccess;
use super::insert_queue::{EnqueueOutcome, FlushError, InsertQueue};
use super::score_id::compute_score_id;
use crate::app::ports::ScoreStore;
use crate::common::error::StoreError;
use crate::domain::{get_gpt_config, Game, Playtype, ScoreData, ScoreRecord, UserId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HydrateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The batch this score completed could not be written.
    #[error(transparent)]
    Flush(#[from] FlushError),

    #[error("no game configuration for {game} {playtype}")]
    UnknownGamePlaytype { game: Game, playtype: Playtype },

    #[error("lamp {0} is not part of this game's lamp list")]
    UnknownLamp(String),

    #[error("grade {0} is not part of this game's grade list")]
    UnknownGrade(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HydrateOutcome {
    Queued(ScoreRecord),
    Duplicate { score_id: String },
    /// The user asked for this exact score never to be imported again.
    Blacklisted { score_id: String },
}

pub struct ScoreHydrator {
    store: Arc<dyn ScoreStore>,
    queue: Arc<InsertQueue>,
    engine: Arc<CalculatedDataEngine>,
}

impl ScoreHydrator {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        queue: Arc<InsertQueue>,
        engine: Arc<CalculatedDataEngine>,
    ) -> Self {
        Self {
            store,
            queue,
            engine,
        }
    }

    /// Identity first, then the existence checks, and only then the calculated
    /// data, which may need catalog lookups.
    pub async fn hydrate_and_queue(
        &self,
        user_id: UserId,
        success: ConversionSuccess,
        blacklist: &HashSet<String>,
    ) -> Result<HydrateOutcome, HydrateError> {
        let ConversionSuccess {
            dry_score,
            chart,
            song,
        } = success;

        let gpt = get_gpt_config(chart.game, chart.playtype).ok_or(
            HydrateError::UnknownGamePlaytype {
                game: chart.game,
                playtype: chart.playtype,
            },
        )?;

        let score_id = compute_score_id(user_id, &dry_score, &chart.chart_id);

        if blacklist.contains(&score_id) {
            debug!(%score_id, "score is blacklisted");
            return Ok(HydrateOutcome::Blacklisted { score_id });
        }

        if self.store.score_exists(&score_id).await? || self.queue.contains(&score_id).await {
            debug!(%score_id, "score already exists");
            return Ok(HydrateOutcome::Duplicate { score_id });
        }

        let sd = &dry_score.score_data;
        let lamp_index = gpt
            .lamp_index(&sd.lamp)
            .ok_or_else(|| HydrateError::UnknownLamp(sd.lamp.clone()))?;
        let grade_index = gpt
            .grade_index(&sd.grade)
            .ok_or_else(|| HydrateError::UnknownGrade(sd.grade.clone()))?;

        let calculated_data = self.engine.calculate(gpt, sd.into(), &chart).await;

        let record = ScoreRecord {
            score_id: score_id.clone(),
            user_id,
            chart_id: chart.chart_id.clone(),
            song_id: song.id,
            game: chart.game,
            playtype: chart.playtype,
            is_primary: chart.is_primary,
            service: dry_score.service,
            import_type: dry_score.import_type,
            comment: dry_score.comment,
            highlight: false,
            time_achieved: dry_score.time_achieved,
            time_added: Utc::now().timestamp_millis(),
            score_data: ScoreData {
                score: dry_score.score_data.score,
                percent: dry_score.score_data.percent,
                grade: dry_score.score_data.grade,
                grade_index,
                lamp: dry_score.score_data.lamp,
                lamp_index,
                judgements: dry_score.score_data.judgements,
                hit_meta: dry_score.score_data.hit_meta,
            },
            score_meta: dry_score.score_meta,
            calculated_data,
        };

        match self.queue.enqueue(record.clone()).await? {
            EnqueueOutcome::Flushed(flush) if flush.conflicted.contains(&score_id) => {
                debug!(%score_id, "score was written by a concurrent import");
                Ok(HydrateOutcome::Duplicate { score_id })
            }
            EnqueueOutcome::Queued | EnqueueOutcome::Flushed(_) => {
                Ok(HydrateOutcome::Queued(record))
            }
            // Another item hydrated the same score between our check and the enqueue.
            EnqueueOutcome::Duplicate => Ok(HydrateOutcome::Duplicate { score_id }),
        }
    }
}
