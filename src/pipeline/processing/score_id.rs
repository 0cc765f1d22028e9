//! Deterministic score identity.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::common::constants::SCORE_ID_PREFIX;
use crate::domain::{DryScore, Game, UserId};

/// The fields a score identity covers. Import time, service, import type and
/// comment are excluded so re-submissions of the same play converge.
#[derive(Serialize)]
struct IdentityFields<'a> {
    user_id: UserId,
    chart_id: &'a str,
    game: Game,
    score: f64,
    lamp: &'a str,
    judgements: &'a BTreeMap<String, u32>,
}

/// `R` followed by the hex sha256 of the canonical identity serialization.
pub fn compute_score_id(user_id: UserId, dry: &DryScore, chart_id: &str) -> String {
    let fields = IdentityFields {
        user_id,
        chart_id,
        game: dry.game,
        score: dry.score_data.score,
        lamp: &dry.score_data.lamp,
        judgements: &dry.score_data.judgements,
    };

    // Struct field order and BTreeMap key order make this serialization stable.
    let canonical = serde_json::to_string(&fields).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{}{}", SCORE_ID_PREFIX, hex::encode(hasher.finalize()))
}
