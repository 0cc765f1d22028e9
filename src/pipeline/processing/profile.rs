//! Per-user, per-game profile ratings aggregated from PBs.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::common::constants::PROFILE_RATING_DEPTH;
use crate::domain::game_config::GameSpecificMetric;
use crate::domain::{GamePtConfig, PbRecord};

/// How many VF6 values make up a VOLFORCE.
const VOLFORCE_DEPTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRatings {
    pub rating: f64,
    pub lamp_rating: f64,
    pub game_specific: BTreeMap<String, Option<f64>>,
}

fn best_n(mut values: Vec<f64>, n: usize) -> Vec<f64> {
    values.sort_by(|a, b| b.total_cmp(a));
    values.truncate(n);
    values
}

/// Sum of the best `n` divided by `n`, so profiles with few PBs are not inflated.
fn mean_of_best(values: Vec<f64>, n: usize) -> f64 {
    best_n(values, n).iter().sum::<f64>() / n as f64
}

pub fn compute_profile_ratings(pbs: &[PbRecord], gpt: &GamePtConfig) -> ProfileRatings {
    let rating = mean_of_best(
        pbs.iter().map(|pb| pb.calculated_data.rating).collect(),
        PROFILE_RATING_DEPTH,
    );
    let lamp_rating = mean_of_best(
        pbs.iter().map(|pb| pb.calculated_data.lamp_rating).collect(),
        PROFILE_RATING_DEPTH,
    );

    let mut game_specific = BTreeMap::new();
    for metric in gpt.game_specific {
        let values: Vec<f64> = pbs
            .iter()
            .filter_map(|pb| pb.calculated_data.game_specific.get(metric.key()).copied().flatten())
            .collect();

        let aggregate = match metric {
            GameSpecificMetric::Bpi if !values.is_empty() => {
                let best = best_n(values, PROFILE_RATING_DEPTH);
                Some(best.iter().sum::<f64>() / best.len() as f64)
            }
            GameSpecificMetric::Vf6 => {
                Some((best_n(values, VOLFORCE_DEPTH).iter().sum::<f64>() * 1000.0).round() / 1000.0)
            }
            GameSpecificMetric::Mfcp => Some(values.iter().sum()),
            _ => None,
        };

        if let Some(value) = aggregate {
            game_specific.insert(metric.key().to_string(), Some(value));
        }
    }

    ProfileRatings {
        rating,
        lamp_rating,
        game_specific,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{get_gpt_config, Game, Playtype};
    use crate::testing::pb_with;

    #[test]
    fn rating_is_mean_of_best_twenty_over_twenty() {
        let gpt = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        let pbs: Vec<_> = (1..=25).map(|i| pb_with(f64::from(i), 0.0, &[])).collect();
        let profile = compute_profile_ratings(&pbs, gpt);
        // best 20 are 6..=25
        assert!((profile.rating - 15.5).abs() < 1e-9);

        let few = vec![pb_with(10.0, 10.0, &[])];
        let profile = compute_profile_ratings(&few, gpt);
        assert!((profile.rating - 0.5).abs() < 1e-9);
        assert!(!profile.game_specific.contains_key("BPI"));
    }

    #[test]
    fn game_specific_aggregates_follow_each_metric() {
        let sdvx = get_gpt_config(Game::Sdvx, Playtype::Single).unwrap();
        let pbs: Vec<_> = (0..60).map(|_| pb_with(0.0, 0.0, &[("VF6", Some(0.4))])).collect();
        let profile = compute_profile_ratings(&pbs, sdvx);
        assert_eq!(profile.game_specific["VF6"], Some(20.0));

        let ddr = get_gpt_config(Game::Ddr, Playtype::SP).unwrap();
        let pbs = vec![
            pb_with(0.0, 0.0, &[("MFCP", Some(25.0))]),
            pb_with(0.0, 0.0, &[("MFCP", None)]),
            pb_with(0.0, 0.0, &[("MFCP", Some(2.0))]),
        ];
        let profile = compute_profile_ratings(&pbs, ddr);
        assert_eq!(profile.game_specific["MFCP"], Some(27.0));
    }
}
