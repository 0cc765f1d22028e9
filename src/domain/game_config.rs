//! Static per-(game, playtype) configuration: ordered lamps and grades, score scale,
//! rating strategy and the specialty metrics each game tracks.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::{Game, Playtype};

/// Constants of the universal rating curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingParameters {
    pub fail_harshness: f64,
    pub pivot_percent: f64,
    pub clear_exp_multiplier: f64,
}

/// How the skill rating for a game is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatingStrategy {
    Curve(RatingParameters),
    /// Port of the in-game CHUNITHM play rating.
    Chunithm,
    /// Port of the in-game GITADORA skill value.
    Gitadora,
}

/// Maps a raw score onto a percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreScale {
    /// `score / max * 100`.
    OutOf(f64),
    /// EX score against `notecount * 2`.
    NotecountEx,
    /// The score already is the percentage.
    Percent,
}

/// How a specialty metric is carried onto a composed PB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricMerge {
    FromScorePb,
    FromLampPb,
    /// Depends on both halves of a composed PB and has to be derived again.
    Recompute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameSpecificMetric {
    Bpi,
    KaidenPercentile,
    Vf6,
    Mfcp,
}

impl GameSpecificMetric {
    pub fn key(&self) -> &'static str {
        match self {
            GameSpecificMetric::Bpi => "BPI",
            GameSpecificMetric::KaidenPercentile => "K%",
            GameSpecificMetric::Vf6 => "VF6",
            GameSpecificMetric::Mfcp => "MFCP",
        }
    }

    pub fn pb_merge(&self) -> MetricMerge {
        match self {
            GameSpecificMetric::Bpi | GameSpecificMetric::KaidenPercentile => {
                MetricMerge::FromScorePb
            }
            GameSpecificMetric::Vf6 | GameSpecificMetric::Mfcp => MetricMerge::Recompute,
        }
    }
}

/// A best tracked independently of the score and lamp PBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxBestKind {
    /// Fewest bad+poor.
    LowestBp,
    /// Highest EX score.
    BestExScore,
}

impl AuxBestKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuxBestKind::LowestBp => "Best BP",
            AuxBestKind::BestExScore => "exScorePB",
        }
    }
}

#[derive(Debug)]
pub struct GamePtConfig {
    pub game: Game,
    pub playtype: Playtype,
    pub lamps: &'static [&'static str],
    pub clear_lamp: &'static str,
    pub grades: &'static [&'static str],
    /// Minimum percent for each entry in `grades`.
    pub grade_boundaries: &'static [f64],
    pub percent_max: f64,
    pub score_scale: ScoreScale,
    pub rating: RatingStrategy,
    pub game_specific: &'static [GameSpecificMetric],
    pub aux_bests: &'static [AuxBestKind],
    pub difficulties: &'static [&'static str],
    pub versions: &'static [&'static str],
    /// Lamp-side hit meta copied from the lamp PB onto a composed PB.
    pub lamp_side_hit_meta: bool,
}

impl GamePtConfig {
    pub fn lamp_index(&self, lamp: &str) -> Option<usize> {
        self.lamps.iter().position(|l| *l == lamp)
    }

    pub fn grade_index(&self, grade: &str) -> Option<usize> {
        self.grades.iter().position(|g| *g == grade)
    }

    pub fn clear_lamp_index(&self) -> usize {
        self.lamp_index(self.clear_lamp).unwrap_or(0)
    }

    pub fn is_clear(&self, lamp: &str) -> bool {
        self.lamp_index(lamp)
            .map(|i| i >= self.clear_lamp_index())
            .unwrap_or(false)
    }

    pub fn supports_difficulty(&self, difficulty: &str) -> bool {
        self.difficulties.contains(&difficulty)
    }
}

const IIDX_LAMPS: &[&str] = &[
    "NO PLAY",
    "FAILED",
    "ASSIST CLEAR",
    "EASY CLEAR",
    "CLEAR",
    "HARD CLEAR",
    "EX HARD CLEAR",
    "FULL COMBO",
];
const IIDX_GRADES: &[&str] = &["F", "E", "D", "C", "B", "A", "AA", "AAA", "MAX-", "MAX"];
const IIDX_BOUNDARIES: &[f64] = &[
    0.0, 22.22, 33.33, 44.44, 55.55, 66.66, 77.77, 88.88, 94.44, 100.0,
];
const IIDX_VERSIONS: &[&str] = &[
    "20", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30",
];

const SDVX_LAMPS: &[&str] = &[
    "FAILED",
    "CLEAR",
    "EXCESSIVE CLEAR",
    "ULTIMATE CHAIN",
    "PERFECT ULTIMATE CHAIN",
];
const SDVX_GRADES: &[&str] = &[
    "D", "C", "B", "A", "A+", "AA", "AA+", "AAA", "AAA+", "S", "PUC",
];
const SDVX_BOUNDARIES: &[f64] = &[
    0.0, 70.0, 80.0, 87.0, 90.0, 93.0, 95.0, 97.0, 98.0, 99.0, 100.0,
];

const DDR_LAMPS: &[&str] = &[
    "FAILED",
    "CLEAR",
    "LIFE4",
    "FULL COMBO",
    "GREAT FULL COMBO",
    "PERFECT FULL COMBO",
    "MARVELOUS FULL COMBO",
];
const DDR_GRADES: &[&str] = &[
    "D", "D+", "C-", "C", "C+", "B-", "B", "B+", "A-", "A", "A+", "AA-", "AA", "AA+", "AAA",
];
const DDR_BOUNDARIES: &[f64] = &[
    0.0, 55.0, 59.0, 60.0, 65.0, 69.0, 70.0, 75.0, 79.0, 80.0, 85.0, 89.0, 90.0, 95.0, 99.0,
];

const CHUNITHM_LAMPS: &[&str] = &[
    "FAILED",
    "CLEAR",
    "FULL COMBO",
    "ALL JUSTICE",
    "ALL JUSTICE CRITICAL",
];
const CHUNITHM_GRADES: &[&str] = &[
    "D", "C", "B", "BB", "BBB", "A", "AA", "AAA", "S", "SS", "SSS",
];
const CHUNITHM_BOUNDARIES: &[f64] = &[
    0.0, 50.0, 60.0, 70.0, 80.0, 90.0, 92.5, 95.0, 97.5, 100.0, 100.75,
];

const GITADORA_LAMPS: &[&str] = &["FAILED", "CLEAR", "FULL COMBO", "EXCELLENT"];
const GITADORA_GRADES: &[&str] = &["C", "B", "A", "S", "SS", "MAX"];
const GITADORA_BOUNDARIES: &[f64] = &[0.0, 63.0, 73.0, 80.0, 95.0, 100.0];

const MUSECA_LAMPS: &[&str] = &["FAILED", "CLEAR", "CONNECT ALL", "PERFECT CONNECT ALL"];
const MUSECA_GRADES: &[&str] = &["没", "拙", "凡", "佳", "良", "優", "秀", "傑", "傑G"];
const MUSECA_BOUNDARIES: &[f64] = &[0.0, 60.0, 70.0, 80.0, 85.0, 90.0, 95.0, 97.5, 100.0];

const IIDX_RATING: RatingParameters = RatingParameters {
    fail_harshness: 0.3,
    pivot_percent: 0.7777,
    clear_exp_multiplier: 1.0,
};
const BMS_RATING: RatingParameters = RatingParameters {
    fail_harshness: 0.5,
    pivot_percent: 0.7777,
    clear_exp_multiplier: 0.75,
};
const MUSECA_RATING: RatingParameters = RatingParameters {
    fail_harshness: 1.0,
    pivot_percent: 0.8,
    clear_exp_multiplier: 1.0,
};
const SDVX_RATING: RatingParameters = RatingParameters {
    fail_harshness: 1.0,
    pivot_percent: 0.92,
    clear_exp_multiplier: 1.0,
};
const DDR_RATING: RatingParameters = RatingParameters {
    fail_harshness: 0.9,
    pivot_percent: 0.9,
    clear_exp_multiplier: 1.0,
};

fn iidx(playtype: Playtype) -> GamePtConfig {
    GamePtConfig {
        game: Game::Iidx,
        playtype,
        lamps: IIDX_LAMPS,
        clear_lamp: "CLEAR",
        grades: IIDX_GRADES,
        grade_boundaries: IIDX_BOUNDARIES,
        percent_max: 100.0,
        score_scale: ScoreScale::NotecountEx,
        rating: RatingStrategy::Curve(IIDX_RATING),
        game_specific: &[GameSpecificMetric::Bpi, GameSpecificMetric::KaidenPercentile],
        aux_bests: &[AuxBestKind::LowestBp],
        difficulties: &["NORMAL", "HYPER", "ANOTHER", "LEGGENDARIA"],
        versions: IIDX_VERSIONS,
        lamp_side_hit_meta: true,
    }
}

fn bms(playtype: Playtype) -> GamePtConfig {
    GamePtConfig {
        game: Game::Bms,
        playtype,
        lamps: IIDX_LAMPS,
        clear_lamp: "EASY CLEAR",
        grades: IIDX_GRADES,
        grade_boundaries: IIDX_BOUNDARIES,
        percent_max: 100.0,
        score_scale: ScoreScale::NotecountEx,
        rating: RatingStrategy::Curve(BMS_RATING),
        game_specific: &[],
        aux_bests: &[AuxBestKind::LowestBp],
        difficulties: &["CHART"],
        versions: &[],
        lamp_side_hit_meta: true,
    }
}

fn ddr(playtype: Playtype) -> GamePtConfig {
    GamePtConfig {
        game: Game::Ddr,
        playtype,
        lamps: DDR_LAMPS,
        clear_lamp: "CLEAR",
        grades: DDR_GRADES,
        grade_boundaries: DDR_BOUNDARIES,
        percent_max: 100.0,
        score_scale: ScoreScale::OutOf(1_000_000.0),
        rating: RatingStrategy::Curve(DDR_RATING),
        game_specific: &[GameSpecificMetric::Mfcp],
        aux_bests: &[],
        difficulties: &["BEGINNER", "BASIC", "DIFFICULT", "EXPERT", "CHALLENGE"],
        versions: &["a20", "a20plus", "a3"],
        lamp_side_hit_meta: false,
    }
}

fn gitadora(playtype: Playtype) -> GamePtConfig {
    GamePtConfig {
        game: Game::Gitadora,
        playtype,
        lamps: GITADORA_LAMPS,
        clear_lamp: "CLEAR",
        grades: GITADORA_GRADES,
        grade_boundaries: GITADORA_BOUNDARIES,
        percent_max: 100.0,
        score_scale: ScoreScale::Percent,
        rating: RatingStrategy::Gitadora,
        game_specific: &[],
        aux_bests: &[],
        difficulties: &[
            "BASIC",
            "ADVANCED",
            "EXTREME",
            "MASTER",
            "BASS BASIC",
            "BASS ADVANCED",
            "BASS EXTREME",
            "BASS MASTER",
        ],
        versions: &["konaste"],
        lamp_side_hit_meta: false,
    }
}

static GAME_CONFIGS: Lazy<HashMap<(Game, Playtype), GamePtConfig>> = Lazy::new(|| {
    let mut configs = HashMap::new();

    for pt in [Playtype::SP, Playtype::DP] {
        configs.insert((Game::Iidx, pt), iidx(pt));
        configs.insert((Game::Ddr, pt), ddr(pt));
    }
    for pt in [Playtype::K7, Playtype::K14] {
        configs.insert((Game::Bms, pt), bms(pt));
    }
    for pt in [Playtype::Gita, Playtype::Dora] {
        configs.insert((Game::Gitadora, pt), gitadora(pt));
    }

    configs.insert(
        (Game::Sdvx, Playtype::Single),
        GamePtConfig {
            game: Game::Sdvx,
            playtype: Playtype::Single,
            lamps: SDVX_LAMPS,
            clear_lamp: "CLEAR",
            grades: SDVX_GRADES,
            grade_boundaries: SDVX_BOUNDARIES,
            percent_max: 100.0,
            score_scale: ScoreScale::OutOf(10_000_000.0),
            rating: RatingStrategy::Curve(SDVX_RATING),
            game_specific: &[GameSpecificMetric::Vf6],
            aux_bests: &[AuxBestKind::BestExScore],
            difficulties: &["NOV", "ADV", "EXH", "MXM", "INF", "GRV", "HVN", "VVD"],
            versions: &["booth", "inf", "gw", "heaven", "vivid", "exceed"],
            lamp_side_hit_meta: false,
        },
    );

    configs.insert(
        (Game::Chunithm, Playtype::Single),
        GamePtConfig {
            game: Game::Chunithm,
            playtype: Playtype::Single,
            lamps: CHUNITHM_LAMPS,
            clear_lamp: "CLEAR",
            grades: CHUNITHM_GRADES,
            grade_boundaries: CHUNITHM_BOUNDARIES,
            percent_max: 101.0,
            score_scale: ScoreScale::OutOf(1_000_000.0),
            rating: RatingStrategy::Chunithm,
            game_specific: &[],
            aux_bests: &[],
            difficulties: &["BASIC", "ADVANCED", "EXPERT", "MASTER"],
            versions: &["paradiselost"],
            lamp_side_hit_meta: false,
        },
    );

    configs.insert(
        (Game::Museca, Playtype::Single),
        GamePtConfig {
            game: Game::Museca,
            playtype: Playtype::Single,
            lamps: MUSECA_LAMPS,
            clear_lamp: "CLEAR",
            grades: MUSECA_GRADES,
            grade_boundaries: MUSECA_BOUNDARIES,
            percent_max: 100.0,
            score_scale: ScoreScale::OutOf(1_000_000.0),
            rating: RatingStrategy::Curve(MUSECA_RATING),
            game_specific: &[],
            aux_bests: &[],
            difficulties: &["Green", "Yellow", "Red"],
            versions: &["1.5", "1.5-b"],
            lamp_side_hit_meta: false,
        },
    );

    configs
});

/// Look up the configuration for a game and playtype, if that pairing exists.
pub fn get_gpt_config(game: Game, playtype: Playtype) -> Option<&'static GamePtConfig> {
    GAME_CONFIGS.get(&(game, playtype))
}

/// Playtypes supported for a game.
pub fn playtypes_for(game: Game) -> Vec<Playtype> {
    let mut pts: Vec<Playtype> = GAME_CONFIGS
        .keys()
        .filter(|(g, _)| *g == game)
        .map(|(_, pt)| *pt)
        .collect();
    pts.sort();
    pts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_config_has_aligned_grades_and_a_valid_clear_lamp() {
        for ((game, pt), cfg) in GAME_CONFIGS.iter() {
            assert_eq!(
                cfg.grades.len(),
                cfg.grade_boundaries.len(),
                "{} {} grade table mismatch",
                game,
                pt
            );
            assert!(cfg.lamp_index(cfg.clear_lamp).is_some());
            assert!(cfg.grade_boundaries.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn unsupported_pairings_are_absent() {
        assert!(get_gpt_config(Game::Iidx, Playtype::Single).is_none());
        assert!(get_gpt_config(Game::Sdvx, Playtype::SP).is_none());
        assert_eq!(playtypes_for(Game::Iidx), vec![Playtype::SP, Playtype::DP]);
    }

    #[test]
    fn clear_checks_follow_lamp_order() {
        let cfg = get_gpt_config(Game::Iidx, Playtype::SP).unwrap();
        assert!(!cfg.is_clear("EASY CLEAR"));
        assert!(cfg.is_clear("CLEAR"));
        assert!(cfg.is_clear("FULL COMBO"));
        assert!(!cfg.is_clear("NOT A LAMP"));
    }
}
