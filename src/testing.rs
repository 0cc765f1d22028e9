//! Fixtures shared by the unit tests.

use std::collections::BTreeMap;

use crate::domain::{
    get_gpt_config, CalculatedData, Chart, ChartData, ComposedFrom, DryScore, DryScoreData, Game,
    HitMeta, ImportType, PbRecord, Playtype, ScoreData, ScoreRecord, Song,
};
use crate::infra::catalog::InMemoryCatalog;
use crate::pipeline::processing::calculated_data::{self, stats, MetricInput};
use crate::pipeline::processing::converters::ConversionSuccess;
use crate::pipeline::processing::score_utils;

pub(crate) fn iidx_song() -> Song {
    Song {
        id: 1,
        game: Game::Iidx,
        title: "Test Song".into(),
        artist: "Test Artist".into(),
        alt_titles: vec!["tesuto".into()],
    }
}

/// SP ANOTHER 12, 1000 notes, in-game id 1000 in version 27.
pub(crate) fn iidx_chart() -> Chart {
    Chart {
        chart_id: "chart-a".into(),
        song_id: 1,
        game: Game::Iidx,
        playtype: Playtype::SP,
        difficulty: "ANOTHER".into(),
        level: "12".into(),
        level_num: 12.0,
        is_primary: true,
        versions: vec!["27".into()],
        in_game_id: Some(1000),
        hash: None,
        data: ChartData {
            notecount: Some(1000),
            kaiden_average: Some(1600.0),
            world_record: Some(1900.0),
            bpi_coefficient: None,
        },
        tierlist: vec![],
    }
}

pub(crate) fn sdvx_chart() -> Chart {
    Chart {
        chart_id: "chart-sdvx".into(),
        song_id: 2,
        game: Game::Sdvx,
        playtype: Playtype::Single,
        difficulty: "EXH".into(),
        level: "17".into(),
        level_num: 17.0,
        is_primary: true,
        versions: vec![],
        in_game_id: Some(2000),
        hash: None,
        data: ChartData::default(),
        tierlist: vec![],
    }
}

pub(crate) fn iidx_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new(vec![iidx_song()], vec![iidx_chart()])
}

pub(crate) fn conversion_success(score: f64, lamp: &str) -> ConversionSuccess {
    let chart = iidx_chart();
    let gpt = get_gpt_config(chart.game, chart.playtype).unwrap();
    let (percent, grade) = score_utils::generic_grade_and_percent(gpt, score, &chart).unwrap();

    ConversionSuccess {
        dry_score: DryScore {
            game: Game::Iidx,
            service: "test".into(),
            import_type: ImportType::FileBatchManual,
            comment: None,
            time_achieved: Some(1_600_000_000_000),
            score_data: DryScoreData {
                score,
                percent,
                grade,
                lamp: lamp.into(),
                judgements: BTreeMap::new(),
                hit_meta: HitMeta::default(),
            },
            score_meta: BTreeMap::new(),
        },
        chart,
        song: iidx_song(),
    }
}

/// A bare stored score. Only the identifying fields matter.
pub(crate) fn score_record(score_id: &str, chart_id: &str, user_id: u32) -> ScoreRecord {
    ScoreRecord {
        score_id: score_id.into(),
        user_id,
        chart_id: chart_id.into(),
        song_id: 1,
        game: Game::Iidx,
        playtype: Playtype::SP,
        is_primary: true,
        service: "test".into(),
        import_type: ImportType::FileBatchManual,
        comment: None,
        highlight: false,
        time_achieved: None,
        time_added: 1_600_000_000_000,
        score_data: ScoreData {
            score: 1000.0,
            percent: 50.0,
            grade: "C".into(),
            grade_index: 3,
            lamp: "CLEAR".into(),
            lamp_index: 4,
            judgements: BTreeMap::new(),
            hit_meta: HitMeta::default(),
        },
        score_meta: BTreeMap::new(),
        calculated_data: CalculatedData::default(),
    }
}

/// A fully derived score on `chart`, as the hydrator would have produced it.
pub(crate) fn scored(score_id: &str, score: f64, lamp: &str, lamp_index: usize, chart: &Chart) -> ScoreRecord {
    let gpt = get_gpt_config(chart.game, chart.playtype).unwrap();
    let percent = score_utils::calculate_percent(gpt, score, chart).unwrap();
    let grade = score_utils::grade_from_percent(gpt, percent).unwrap();
    let input = MetricInput {
        score,
        percent,
        grade,
        lamp,
    };

    let mut game_specific = BTreeMap::new();
    match chart.game {
        Game::Sdvx => {
            game_specific.insert(
                "VF6".to_string(),
                stats::vf6(chart.level_num, percent, grade, lamp),
            );
        }
        Game::Iidx => {
            let max = f64::from(chart.data.notecount.unwrap_or(0) * 2);
            let bpi = match (chart.data.kaiden_average, chart.data.world_record) {
                (Some(kavg), Some(wr)) => stats::bpi(kavg, wr, score, max, chart.data.bpi_coefficient),
                _ => None,
            };
            game_specific.insert("BPI".to_string(), bpi);
        }
        _ => {}
    }

    let mut record = score_record(score_id, &chart.chart_id, 1);
    record.song_id = chart.song_id;
    record.game = chart.game;
    record.playtype = chart.playtype;
    record.score_data = ScoreData {
        score,
        percent,
        grade: grade.to_string(),
        grade_index: gpt.grade_index(grade).unwrap_or(0),
        lamp: lamp.into(),
        lamp_index,
        judgements: BTreeMap::new(),
        hit_meta: HitMeta::default(),
    };
    record.calculated_data = CalculatedData {
        rating: calculated_data::rating(gpt, input, chart),
        lamp_rating: calculated_data::lamp_rating(gpt, lamp, chart),
        game_specific,
    };
    record
}

pub(crate) fn pb_with(rating: f64, lamp_rating: f64, game_specific: &[(&str, Option<f64>)]) -> PbRecord {
    let record = score_record("R", "chart", 1);
    PbRecord {
        user_id: record.user_id,
        chart_id: record.chart_id,
        song_id: record.song_id,
        game: record.game,
        playtype: record.playtype,
        is_primary: true,
        highlight: false,
        time_achieved: None,
        comments: vec![],
        composed_from: ComposedFrom {
            score_pb: "R".into(),
            lamp_pb: "R".into(),
            other: vec![],
        },
        score_data: record.score_data,
        calculated_data: CalculatedData {
            rating,
            lamp_rating,
            game_specific: game_specific
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        },
    }
}
