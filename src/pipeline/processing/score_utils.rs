//! Percent and grade derivation shared by the converters.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};

use super::converters::ConverterFailure;
use crate::domain::game_config::ScoreScale;
use crate::domain::{Chart, GamePtConfig};

/// Convert a raw score into a percentage using the game's score scale.
pub fn calculate_percent(
    gpt: &GamePtConfig,
    score: f64,
    chart: &Chart,
) -> Result<f64, ConverterFailure> {
    let percent = match gpt.score_scale {
        ScoreScale::OutOf(max) => score / max * 100.0,
        ScoreScale::Percent => score,
        ScoreScale::NotecountEx => {
            let notecount = chart.data.notecount.filter(|n| *n > 0).ok_or_else(|| {
                ConverterFailure::Internal(format!(
                    "chart {} has no notecount to derive a percent from",
                    chart.chart_id
                ))
            })?;
            100.0 * score / (f64::from(notecount) * 2.0)
        }
    };

    Ok(percent)
}

/// Reject percentages outside `[0, percent_max]`.
pub fn validate_percent(gpt: &GamePtConfig, percent: f64) -> Result<(), ConverterFailure> {
    if !percent.is_finite() || percent < 0.0 {
        return Err(ConverterFailure::invalid(format!(
            "Invalid percent of {}.",
            percent
        )));
    }
    if percent > gpt.percent_max {
        return Err(ConverterFailure::invalid(format!(
            "Invalid percent of {:.2}, expected a maximum of {}.",
            percent, gpt.percent_max
        )));
    }
    Ok(())
}

/// The highest grade whose boundary `percent` reaches.
pub fn grade_from_percent(gpt: &GamePtConfig, percent: f64) -> Option<&'static str> {
    gpt.grade_boundaries
        .iter()
        .zip(gpt.grades.iter())
        .rev()
        .find(|(boundary, _)| percent + f64::EPSILON >= **boundary)
        .map(|(_, grade)| *grade)
}

/// Percent and grade for a raw score, validating the percent along the way.
pub fn generic_grade_and_percent(
    gpt: &GamePtConfig,
    score: f64,
    chart: &Chart,
) -> Result<(f64, String), ConverterFailure> {
    let percent = calculate_percent(gpt, score, chart)?;
    validate_percent(gpt, percent)?;
    let grade = grade_from_percent(gpt, percent).ok_or_else(|| {
        ConverterFailure::Internal(format!("no grade reachable for percent {}", percent))
    })?;
    Ok((percent, grade.to_string()))
}

/// Parse a timestamp in a fixed source timezone into unix milliseconds.
pub fn parse_local_timestamp(raw: &str, format: &str, utc_offset_hours: i32) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), format).ok()?;
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)?;
    let local: DateTime<FixedOffset> = offset.from_local_datetime(&naive).single()?;
    Some(local.timestamp_millis())
}

/// Parse an RFC 3339 timestamp into unix milliseconds.
pub fn parse_rfc3339_millis(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.timestamp_millis())
}
