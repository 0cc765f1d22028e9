//! Game-specific formulas. Each is a port of the statistic its community uses.

/// Default BPI power coefficient when a chart does not define its own.
pub const DEFAULT_BPI_COEFFICIENT: f64 = 1.175;
const BPI_FLOOR: f64 = -15.0;

fn pika_great(score: f64, max: f64) -> f64 {
    if score >= max {
        max * 0.8
    } else {
        1.0 + (score / max - 0.5) / (1.0 - score / max)
    }
}

/// Beat Performance Index of an EX score against kaiden average and world record.
/// `None` when the inputs cannot produce a finite value.
pub fn bpi(kaiden_ex: f64, wr_ex: f64, your_ex: f64, max_ex: f64, coefficient: Option<f64>) -> Option<f64> {
    // Some reference data stores -1 for "unset".
    let pow = match coefficient {
        Some(c) if c > 0.0 => c,
        _ => DEFAULT_BPI_COEFFICIENT,
    };

    let kaiden_pgf = pika_great(kaiden_ex, max_ex);
    let s = pika_great(your_ex, max_ex) / kaiden_pgf;
    let z = pika_great(wr_ex, max_ex) / kaiden_pgf;

    let better = your_ex >= kaiden_ex;
    let sign = if better { 100.0 } else { -100.0 };
    let ln_s = if better { s.ln() } else { -s.ln() };

    let raw = sign * (ln_s / z.ln()).powf(pow);
    let value = (raw * 100.0).round() / 100.0;

    if value.is_finite() {
        Some(value.max(BPI_FLOOR))
    } else {
        None
    }
}

/// Percent of the reference population scoring strictly below `score`.
pub fn percentile_below(score: f64, population: &[f64]) -> Option<f64> {
    if population.is_empty() {
        return None;
    }
    let worse = population.iter().filter(|s| **s < score).count();
    Some(100.0 * worse as f64 / population.len() as f64)
}

/// LIFE4 marvelous full combo points.
pub fn mfcp(lamp: &str, difficulty: &str, level: f64) -> Option<f64> {
    if lamp != "MARVELOUS FULL COMBO" || difficulty == "BEGINNER" || difficulty == "BASIC" {
        return None;
    }

    let points = match level.floor() as i64 {
        l if l < 8 => return None,
        8..=10 => 1.0,
        11 | 12 => 2.0,
        13 => 4.0,
        14 => 8.0,
        15 => 15.0,
        _ => 25.0,
    };
    Some(points)
}

fn vf6_grade_coefficient(grade: &str) -> Option<f64> {
    Some(match grade {
        "PUC" | "S" => 1.05,
        "AAA+" => 1.02,
        "AAA" => 1.0,
        "AA+" => 0.97,
        "AA" => 0.94,
        "A+" => 0.91,
        "A" => 0.88,
        "B" => 0.85,
        "C" => 0.82,
        "D" => 0.8,
        _ => return None,
    })
}

fn vf6_lamp_coefficient(lamp: &str) -> Option<f64> {
    Some(match lamp {
        "PERFECT ULTIMATE CHAIN" => 1.1,
        "ULTIMATE CHAIN" => 1.05,
        "EXCESSIVE CLEAR" => 1.02,
        "CLEAR" => 1.0,
        "FAILED" => 0.5,
        _ => return None,
    })
}

/// SDVX VOLFORCE (VI) contribution of a single chart, floored to 3dp.
pub fn vf6(level: f64, percent: f64, grade: &str, lamp: &str) -> Option<f64> {
    let grade_coef = vf6_grade_coefficient(grade)?;
    let lamp_coef = vf6_lamp_coefficient(lamp)?;
    let raw = level * (percent / 100.0) * grade_coef * lamp_coef * 20.0;
    Some(raw.floor() / 1000.0)
}

/// CHUNITHM play rating.
pub fn chunithm_rating(score: f64, level: f64) -> f64 {
    let base = level * 100.0;

    let val = if score >= 1_007_500.0 {
        base + 200.0
    } else if score >= 1_005_000.0 {
        base + 150.0 + (score - 1_005_000.0) * 10.0 / 500.0
    } else if score >= 1_000_000.0 {
        base + 100.0 + (score - 1_000_000.0) * 5.0 / 500.0
    } else if score >= 975_000.0 {
        base + (score - 975_000.0) * 2.0 / 500.0
    } else if score >= 925_000.0 {
        base - 300.0 + (score - 925_000.0) * 3.0 / 500.0
    } else if score >= 900_000.0 {
        base - 500.0 + (score - 900_000.0) * 4.0 / 500.0
    } else if score >= 800_000.0 {
        (base - 500.0) / 2.0 + (score - 800_000.0) * ((base - 500.0) / 2.0) / 100_000.0
    } else {
        0.0
    };

    (val.floor() / 100.0).max(0.0)
}

/// GITADORA skill points.
pub fn gitadora_skill(percent: f64, level: f64) -> f64 {
    let skill = (percent / 100.0) * level * 20.0;
    (skill * 100.0).floor() / 100.0
}
