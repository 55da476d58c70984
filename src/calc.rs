use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// Display coloring thresholds on the 0-100 percentage scale.
pub const GREEN_MIN: f64 = 60.0;
pub const YELLOW_MIN: f64 = 40.0;

/// Annual banding thresholds on the 0-300 point scale (sum of up to three
/// trimester grades). Distinct from the percentage scale above; see
/// `annual_points` vs `annual_score`.
pub const PASSING_POINTS: f64 = 180.0;
pub const ALERT_POINTS: f64 = 120.0;

/// A trimester's evaluations may not weigh more than this in total.
pub const TRIMESTER_WEIGHT_BUDGET: f64 = 200.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub name: String,
    pub max_value: f64,
    pub earned_grade: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Trimester {
    pub evaluations: Vec<Evaluation>,
}

#[derive(Debug, Clone)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub color_tag: String,
    /// Indexed by trimester number - 1.
    pub trimesters: [Trimester; 3],
}

impl Subject {
    pub fn trimester(&self, number: u32) -> &Trimester {
        &self.trimesters[(number - 1) as usize]
    }
}

/// Maps a wire-level trimester number to a `trimesters` slot.
/// Anything outside 1..=3 is rejected, not clamped.
pub fn trimester_index(number: i64) -> Option<usize> {
    match number {
        1..=3 => Some((number - 1) as usize),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeColor {
    Gray,
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnualBand {
    Approved,
    Alert,
    Critical,
}

/// Weighted percentage for one trimester: `100 * sum(earned) / sum(max)`.
/// `None` means "not yet gradable" (no evaluations, or all weights zero) and
/// is distinct from a true zero score.
pub fn trimester_grade(evaluations: &[Evaluation]) -> Option<f64> {
    if evaluations.is_empty() {
        return None;
    }
    let total_weight: f64 = evaluations.iter().map(|e| e.max_value).sum();
    if total_weight > 0.0 {
        let earned: f64 = evaluations.iter().map(|e| e.earned_grade).sum();
        Some(100.0 * earned / total_weight)
    } else {
        None
    }
}

/// Average of the gradable trimesters, 0-100. A subject with no evaluations
/// at all scores 0.0 rather than `None`: the dashboard treats it as critical,
/// not unknown.
pub fn annual_score(subject: &Subject) -> f64 {
    let grades: Vec<f64> = subject
        .trimesters
        .iter()
        .filter_map(|t| trimester_grade(&t.evaluations))
        .collect();
    if grades.is_empty() {
        return 0.0;
    }
    grades.iter().sum::<f64>() / grades.len() as f64
}

/// Sum of the gradable trimester grades, 0-300. This is the value the
/// 180-point passing threshold, the status band and the recovery advisor
/// operate on.
pub fn annual_points(subject: &Subject) -> f64 {
    subject
        .trimesters
        .iter()
        .filter_map(|t| trimester_grade(&t.evaluations))
        .sum()
}

/// Mean trimester grade across subjects, skipping subjects that are not yet
/// gradable for that trimester. `None` when no subject is gradable.
pub fn cohort_trimester_average(subjects: &[Subject], number: u32) -> Option<f64> {
    let grades: Vec<f64> = subjects
        .iter()
        .filter_map(|s| trimester_grade(&s.trimester(number).evaluations))
        .collect();
    if grades.is_empty() {
        return None;
    }
    Some(grades.iter().sum::<f64>() / grades.len() as f64)
}

pub fn grade_status_color(grade: Option<f64>) -> GradeColor {
    match grade {
        None => GradeColor::Gray,
        Some(g) if g >= GREEN_MIN => GradeColor::Green,
        Some(g) if g >= YELLOW_MIN => GradeColor::Yellow,
        Some(_) => GradeColor::Red,
    }
}

pub fn annual_status_band(points: f64) -> AnnualBand {
    if points >= PASSING_POINTS {
        AnnualBand::Approved
    } else if points >= ALERT_POINTS {
        AnnualBand::Alert
    } else {
        AnnualBand::Critical
    }
}

/// School-year trimester for a calendar date: Jan-Apr, May-Aug, Sep-Dec.
pub fn current_trimester(date: NaiveDate) -> u32 {
    let month = date.month();
    if month <= 4 {
        1
    } else if month <= 8 {
        2
    } else {
        3
    }
}
