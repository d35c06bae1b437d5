use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const MOCK_TEST_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockTest {
    pub score: f64,
    pub out_of: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: i64,
    pub name: String,
    pub student_class: String,
    pub phone: String,
    pub guardian_phone: String,
    pub school: String,
    pub mocks: [MockTest; MOCK_TEST_COUNT],
    /// Derived from `mocks` on every load; never a source of truth.
    pub percentage: f64,
}

/// A record annotated with a rank for one specific scope. Rank is transient:
/// the same student can hold a different rank in a different scope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    #[serde(flatten)]
    pub student: StudentRecord,
    pub rank: i64,
}

/// Coercion contract for raw score fields: numbers pass through, numeric
/// strings parse, everything else (missing, null, garbage) becomes 0.0.
pub fn coerce_score(raw: &serde_json::Value) -> f64 {
    if let Some(n) = raw.as_f64() {
        return n;
    }
    raw.as_str()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Overall percentage across the mock tests, rounded to 2 decimals.
/// A zero full-mark total is defined as 0, not an error. Scores above the
/// full marks pass through unclamped; sanitizing caller input is not this
/// function's job.
pub fn percentage(mocks: &[MockTest]) -> f64 {
    let obtained: f64 = mocks.iter().map(|m| m.score).sum();
    let full: f64 = mocks.iter().map(|m| m.out_of).sum();
    if full > 0.0 {
        round_2(100.0 * obtained / full)
    } else {
        0.0
    }
}

/// Dense ranking over one scope: sort descending by percentage (stable, so
/// tied records keep their input order), then walk the sorted sequence
/// incrementing the rank only when the percentage changes. Ties share a
/// rank and the next distinct value takes rank + 1, never rank + tie_count.
pub fn rank_by_percentage(mut students: Vec<StudentRecord>) -> Vec<RankedStudent> {
    students.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
    });

    let mut ranked = Vec::with_capacity(students.len());
    let mut current_rank = 0_i64;
    let mut last_percentage: Option<f64> = None;
    for student in students {
        if last_percentage != Some(student.percentage) {
            current_rank += 1;
        }
        last_percentage = Some(student.percentage);
        ranked.push(RankedStudent {
            student,
            rank: current_rank,
        });
    }
    ranked
}

/// Filter-dropdown ordering: labels that parse as integers come first in
/// numeric order, everything else follows lexically.
pub fn compare_class_labels(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Ordinal decoration consumed by the rank-card model.
pub fn rank_badge(rank: i64) -> Option<&'static str> {
    match rank {
        1 => Some("gold"),
        2 => Some("silver"),
        3 => Some("bronze"),
        _ => None,
    }
}
