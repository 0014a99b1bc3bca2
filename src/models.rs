use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::registry::Grade;

/// Dimension scores keyed by storage key. Absent keys carry no value.
pub type Scores = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leader {
    pub id: i64,
    pub name: String,
    pub area: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub id: i64,
    pub leader_id: i64,
    pub date: NaiveDate,
    pub scores: Scores,
    pub import_date: NaiveDate,
}

/// A score record together with the leader it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderAssessment {
    pub leader: Leader,
    pub record: ScoreRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AssessmentResult {
    pub total: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub rank: usize,
    pub leader: Leader,
    pub date: NaiveDate,
    pub result: AssessmentResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeakDimension {
    pub key: String,
    pub label: String,
    pub score: f64,
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImprovementTarget {
    pub leader_id: i64,
    pub dimension: String,
    pub target_score: f64,
}
