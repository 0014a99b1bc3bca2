use chrono::{Local, NaiveDate, TimeDelta};

use crate::error::ValidationError;

use crate::models::{AssessmentResult, LeaderAssessment, Scores, Standing, WeakDimension};
use crate::registry::DimensionRegistry;

/// Weighted total over every registry dimension. Missing scores count as 0
/// and weights are never renormalized.
pub fn total_score(scores: &Scores, registry: &DimensionRegistry) -> f64 {
    registry
        .dimensions()
        .iter()
        .map(|dim| scores.get(&dim.key).copied().unwrap_or(0.0) * dim.weight)
        .sum()
}

pub fn score(scores: &Scores, registry: &DimensionRegistry) -> AssessmentResult {
    let total = total_score(scores, registry);
    AssessmentResult {
        total,
        grade: registry.thresholds().grade_for(total),
    }
}

/// Ranks leaders by the total of the assessment given for each, best first.
pub fn rank(assessments: &[LeaderAssessment], registry: &DimensionRegistry) -> Vec<Standing> {
    let mut standings: Vec<Standing> = assessments
        .iter()
        .map(|assessment| Standing {
            rank: 0,
            leader: assessment.leader.clone(),
            date: assessment.record.date,
            result: score(&assessment.record.scores, registry),
        })
        .collect();

    standings.sort_by(|a, b| {
        b.result
            .total
            .total_cmp(&a.result.total)
            .then_with(|| a.leader.name.cmp(&b.leader.name))
            .then_with(|| a.leader.area.cmp(&b.leader.area))
    });
    for (index, standing) in standings.iter_mut().enumerate() {
        standing.rank = index + 1;
    }
    standings
}

/// The `limit` lowest scoring dimensions, lowest first, ties in registry order.
pub fn weakest_dimensions(
    scores: &Scores,
    registry: &DimensionRegistry,
    limit: usize,
) -> Vec<WeakDimension> {
    let mut dims: Vec<WeakDimension> = registry
        .dimensions()
        .iter()
        .map(|dim| WeakDimension {
            key: dim.key.clone(),
            label: dim.label.clone(),
            score: scores.get(&dim.key).copied().unwrap_or(0.0),
            tips: dim.tips.clone(),
        })
        .collect();
    dims.sort_by(|a, b| a.score.total_cmp(&b.score));
    dims.truncate(limit);
    dims
}

/// Start of a retention window `days` long, ending today. `days` must be
/// positive and land inside chrono's calendar.
pub fn cutoff_date(days: i64) -> Result<NaiveDate, ValidationError> {
    if days < 1 {
        return Err(ValidationError::RetentionOutOfRange(days));
    }
    TimeDelta::try_days(days)
        .and_then(|window| Local::now().date_naive().checked_sub_signed(window))
        .ok_or(ValidationError::RetentionOutOfRange(days))
}
