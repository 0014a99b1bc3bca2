use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{ImprovementTarget, Leader, LeaderAssessment, ScoreRecord};
use crate::registry::{DimensionRegistry, Grade};
use crate::scoring;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    fn byte(self) -> u8 {
        match self {
            Delimiter::Tab => b'\t',
            Delimiter::Comma => b',',
        }
    }
}

/// Writes one row per record with the leader's name and area joined in.
/// Missing scores are written as empty cells.
pub fn export_records<W: std::io::Write>(
    writer: W,
    registry: &DimensionRegistry,
    assessments: &[LeaderAssessment],
    delimiter: Delimiter,
) -> Result<(), csv::Error> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(delimiter.byte())
        .from_writer(writer);

    let mut header = vec!["id", "leader_id", "name", "area", "date"];
    header.extend(registry.keys());
    header.push("import_date");
    out.write_record(&header)?;

    for assessment in assessments {
        let record = &assessment.record;
        let mut row = vec![
            record.id.to_string(),
            record.leader_id.to_string(),
            assessment.leader.name.clone(),
            assessment.leader.area.clone(),
            record.date.to_string(),
        ];
        row.extend(
            registry
                .keys()
                .map(|key| record.scores.get(key).map(f64::to_string).unwrap_or_default()),
        );
        row.push(record.import_date.to_string());
        out.write_record(&row)?;
    }

    out.flush()?;
    Ok(())
}

pub fn summarize_by_grade(
    assessments: &[LeaderAssessment],
    registry: &DimensionRegistry,
) -> Vec<(Grade, usize)> {
    let mut counts: BTreeMap<Grade, usize> = BTreeMap::new();
    for assessment in assessments {
        let grade = scoring::score(&assessment.record.scores, registry).grade;
        *counts.entry(grade).or_insert(0) += 1;
    }
    counts.into_iter().rev().collect()
}

/// Markdown report over each leader's latest assessment: ranking, grade mix,
/// then one section per leader with one line per dimension.
pub fn build_report(
    registry: &DimensionRegistry,
    assessments: &[LeaderAssessment],
    generated_on: NaiveDate,
) -> String {
    let standings = scoring::rank(assessments, registry);
    let grades = summarize_by_grade(assessments, registry);

    let mut output = String::new();
    let _ = writeln!(output, "# Grid Leader Assessment Report");
    let _ = writeln!(
        output,
        "Generated on {} across {} dimensions",
        generated_on,
        registry.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Ranking");

    if standings.is_empty() {
        let _ = writeln!(output, "No assessments recorded.");
        return output;
    }

    let _ = writeln!(output, "| Rank | Leader | Area | Date | Total | Grade |");
    let _ = writeln!(output, "| --- | --- | --- | --- | --- | --- |");
    for standing in &standings {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {:.2} | {} |",
            standing.rank,
            standing.leader.name,
            standing.leader.area,
            standing.date,
            standing.result.total,
            standing.result.grade
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Mix");
    for (grade, count) in &grades {
        let _ = writeln!(output, "- {}: {} leader(s)", grade, count);
    }

    for standing in &standings {
        let Some(assessment) = assessments
            .iter()
            .find(|a| a.leader.id == standing.leader.id)
        else {
            continue;
        };
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "## {} ({})",
            assessment.leader.name, assessment.leader.area
        );
        let _ = writeln!(output, "Assessment date: {}", assessment.record.date);
        let _ = writeln!(output);
        write_dimension_lines(&mut output, registry, &assessment.record);
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Total: {:.2} ({})",
            standing.result.total, standing.result.grade
        );

        let weakest = scoring::weakest_dimensions(&assessment.record.scores, registry, 3);
        let _ = writeln!(output);
        let _ = writeln!(output, "Focus areas:");
        for dim in weakest {
            let tips = if dim.tips.is_empty() {
                String::new()
            } else {
                format!(": {}", dim.tips.join("; "))
            };
            let _ = writeln!(output, "- {} ({:.2}){}", dim.label, dim.score, tips);
        }
    }

    output
}

fn write_dimension_lines(output: &mut String, registry: &DimensionRegistry, record: &ScoreRecord) {
    for dim in registry.dimensions() {
        match record.scores.get(&dim.key) {
            Some(value) => {
                let _ = writeln!(output, "- {}: {:.2}", dim.label, value);
            }
            None => {
                let _ = writeln!(output, "- {}: n/a", dim.label);
            }
        }
    }
}

/// Single-leader view: latest scores, standing among all leaders, history
/// and saved targets.
pub fn build_leader_detail(
    registry: &DimensionRegistry,
    leader: &Leader,
    history: &[ScoreRecord],
    everyone: &[LeaderAssessment],
    targets: &[ImprovementTarget],
) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Leader: {} - {}", leader.name, leader.area);

    let Some(latest) = history.first() else {
        let _ = writeln!(output, "No assessments recorded for this leader.");
        return output;
    };

    let result = scoring::score(&latest.scores, registry);
    let _ = writeln!(output, "Assessment date: {}", latest.date);
    write_dimension_lines(&mut output, registry, latest);
    let _ = writeln!(output, "Total: {:.2}", result.total);
    let _ = writeln!(output, "Grade: {}", result.grade);

    let standings = scoring::rank(everyone, registry);
    if let Some(standing) = standings.iter().find(|s| s.leader.id == leader.id) {
        let _ = writeln!(output, "Rank: {} of {}", standing.rank, standings.len());
    }

    if history.len() > 1 {
        let _ = writeln!(output);
        let _ = writeln!(output, "History:");
        for record in history {
            let past = scoring::score(&record.scores, registry);
            let _ = writeln!(
                output,
                "- {} (#{}) {:.2} {}",
                record.date, record.id, past.total, past.grade
            );
        }
    }

    if !targets.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Targets:");
        for target in targets {
            let label = registry
                .get(&target.dimension)
                .map(|dim| dim.label.as_str())
                .unwrap_or(target.dimension.as_str());
            let current = latest.scores.get(&target.dimension).copied().unwrap_or(0.0);
            let _ = writeln!(
                output,
                "- {}: {:.2} -> {:.2} (gap {:.2})",
                label,
                current,
                target.target_score,
                (target.target_score - current).max(0.0)
            );
        }
    }

    output
}

/// Side-by-side dimension table for a handful of leaders.
pub fn build_comparison(registry: &DimensionRegistry, assessments: &[LeaderAssessment]) -> String {
    let mut output = String::new();
    if assessments.is_empty() {
        let _ = writeln!(output, "No assessments to compare.");
        return output;
    }

    let names: Vec<String> = assessments
        .iter()
        .map(|a| format!("{} ({})", a.leader.name, a.leader.area))
        .collect();
    let _ = writeln!(output, "| Dimension | {} |", names.join(" | "));
    let _ = writeln!(
        output,
        "| --- |{}",
        " --- |".repeat(assessments.len())
    );

    for dim in registry.dimensions() {
        let cells: Vec<String> = assessments
            .iter()
            .map(|a| format!("{:.2}", a.record.scores.get(&dim.key).copied().unwrap_or(0.0)))
            .collect();
        let _ = writeln!(output, "| {} | {} |", dim.label, cells.join(" | "));
    }

    let totals: Vec<String> = assessments
        .iter()
        .map(|a| {
            let result = scoring::score(&a.record.scores, registry);
            format!("{:.2} ({})", result.total, result.grade)
        })
        .collect();
    let _ = writeln!(output, "| Total | {} |", totals.join(" | "));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::tests::memory_pool;
    use crate::ingest::{self, ColumnMapping, ImportPolicy};
    use crate::models::Scores;
    use crate::registry;

    fn assessment(id: i64, name: &str, pairs: &[(&str, f64)]) -> LeaderAssessment {
        let date = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        LeaderAssessment {
            leader: Leader {
                id,
                name: name.to_string(),
                area: format!("Grid {id}"),
            },
            record: ScoreRecord {
                id: id * 10,
                leader_id: id,
                date,
                scores: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                import_date: date,
            },
        }
    }

    #[test]
    fn export_writes_header_and_blank_missing_scores() {
        let registry = registry::simplified().unwrap();
        let rows = vec![assessment(1, "Avery", &[("professional_skill", 88.5)])];
        let mut buffer = Vec::new();
        export_records(&mut buffer, &registry, &rows, Delimiter::Tab).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id\tleader_id\tname\tarea\tdate\tprofessional_skill\tindex_mastery\t\
             management_execution\tcommunication_coordination\tmarketing_ability\timport_date"
        );
        assert_eq!(
            lines.next().unwrap(),
            "10\t1\tAvery\tGrid 1\t2025-06-30\t88.5\t\t\t\t\t2025-06-30"
        );
    }

    #[test]
    fn report_has_a_section_per_leader() {
        let registry = registry::simplified().unwrap();
        let rows = vec![
            assessment(1, "Avery", &[("professional_skill", 95.0), ("index_mastery", 90.0)]),
            assessment(
                2,
                "Jules",
                &[
                    ("professional_skill", 95.0),
                    ("index_mastery", 95.0),
                    ("management_execution", 95.0),
                    ("communication_coordination", 95.0),
                    ("marketing_ability", 95.0),
                ],
            ),
        ];
        let report = build_report(&registry, &rows, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());

        assert!(report.contains("| 1 | Jules | Grid 2 | 2025-06-30 | 95.00 | Excellent |"));
        assert!(report.contains("| 2 | Avery | Grid 1 | 2025-06-30 | 46.50 | NeedsImprovement |"));
        assert!(report.contains("## Avery (Grid 1)"));
        assert!(report.contains("## Jules (Grid 2)"));
        assert!(report.contains("- Marketing ability: n/a"));
        assert!(report.contains("- Excellent: 1 leader(s)"));
        assert!(report.find("## Jules").unwrap() < report.find("## Avery").unwrap());
    }

    #[test]
    fn empty_report_says_so() {
        let registry = registry::simplified().unwrap();
        let report = build_report(&registry, &[], NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert!(report.contains("No assessments recorded."));
    }

    #[test]
    fn comparison_lists_every_dimension() {
        let registry = registry::simplified().unwrap();
        let rows = vec![
            assessment(1, "Avery", &[("professional_skill", 80.0)]),
            assessment(2, "Jules", &[("index_mastery", 70.0)]),
        ];
        let table = build_comparison(&registry, &rows);
        assert!(table.starts_with("| Dimension | Avery (Grid 1) | Jules (Grid 2) |"));
        assert!(table.contains("| Professional skill | 80.00 | 0.00 |"));
        assert!(table.contains("| Total | 24.00 (NeedsImprovement) | 14.00 (NeedsImprovement) |"));
    }

    #[test]
    fn leader_detail_shows_rank_and_target_gap() {
        let registry = registry::simplified().unwrap();
        let everyone = vec![
            assessment(1, "Avery", &[("professional_skill", 80.0)]),
            assessment(2, "Jules", &[("professional_skill", 90.0)]),
        ];
        let targets = vec![ImprovementTarget {
            leader_id: 1,
            dimension: "professional_skill".to_string(),
            target_score: 85.0,
        }];
        let detail = build_leader_detail(
            &registry,
            &everyone[0].leader,
            &[everyone[0].record.clone()],
            &everyone,
            &targets,
        );
        assert!(detail.contains("Rank: 2 of 2"));
        assert!(detail.contains("- Professional skill: 80.00 -> 85.00 (gap 5.00)"));
    }

    #[tokio::test]
    async fn export_then_reimport_reproduces_totals() {
        let registry = registry::operational().unwrap();
        let source_pool = memory_pool(&registry).await;
        db::seed(&source_pool, &registry).await.unwrap();
        let leader = db::upsert_leader(&source_pool, "Partial Data", "East Grid")
            .await
            .unwrap();
        let partial: Scores = [("terminal_revenue".to_string(), 42.25)].into_iter().collect();
        db::add_score_record(
            &source_pool,
            &registry,
            leader.id,
            NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
            &partial,
        )
        .await
        .unwrap();

        let exported = db::all_records(&source_pool, &registry, None).await.unwrap();
        let mut buffer = Vec::new();
        export_records(&mut buffer, &registry, &exported, Delimiter::Comma).unwrap();

        let table = ingest::read_csv_from_reader(buffer.as_slice(), b',').unwrap();
        let target_pool = memory_pool(&registry).await;
        ingest::reconcile(
            &target_pool,
            &registry,
            &table,
            &ColumnMapping::identity(&registry),
            ImportPolicy::AllOrNothing,
        )
        .await
        .unwrap();

        let totals = |rows: Vec<LeaderAssessment>| -> BTreeMap<(String, String), f64> {
            rows.into_iter()
                .map(|a| {
                    let total = scoring::total_score(&a.record.scores, &registry);
                    ((a.leader.name, a.leader.area), total)
                })
                .collect()
        };
        let before = totals(db::latest_per_leader(&source_pool, &registry).await.unwrap());
        let after = totals(db::latest_per_leader(&target_pool, &registry).await.unwrap());
        assert_eq!(before.len(), 4);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reimport_keeps_latest_among_same_date_records() {
        let registry = registry::simplified().unwrap();
        let source_pool = memory_pool(&registry).await;
        let leader = db::upsert_leader(&source_pool, "Avery", "North").await.unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        for value in [10.0, 90.0] {
            let scores: Scores = [("professional_skill".to_string(), value)].into_iter().collect();
            db::add_score_record(&source_pool, &registry, leader.id, day, &scores)
                .await
                .unwrap();
        }

        let exported = db::all_records(&source_pool, &registry, None).await.unwrap();
        let mut buffer = Vec::new();
        export_records(&mut buffer, &registry, &exported, Delimiter::Comma).unwrap();

        let table = ingest::read_csv_from_reader(buffer.as_slice(), b',').unwrap();
        let target_pool = memory_pool(&registry).await;
        ingest::reconcile(
            &target_pool,
            &registry,
            &table,
            &ColumnMapping::identity(&registry),
            ImportPolicy::AllOrNothing,
        )
        .await
        .unwrap();

        let latest_total = |rows: Vec<LeaderAssessment>| {
            scoring::total_score(&rows[0].record.scores, &registry)
        };
        let before = latest_total(db::latest_per_leader(&source_pool, &registry).await.unwrap());
        let after = latest_total(db::latest_per_leader(&target_pool, &registry).await.unwrap());
        assert!((before - 27.0).abs() < 1e-9);
        assert!((after - before).abs() < 1e-9);
    }
}
