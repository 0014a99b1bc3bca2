use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};

mod config;
mod db;
mod error;
mod ingest;
mod models;
mod registry;
mod report;
mod scoring;
mod telemetry;

use crate::config::AppConfig;
use crate::ingest::{ColumnMapping, ImportPolicy};
use crate::models::Scores;
use crate::registry::DimensionRegistry;
use crate::report::Delimiter;

#[derive(Parser)]
#[command(name = "grid-assessment")]
#[command(about = "Weighted performance scoring for grid leaders", long_about = None)]
struct Cli {
    /// SQLite database URL (overrides GRID_DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Dimension preset or JSON registry path (overrides GRID_DIMENSIONS)
    #[arg(long, global = true)]
    dimensions: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema and purge expired records
    InitDb,
    /// Load a small demo team
    Seed,
    /// Import assessments from a CSV or spreadsheet file
    Import {
        #[arg(long)]
        file: PathBuf,
        /// JSON column mapping; inferred from the headers when omitted
        #[arg(long, conflicts_with = "identity_mapping")]
        mapping: Option<PathBuf>,
        /// Expect the exporter's own headers (name, area, date, storage keys)
        #[arg(long)]
        identity_mapping: bool,
        /// Import valid rows and report the rest instead of rejecting the file
        #[arg(long)]
        skip_invalid: bool,
    },
    /// Record one assessment by hand, for an existing leader id or a
    /// name/area pair (created on first use)
    Add {
        #[arg(long, conflicts_with_all = ["name", "area"], required_unless_present_all = ["name", "area"])]
        leader_id: Option<i64>,
        #[arg(long, requires = "area")]
        name: Option<String>,
        #[arg(long, requires = "name")]
        area: Option<String>,
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        /// Dimension score as key=value (key or label); repeat per dimension
        #[arg(long = "score")]
        scores: Vec<String>,
    },
    /// Rewrite every score of an existing assessment
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long = "score")]
        scores: Vec<String>,
    },
    /// Register a leader without recording an assessment
    AddLeader {
        #[arg(long)]
        name: String,
        #[arg(long)]
        area: String,
    },
    /// List every leader with their id
    Leaders,
    /// Show one assessment by id, dimension by dimension
    Record {
        #[arg(long)]
        id: i64,
    },
    /// List a leader's assessments, newest first
    History {
        #[arg(long)]
        name: String,
        #[arg(long)]
        area: String,
    },
    /// Show a leader's latest scores, grade, rank and targets
    Show {
        #[arg(long)]
        name: String,
        #[arg(long)]
        area: String,
    },
    /// Rank leaders by their latest assessment
    Rank {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print the standings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare the latest assessments of several leaders
    Compare {
        #[arg(long = "leader-id", num_args = 1.., required = true)]
        leader_ids: Vec<i64>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export assessments as delimited text
    Export {
        #[arg(long, default_value = "assessment_data.csv")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = DelimiterArg::Tab)]
        delimiter: DelimiterArg,
        #[arg(long)]
        leader_id: Option<i64>,
    },
    /// Delete assessments imported more than `days` ago
    Purge {
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        days: Option<i64>,
    },
    /// Delete all leaders, assessments and targets
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Manage improvement targets
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },
    /// List the active dimensions and grade thresholds
    Dimensions,
}

#[derive(Subcommand)]
enum TargetAction {
    Set {
        #[arg(long)]
        leader_id: i64,
        #[arg(long)]
        dimension: String,
        #[arg(long)]
        score: f64,
    },
    List {
        #[arg(long)]
        leader_id: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DelimiterArg {
    Tab,
    Comma,
}

impl From<DelimiterArg> for Delimiter {
    fn from(value: DelimiterArg) -> Self {
        match value {
            DelimiterArg::Tab => Delimiter::Tab,
            DelimiterArg::Comma => Delimiter::Comma,
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    ingest::parse_assessment_date(raw)
        .ok_or_else(|| format!("`{raw}` is not YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"))
}

/// Parses repeated `key=value` arguments; keys may be storage keys or labels.
fn parse_scores(pairs: &[String], registry: &DimensionRegistry) -> anyhow::Result<Scores> {
    let mut scores = Scores::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("score `{pair}` must look like key=value"))?;
        let name = name.trim();
        let key = if registry.contains_key(name) {
            name
        } else {
            registry
                .key_for_label(name)
                .with_context(|| format!("unknown dimension `{name}`"))?
        };
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("score for `{key}` is not a number"))?;
        scores.insert(key.to_string(), value);
    }
    Ok(scores)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().context("invalid configuration")?;
    telemetry::init(&config.log_level)?;

    let dimensions = cli.dimensions.as_deref().unwrap_or(&config.dimensions);
    let registry = DimensionRegistry::load(dimensions)
        .with_context(|| format!("failed to load dimensions from `{dimensions}`"))?;

    let database_url = cli.database_url.as_deref().unwrap_or(&config.database_url);
    let pool = db::connect(database_url)
        .await
        .with_context(|| format!("failed to open database {database_url}"))?;
    db::init_db(&pool, &registry)
        .await
        .context("failed to prepare database schema")?;

    match cli.command {
        Commands::InitDb => {
            let cutoff = scoring::cutoff_date(config.retention_days)?;
            let removed = db::purge_older_than(&pool, cutoff).await?;
            println!("Schema ready. Purged {removed} records imported before {cutoff}.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool, &registry).await?;
            println!("Inserted {inserted} demo assessments.");
        }
        Commands::Import {
            file,
            mapping,
            identity_mapping,
            skip_invalid,
        } => {
            let table = ingest::read_table(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let mapping = match mapping {
                Some(path) => ColumnMapping::from_json_file(&path)?,
                None if identity_mapping => ColumnMapping::identity(&registry),
                None => ColumnMapping::infer(&registry, &table.headers),
            };
            let policy = if skip_invalid {
                ImportPolicy::SkipInvalid
            } else {
                ImportPolicy::AllOrNothing
            };

            let summary = ingest::reconcile(&pool, &registry, &table, &mapping, policy).await?;
            println!(
                "Imported {} assessments and {} new leaders from {}.",
                summary.records_created,
                summary.leaders_created,
                file.display()
            );
            for issue in &summary.skipped {
                println!("- skipped {issue}");
            }
        }
        Commands::Add {
            leader_id,
            name,
            area,
            date,
            scores,
        } => {
            let scores = parse_scores(&scores, &registry)?;
            let (leader, record) = match (leader_id, name, area) {
                (Some(id), _, _) => {
                    let leader = db::get_leader(&pool, id).await?;
                    let record = db::add_score_record(&pool, &registry, id, date, &scores).await?;
                    (leader, record)
                }
                (None, Some(name), Some(area)) => {
                    db::record_assessment(&pool, &registry, &name, &area, date, &scores).await?
                }
                _ => bail!("pass --leader-id or both --name and --area"),
            };
            let result = scoring::score(&record.scores, &registry);
            println!(
                "Recorded assessment #{} for {} ({}) on {}: {:.2} {}",
                record.id, leader.name, leader.area, record.date, result.total, result.grade
            );
        }
        Commands::Update { id, scores } => {
            let scores = parse_scores(&scores, &registry)?;
            let record = db::update_score_record(&pool, &registry, id, &scores).await?;
            let result = scoring::score(&record.scores, &registry);
            println!(
                "Updated assessment #{}: {:.2} {}",
                record.id, result.total, result.grade
            );
        }
        Commands::AddLeader { name, area } => {
            let leader = db::upsert_leader(&pool, &name, &area).await?;
            println!("Leader #{}: {} ({}).", leader.id, leader.name, leader.area);
        }
        Commands::Leaders => {
            let leaders = db::list_leaders(&pool).await?;
            if leaders.is_empty() {
                println!("No leaders recorded.");
            }
            for leader in &leaders {
                println!("{:>4} {} ({})", leader.id, leader.name, leader.area);
            }
        }
        Commands::Record { id } => {
            let record = db::get_record(&pool, &registry, id).await?;
            let leader = db::get_leader(&pool, record.leader_id).await?;
            println!(
                "#{} {} ({}) on {}, imported {}",
                record.id, leader.name, leader.area, record.date, record.import_date
            );
            for dim in registry.dimensions() {
                match record.scores.get(&dim.key) {
                    Some(value) => println!("- {}: {:.2} (x{:.4})", dim.label, value, dim.weight),
                    None => println!("- {}: n/a (x{:.4})", dim.label, dim.weight),
                }
            }
            let result = scoring::score(&record.scores, &registry);
            println!("Total: {:.2} {}", result.total, result.grade);
        }
        Commands::History { name, area } => {
            let leader = db::find_leader(&pool, &name, &area)
                .await?
                .with_context(|| format!("no leader named {name} in {area}"))?;
            let records = db::list_records(&pool, &registry, leader.id).await?;
            if records.is_empty() {
                println!("No assessments recorded for {name} ({area}).");
                return Ok(());
            }
            for record in &records {
                let result = scoring::score(&record.scores, &registry);
                println!(
                    "#{} {} imported {}: {:.2} {}",
                    record.id, record.date, record.import_date, result.total, result.grade
                );
            }
        }
        Commands::Show { name, area } => {
            let leader = db::find_leader(&pool, &name, &area)
                .await?
                .with_context(|| format!("no leader named {name} in {area}"))?;
            let history = db::list_records(&pool, &registry, leader.id).await?;
            let everyone = db::latest_per_leader(&pool, &registry).await?;
            let targets = db::list_targets(&pool, leader.id).await?;
            print!(
                "{}",
                report::build_leader_detail(&registry, &leader, &history, &everyone, &targets)
            );
        }
        Commands::Rank { limit, json } => {
            let latest = db::latest_per_leader(&pool, &registry).await?;
            let standings = scoring::rank(&latest, &registry);
            if json {
                let top: Vec<_> = standings.into_iter().take(limit).collect();
                println!("{}", serde_json::to_string_pretty(&top)?);
                return Ok(());
            }
            if standings.is_empty() {
                println!("No assessments recorded.");
                return Ok(());
            }
            println!("Leaders by latest total score:");
            for standing in standings.iter().take(limit) {
                println!(
                    "{:>3}. {} ({}) {:.2} {} [{}]",
                    standing.rank,
                    standing.leader.name,
                    standing.leader.area,
                    standing.result.total,
                    standing.result.grade,
                    standing.date
                );
            }
        }
        Commands::Compare { leader_ids } => {
            let latest = db::latest_per_leader(&pool, &registry).await?;
            let mut selected = Vec::with_capacity(leader_ids.len());
            for id in &leader_ids {
                let assessment = latest
                    .iter()
                    .find(|a| a.leader.id == *id)
                    .with_context(|| format!("leader {id} has no assessments"))?;
                selected.push(assessment.clone());
            }
            print!("{}", report::build_comparison(&registry, &selected));
        }
        Commands::Report { out } => {
            let latest = db::latest_per_leader(&pool, &registry).await?;
            let report = report::build_report(&registry, &latest, Local::now().date_naive());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export {
            out,
            delimiter,
            leader_id,
        } => {
            let rows = db::all_records(&pool, &registry, leader_id).await?;
            if rows.is_empty() {
                println!("No assessments to export.");
                return Ok(());
            }
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::export_records(file, &registry, &rows, delimiter.into())?;
            println!("Exported {} assessments to {}.", rows.len(), out.display());
        }
        Commands::Purge { days } => {
            let cutoff = scoring::cutoff_date(days.unwrap_or(config.retention_days))?;
            let removed = db::purge_older_than(&pool, cutoff).await?;
            println!("Removed {removed} assessments imported before {cutoff}.");
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("refusing to delete all data without --yes");
            }
            db::reset_all(&pool).await?;
            println!("All leaders and assessments deleted.");
        }
        Commands::Target { action } => match action {
            TargetAction::Set {
                leader_id,
                dimension,
                score,
            } => {
                let key = if registry.contains_key(&dimension) {
                    dimension.as_str()
                } else {
                    registry
                        .key_for_label(&dimension)
                        .with_context(|| format!("unknown dimension `{dimension}`"))?
                };
                let target = db::set_target(&pool, &registry, leader_id, key, score).await?;
                let weight = registry.weight(&target.dimension).unwrap_or_default();
                println!(
                    "Target for leader {} on {} (weight {:.4}) set to {:.2}.",
                    target.leader_id, target.dimension, weight, target.target_score
                );
            }
            TargetAction::List { leader_id } => {
                let leader = db::get_leader(&pool, leader_id).await?;
                let targets = db::list_targets(&pool, leader.id).await?;
                if targets.is_empty() {
                    println!("No targets saved for {} ({}).", leader.name, leader.area);
                }
                for target in &targets {
                    println!("- {}: {:.2}", target.dimension, target.target_score);
                }
            }
        },
        Commands::Dimensions => {
            for dim in registry.dimensions() {
                println!("{:<40} {:<38} {:.4}", dim.label, dim.key, dim.weight);
            }
            for band in registry.thresholds().bands() {
                println!("{} >= {}", band.grade, band.min);
            }
        }
    }

    Ok(())
}
