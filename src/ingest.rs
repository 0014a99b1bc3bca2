use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db;
use crate::error::{ConfigError, IngestError, RowIssue, SourceError};
use crate::models::Scores;
use crate::registry::DimensionRegistry;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAME_ALIASES: &[&str] = &["name", "leader", "姓名"];
const AREA_ALIASES: &[&str] = &["area", "grid", "辖区"];
const DATE_ALIASES: &[&str] = &["date", "assessment_date", "评估日期", "日期"];

/// A parsed tabular source with string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<SourceRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// 1-based line (or sheet row) the cells came from.
    pub line: usize,
    pub cells: Vec<String>,
}

impl SourceRow {
    fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(|c| c.trim()).unwrap_or("")
    }
}

pub fn read_table(path: &Path) -> Result<SourceTable, SourceError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "csv" | "tsv" | "txt" => read_csv(path),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook(path),
        other => Err(SourceError::UnsupportedFormat(other.to_string())),
    }
}

pub fn read_csv(path: &Path) -> Result<SourceTable, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let delimiter = if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"))
    {
        b'\t'
    } else {
        b','
    };
    read_csv_from_reader(file, delimiter)
}

/// Reads delimited text that is either UTF-8 or GBK (which covers GB2312).
pub fn read_csv_from_reader<R: Read>(
    mut reader: R,
    delimiter: u8,
) -> Result<SourceTable, SourceError> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let text = decode_source(&raw)?;
    read_delimited(text.as_bytes(), delimiter)
}

fn decode_source(raw: &[u8]) -> Result<Cow<'_, str>, SourceError> {
    if let Ok(text) = std::str::from_utf8(raw) {
        return Ok(Cow::Borrowed(text));
    }
    let (text, had_errors) = encoding_rs::GBK.decode_without_bom_handling(raw);
    if had_errors {
        return Err(SourceError::Encoding);
    }
    tracing::debug!(bytes = raw.len(), "decoded source as GBK");
    Ok(text)
}

pub fn read_delimited<R: Read>(reader: R, delimiter: u8) -> Result<SourceTable, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(rows.len() + 2);
        rows.push(SourceRow {
            line,
            cells: record.iter().map(str::to_string).collect(),
        });
    }

    if rows.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(SourceTable { headers, rows })
}

/// Reads the first worksheet; the first row holds the headers.
pub fn read_workbook(path: &Path) -> Result<SourceTable, SourceError> {
    use calamine::{open_workbook_auto, Reader};

    let mut workbook = open_workbook_auto(path)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(SourceError::Empty)?;
    let range = workbook.worksheet_range(&sheet)?;
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = sheet_rows
        .next()
        .ok_or(SourceError::Empty)?
        .iter()
        .map(|cell| cell_to_string(cell).trim().to_string())
        .collect();

    let rows: Vec<SourceRow> = sheet_rows
        .enumerate()
        .map(|(index, cells)| SourceRow {
            line: first_row + index + 2,
            cells: cells.iter().map(cell_to_string).collect(),
        })
        .filter(|row| row.cells.iter().any(|cell| !cell.trim().is_empty()))
        .collect();

    if rows.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(SourceTable { headers, rows })
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR({:?})", e),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|value| value.format(DATETIME_FORMAT).to_string())
            .unwrap_or_else(|| format!("{}", dt)),
        Data::DateTimeIso(s) => s.replacen('T', " ", 1),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Where a logical field comes from in the source table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum SourceColumn {
    Column(String),
    #[default]
    NotProvided,
}

impl SourceColumn {
    pub fn column(name: &str) -> Self {
        Self::Column(name.to_string())
    }
}

impl From<Option<String>> for SourceColumn {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(column) if !column.trim().is_empty() => Self::Column(column),
            _ => Self::NotProvided,
        }
    }
}

impl From<SourceColumn> for Option<String> {
    fn from(value: SourceColumn) -> Self {
        match value {
            SourceColumn::Column(column) => Some(column),
            SourceColumn::NotProvided => None,
        }
    }
}

/// Explicit mapping from logical fields to source columns. Dimensions left out
/// of `dimensions` are treated as not provided.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub name: SourceColumn,
    #[serde(default)]
    pub area: SourceColumn,
    #[serde(default)]
    pub date: SourceColumn,
    #[serde(default)]
    pub dimensions: BTreeMap<String, SourceColumn>,
}

impl ColumnMapping {
    /// Columns named exactly like the fields, as written by the exporter.
    pub fn identity(registry: &DimensionRegistry) -> Self {
        Self {
            name: SourceColumn::column("name"),
            area: SourceColumn::column("area"),
            date: SourceColumn::column("date"),
            dimensions: registry
                .keys()
                .map(|key| (key.to_string(), SourceColumn::column(key)))
                .collect(),
        }
    }

    /// Matches headers against field names, dimension keys and labels,
    /// ignoring case and surrounding whitespace.
    pub fn infer(registry: &DimensionRegistry, headers: &[String]) -> Self {
        Self {
            name: find_header(headers, NAME_ALIASES),
            area: find_header(headers, AREA_ALIASES),
            date: find_header(headers, DATE_ALIASES),
            dimensions: registry
                .dimensions()
                .iter()
                .map(|dim| {
                    let candidates = [dim.key.as_str(), dim.label.as_str()];
                    (dim.key.clone(), find_header(headers, &candidates))
                })
                .collect(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn find_header(headers: &[String], candidates: &[&str]) -> SourceColumn {
    headers
        .iter()
        .find(|header| {
            candidates
                .iter()
                .any(|candidate| header.trim().eq_ignore_ascii_case(candidate))
        })
        .map(|header| SourceColumn::Column(header.clone()))
        .unwrap_or_default()
}

/// What to do with rows that fail validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportPolicy {
    /// Any invalid row rejects the whole import.
    #[default]
    AllOrNothing,
    /// Invalid rows are left out and reported; the rest are imported.
    SkipInvalid,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    pub leaders_created: usize,
    pub records_created: usize,
    pub skipped: Vec<RowIssue>,
}

struct ResolvedMapping {
    name: usize,
    area: usize,
    date: usize,
    dimensions: Vec<(String, Option<(usize, String)>)>,
}

struct PendingRecord {
    name: String,
    area: String,
    date: NaiveDate,
    scores: Scores,
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, keeping only the date.
pub fn parse_assessment_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
            .ok()
            .map(|value| value.date())
    })
}

/// Maps `table` onto the registry and appends its rows as score records,
/// stamped with today's date as import date.
pub async fn reconcile(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    table: &SourceTable,
    mapping: &ColumnMapping,
    policy: ImportPolicy,
) -> Result<ReconcileSummary, IngestError> {
    reconcile_on(pool, registry, table, mapping, policy, Local::now().date_naive()).await
}

pub async fn reconcile_on(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    table: &SourceTable,
    mapping: &ColumnMapping,
    policy: ImportPolicy,
    import_date: NaiveDate,
) -> Result<ReconcileSummary, IngestError> {
    let resolved = resolve_mapping(mapping, registry, &table.headers)?;

    let mut pending = Vec::with_capacity(table.rows.len());
    let mut issues = Vec::new();
    for row in &table.rows {
        match validate_row(row, &resolved, &table.headers) {
            Ok(record) => pending.push(record),
            Err(mut row_issues) => issues.append(&mut row_issues),
        }
    }

    if !issues.is_empty() {
        match policy {
            ImportPolicy::AllOrNothing => return Err(IngestError::InvalidRows(issues)),
            ImportPolicy::SkipInvalid => {
                for issue in &issues {
                    tracing::warn!(line = issue.line, column = %issue.column, value = %issue.value, "skipping row: {}", issue.reason);
                }
            }
        }
    }

    let mut summary = ReconcileSummary {
        skipped: issues,
        ..ReconcileSummary::default()
    };

    let mut tx = pool.begin().await?;
    let mut leader_ids: HashMap<(String, String), i64> = HashMap::new();

    for record in &pending {
        let identity = (record.name.clone(), record.area.clone());
        let leader_id = match leader_ids.get(&identity) {
            Some(id) => *id,
            None => {
                let (leader, created) =
                    db::upsert_leader_in(&mut tx, &record.name, &record.area).await?;
                if created {
                    summary.leaders_created += 1;
                }
                leader_ids.insert(identity, leader.id);
                leader.id
            }
        };

        db::insert_score_record(&mut tx, registry, leader_id, record.date, &record.scores, import_date)
            .await?;
        summary.records_created += 1;
    }

    tx.commit().await?;

    tracing::info!(
        leaders_created = summary.leaders_created,
        records_created = summary.records_created,
        skipped = summary.skipped.len(),
        "reconciled import"
    );
    Ok(summary)
}

fn resolve_mapping(
    mapping: &ColumnMapping,
    registry: &DimensionRegistry,
    headers: &[String],
) -> Result<ResolvedMapping, ConfigError> {
    let position = |field: &str, column: &str| -> Result<usize, ConfigError> {
        headers
            .iter()
            .position(|header| header == column)
            .ok_or_else(|| ConfigError::MissingSourceColumn {
                field: field.to_string(),
                column: column.to_string(),
            })
    };
    let identity = |field: &'static str, source: &SourceColumn| -> Result<usize, ConfigError> {
        match source {
            SourceColumn::Column(column) => position(field, column),
            SourceColumn::NotProvided => Err(ConfigError::UnmappedIdentity { field }),
        }
    };

    let name = identity("name", &mapping.name)?;
    let area = identity("area", &mapping.area)?;
    let date = identity("date", &mapping.date)?;

    if let Some(unknown) = mapping.dimensions.keys().find(|key| !registry.contains_key(key)) {
        return Err(ConfigError::UnknownMappingKey(unknown.clone()));
    }

    let mut dimensions = Vec::with_capacity(registry.len());
    for key in registry.keys() {
        let source = match mapping.dimensions.get(key) {
            Some(SourceColumn::Column(column)) => Some((position(key, column)?, column.clone())),
            Some(SourceColumn::NotProvided) | None => None,
        };
        dimensions.push((key.to_string(), source));
    }

    Ok(ResolvedMapping {
        name,
        area,
        date,
        dimensions,
    })
}

fn validate_row(
    row: &SourceRow,
    resolved: &ResolvedMapping,
    headers: &[String],
) -> Result<PendingRecord, Vec<RowIssue>> {
    let mut issues = Vec::new();
    let mut issue = |index: usize, value: &str, reason: &str| {
        issues.push(RowIssue {
            line: row.line,
            column: headers.get(index).cloned().unwrap_or_default(),
            value: value.to_string(),
            reason: reason.to_string(),
        });
    };

    let name = row.cell(resolved.name);
    if name.is_empty() {
        issue(resolved.name, name, "leader name is empty");
    }
    let area = row.cell(resolved.area);
    if area.is_empty() {
        issue(resolved.area, area, "leader area is empty");
    }

    let raw_date = row.cell(resolved.date);
    let date = parse_assessment_date(raw_date);
    if date.is_none() {
        issue(
            resolved.date,
            raw_date,
            "date must be YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
        );
    }

    let mut scores = Scores::new();
    for (key, source) in &resolved.dimensions {
        let Some((index, _)) = source else {
            scores.insert(key.clone(), 0.0);
            continue;
        };
        let raw = row.cell(*index);
        if raw.is_empty() {
            continue;
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && (0.0..=100.0).contains(&value) => {
                scores.insert(key.clone(), value);
            }
            Ok(_) => issue(*index, raw, "score must be within [0, 100]"),
            Err(_) => issue(*index, raw, "score is not a number"),
        }
    }

    match date {
        Some(date) if issues.is_empty() => {
            tracing::debug!(line = row.line, name, area, %date, "validated row");
            Ok(PendingRecord {
                name: name.to_string(),
                area: area.to_string(),
                date,
                scores,
            })
        }
        _ => Err(issues),
    }
}
