use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Columns of the assessments table that a dimension key may not shadow.
const RESERVED_KEYS: &[&str] = &["id", "leader_id", "date", "import_date", "name", "area"];

/// Discrete label derived from a weighted total. Declared worst first so the
/// derived ordering reads "greater is better".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    NeedsImprovement,
    Passing,
    Acceptable,
    Good,
    Excellent,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Excellent => "Excellent",
            Grade::Good => "Good",
            Grade::Acceptable => "Acceptable",
            Grade::Passing => "Passing",
            Grade::NeedsImprovement => "NeedsImprovement",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub label: String,
    pub key: String,
    pub weight: f64,
    #[serde(default)]
    pub tips: Vec<String>,
}

impl Dimension {
    pub fn new(label: &str, key: &str, weight: f64) -> Self {
        Self {
            label: label.to_string(),
            key: key.to_string(),
            weight,
            tips: Vec::new(),
        }
    }

    pub fn with_tips(mut self, tips: &[&str]) -> Self {
        self.tips = tips.iter().map(|tip| tip.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub grade: Grade,
    pub min: f64,
}

/// Ordered grade boundaries, highest first. Totals below every boundary are
/// `NeedsImprovement`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeThresholds {
    bands: Vec<Threshold>,
}

impl GradeThresholds {
    pub fn new(mut bands: Vec<Threshold>) -> Result<Self, ConfigError> {
        bands.sort_by(|a, b| b.min.total_cmp(&a.min));
        let ordered = bands
            .windows(2)
            .all(|pair| pair[0].min > pair[1].min && pair[0].grade > pair[1].grade);
        let finite = bands.iter().all(|band| band.min.is_finite());
        let below_floor = bands
            .iter()
            .any(|band| band.grade == Grade::NeedsImprovement);
        if !ordered || !finite || below_floor {
            return Err(ConfigError::UnorderedThresholds);
        }
        Ok(Self { bands })
    }

    pub fn grade_for(&self, total: f64) -> Grade {
        self.bands
            .iter()
            .find(|band| total >= band.min)
            .map(|band| band.grade)
            .unwrap_or(Grade::NeedsImprovement)
    }

    pub fn bands(&self) -> &[Threshold] {
        &self.bands
    }
}

/// The scored dimension set plus the grade table that goes with it.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionRegistry {
    dimensions: Vec<Dimension>,
    thresholds: GradeThresholds,
}

impl DimensionRegistry {
    /// Builds a registry whose weights must already sum to 1.0.
    pub fn new(
        dimensions: Vec<Dimension>,
        thresholds: GradeThresholds,
    ) -> Result<Self, ConfigError> {
        validate_keys(&dimensions)?;
        let sum: f64 = dimensions.iter().map(|dim| dim.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsNotNormalized(sum));
        }
        Ok(Self {
            dimensions,
            thresholds,
        })
    }

    /// Rescales relative weights so they sum to 1.0.
    pub fn normalized(
        mut dimensions: Vec<Dimension>,
        thresholds: GradeThresholds,
    ) -> Result<Self, ConfigError> {
        validate_keys(&dimensions)?;
        let sum: f64 = dimensions.iter().map(|dim| dim.weight).sum();
        if sum <= 0.0 {
            return Err(ConfigError::WeightsNotNormalized(sum));
        }
        for dim in dimensions.iter_mut() {
            dim.weight /= sum;
        }
        Self::new(dimensions, thresholds)
    }

    /// Every dimension counts 1/N, whatever weight it came with.
    pub fn uniform(
        mut dimensions: Vec<Dimension>,
        thresholds: GradeThresholds,
    ) -> Result<Self, ConfigError> {
        for dim in dimensions.iter_mut() {
            dim.weight = 1.0;
        }
        Self::normalized(dimensions, thresholds)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        let thresholds = GradeThresholds::new(file.thresholds)?;
        if file.normalize {
            Self::normalized(file.dimensions, thresholds)
        } else {
            Self::new(file.dimensions, thresholds)
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Resolves a preset name or, failing that, a path to a JSON registry.
    pub fn load(source: &str) -> Result<Self, ConfigError> {
        let source = source.trim();
        match source.to_ascii_lowercase().as_str() {
            "operational" => operational(),
            "simplified" => simplified(),
            _ => {
                let path = Path::new(source);
                let is_json = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
                if is_json || path.is_file() {
                    Self::from_json_file(path)
                } else {
                    Err(ConfigError::UnknownPreset(source.to_string()))
                }
            }
        }
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|dim| dim.key.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.key == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn key_for_label(&self, label: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|dim| dim.label == label)
            .map(|dim| dim.key.as_str())
    }

    pub fn weight(&self, key: &str) -> Option<f64> {
        self.get(key).map(|dim| dim.weight)
    }

    pub fn thresholds(&self) -> &GradeThresholds {
        &self.thresholds
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    dimensions: Vec<Dimension>,
    thresholds: Vec<Threshold>,
    #[serde(default)]
    normalize: bool,
}

fn validate_keys(dimensions: &[Dimension]) -> Result<(), ConfigError> {
    if dimensions.is_empty() {
        return Err(ConfigError::EmptyRegistry);
    }
    let mut seen = HashSet::new();
    for dim in dimensions {
        if !is_storage_key(&dim.key) {
            return Err(ConfigError::InvalidStorageKey(dim.key.clone()));
        }
        if !seen.insert(dim.key.as_str()) {
            return Err(ConfigError::DuplicateStorageKey(dim.key.clone()));
        }
        if !dim.weight.is_finite() || dim.weight < 0.0 {
            return Err(ConfigError::InvalidWeight {
                key: dim.key.clone(),
                weight: dim.weight,
            });
        }
    }
    Ok(())
}

/// Keys become column names in SQL, so only plain identifiers pass.
fn is_storage_key(key: &str) -> bool {
    let mut chars = key.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    starts_with_letter
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !RESERVED_KEYS.contains(&key)
}

/// The 22-dimension operational set, equally weighted, graded 85/75/60.
pub fn operational() -> Result<DimensionRegistry, ConfigError> {
    let thresholds = GradeThresholds::new(vec![
        Threshold { grade: Grade::Excellent, min: 85.0 },
        Threshold { grade: Grade::Good, min: 75.0 },
        Threshold { grade: Grade::Acceptable, min: 60.0 },
    ])?;

    let dimensions = OPERATIONAL_DIMENSIONS
        .iter()
        .map(|(label, key, tips)| Dimension::new(label, key, 1.0).with_tips(tips))
        .collect();
    DimensionRegistry::uniform(dimensions, thresholds)
}

/// The 5-dimension simplified set with fixed weights, graded 90/80/70/60.
pub fn simplified() -> Result<DimensionRegistry, ConfigError> {
    let thresholds = GradeThresholds::new(vec![
        Threshold { grade: Grade::Excellent, min: 90.0 },
        Threshold { grade: Grade::Good, min: 80.0 },
        Threshold { grade: Grade::Acceptable, min: 70.0 },
        Threshold { grade: Grade::Passing, min: 60.0 },
    ])?;

    let weights = [0.30, 0.20, 0.20, 0.15, 0.15];
    let dimensions = OPERATIONAL_DIMENSIONS
        .iter()
        .zip(weights)
        .map(|((label, key, tips), weight)| Dimension::new(label, key, weight).with_tips(tips))
        .collect();
    DimensionRegistry::new(dimensions, thresholds)
}

type DimensionSeed = (&'static str, &'static str, &'static [&'static str]);

const OPERATIONAL_DIMENSIONS: &[DimensionSeed] = &[
    (
        "Professional skill",
        "professional_skill",
        &["Attend technical training", "Join peer technical exchanges", "Earn a professional certificate"],
    ),
    (
        "Indicator mastery",
        "index_mastery",
        &["Study the indicator system in depth", "Review indicator data regularly", "Write a targeted improvement plan"],
    ),
    (
        "Management execution",
        "management_execution",
        &["Streamline work processes", "Strengthen team collaboration", "Sharpen execution and decision making"],
    ),
    (
        "Communication and coordination",
        "communication_coordination",
        &["Hold regular team check-ins", "Improve cross-department collaboration", "Practise customer communication"],
    ),
    (
        "Marketing ability",
        "marketing_ability",
        &["Study marketing fundamentals", "Track market trends", "Work on customer acquisition"],
    ),
    (
        "Overlong work order ratio",
        "long_work_order_ratio",
        &["Streamline work order handling", "Speed up work order turnaround", "Track open work orders closely"],
    ),
    (
        "Reminder rate",
        "reminder_rate",
        &["Raise service quality", "Respond to customer requests promptly", "Streamline the service flow"],
    ),
    (
        "On-site timeliness",
        "on_site_timeliness",
        &["Schedule visits realistically", "Supervise field staff", "Cut time spent per visit"],
    ),
    (
        "Repeat complaint rate",
        "repeat_complaint_rate",
        &["Fix root causes on first contact", "Audit service quality", "Set up a customer feedback loop"],
    ),
    (
        "Complaints per ten thousand",
        "complaints_per_ten_thousand",
        &["Raise service quality", "Manage customer relationships", "Streamline the service flow"],
    ),
    (
        "Touchpoint satisfaction",
        "contact_service_satisfaction",
        &["Improve service attitude", "Run service skills training", "Set up a customer feedback loop"],
    ),
    (
        "Poor quality customer ratio",
        "poor_quality_customer_ratio",
        &["Raise service quality", "Maintain the network proactively", "Improve network quality"],
    ),
    (
        "Broadband interruption duration",
        "home_broadband_interrupt_duration",
        &["Maintain the network proactively", "Speed up fault handling", "Improve network topology"],
    ),
    (
        "Broadband weak light rate",
        "home_broadband_weak_light_rate",
        &["Maintain fibre lines", "Improve optical path quality", "Upgrade weak equipment"],
    ),
    (
        "Task support timeliness",
        "task_support_timeliness",
        &["Coordinate across the team", "Work more efficiently", "Distribute tasks better"],
    ),
    (
        "Shift handover rate",
        "handover_rate",
        &["Formalise the handover procedure", "Check handovers", "Hold staff accountable for handovers"],
    ),
    (
        "Terminal inventory",
        "terminal_inventory",
        &["Define a terminal management process", "Count terminals regularly", "Improve asset management"],
    ),
    (
        "Personnel qualification rate",
        "personnel_qualified_rate",
        &["Train staff", "Introduce an assessment scheme", "Raise staff standards"],
    ),
    (
        "Low sales ratio",
        "low_sales_ratio",
        &["Research the local market", "Rebalance the product mix", "Improve sales skills"],
    ),
    (
        "Opportunity conversion rate",
        "business_opportunity_conversion_rate",
        &["Analyse the market", "Refine the sales strategy", "Improve sales technique"],
    ),
    (
        "Yuanbao completion rate",
        "yuanbao_completion_rate",
        &["Clarify targets", "Plan realistically", "Manage progress closely"],
    ),
    (
        "Terminal revenue",
        "terminal_revenue",
        &["Rebalance the product mix", "Improve sales skills", "Manage customer relationships"],
    ),
];
