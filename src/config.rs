use std::env;

use crate::error::ConfigError;
use crate::scoring;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/grid_assessment.db";

/// Runtime settings resolved from `.env` and the process environment.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    /// Preset name (`operational`, `simplified`) or path to a JSON registry.
    pub dimensions: String,
    pub log_level: String,
    pub retention_days: i64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("GRID_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let dimensions = env::var("GRID_DIMENSIONS").unwrap_or_else(|_| "operational".to_string());
        let log_level = env::var("GRID_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let raw_retention = env::var("GRID_RETENTION_DAYS").unwrap_or_else(|_| "30".to_string());
        let retention_days = raw_retention
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|days| scoring::cutoff_date(*days).is_ok())
            .ok_or(ConfigError::InvalidEnv {
                name: "GRID_RETENTION_DAYS",
                expected: "a positive number of days within the calendar",
                value: raw_retention.clone(),
            })?;

        Ok(Self {
            database_url,
            dimensions,
            log_level,
            retention_days,
        })
    }
}
