// Pipeline configuration - thresholds and batch sizing
// Defaults match production; every knob can be overridden via environment.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Configuration for the transform pipeline.
///
/// All thresholds are externally supplied; the struct is built once in main
/// and passed down by reference so tests can construct their own values.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Decimal places coordinates are rounded to before dedup (default: 6)
    pub round_places: u32,

    /// A tenancy is "current" if its last-seen date falls within this many
    /// calendar months of today (default: 18)
    pub recent_months: u32,

    /// A current tenancy older than this many calendar months is demoted
    /// by the consistency sweep (default: 18)
    pub outdated_tenancy_months: u32,

    /// Candidates per upsert transaction (default: 4000)
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            round_places: 6,
            recent_months: 18,
            outdated_tenancy_months: 18,
            batch_size: 4000,
        }
    }
}

impl PipelineConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// Recognized: ROUND_PLACES, RECENT_MONTHS, OUTDATED_TENANCY_MONTHS,
    /// ETL_BATCH_SIZE. An unparsable value is an error, not a silent default.
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineConfig::default();

        Ok(PipelineConfig {
            round_places: env_or("ROUND_PLACES", defaults.round_places)?,
            recent_months: env_or("RECENT_MONTHS", defaults.recent_months)?,
            outdated_tenancy_months: env_or(
                "OUTDATED_TENANCY_MONTHS",
                defaults.outdated_tenancy_months,
            )?,
            batch_size: env_or("ETL_BATCH_SIZE", defaults.batch_size)?,
        })
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
