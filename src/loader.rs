// Staging loader - King County food-inspection CSV → inspections_raw
//
// Rows missing a business name, address, or parseable coordinates never
// reach staging. Re-loading the same file is a no-op: every row carries a
// content hash with a UNIQUE column, so duplicates are counted and skipped.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// One row of the public `Food_Establishment_Inspection_Data` CSV.
///
/// Numeric fields stay as strings here: a malformed coordinate skips the
/// row instead of failing the whole file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawInspectionRow {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Address", default)]
    pub address: String,

    #[serde(rename = "City", default)]
    pub city: String,

    #[serde(rename = "State", default)]
    pub state: String,

    #[serde(rename = "Zip Code", default)]
    pub zip: String,

    #[serde(rename = "Latitude", default)]
    pub latitude: String,

    #[serde(rename = "Longitude", default)]
    pub longitude: String,

    #[serde(rename = "Inspection Date", default)]
    pub inspection_date: String,
}

impl RawInspectionRow {
    /// Content hash used for staging idempotency (NOT identity - staging
    /// rows have no identity beyond their content).
    pub fn row_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}",
            self.name.trim(),
            self.address.trim(),
            self.latitude.trim(),
            self.longitude.trim(),
            self.inspection_date.trim(),
            self.zip.trim(),
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Parse inspection date from string (supports MM/DD/YYYY and YYYY-MM-DD)
pub fn parse_inspection_date(date_str: &str) -> Option<NaiveDate> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%m/%d/%Y") {
        return Some(date);
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    None
}

#[derive(Debug, Default, Clone)]
pub struct LoadStats {
    pub processed: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Load a CSV file into the staging table in batched transactions.
pub fn load_csv_to_staging(
    conn: &mut Connection,
    csv_path: &Path,
    batch_size: usize,
) -> Result<LoadStats> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut stats = LoadStats::default();
    let mut pending: Vec<RawInspectionRow> = Vec::new();

    for result in rdr.deserialize() {
        let row: RawInspectionRow = result.context("Failed to deserialize inspection row")?;

        if row.name.trim().is_empty() || row.address.trim().is_empty() {
            stats.skipped += 1;
            continue;
        }

        let latitude = row.latitude.trim().parse::<f64>().ok();
        let longitude = row.longitude.trim().parse::<f64>().ok();
        if latitude.is_none() || longitude.is_none() {
            stats.skipped += 1;
            continue;
        }

        pending.push(row);
        stats.processed += 1;

        if pending.len() >= batch_size {
            insert_staging_batch(conn, &pending, &mut stats)?;
            println!(
                "✓ Committed batch: {} rows processed, {} skipped",
                stats.processed, stats.skipped
            );
            pending.clear();
        }
    }

    if !pending.is_empty() {
        insert_staging_batch(conn, &pending, &mut stats)?;
    }

    Ok(stats)
}

fn insert_staging_batch(
    conn: &mut Connection,
    rows: &[RawInspectionRow],
    stats: &mut LoadStats,
) -> Result<()> {
    let tx = conn.transaction()?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO inspections_raw (
                row_hash, business_name, address, city, state, zip,
                latitude, longitude, inspection_date, raw_line
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for row in rows {
            // Validated before the row entered the pending batch
            let latitude: f64 = row.latitude.trim().parse()?;
            let longitude: f64 = row.longitude.trim().parse()?;
            let inspection_date = parse_inspection_date(&row.inspection_date);
            let raw_line = serde_json::to_string(row)?;

            let state = row.state.trim();
            let result = stmt.execute(params![
                row.row_hash(),
                row.name.trim(),
                row.address.trim(),
                row.city.trim(),
                if state.is_empty() { "WA" } else { state },
                row.zip.trim(),
                latitude,
                longitude,
                inspection_date.map(|d| d.to_string()),
                raw_line,
            ]);

            match result {
                Ok(_) => stats.inserted += 1,
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    stats.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    tx.commit()?;
    Ok(())
}
