// QA reporter - human-readable summary after a transform run
//
// Read-only. Nothing here touches stored state, and a reporting failure is
// the caller's problem to log, never a reason to roll back committed work.

use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use rusqlite::{params, Connection};

use crate::db;

/// Counters accumulated across a full transform run.
#[derive(Debug, Default, Clone)]
pub struct TransformStats {
    pub source_rows: usize,
    pub valid_rows: usize,
    pub skipped_rows: usize,
    pub locations_created: usize,
    pub tenancies_created: usize,
    pub tenancies_updated: usize,
    pub consistency_fixes: usize,
}

#[derive(Debug, Clone)]
pub struct LocationTenancyCount {
    pub id: i64,
    pub address: String,
    pub lat: f64,
    pub lon: f64,
    pub tenancy_count: i64,
}

#[derive(Debug, Clone)]
pub struct CurrentTenancySample {
    pub business_name: String,
    pub address: String,
    pub end_date: Option<NaiveDate>,
}

pub fn top_locations_by_tenancy_count(
    conn: &Connection,
    limit: u32,
) -> Result<Vec<LocationTenancyCount>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.address, l.lat, l.lon, COUNT(t.id) AS tenancy_count
         FROM locations l
         JOIN tenancies t ON t.location_id = l.id
         GROUP BY l.id
         ORDER BY tenancy_count DESC, l.id
         LIMIT ?1",
    )?;

    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(LocationTenancyCount {
                id: row.get(0)?,
                address: row.get(1)?,
                lat: row.get(2)?,
                lon: row.get(3)?,
                tenancy_count: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Sample of currently-current tenancies last seen on or after `since`.
pub fn sample_current_tenancies(
    conn: &Connection,
    since: NaiveDate,
    limit: u32,
) -> Result<Vec<CurrentTenancySample>> {
    let mut stmt = conn.prepare(
        "SELECT t.business_name, l.address, t.end_date
         FROM tenancies t
         JOIN locations l ON l.id = t.location_id
         WHERE t.is_current = 1 AND t.end_date >= ?1
         ORDER BY t.end_date DESC, t.id
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(params![since.to_string(), limit], |row| {
            let end_date: Option<String> = row.get(2)?;
            Ok(CurrentTenancySample {
                business_name: row.get(0)?,
                address: row.get(1)?,
                end_date: end_date.and_then(|s| s.parse().ok()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Print the QA report to stdout.
pub fn print_qa_report(conn: &Connection, stats: &TransformStats, today: NaiveDate) -> Result<()> {
    println!("\n{}", "=".repeat(80));
    println!("QA REPORT");
    println!("{}", "=".repeat(80));

    println!("\nProcessing Summary:");
    println!("  Total source rows: {}", stats.source_rows);
    println!("  Valid rows processed: {}", stats.valid_rows);
    println!("  Skipped rows: {}", stats.skipped_rows);

    println!("\nData Created/Updated:");
    println!("  New locations created: {}", stats.locations_created);
    println!("  Tenancies created: {}", stats.tenancies_created);
    println!("  Tenancies updated: {}", stats.tenancies_updated);
    println!("  Consistency fixes applied: {}", stats.consistency_fixes);

    let top = top_locations_by_tenancy_count(conn, 10)?;
    println!("\nTop 10 Locations by Tenancy Count:");
    for (idx, loc) in top.iter().enumerate() {
        println!(
            "  {}. {:<50} | ({:.6}, {:.6}) | {} tenancies",
            idx + 1,
            truncate(&loc.address, 50),
            loc.lat,
            loc.lon,
            loc.tenancy_count
        );
    }

    let since = today
        .checked_sub_months(Months::new(6))
        .context("Sample window underflowed the calendar")?;
    let samples = sample_current_tenancies(conn, since, 10)?;
    println!("\nSample Current Tenancies (last 6 months):");
    for (idx, tenancy) in samples.iter().enumerate() {
        println!(
            "  {}. {:<40} | {:<30} | {}",
            idx + 1,
            truncate(&tenancy.business_name, 40),
            truncate(&tenancy.address, 30),
            tenancy
                .end_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    println!(
        "\nTotal current tenancies: {}",
        db::count_current_tenancies(conn)?
    );
    println!(
        "Locations with tenancies: {}",
        db::count_locations_with_tenancies(conn)?
    );

    Ok(())
}
