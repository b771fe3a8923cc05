// Data access layer - SQLite schema + row types for locations and tenancies
//
// This is the single concrete store the pipeline talks to. Identity rules
// live in the resolver; the schema only backstops them with UNIQUE indexes
// so two concurrent jobs racing on the same key serialize instead of
// duplicating rows.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ============================================================================
// ROW TYPES
// ============================================================================

/// A canonical physical point of interest.
///
/// Identity = rounded coordinates + normalized (uppercased, trimmed) address.
/// `dedup_key` is the textual form of that identity, UNIQUE in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub address: String,
    pub created_at: String,
}

/// One provenance record inside a tenancy: which dataset contributed rows,
/// over what observed window, and how many.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(rename = "type")]
    pub source_type: String,
    pub dataset: String,
    pub first_seen: Option<NaiveDate>,
    pub last_seen: Option<NaiveDate>,
    pub inspection_count: u32,
}

/// One business occupying one location over an observed date range.
///
/// At most one row per (location_id, business_name) - repeated observations
/// accumulate into the same row, never duplicate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenancy {
    pub id: i64,
    pub location_id: i64,
    pub business_name: String,
    pub category: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_current: bool,
    pub sources: Vec<SourceRecord>,
    pub created_at: String,
}

/// Category sentinel for tenancies not independently classified.
pub const DEFAULT_TENANCY_CATEGORY: &str = "UNKNOWN";

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery, foreign_keys so a location delete cascades
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Staging table - raw food-inspection rows, loaded verbatim from CSV
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS inspections_raw (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            row_hash TEXT UNIQUE NOT NULL,
            business_name TEXT NOT NULL,
            address TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            latitude REAL,
            longitude REAL,
            inspection_date TEXT,
            raw_line TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Locations - deduplicated physical points of interest
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS locations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            address TEXT NOT NULL,
            dedup_key TEXT UNIQUE NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Tenancies - one row per (location, business), range widened over time
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenancies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            location_id INTEGER NOT NULL
                REFERENCES locations(id) ON DELETE CASCADE,
            business_name TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'UNKNOWN',
            start_date TEXT,
            end_date TEXT,
            is_current INTEGER NOT NULL DEFAULT 0,
            sources TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(location_id, business_name)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inspections_raw_lat_lon
         ON inspections_raw(latitude, longitude)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_locations_lat_lon ON locations(lat, lon)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tenancies_location_id
         ON tenancies(location_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tenancies_is_current
         ON tenancies(is_current, end_date)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// LOCATIONS
// ============================================================================

/// Insert a new location and return its assigned id.
///
/// `dedup_key` must already be computed from the rounded coordinates and
/// normalized address (see resolver); the UNIQUE index on it is the
/// store-level guard against two jobs creating "the same" location.
pub fn insert_location(
    conn: &Connection,
    lat: f64,
    lon: f64,
    address: &str,
    dedup_key: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO locations (lat, lon, address, dedup_key) VALUES (?1, ?2, ?3, ?4)",
        params![lat, lon, address, dedup_key],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn get_all_locations(conn: &Connection) -> Result<Vec<Location>> {
    let mut stmt = conn.prepare(
        "SELECT id, lat, lon, address, created_at FROM locations ORDER BY id",
    )?;

    let locations = stmt
        .query_map([], |row| {
            Ok(Location {
                id: row.get(0)?,
                lat: row.get(1)?,
                lon: row.get(2)?,
                address: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(locations)
}

pub fn count_locations(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// TENANCIES
// ============================================================================

const TENANCY_COLUMNS: &str = "id, location_id, business_name, category, \
     start_date, end_date, is_current, sources, created_at";

fn tenancy_from_row(row: &rusqlite::Row) -> rusqlite::Result<Tenancy> {
    let start_date: Option<String> = row.get(4)?;
    let end_date: Option<String> = row.get(5)?;
    let sources_json: Option<String> = row.get(7)?;

    let sources = sources_json
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();

    Ok(Tenancy {
        id: row.get(0)?,
        location_id: row.get(1)?,
        business_name: row.get(2)?,
        category: row.get(3)?,
        start_date: start_date.and_then(|s| s.parse().ok()),
        end_date: end_date.and_then(|s| s.parse().ok()),
        is_current: row.get::<_, i64>(6)? != 0,
        sources,
        created_at: row.get(8)?,
    })
}

/// Fetch the tenancy for an exact (location, business) key, if one exists.
pub fn get_tenancy_by_key(
    conn: &Connection,
    location_id: i64,
    business_name: &str,
) -> Result<Option<Tenancy>> {
    let tenancy = conn
        .query_row(
            &format!(
                "SELECT {} FROM tenancies WHERE location_id = ?1 AND business_name = ?2",
                TENANCY_COLUMNS
            ),
            params![location_id, business_name],
            tenancy_from_row,
        )
        .optional()?;

    Ok(tenancy)
}

pub fn get_all_tenancies(conn: &Connection) -> Result<Vec<Tenancy>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tenancies ORDER BY location_id, business_name",
        TENANCY_COLUMNS
    ))?;

    let tenancies = stmt
        .query_map([], tenancy_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(tenancies)
}

pub fn count_current_tenancies(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tenancies WHERE is_current = 1",
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

pub fn count_locations_with_tenancies(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT location_id) FROM tenancies",
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}
