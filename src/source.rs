// Normalized source reader - the cleaned, ordered row stream the core consumes
//
// Normalization happens in SQL over the staging table: names and streets
// uppercased and trimmed, city/state defaulted, coordinates rounded to the
// configured precision, rows without a name, street, or coordinates filtered
// out. The ORDER BY is a contract: all rows for one (lat, lon, street) arrive
// together, then by business, then by date, so grouping can stream.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection};

/// One pre-normalized, pre-filtered inspection row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub biz: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub inspection_date: Option<NaiveDate>,
    pub row_id: i64,
}

/// Fetch every normalized inspection row, correctly ordered for grouping.
pub fn fetch_normalized_rows(conn: &Connection, round_places: u32) -> Result<Vec<NormalizedRow>> {
    let mut stmt = conn.prepare(
        "SELECT
            UPPER(TRIM(business_name)) AS biz,
            UPPER(TRIM(address)) AS street,
            UPPER(COALESCE(NULLIF(TRIM(city), ''), 'SEATTLE')) AS city,
            COALESCE(NULLIF(TRIM(state), ''), 'WA') AS state,
            NULLIF(TRIM(zip), '') AS zip,
            ROUND(latitude, ?1) AS lat_r,
            ROUND(longitude, ?1) AS lon_r,
            inspection_date,
            id
         FROM inspections_raw
         WHERE business_name IS NOT NULL AND TRIM(business_name) != ''
           AND address IS NOT NULL AND TRIM(address) != ''
           AND latitude IS NOT NULL
           AND longitude IS NOT NULL
         ORDER BY lat_r, lon_r, street, biz, inspection_date",
    )?;

    let rows = stmt
        .query_map(params![round_places], |row| {
            let inspection_date: Option<String> = row.get(7)?;

            Ok(NormalizedRow {
                biz: row.get(0)?,
                street: row.get(1)?,
                city: row.get(2)?,
                state: row.get(3)?,
                zip: row.get(4)?,
                lat: row.get(5)?,
                lon: row.get(6)?,
                inspection_date: inspection_date.and_then(|s| s.parse().ok()),
                row_id: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Total staging rows, normalized or not - the reporter's "source rows seen".
pub fn count_staging_rows(conn: &Connection) -> Result<i64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM inspections_raw", [], |row| row.get(0))?;

    Ok(count)
}

#[cfg(test)]
pub(crate) fn insert_staging_row(
    conn: &Connection,
    name: &str,
    address: &str,
    lat: Option<f64>,
    lon: Option<f64>,
    date: Option<&str>,
) {
    conn.execute(
        "INSERT INTO inspections_raw
            (row_hash, business_name, address, city, state, zip,
             latitude, longitude, inspection_date)
         VALUES (?1, ?2, ?3, '', 'WA', '', ?4, ?5, ?6)",
        params![
            format!("{}|{}|{:?}|{:?}|{:?}", name, address, lat, lon, date),
            name,
            address,
            lat,
            lon,
            date,
        ],
    )
    .unwrap();
}
