// Tenancy grouper - fold the ordered row stream into tenancy candidates
//
// One candidate per distinct (location_id, business_name) pair seen in the
// batch. Dates accumulate into a list; min/max/len become the candidate's
// range and provenance, so the aggregation is independent of row order even
// though the reader already delivers rows grouped and sorted.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::HashMap;

use crate::db::{SourceRecord, DEFAULT_TENANCY_CATEGORY};
use crate::report::TransformStats;
use crate::resolver::LocationResolver;
use crate::source::NormalizedRow;

pub const SOURCE_TYPE_SEED: &str = "seed";
pub const DATASET_KC_INSPECTIONS: &str = "king_county_food_inspections";

/// An in-memory, not-yet-persisted aggregation of rows sharing a
/// (location, business name) key.
#[derive(Debug, Clone)]
pub struct TenancyCandidate {
    pub location_id: i64,
    pub business_name: String,
    pub address: String,
    pub lat: f64,
    pub lon: f64,
    pub category: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sources: Vec<SourceRecord>,
}

struct CandidateAccumulator {
    location_id: i64,
    business_name: String,
    address: String,
    lat: f64,
    lon: f64,
    dates: Vec<NaiveDate>,
}

/// Group normalized rows into tenancy candidates, resolving each row's
/// location along the way.
///
/// Rows are assumed pre-filtered by the normalization view; a blank business
/// name or street reaching this point is an upstream contract breach and
/// fails the batch outright rather than being skipped.
pub fn group_into_candidates(
    conn: &Connection,
    rows: &[NormalizedRow],
    resolver: &mut LocationResolver,
    stats: &mut TransformStats,
) -> Result<Vec<TenancyCandidate>> {
    let mut order: Vec<CandidateAccumulator> = Vec::new();
    let mut index: HashMap<(i64, String), usize> = HashMap::new();

    for row in rows {
        if row.biz.is_empty() || row.street.is_empty() {
            bail!(
                "Data integrity fault: normalized row {} has a blank business name or street",
                row.row_id
            );
        }

        stats.valid_rows += 1;

        let location_id = resolver.resolve(conn, row.lat, row.lon, &row.street)?;

        let key = (location_id, row.biz.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            order.push(CandidateAccumulator {
                location_id,
                business_name: row.biz.clone(),
                address: row.street.clone(),
                lat: row.lat,
                lon: row.lon,
                dates: Vec::new(),
            });
            order.len() - 1
        });

        if let Some(date) = row.inspection_date {
            order[slot].dates.push(date);
        }
    }

    stats.locations_created = resolver.created();

    let candidates = order
        .into_iter()
        .map(|acc| {
            let start_date = acc.dates.iter().min().copied();
            let end_date = acc.dates.iter().max().copied();

            let sources = vec![SourceRecord {
                source_type: SOURCE_TYPE_SEED.to_string(),
                dataset: DATASET_KC_INSPECTIONS.to_string(),
                first_seen: start_date,
                last_seen: end_date,
                inspection_count: acc.dates.len() as u32,
            }];

            TenancyCandidate {
                location_id: acc.location_id,
                business_name: acc.business_name,
                address: acc.address,
                lat: acc.lat,
                lon: acc.lon,
                category: DEFAULT_TENANCY_CATEGORY.to_string(),
                start_date,
                end_date,
                sources,
            }
        })
        .collect();

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn row(biz: &str, street: &str, lat: f64, lon: f64, date: Option<&str>) -> NormalizedRow {
        NormalizedRow {
            biz: biz.to_string(),
            street: street.to_string(),
            city: "SEATTLE".to_string(),
            state: "WA".to_string(),
            zip: None,
            lat,
            lon,
            inspection_date: date.map(|d| d.parse().unwrap()),
            row_id: 0,
        }
    }

    fn setup() -> (Connection, LocationResolver, TransformStats) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        (conn, LocationResolver::new(6), TransformStats::default())
    }

    #[test]
    fn test_one_candidate_per_location_business_pair() {
        let (conn, mut resolver, mut stats) = setup();

        let rows = vec![
            row("STARBUCKS", "123 MAIN ST", 47.6062, -122.3321, Some("2024-01-10")),
            row("STARBUCKS", "123 MAIN ST", 47.6062, -122.3321, Some("2024-06-15")),
            row("TULLYS", "123 MAIN ST", 47.6062, -122.3321, Some("2024-02-01")),
        ];

        let candidates = group_into_candidates(&conn, &rows, &mut resolver, &mut stats).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(stats.valid_rows, 3);
        assert_eq!(stats.locations_created, 1);

        let starbucks = &candidates[0];
        assert_eq!(starbucks.business_name, "STARBUCKS");
        assert_eq!(starbucks.start_date, Some("2024-01-10".parse().unwrap()));
        assert_eq!(starbucks.end_date, Some("2024-06-15".parse().unwrap()));
        assert_eq!(starbucks.sources[0].inspection_count, 2);
        assert_eq!(starbucks.category, "UNKNOWN");
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let dates = ["2024-03-01", "2024-01-10", "2024-06-15"];

        let mut forward: Vec<NormalizedRow> = dates
            .iter()
            .map(|d| row("ACME", "1 PIKE ST", 47.6, -122.3, Some(d)))
            .collect();

        let (conn_a, mut resolver_a, mut stats_a) = setup();
        let a = group_into_candidates(&conn_a, &forward, &mut resolver_a, &mut stats_a).unwrap();

        forward.reverse();
        let (conn_b, mut resolver_b, mut stats_b) = setup();
        let b = group_into_candidates(&conn_b, &forward, &mut resolver_b, &mut stats_b).unwrap();

        assert_eq!(a[0].start_date, b[0].start_date);
        assert_eq!(a[0].end_date, b[0].end_date);
        assert_eq!(
            a[0].sources[0].inspection_count,
            b[0].sources[0].inspection_count
        );
    }

    #[test]
    fn test_null_date_row_counts_as_valid_but_adds_no_dates() {
        let (conn, mut resolver, mut stats) = setup();

        let rows = vec![
            row("ACME", "1 PIKE ST", 47.6, -122.3, None),
            row("ACME", "1 PIKE ST", 47.6, -122.3, Some("2024-01-10")),
        ];

        let candidates = group_into_candidates(&conn, &rows, &mut resolver, &mut stats).unwrap();

        assert_eq!(stats.valid_rows, 2);
        assert_eq!(candidates[0].sources[0].inspection_count, 1);
        assert_eq!(candidates[0].start_date, Some("2024-01-10".parse().unwrap()));
    }

    #[test]
    fn test_all_null_dates_yield_null_range() {
        let (conn, mut resolver, mut stats) = setup();

        let rows = vec![row("ACME", "1 PIKE ST", 47.6, -122.3, None)];
        let candidates = group_into_candidates(&conn, &rows, &mut resolver, &mut stats).unwrap();

        assert_eq!(candidates[0].start_date, None);
        assert_eq!(candidates[0].end_date, None);
        assert_eq!(candidates[0].sources[0].inspection_count, 0);
        assert_eq!(candidates[0].sources[0].first_seen, None);
    }

    #[test]
    fn test_blank_business_name_is_fatal() {
        let (conn, mut resolver, mut stats) = setup();

        let rows = vec![row("", "1 PIKE ST", 47.6, -122.3, None)];
        let result = group_into_candidates(&conn, &rows, &mut resolver, &mut stats);

        assert!(result.is_err(), "Blank business name must fail the batch");
    }
}
