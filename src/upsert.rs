// Upsert engine - merge tenancy candidates into the durable store
//
// Keyed on (location_id, business_name). Insert on first sight; on conflict
// the stored date range only ever widens, never narrows, and is_current is
// recomputed from the merged end date. Null dates mean "no information" and
// never erase a known date. Re-applying the same candidates changes nothing,
// whatever chunk boundaries they arrive in.

use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use rusqlite::{params, Connection};

use crate::db::{self, SourceRecord};
use crate::grouper::TenancyCandidate;
use crate::report::TransformStats;

// ============================================================================
// NULL-AWARE RANGE MATH
// ============================================================================

/// Earlier of two optional dates, treating None as "no constraint".
///
/// A plain min() on options would pick None over any date; the store's
/// LEAST() would return NULL. Both are wrong here - a known date must
/// survive a merge against an unknown one.
pub fn earlier_of(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Option<NaiveDate> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

/// Later of two optional dates, same null semantics as [`earlier_of`].
pub fn later_of(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Option<NaiveDate> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

/// A tenancy is current iff its last-seen date is within the recency window.
pub fn is_current(end_date: Option<NaiveDate>, cutoff: NaiveDate) -> bool {
    match end_date {
        Some(end) => end >= cutoff,
        None => false,
    }
}

// ============================================================================
// PROVENANCE MERGE
// ============================================================================

/// Union provenance by (type, dataset): an already-known dataset has its
/// window widened and keeps the larger row count, an unknown one is appended.
///
/// Taking the max of the counts (not the sum) is what keeps a full rerun of
/// the same batch from double-counting.
pub fn merge_sources(existing: &[SourceRecord], incoming: &[SourceRecord]) -> Vec<SourceRecord> {
    let mut merged: Vec<SourceRecord> = existing.to_vec();

    for record in incoming {
        match merged
            .iter_mut()
            .find(|m| m.source_type == record.source_type && m.dataset == record.dataset)
        {
            Some(known) => {
                known.first_seen = earlier_of(known.first_seen, record.first_seen);
                known.last_seen = later_of(known.last_seen, record.last_seen);
                known.inspection_count = known.inspection_count.max(record.inspection_count);
            }
            None => merged.push(record.clone()),
        }
    }

    merged
}

// ============================================================================
// UPSERT ENGINE
// ============================================================================

pub struct UpsertEngine {
    /// Currency window in calendar months
    pub recent_months: u32,

    /// Candidates per transaction; boundaries have no semantic effect
    pub batch_size: usize,

    /// "Now" for the currency rule - injected so tests are deterministic
    pub today: NaiveDate,
}

impl UpsertEngine {
    pub fn new(recent_months: u32, batch_size: usize, today: NaiveDate) -> Self {
        UpsertEngine {
            recent_months,
            batch_size,
            today,
        }
    }

    /// Calendar-month cutoff for the currency rule.
    ///
    /// Calendar months, not a fixed day count: `18 months before 2024-07-15`
    /// is `2023-01-15`. The consistency sweep uses the same arithmetic.
    pub fn currency_cutoff(&self) -> Result<NaiveDate> {
        self.today
            .checked_sub_months(Months::new(self.recent_months))
            .context("Currency window underflowed the calendar")
    }

    /// Merge all candidates into the store, one transaction per chunk.
    ///
    /// A failure aborts the current chunk's transaction; chunks already
    /// committed stay committed, and a full rerun converges to the same
    /// final state.
    pub fn apply(
        &self,
        conn: &mut Connection,
        candidates: &[TenancyCandidate],
        stats: &mut TransformStats,
    ) -> Result<()> {
        let cutoff = self.currency_cutoff()?;

        for chunk in candidates.chunks(self.batch_size.max(1)) {
            let tx = conn.transaction()?;

            for candidate in chunk {
                if upsert_one(&tx, candidate, cutoff)? {
                    stats.tenancies_created += 1;
                } else {
                    stats.tenancies_updated += 1;
                }
            }

            tx.commit()?;
        }

        Ok(())
    }
}

/// Insert or merge a single candidate. Returns true if a row was created.
///
/// The read-then-write is safe inside the enclosing transaction; across
/// processes the UNIQUE(location_id, business_name) index is what forces two
/// racing upserts on the same key to serialize.
fn upsert_one(conn: &Connection, candidate: &TenancyCandidate, cutoff: NaiveDate) -> Result<bool> {
    let existing = db::get_tenancy_by_key(conn, candidate.location_id, &candidate.business_name)?;

    match existing {
        None => {
            let current = is_current(candidate.end_date, cutoff);
            conn.execute(
                "INSERT INTO tenancies
                    (location_id, business_name, category, start_date, end_date,
                     is_current, sources)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    candidate.location_id,
                    candidate.business_name,
                    candidate.category,
                    candidate.start_date.map(|d| d.to_string()),
                    candidate.end_date.map(|d| d.to_string()),
                    current as i64,
                    serde_json::to_string(&candidate.sources)?,
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to insert tenancy ({}, {})",
                    candidate.location_id, candidate.business_name
                )
            })?;

            Ok(true)
        }
        Some(stored) => {
            let start_date = earlier_of(stored.start_date, candidate.start_date);
            let end_date = later_of(stored.end_date, candidate.end_date);
            let current = is_current(end_date, cutoff);
            let sources = merge_sources(&stored.sources, &candidate.sources);

            // Category is set on insert only; classification is not this
            // pipeline's job
            conn.execute(
                "UPDATE tenancies
                 SET start_date = ?1, end_date = ?2, is_current = ?3, sources = ?4
                 WHERE id = ?5",
                params![
                    start_date.map(|d| d.to_string()),
                    end_date.map(|d| d.to_string()),
                    current as i64,
                    serde_json::to_string(&sources)?,
                    stored.id,
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to update tenancy ({}, {})",
                    candidate.location_id, candidate.business_name
                )
            })?;

            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::grouper::{DATASET_KC_INSPECTIONS, SOURCE_TYPE_SEED};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn candidate(
        location_id: i64,
        business: &str,
        start: Option<&str>,
        end: Option<&str>,
        count: u32,
    ) -> TenancyCandidate {
        TenancyCandidate {
            location_id,
            business_name: business.to_string(),
            address: "123 MAIN ST".to_string(),
            lat: 47.6062,
            lon: -122.3321,
            category: "UNKNOWN".to_string(),
            start_date: start.map(date),
            end_date: end.map(date),
            sources: vec![SourceRecord {
                source_type: SOURCE_TYPE_SEED.to_string(),
                dataset: DATASET_KC_INSPECTIONS.to_string(),
                first_seen: start.map(date),
                last_seen: end.map(date),
                inspection_count: count,
            }],
        }
    }

    fn setup_with_location() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let loc = db::insert_location(&conn, 47.6062, -122.3321, "123 MAIN ST", "k1").unwrap();
        (conn, loc)
    }

    fn engine(today: &str) -> UpsertEngine {
        UpsertEngine::new(18, 4000, date(today))
    }

    #[test]
    fn test_earlier_and_later_are_null_aware() {
        let jan = Some(date("2024-01-01"));
        let jun = Some(date("2024-06-01"));

        assert_eq!(earlier_of(jan, jun), jan);
        assert_eq!(earlier_of(jan, None), jan);
        assert_eq!(earlier_of(None, jun), jun);
        assert_eq!(earlier_of(None, None), None);

        assert_eq!(later_of(jan, jun), jun);
        assert_eq!(later_of(None, jan), jan);
        assert_eq!(later_of(None, None), None);
    }

    #[test]
    fn test_is_current_boundary() {
        let cutoff = date("2023-02-15");

        assert!(is_current(Some(date("2023-02-15")), cutoff));
        assert!(is_current(Some(date("2024-01-01")), cutoff));
        assert!(!is_current(Some(date("2023-02-14")), cutoff));
        assert!(!is_current(None, cutoff));
    }

    #[test]
    fn test_currency_cutoff_is_calendar_months() {
        let engine = engine("2024-07-15");
        assert_eq!(engine.currency_cutoff().unwrap(), date("2023-01-15"));
    }

    #[test]
    fn test_insert_then_widen() {
        let (mut conn, loc) = setup_with_location();
        let engine = engine("2024-07-15");
        let mut stats = TransformStats::default();

        let a = candidate(loc, "STARBUCKS", Some("2020-01-01"), Some("2020-06-01"), 3);
        engine.apply(&mut conn, &[a], &mut stats).unwrap();

        let b = candidate(loc, "STARBUCKS", Some("2019-01-01"), Some("2020-03-01"), 2);
        engine.apply(&mut conn, &[b], &mut stats).unwrap();

        let stored = db::get_tenancy_by_key(&conn, loc, "STARBUCKS").unwrap().unwrap();
        assert_eq!(stored.start_date, Some(date("2019-01-01")));
        assert_eq!(stored.end_date, Some(date("2020-06-01")));
        assert_eq!(stats.tenancies_created, 1);
        assert_eq!(stats.tenancies_updated, 1);
    }

    #[test]
    fn test_null_incoming_dates_never_narrow() {
        let (mut conn, loc) = setup_with_location();
        let engine = engine("2024-07-15");
        let mut stats = TransformStats::default();

        let a = candidate(loc, "STARBUCKS", Some("2024-01-10"), Some("2024-06-15"), 2);
        engine.apply(&mut conn, &[a], &mut stats).unwrap();

        let b = candidate(loc, "STARBUCKS", None, None, 0);
        engine.apply(&mut conn, &[b], &mut stats).unwrap();

        let stored = db::get_tenancy_by_key(&conn, loc, "STARBUCKS").unwrap().unwrap();
        assert_eq!(stored.start_date, Some(date("2024-01-10")));
        assert_eq!(stored.end_date, Some(date("2024-06-15")));
    }

    #[test]
    fn test_is_current_recomputed_from_merged_end() {
        let (mut conn, loc) = setup_with_location();
        let engine = engine("2024-07-15");
        let mut stats = TransformStats::default();

        // Stale on its own...
        let a = candidate(loc, "STARBUCKS", Some("2020-01-01"), Some("2020-06-01"), 1);
        engine.apply(&mut conn, &[a], &mut stats).unwrap();
        let stored = db::get_tenancy_by_key(&conn, loc, "STARBUCKS").unwrap().unwrap();
        assert!(!stored.is_current);

        // ...but a recent observation flips it
        let b = candidate(loc, "STARBUCKS", Some("2024-05-01"), Some("2024-05-01"), 1);
        engine.apply(&mut conn, &[b], &mut stats).unwrap();
        let stored = db::get_tenancy_by_key(&conn, loc, "STARBUCKS").unwrap().unwrap();
        assert!(stored.is_current);
        assert_eq!(stored.end_date, Some(date("2024-05-01")));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (mut conn, loc) = setup_with_location();
        let engine = engine("2024-07-15");
        let mut stats = TransformStats::default();

        let candidates = vec![
            candidate(loc, "STARBUCKS", Some("2024-01-10"), Some("2024-06-15"), 2),
            candidate(loc, "TULLYS", Some("2019-01-01"), Some("2019-06-01"), 1),
        ];

        engine.apply(&mut conn, &candidates, &mut stats).unwrap();
        let first = db::get_all_tenancies(&conn).unwrap();

        engine.apply(&mut conn, &candidates, &mut stats).unwrap();
        let second = db::get_all_tenancies(&conn).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.start_date, b.start_date);
            assert_eq!(a.end_date, b.end_date);
            assert_eq!(a.is_current, b.is_current);
            assert_eq!(a.sources, b.sources);
        }
    }

    #[test]
    fn test_chunk_boundaries_have_no_semantic_effect() {
        let candidates: Vec<TenancyCandidate> = (0..5)
            .map(|i| {
                candidate(1, &format!("BIZ {}", i), Some("2024-01-01"), Some("2024-06-01"), 1)
            })
            .collect();

        let (mut conn_one, _) = setup_with_location();
        let mut stats = TransformStats::default();
        UpsertEngine::new(18, 1, date("2024-07-15"))
            .apply(&mut conn_one, &candidates, &mut stats)
            .unwrap();

        let (mut conn_all, _) = setup_with_location();
        UpsertEngine::new(18, 4000, date("2024-07-15"))
            .apply(&mut conn_all, &candidates, &mut stats)
            .unwrap();

        let one = db::get_all_tenancies(&conn_one).unwrap();
        let all = db::get_all_tenancies(&conn_all).unwrap();
        assert_eq!(one.len(), all.len());
        for (a, b) in one.iter().zip(all.iter()) {
            assert_eq!(a.business_name, b.business_name);
            assert_eq!(a.start_date, b.start_date);
            assert_eq!(a.end_date, b.end_date);
        }
    }

    #[test]
    fn test_merge_sources_widens_known_dataset() {
        let existing = vec![SourceRecord {
            source_type: "seed".into(),
            dataset: "king_county_food_inspections".into(),
            first_seen: Some(date("2020-01-01")),
            last_seen: Some(date("2020-06-01")),
            inspection_count: 3,
        }];
        let incoming = vec![SourceRecord {
            source_type: "seed".into(),
            dataset: "king_county_food_inspections".into(),
            first_seen: Some(date("2019-01-01")),
            last_seen: Some(date("2020-03-01")),
            inspection_count: 5,
        }];

        let merged = merge_sources(&existing, &incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].first_seen, Some(date("2019-01-01")));
        assert_eq!(merged[0].last_seen, Some(date("2020-06-01")));
        assert_eq!(merged[0].inspection_count, 5);
    }

    #[test]
    fn test_merge_sources_appends_new_dataset() {
        let existing = vec![SourceRecord {
            source_type: "seed".into(),
            dataset: "king_county_food_inspections".into(),
            first_seen: None,
            last_seen: None,
            inspection_count: 0,
        }];
        let incoming = vec![SourceRecord {
            source_type: "seed".into(),
            dataset: "other_dataset".into(),
            first_seen: Some(date("2024-01-01")),
            last_seen: Some(date("2024-01-01")),
            inspection_count: 1,
        }];

        let merged = merge_sources(&existing, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].dataset, "other_dataset");
    }

    #[test]
    fn test_category_untouched_on_update() {
        let (mut conn, loc) = setup_with_location();
        let engine = engine("2024-07-15");
        let mut stats = TransformStats::default();

        engine
            .apply(
                &mut conn,
                &[candidate(loc, "STARBUCKS", Some("2024-01-10"), Some("2024-01-10"), 1)],
                &mut stats,
            )
            .unwrap();
        conn.execute("UPDATE tenancies SET category = 'COFFEE'", [])
            .unwrap();

        engine
            .apply(
                &mut conn,
                &[candidate(loc, "STARBUCKS", Some("2024-06-15"), Some("2024-06-15"), 1)],
                &mut stats,
            )
            .unwrap();

        let stored = db::get_tenancy_by_key(&conn, loc, "STARBUCKS").unwrap().unwrap();
        assert_eq!(stored.category, "COFFEE");
    }

    #[test]
    fn test_failed_chunk_keeps_earlier_committed_chunks() {
        let (mut conn, loc) = setup_with_location();
        let engine = UpsertEngine::new(18, 1, date("2024-07-15"));
        let mut stats = TransformStats::default();

        // Second candidate points at a location that does not exist, so its
        // chunk hits the foreign key and rolls back after chunk one committed.
        let candidates = vec![
            candidate(loc, "STARBUCKS", Some("2024-01-10"), Some("2024-06-15"), 2),
            candidate(9999, "GHOST", Some("2024-01-01"), Some("2024-01-01"), 1),
        ];

        let result = engine.apply(&mut conn, &candidates, &mut stats);
        assert!(result.is_err());

        let tenancies = db::get_all_tenancies(&conn).unwrap();
        assert_eq!(tenancies.len(), 1);
        assert_eq!(tenancies[0].business_name, "STARBUCKS");
        assert_eq!(stats.tenancies_created, 1);
    }
}
