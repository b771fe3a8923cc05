// Transform pipeline - staging rows → canonical locations + tenancies
//
// One sequential batch job: preload the location cache, read the normalized
// stream, group into candidates, merge-upsert in chunked transactions, then
// repair the whole store and print the QA report. Every phase is idempotent,
// so the job can always be re-run in full after a failure.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;

use crate::config::PipelineConfig;
use crate::consistency::ConsistencyEnforcer;
use crate::grouper::group_into_candidates;
use crate::report::{self, TransformStats};
use crate::resolver::LocationResolver;
use crate::source;
use crate::upsert::UpsertEngine;

/// Run the full transform. `today` anchors both recency windows.
pub fn run_transform(
    conn: &mut Connection,
    config: &PipelineConfig,
    today: NaiveDate,
) -> Result<TransformStats> {
    let mut stats = TransformStats::default();

    let mut resolver = LocationResolver::new(config.round_places);
    let preloaded = resolver.preload(conn)?;
    println!("✓ Pre-loaded {} locations", preloaded);

    let rows = source::fetch_normalized_rows(conn, config.round_places)?;
    stats.source_rows = rows.len();
    let staging_total = source::count_staging_rows(conn)? as usize;
    stats.skipped_rows = staging_total.saturating_sub(rows.len());
    println!("✓ Fetched {} normalized inspection records", rows.len());

    if rows.is_empty() {
        println!("⚠ No data to process.");
        return Ok(stats);
    }

    let candidates = group_into_candidates(conn, &rows, &mut resolver, &mut stats)?;
    println!(
        "✓ Grouped into {} tenancy candidates ({} new locations)",
        candidates.len(),
        stats.locations_created
    );

    let engine = UpsertEngine::new(config.recent_months, config.batch_size, today);
    engine.apply(conn, &candidates, &mut stats)?;
    println!(
        "✓ Upserted tenancies: {} created, {} updated",
        stats.tenancies_created, stats.tenancies_updated
    );

    let enforcer = ConsistencyEnforcer::new(config.outdated_tenancy_months, today);
    stats.consistency_fixes = enforcer.repair(conn)?;
    println!("✓ Consistency fixes applied: {}", stats.consistency_fixes);

    // Reporting is observational; a failure here must not taint the work
    // committed above
    if let Err(e) = report::print_qa_report(conn, &stats, today) {
        eprintln!("⚠ QA report failed (stored state is unaffected): {:#}", e);
    }

    Ok(stats)
}
