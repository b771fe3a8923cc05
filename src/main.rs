use anyhow::{bail, Result};
use chrono::Local;
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use storefront_history::{
    load_csv_to_staging, run_transform, setup_database, PipelineConfig,
};

const DEFAULT_DB_PATH: &str = "storefront_history.db";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("load") => {
            let csv_path = match args.get(2) {
                Some(p) => PathBuf::from(p),
                None => {
                    print_usage();
                    bail!("`load` needs a CSV path");
                }
            };
            run_load(&csv_path, db_path(&args, 3))
        }
        Some("transform") => run_transform_job(db_path(&args, 2)),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn db_path(args: &[String], index: usize) -> PathBuf {
    args.get(index)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

fn print_usage() {
    println!("Storefront History v{}", storefront_history::VERSION);
    println!();
    println!("Usage:");
    println!("  storefront-history load <inspections.csv> [db]   Load CSV into staging");
    println!("  storefront-history transform [db]                Run the ETL pipeline");
    println!();
    println!("Environment:");
    println!("  ROUND_PLACES, RECENT_MONTHS, OUTDATED_TENANCY_MONTHS, ETL_BATCH_SIZE");
}

fn run_load(csv_path: &Path, db_path: PathBuf) -> Result<()> {
    let config = PipelineConfig::from_env()?;

    println!("📂 Loading inspections from: {}", csv_path.display());
    println!("   Database: {}", db_path.display());

    let mut conn = Connection::open(&db_path)?;
    setup_database(&conn)?;

    let stats = load_csv_to_staging(&mut conn, csv_path, config.batch_size)?;

    println!("\n✓ Rows processed: {}", stats.processed);
    println!("✓ Rows skipped (missing name/address/coords): {}", stats.skipped);
    println!("✓ Inserted: {}", stats.inserted);
    println!("✓ Already staged (duplicates): {}", stats.duplicates);

    Ok(())
}

fn run_transform_job(db_path: PathBuf) -> Result<()> {
    let config = PipelineConfig::from_env()?;
    let today = Local::now().date_naive();

    println!("{}", "=".repeat(80));
    println!("FOOD INSPECTIONS → LOCATIONS & TENANCIES TRANSFORMATION");
    println!("{}", "=".repeat(80));
    println!("\nConfiguration:");
    println!("  Database: {}", db_path.display());
    println!("  Round places: {}", config.round_places);
    println!("  Recent months threshold: {}", config.recent_months);
    println!("  Outdated tenancy months: {}", config.outdated_tenancy_months);
    println!("  Batch size: {}", config.batch_size);
    println!("\n{}\n", "-".repeat(80));

    let mut conn = Connection::open(&db_path)?;
    setup_database(&conn)?;

    run_transform(&mut conn, &config, today)?;

    println!("\n{}", "=".repeat(80));
    println!("TRANSFORMATION COMPLETE");
    println!("{}", "=".repeat(80));

    Ok(())
}
