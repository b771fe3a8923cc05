// Storefront History - Core Library
// Reconciles raw food-inspection rows into deduplicated locations and a
// history of tenancies. Exposes all modules for use in the CLI and tests.

pub mod config;
pub mod consistency;
pub mod db;
pub mod grouper;
pub mod loader;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod source;
pub mod upsert;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use consistency::ConsistencyEnforcer;
pub use db::{
    count_current_tenancies, count_locations, count_locations_with_tenancies,
    get_all_locations, get_all_tenancies, get_tenancy_by_key, setup_database,
    Location, SourceRecord, Tenancy, DEFAULT_TENANCY_CATEGORY,
};
pub use grouper::{
    group_into_candidates, TenancyCandidate, DATASET_KC_INSPECTIONS, SOURCE_TYPE_SEED,
};
pub use loader::{load_csv_to_staging, parse_inspection_date, LoadStats, RawInspectionRow};
pub use pipeline::run_transform;
pub use report::{
    print_qa_report, sample_current_tenancies, top_locations_by_tenancy_count, TransformStats,
};
pub use resolver::{normalize_address, LocationResolver};
pub use source::{count_staging_rows, fetch_normalized_rows, NormalizedRow};
pub use upsert::{earlier_of, is_current, later_of, merge_sources, UpsertEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
