// Consistency enforcer - restore the single-current-per-location invariant
//
// Runs over the whole tenancy store, not just the latest batch: every batch
// (and every rerun) can independently mark rows current. Two passes, both
// pure set-based UPDATEs so chunk boundaries upstream cannot matter:
//   1. collapse locations with more than one current tenancy to exactly one
//   2. demote currents not seen within the staleness window
// Re-running repair on an already-consistent store changes zero rows.

use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use rusqlite::{params, Connection};

pub struct ConsistencyEnforcer {
    /// Staleness window in calendar months (same arithmetic as the
    /// upsert engine's currency window)
    pub outdated_months: u32,

    /// "Now" for the staleness rule - injected so tests are deterministic
    pub today: NaiveDate,
}

impl ConsistencyEnforcer {
    pub fn new(outdated_months: u32, today: NaiveDate) -> Self {
        ConsistencyEnforcer {
            outdated_months,
            today,
        }
    }

    /// Run both repair passes in one transaction. Returns rows changed.
    pub fn repair(&self, conn: &mut Connection) -> Result<usize> {
        let cutoff = self
            .today
            .checked_sub_months(Months::new(self.outdated_months))
            .context("Staleness window underflowed the calendar")?;

        let tx = conn.transaction()?;

        // Pass 1: among a location's current tenancies keep only the one
        // with the greatest end_date; ties go to the most recently created
        // row. Ranking every current row and demoting rank > 1 touches
        // exactly the locations that have more than one.
        let collapsed = tx.execute(
            "UPDATE tenancies SET is_current = 0
             WHERE id IN (
                 SELECT id FROM (
                     SELECT id,
                            ROW_NUMBER() OVER (
                                PARTITION BY location_id
                                ORDER BY end_date DESC, created_at DESC, id DESC
                            ) AS rn
                     FROM tenancies
                     WHERE is_current = 1
                 )
                 WHERE rn > 1
             )",
            [],
        )?;

        // Pass 2: staleness sweep
        let demoted = tx.execute(
            "UPDATE tenancies SET is_current = 0
             WHERE is_current = 1 AND end_date < ?1",
            params![cutoff.to_string()],
        )?;

        tx.commit()?;

        Ok(collapsed + demoted)
    }
}
