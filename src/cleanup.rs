// 🧹 Subset Filter / Cascade Cleaner
//
// Four stages, always in this order, each committed before the next starts:
//
//   Filtering -> OrphanSweep -> UserSweep -> Reclaim
//
// The cleaner as a whole is not atomic. After every stage the completed stage
// is written to `cleanup_state` in the same transaction as the deletes, so an
// interrupted run resumes after the last stage that actually committed.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::config::SubsetPredicate;
use crate::schema::BUSINESS_DEPENDENT_TABLES;

// ============================================================================
// STAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CleanupStage {
    Filtering,
    OrphanSweep,
    UserSweep,
    Reclaim,
}

impl CleanupStage {
    /// The only legal execution order
    pub const ORDER: [CleanupStage; 4] = [
        CleanupStage::Filtering,
        CleanupStage::OrphanSweep,
        CleanupStage::UserSweep,
        CleanupStage::Reclaim,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CleanupStage::Filtering => "filtering",
            CleanupStage::OrphanSweep => "orphan_sweep",
            CleanupStage::UserSweep => "user_sweep",
            CleanupStage::Reclaim => "reclaim",
        }
    }

    /// Stage that follows this one, `None` after the last
    pub fn next(&self) -> Option<CleanupStage> {
        match self {
            CleanupStage::Filtering => Some(CleanupStage::OrphanSweep),
            CleanupStage::OrphanSweep => Some(CleanupStage::UserSweep),
            CleanupStage::UserSweep => Some(CleanupStage::Reclaim),
            CleanupStage::Reclaim => None,
        }
    }
}

impl FromStr for CleanupStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CleanupStage::ORDER
            .iter()
            .copied()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown cleanup stage {:?}", s))
    }
}

impl fmt::Display for CleanupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Stages executed by this call, in order
    pub stages_run: Vec<CleanupStage>,
    pub businesses_removed: usize,
    /// Table -> rows removed by the orphan sweep
    pub orphans_removed: BTreeMap<String, usize>,
    pub users_removed: usize,
}

impl CleanupReport {
    pub fn orphans_total(&self) -> usize {
        self.orphans_removed.values().sum()
    }
}

/// Result of one stage, handed to the observer passed to `run_with`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: CleanupStage,
    pub rows_removed: usize,
}

// ============================================================================
// CLEANER
// ============================================================================

pub struct CascadeCleaner {
    predicate: SubsetPredicate,
}

impl CascadeCleaner {
    pub fn new(predicate: SubsetPredicate) -> Self {
        CascadeCleaner { predicate }
    }

    pub fn predicate(&self) -> &SubsetPredicate {
        &self.predicate
    }

    /// First stage still to run, or `None` when this predicate's cleanup is done
    pub fn resume_point(&self, conn: &Connection) -> Result<Option<CleanupStage>> {
        let saved: Option<(String, String)> = conn
            .query_row(
                "SELECT predicate_fingerprint, completed_stage FROM cleanup_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match saved {
            Some((fingerprint, completed)) if fingerprint == self.predicate.fingerprint() => {
                let completed: CleanupStage = completed
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Corrupt cleanup_state row")?;
                Ok(completed.next())
            }
            // no checkpoint, or one left by a different predicate
            _ => Ok(Some(CleanupStage::Filtering)),
        }
    }

    pub fn run(&self, conn: &mut Connection) -> Result<CleanupReport> {
        self.run_with(conn, |_| Ok(()))
    }

    /// Run every remaining stage, calling `observe` after each commit.
    /// An observer error stops the cleaner; the committed stage stays committed.
    pub fn run_with<F>(&self, conn: &mut Connection, mut observe: F) -> Result<CleanupReport>
    where
        F: FnMut(&StageOutcome) -> Result<()>,
    {
        let mut report = CleanupReport::default();
        let mut stage = self.resume_point(conn)?;

        if stage.is_none() {
            info!(state = %self.predicate.state, category = %self.predicate.category, "cleanup already complete");
        }

        while let Some(current) = stage {
            let rows_removed = self
                .run_stage(conn, current, &mut report)
                .with_context(|| format!("Cleanup stage {} failed", current))?;

            let outcome = StageOutcome {
                stage: current,
                rows_removed,
            };
            info!(stage = current.name(), rows_removed, "cleanup stage committed");
            observe(&outcome)?;

            report.stages_run.push(current);
            stage = current.next();
        }

        Ok(report)
    }

    fn run_stage(
        &self,
        conn: &mut Connection,
        stage: CleanupStage,
        report: &mut CleanupReport,
    ) -> Result<usize> {
        if stage == CleanupStage::Reclaim {
            // VACUUM cannot run inside a transaction
            reclaim(conn)?;
            let tx = conn.transaction()?;
            self.save_checkpoint(&tx, stage)?;
            tx.commit()?;
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let removed = match stage {
            CleanupStage::Filtering => {
                let n = filter_businesses(&tx, &self.predicate)?;
                report.businesses_removed = n;
                n
            }
            CleanupStage::OrphanSweep => {
                let per_table = sweep_orphans(&tx)?;
                let n = per_table.values().sum();
                report.orphans_removed = per_table;
                n
            }
            CleanupStage::UserSweep => {
                let n = sweep_users(&tx)?;
                report.users_removed = n;
                n
            }
            CleanupStage::Reclaim => 0,
        };
        self.save_checkpoint(&tx, stage)?;
        tx.commit()?;

        Ok(removed)
    }

    fn save_checkpoint(&self, tx: &Transaction, stage: CleanupStage) -> Result<()> {
        let predicate_json = serde_json::to_string(&self.predicate)?;
        tx.execute(
            "INSERT OR REPLACE INTO cleanup_state
                (id, predicate_fingerprint, predicate, completed_stage, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                self.predicate.fingerprint(),
                predicate_json,
                stage.name(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// STAGE BODIES
// ============================================================================

/// Delete every business outside the subset, decided by one set-membership
/// test against the business/category join
fn filter_businesses(tx: &Transaction, predicate: &SubsetPredicate) -> Result<usize> {
    let removed = tx.execute(
        "DELETE FROM business
         WHERE business_id NOT IN (
             SELECT b.business_id
             FROM business b
             JOIN business_categories bc ON b.business_id = bc.business_id
             WHERE b.state = ?1
               AND bc.category = ?2
         )",
        params![predicate.state, predicate.category],
    )?;
    Ok(removed)
}

/// Delete dependent rows whose business no longer exists
fn sweep_orphans(tx: &Transaction) -> Result<BTreeMap<String, usize>> {
    let mut removed = BTreeMap::new();
    for table in BUSINESS_DEPENDENT_TABLES {
        let n = tx
            .execute(
                &format!(
                    "DELETE FROM {} WHERE business_id NOT IN (SELECT business_id FROM business)",
                    table
                ),
                [],
            )
            .with_context(|| format!("Failed to sweep {}", table))?;
        removed.insert(table.to_string(), n);
    }
    Ok(removed)
}

/// Delete users with neither a review nor a tip left
fn sweep_users(tx: &Transaction) -> Result<usize> {
    let removed = tx.execute(
        "DELETE FROM user
         WHERE user_id NOT IN (SELECT user_id FROM review)
           AND user_id NOT IN (SELECT user_id FROM tip)",
        [],
    )?;
    Ok(removed)
}

/// Give freed pages back to the file system
fn reclaim(conn: &Connection) -> Result<()> {
    conn.execute_batch("VACUUM").context("VACUUM failed")?;
    // fold the WAL back into the main file so the on-disk size actually drops
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        .context("WAL checkpoint failed")?;
    Ok(())
}
