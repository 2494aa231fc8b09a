// 🏭 Pipeline Driver
//
// Schema -> Loaders (parallel) -> Attribute Normalizer -> Hours Merger
//        -> Cascade Cleaner -> Exporter
//
// Every stage after the loaders runs on one connection, strictly in order.
// Stage failures abort the run with a message naming the stage.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::attributes::{normalize_attributes, NormalizeReport};
use crate::cleanup::{CascadeCleaner, CleanupReport};
use crate::config::PipelineConfig;
use crate::events::{self, insert_event, Event};
use crate::export::{export_all, ExportReport};
use crate::hours::{merge_hours, MergeReport};
use crate::loaders::{load_all, LoadReport};
use crate::schema::{open_store, setup_database};

/// Stages that can be run on their own against an existing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Normalize,
    Clean,
    Export,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub loads: Vec<LoadReport>,
    pub attributes: NormalizeReport,
    pub hours: MergeReport,
    pub cleanup: CleanupReport,
    pub export: ExportReport,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    run_id: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Pipeline {
            config,
            run_id: events::new_run_id(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Full run: optional rebuild, then every stage in order
    pub fn run(&self) -> Result<PipelineReport> {
        self.config.validate()?;
        info!(run_id = %self.run_id, store = %self.config.store_path.display(), "pipeline started");

        if self.config.fresh_store {
            remove_store_files(&self.config.store_path).with_context(|| {
                format!(
                    "Failed to remove existing store {}",
                    self.config.store_path.display()
                )
            })?;
        }
        self.prepare_store()?;
        self.record(
            events::RUN_STARTED,
            "pipeline",
            serde_json::json!({
                "store": self.config.store_path,
                "subset": self.config.subset,
                "fresh_store": self.config.fresh_store,
            }),
        )?;

        let loads = self.load()?;
        let (attributes, hours) = self.normalize()?;
        let cleanup = self.clean()?;
        let export = self.export()?;

        let report = PipelineReport {
            run_id: self.run_id.clone(),
            loads,
            attributes,
            hours,
            cleanup,
            export,
        };
        self.record(events::RUN_COMPLETED, "pipeline", serde_json::json!({}))?;
        info!(run_id = %self.run_id, "pipeline finished");

        Ok(report)
    }

    /// Run one stage against an existing store
    pub fn run_stage(&self, stage: Stage) -> Result<()> {
        self.config.validate()?;
        self.prepare_store()?;
        match stage {
            Stage::Load => self.load().map(|_| ()),
            Stage::Normalize => self.normalize().map(|_| ()),
            Stage::Clean => self.clean().map(|_| ()),
            Stage::Export => self.export().map(|_| ()),
        }
    }

    /// Create the store file and its tables if missing
    pub fn prepare_store(&self) -> Result<()> {
        if let Some(parent) = self.config.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = self.open()?;
        setup_database(&conn).context("Schema initialization failed")?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<LoadReport>> {
        let reports = load_all(self.config).context("Load stage failed")?;

        for report in &reports {
            self.record(
                events::LOADER_COMPLETED,
                report.kind.name(),
                serde_json::to_value(report)?,
            )?;
        }
        Ok(reports)
    }

    /// Fold raw attribute rows and raw hours rows into their business columns
    pub fn normalize(&self) -> Result<(NormalizeReport, MergeReport)> {
        let mut conn = self.open()?;

        let attributes =
            normalize_attributes(&mut conn).context("Attribute normalization stage failed")?;
        self.record_on(
            &conn,
            events::ATTRIBUTES_NORMALIZED,
            "normalize",
            serde_json::to_value(attributes)?,
        )?;

        let hours = merge_hours(&mut conn).context("Hours merge stage failed")?;
        self.record_on(
            &conn,
            events::HOURS_MERGED,
            "normalize",
            serde_json::to_value(hours)?,
        )?;

        Ok((attributes, hours))
    }

    pub fn clean(&self) -> Result<CleanupReport> {
        let mut conn = self.open()?;
        let cleaner = CascadeCleaner::new(self.config.subset.clone());

        let mut completed = Vec::new();
        let result = cleaner.run_with(&mut conn, |outcome| {
            completed.push(outcome.clone());
            Ok(())
        });

        // stages that committed before a failure still get their event
        for outcome in &completed {
            self.record_on(
                &conn,
                events::CLEANUP_STAGE_COMPLETED,
                outcome.stage.name(),
                serde_json::to_value(outcome)?,
            )?;
        }

        result.context("Cleanup stage failed")
    }

    pub fn export(&self) -> Result<ExportReport> {
        let conn = self.open()?;
        let report = export_all(
            &conn,
            &self.config.export_dir,
            self.config.export_chunk_size,
        )
        .context("Export stage failed")?;

        self.record_on(
            &conn,
            events::EXPORT_COMPLETED,
            "export",
            serde_json::to_value(&report)?,
        )?;
        Ok(report)
    }

    fn open(&self) -> Result<Connection> {
        open_store(
            &self.config.store_path,
            Duration::from_millis(self.config.busy_timeout_ms),
        )
        .with_context(|| format!("Failed to open store {}", self.config.store_path.display()))
    }

    fn record(&self, event_type: &str, stage: &str, data: serde_json::Value) -> Result<()> {
        let conn = self.open()?;
        self.record_on(&conn, event_type, stage, data)
    }

    fn record_on(
        &self,
        conn: &Connection,
        event_type: &str,
        stage: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        insert_event(conn, &Event::new(&self.run_id, event_type, stage, data))
    }
}

/// Delete a store file together with its WAL and shared-memory siblings
pub fn remove_store_files(path: &Path) -> io::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        let file = PathBuf::from(name);

        match fs::remove_file(&file) {
            Ok(()) => info!(file = %file.display(), "removed existing store file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_store_files_takes_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("yelp.db");
        for name in ["yelp.db", "yelp.db-wal", "yelp.db-shm", "keep.json"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        remove_store_files(&store).unwrap();

        assert!(!store.exists());
        assert!(!dir.path().join("yelp.db-wal").exists());
        assert!(!dir.path().join("yelp.db-shm").exists());
        assert!(dir.path().join("keep.json").exists());
    }

    #[test]
    fn test_remove_missing_store_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        remove_store_files(&dir.path().join("absent.db")).unwrap();
    }

    #[test]
    fn test_stage_names_match_cli() {
        let stage: Stage = serde_json::from_str("\"normalize\"").unwrap();
        assert_eq!(stage, Stage::Normalize);
    }

    #[test]
    fn test_clean_records_one_event_per_committed_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::from_data_dir(dir.path());
        let pipeline = Pipeline::new(&config);
        pipeline.prepare_store().unwrap();

        let report = pipeline.clean().unwrap();

        let conn = pipeline.open().unwrap();
        let events = events::events_for_run(&conn, pipeline.run_id()).unwrap();
        let stages: Vec<&str> = events.iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(report.stages_run.len(), 4);
        assert_eq!(stages, vec!["filtering", "orphan_sweep", "user_sweep", "reclaim"]);
        assert!(events
            .iter()
            .all(|e| e.event_type == events::CLEANUP_STAGE_COMPLETED));

        // finished cleanup: nothing runs, nothing recorded
        let again = Pipeline::new(&config);
        again.clean().unwrap();
        assert!(events::events_for_run(&conn, again.run_id()).unwrap().is_empty());
    }
}
