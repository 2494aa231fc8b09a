// 🚚 Entity Loaders - four independent JSONL -> store workers
//
// Each loader owns its own connection and writes disjoint tables. They run in
// parallel and are all awaited before the failures are reported together.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::batch::BatchWriter;
use crate::config::{DecodePolicy, PipelineConfig};
use crate::decoder::JsonLinesDecoder;
use crate::error::{LoaderFailure, PipelineError, PipelineResult};
use crate::records::{BusinessRecord, ReviewRecord, SourceRecord, TipRecord, UserRecord};
use crate::schema::open_store;

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Business,
    Review,
    Tip,
    User,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Business,
        EntityKind::Review,
        EntityKind::Tip,
        EntityKind::User,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Business => "business",
            EntityKind::Review => "review",
            EntityKind::Tip => "tip",
            EntityKind::User => "user",
        }
    }

    /// Tables this loader is the sole writer of
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Business => &[
                "business",
                "business_attributes",
                "business_categories",
                "business_hours",
            ],
            EntityKind::Review => &["review"],
            EntityKind::Tip => &["tip"],
            EntityKind::User => &["user"],
        }
    }

    pub fn source_path<'a>(&self, config: &'a PipelineConfig) -> &'a Path {
        match self {
            EntityKind::Business => &config.sources.business,
            EntityKind::Review => &config.sources.review,
            EntityKind::Tip => &config.sources.tip,
            EntityKind::User => &config.sources.user,
        }
    }
}

// ============================================================================
// LOAD REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub kind: EntityKind,
    pub source: PathBuf,
    /// Records decoded and committed
    pub records: usize,
    /// Rows written across every table the loader owns
    pub rows_written: usize,
    pub batches: usize,
    /// Lines dropped under `DecodePolicy::SkipInvalid`
    pub skipped: usize,
    pub elapsed: Duration,
}

// ============================================================================
// LOADING
// ============================================================================

/// Run one loader to completion on its own connection
pub fn run_loader(kind: EntityKind, config: &PipelineConfig) -> PipelineResult<LoadReport> {
    match kind {
        EntityKind::Business => load_source::<BusinessRecord>(kind, config),
        EntityKind::Review => load_source::<ReviewRecord>(kind, config),
        EntityKind::Tip => load_source::<TipRecord>(kind, config),
        EntityKind::User => load_source::<UserRecord>(kind, config),
    }
}

fn load_source<T: SourceRecord>(
    kind: EntityKind,
    config: &PipelineConfig,
) -> PipelineResult<LoadReport> {
    let started = Instant::now();
    let path = kind.source_path(config);

    if !path.is_file() {
        return Err(PipelineError::SourceNotFound {
            loader: kind.name().to_string(),
            path: path.to_path_buf(),
        });
    }

    info!(loader = kind.name(), source = %path.display(), "loader started");

    let decoder = JsonLinesDecoder::<_, T>::open(path)?;
    let mut conn = open_store(
        &config.store_path,
        Duration::from_millis(config.busy_timeout_ms),
    )?;

    let mut writer = BatchWriter::new(&mut conn, config.batch_size);
    let mut skipped = 0;

    for item in decoder {
        match item {
            Ok(decoded) => writer.push(decoded.record)?,
            Err(err) => match config.decode_policy {
                DecodePolicy::Strict => return Err(err.into()),
                DecodePolicy::SkipInvalid => {
                    warn!(loader = kind.name(), line = err.line, reason = %err.reason, "skipping undecodable line");
                    skipped += 1;
                }
            },
        }
    }

    let stats = writer.finish()?;
    let report = LoadReport {
        kind,
        source: path.to_path_buf(),
        records: stats.records,
        rows_written: stats.rows,
        batches: stats.batches,
        skipped,
        elapsed: started.elapsed(),
    };

    info!(
        loader = kind.name(),
        records = report.records,
        rows = report.rows_written,
        batches = report.batches,
        skipped = report.skipped,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "loader finished"
    );

    Ok(report)
}

/// Run every loader in parallel and wait for all of them.
///
/// A failing loader never cancels its siblings; committed batches of any
/// loader stay in the store whatever the outcome.
pub fn load_all(config: &PipelineConfig) -> PipelineResult<Vec<LoadReport>> {
    let outcomes: Vec<(EntityKind, PipelineResult<LoadReport>)> = EntityKind::ALL
        .par_iter()
        .map(|&kind| (kind, run_loader(kind, config)))
        .collect();

    let mut reports = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for (kind, outcome) in outcomes {
        match outcome {
            Ok(report) => reports.push(report),
            Err(error) => {
                warn!(loader = kind.name(), error = %error, "loader failed");
                failures.push(LoaderFailure { kind, error });
            }
        }
    }

    if failures.is_empty() {
        Ok(reports)
    } else {
        Err(PipelineError::LoadersFailed(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{count_rows, setup_database};
    use rusqlite::Connection;
    use std::fs;

    fn config_in(dir: &Path) -> PipelineConfig {
        let config = PipelineConfig {
            batch_size: 2,
            ..PipelineConfig::from_data_dir(dir)
        };
        let conn = Connection::open(&config.store_path).unwrap();
        setup_database(&conn).unwrap();
        config
    }

    fn write_sources(config: &PipelineConfig) {
        fs::write(
            &config.sources.business,
            concat!(
                r#"{"business_id":"b1","name":"Iron Temple","state":"FL","stars":4.5,"review_count":10,"is_open":1,"#,
                r#""attributes":{"WiFi":"u'free'","BikeParking":"True"},"categories":"Gyms, Active Life","#,
                r#""hours":{"Monday":"6:0-22:0"}}"#,
                "\n"
            ),
        )
        .unwrap();
        fs::write(
            &config.sources.review,
            concat!(
                r#"{"review_id":"r1","user_id":"u1","business_id":"b1","stars":5,"date":"2020-01-01 10:00:00"}"#,
                "\n",
                r#"{"review_id":"r2","user_id":"u2","business_id":"b1","stars":3,"date":"2020-01-02 10:00:00"}"#,
                "\n",
                r#"{"review_id":"r3","user_id":"u1","business_id":"b1","stars":4,"date":"2020-01-03 10:00:00"}"#,
                "\n"
            ),
        )
        .unwrap();
        fs::write(
            &config.sources.tip,
            concat!(
                r#"{"user_id":"u2","business_id":"b1","date":"2020-02-01 08:00:00","text":"Go early"}"#,
                "\n"
            ),
        )
        .unwrap();
        fs::write(
            &config.sources.user,
            concat!(
                r#"{"user_id":"u1","name":"Ana","yelping_since":"2015-05-05 05:05:05"}"#,
                "\n",
                r#"{"user_id":"u2","name":"Bo","yelping_since":"2016-06-06 06:06:06"}"#,
                "\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_business_loader_fills_sub_tables() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_sources(&config);

        let report = run_loader(EntityKind::Business, &config).unwrap();

        assert_eq!(report.records, 1);
        // 1 business + 2 attributes + 2 categories + 1 hours row
        assert_eq!(report.rows_written, 6);

        let conn = Connection::open(&config.store_path).unwrap();
        assert_eq!(count_rows(&conn, "business").unwrap(), 1);
        assert_eq!(count_rows(&conn, "business_attributes").unwrap(), 2);
        assert_eq!(count_rows(&conn, "business_categories").unwrap(), 2);
        assert_eq!(count_rows(&conn, "business_hours").unwrap(), 1);
    }

    #[test]
    fn test_load_all_runs_every_loader() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_sources(&config);

        let reports = load_all(&config).unwrap();

        assert_eq!(reports.len(), 4);
        let review = reports.iter().find(|r| r.kind == EntityKind::Review).unwrap();
        assert_eq!(review.records, 3);
        assert_eq!(review.batches, 2);

        let conn = Connection::open(&config.store_path).unwrap();
        assert_eq!(count_rows(&conn, "review").unwrap(), 3);
        assert_eq!(count_rows(&conn, "tip").unwrap(), 1);
        assert_eq!(count_rows(&conn, "user").unwrap(), 2);
    }

    #[test]
    fn test_missing_source_reported_without_cancelling_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_sources(&config);
        fs::remove_file(&config.sources.tip).unwrap();

        let err = load_all(&config).unwrap_err();

        match err {
            PipelineError::LoadersFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].kind, EntityKind::Tip);
                assert!(matches!(failures[0].error, PipelineError::SourceNotFound { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }

        // siblings committed their work
        let conn = Connection::open(&config.store_path).unwrap();
        assert_eq!(count_rows(&conn, "review").unwrap(), 3);
        assert_eq!(count_rows(&conn, "user").unwrap(), 2);
    }

    #[test]
    fn test_strict_policy_aborts_on_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_sources(&config);
        fs::write(
            &config.sources.user,
            concat!(
                r#"{"user_id":"u1","yelping_since":"2015-05-05 05:05:05"}"#,
                "\n",
                r#"{"name":"no id"}"#,
                "\n"
            ),
        )
        .unwrap();

        let err = run_loader(EntityKind::User, &config).unwrap_err();

        match err {
            PipelineError::Decode(decode) => assert_eq!(decode.line, 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_skip_policy_counts_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.decode_policy = DecodePolicy::SkipInvalid;
        write_sources(&config);
        fs::write(
            &config.sources.user,
            concat!(
                r#"{"user_id":"u1","yelping_since":"2015-05-05 05:05:05"}"#,
                "\n",
                "garbage\n",
                r#"{"user_id":"u2","yelping_since":"2016-06-06 06:06:06"}"#,
                "\n"
            ),
        )
        .unwrap();

        let report = run_loader(EntityKind::User, &config).unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.skipped, 1);
    }

    fn users_with_bad_utf8(config: &PipelineConfig) {
        let mut bytes = br#"{"user_id":"u0","yelping_since":"2015-05-05 05:05:05"}"#.to_vec();
        bytes.extend_from_slice(b"\n{\"user_id\":\"caf\xff\",\"yelping_since\":\"2015-05-05 05:05:05\"}\n");
        bytes.extend_from_slice(br#"{"user_id":"u2","yelping_since":"2016-06-06 06:06:06"}"#);
        bytes.push(b'\n');
        bytes.extend_from_slice(br#"{"user_id":"u3","yelping_since":"2017-07-07 07:07:07"}"#);
        bytes.push(b'\n');
        fs::write(&config.sources.user, bytes).unwrap();
    }

    #[test]
    fn test_skip_policy_keeps_records_after_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.decode_policy = DecodePolicy::SkipInvalid;
        users_with_bad_utf8(&config);

        let report = run_loader(EntityKind::User, &config).unwrap();

        assert_eq!(report.records, 3);
        assert_eq!(report.skipped, 1);
        let conn = Connection::open(&config.store_path).unwrap();
        assert_eq!(count_rows(&conn, "user").unwrap(), 3);
    }

    #[test]
    fn test_strict_policy_aborts_on_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        users_with_bad_utf8(&config);

        let err = run_loader(EntityKind::User, &config).unwrap_err();

        match err {
            PipelineError::Decode(decode) => {
                assert_eq!(decode.line, 2);
                assert_eq!(decode.kind, crate::error::DecodeErrorKind::Malformed);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
