// 🗄️ Store Schema - Yelp dataset tables + pipeline bookkeeping
// Foreign keys are declared for documentation only; PRAGMA foreign_keys stays off
// so bulk loads never pay for (or trip over) per-row enforcement.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Data tables, parents first
pub const DATA_TABLES: [&str; 7] = [
    "business",
    "business_attributes",
    "business_categories",
    "business_hours",
    "review",
    "tip",
    "user",
];

/// Tables whose rows hang off a business and must go when the business goes
pub const BUSINESS_DEPENDENT_TABLES: [&str; 5] = [
    "review",
    "tip",
    "business_categories",
    "business_hours",
    "business_attributes",
];

/// Open a store file with the journaling and locking behavior every stage expects.
///
/// WAL lets the parallel loaders read while another one commits; the busy
/// timeout makes writers queue for the write lock instead of failing.
pub fn open_store(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    configure_connection(&conn, busy_timeout)?;
    Ok(conn)
}

pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // Enable WAL mode for concurrent loaders and crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", false)?;
    Ok(())
}

/// Create every table and index if missing. Safe to call any number of times.
pub fn setup_database(conn: &Connection) -> Result<()> {
    // bundled builds default to enforcement
    conn.pragma_update(None, "foreign_keys", false)
        .context("Failed to disable foreign key enforcement")?;

    // ==========================================================================
    // Business + sub-entities (written by the business loader)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS business (
            business_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            stars REAL NOT NULL,
            review_count INTEGER NOT NULL,
            is_open INTEGER NOT NULL,
            -- folded post-load: JSON Feature Map / Schedule, NULL when absent
            features TEXT,
            working_days TEXT
        )",
        [],
    )
    .context("Failed to create business table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS business_attributes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id TEXT NOT NULL REFERENCES business(business_id),
            name TEXT NOT NULL,
            value TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create business_attributes table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS business_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id TEXT NOT NULL REFERENCES business(business_id),
            category TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create business_categories table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS business_hours (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_id TEXT NOT NULL REFERENCES business(business_id),
            day TEXT NOT NULL,
            hours TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create business_hours table")?;

    // ==========================================================================
    // Activity + users
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review (
            review_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES user(user_id),
            business_id TEXT NOT NULL REFERENCES business(business_id),
            stars REAL NOT NULL,
            date TEXT NOT NULL,
            text TEXT NOT NULL,
            useful INTEGER NOT NULL,
            funny INTEGER NOT NULL,
            cool INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create review table")?;

    // Tips have no public identifier in the source; identity is the rowid
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tip (
            tip_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES user(user_id),
            business_id TEXT NOT NULL REFERENCES business(business_id),
            text TEXT NOT NULL,
            date TEXT NOT NULL,
            compliment_count INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create tip table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user (
            user_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            review_count INTEGER NOT NULL,
            yelping_since TEXT NOT NULL,
            useful INTEGER NOT NULL,
            funny INTEGER NOT NULL,
            cool INTEGER NOT NULL,
            fans INTEGER NOT NULL,
            average_stars REAL NOT NULL,
            elite TEXT NOT NULL,
            friends TEXT NOT NULL,
            compliment_hot INTEGER NOT NULL,
            compliment_more INTEGER NOT NULL,
            compliment_profile INTEGER NOT NULL,
            compliment_cute INTEGER NOT NULL,
            compliment_list INTEGER NOT NULL,
            compliment_note INTEGER NOT NULL,
            compliment_plain INTEGER NOT NULL,
            compliment_cool INTEGER NOT NULL,
            compliment_funny INTEGER NOT NULL,
            compliment_writer INTEGER NOT NULL,
            compliment_photos INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create user table")?;

    // ==========================================================================
    // Pipeline bookkeeping
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cleanup_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            predicate_fingerprint TEXT NOT NULL,
            predicate TEXT NOT NULL,
            completed_stage TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create cleanup_state table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            stage TEXT NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create events table")?;

    // ==========================================================================
    // Indexes (the cascade deletes and exporter joins are keyed on these)
    // ==========================================================================
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_attributes_business ON business_attributes(business_id);
         CREATE INDEX IF NOT EXISTS idx_categories_business ON business_categories(business_id);
         CREATE INDEX IF NOT EXISTS idx_categories_category ON business_categories(category);
         CREATE INDEX IF NOT EXISTS idx_hours_business ON business_hours(business_id);
         CREATE INDEX IF NOT EXISTS idx_review_business ON review(business_id);
         CREATE INDEX IF NOT EXISTS idx_review_user ON review(user_id);
         CREATE INDEX IF NOT EXISTS idx_tip_business ON tip(business_id);
         CREATE INDEX IF NOT EXISTS idx_tip_user ON tip(user_id);
         CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id);",
    )
    .context("Failed to create indexes")?;

    Ok(())
}

/// Row count of one of the known tables
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows in {}", table))?;

    Ok(count)
}

/// Names of all user tables currently present, sorted
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;

    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_twice_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        setup_database(&conn).unwrap();
        let first = list_tables(&conn).unwrap();

        setup_database(&conn).unwrap();
        let second = list_tables(&conn).unwrap();

        assert_eq!(first, second);
        for table in DATA_TABLES {
            assert!(first.iter().any(|t| t == table), "missing table {}", table);
        }
        assert!(first.iter().any(|t| t == "cleanup_state"));
        assert!(first.iter().any(|t| t == "events"));
    }

    #[test]
    fn test_foreign_keys_are_advisory() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        // Child row without a parent is accepted during bulk load
        conn.execute(
            "INSERT INTO business_categories (business_id, category) VALUES ('ghost', 'Gyms')",
            [],
        )
        .unwrap();

        assert_eq!(count_rows(&conn, "business_categories").unwrap(), 1);
    }

    #[test]
    fn test_open_store_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_store(&dir.path().join("store.db"), Duration::from_millis(100)).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
