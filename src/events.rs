// 📜 Run Audit Trail - every pipeline stage leaves an event behind
//
// Events share a run_id so one pipeline execution can be read back in order.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

pub const RUN_STARTED: &str = "run_started";
pub const LOADER_COMPLETED: &str = "loader_completed";
pub const ATTRIBUTES_NORMALIZED: &str = "attributes_normalized";
pub const HOURS_MERGED: &str = "hours_merged";
pub const CLEANUP_STAGE_COMPLETED: &str = "cleanup_stage_completed";
pub const EXPORT_COMPLETED: &str = "export_completed";
pub const RUN_COMPLETED: &str = "run_completed";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    /// Stage or loader the event belongs to
    pub stage: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(run_id: &str, event_type: &str, stage: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            stage: stage.to_string(),
            data,
        }
    }
}

/// Fresh identifier for one pipeline execution
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, run_id, timestamp, event_type, stage, data
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.run_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.stage,
            data_json,
        ],
    )
    .with_context(|| format!("Failed to record {} event", event.event_type))?;

    Ok(())
}

/// Events of one run, oldest first
pub fn events_for_run(conn: &Connection, run_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, run_id, timestamp, event_type, stage, data
         FROM events
         WHERE run_id = ?1
         ORDER BY id",
    )?;

    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(event_id, run_id, timestamp, event_type, stage, data)| -> Result<Event> {
            Ok(Event {
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .with_context(|| format!("Bad timestamp on event {}", event_id))?
                    .with_timezone(&Utc),
                data: serde_json::from_str(&data)
                    .with_context(|| format!("Bad payload on event {}", event_id))?,
                event_id,
                run_id,
                event_type,
                stage,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::setup_database;
    use serde_json::json;

    #[test]
    fn test_events_round_trip_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let run = new_run_id();
        let other = new_run_id();

        insert_event(&conn, &Event::new(&run, RUN_STARTED, "pipeline", json!({}))).unwrap();
        insert_event(&conn, &Event::new(&other, RUN_STARTED, "pipeline", json!({}))).unwrap();
        insert_event(
            &conn,
            &Event::new(&run, LOADER_COMPLETED, "review", json!({"records": 3})),
        )
        .unwrap();

        let events = events_for_run(&conn, &run).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, RUN_STARTED);
        assert_eq!(events[1].stage, "review");
        assert_eq!(events[1].data["records"], 3);
        assert!(events.iter().all(|e| e.run_id == run));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new("r", RUN_STARTED, "pipeline", json!(null));
        let b = Event::new("r", RUN_STARTED, "pipeline", json!(null));
        assert_ne!(a.event_id, b.event_id);
    }
}
