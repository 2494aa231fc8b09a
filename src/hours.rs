// 🕒 Hours Merger - raw per-day rows -> one weekly Schedule per business
//
// Raw rows look like ("b1", "Monday", "6:0-22:0"). Intervals are stored exactly
// as parsed: an overnight close (close < open) is kept as-is and left for the
// consumer to interpret.

use anyhow::{Context, Result};
use chrono::{NaiveTime, Timelike};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::PipelineError;

// ============================================================================
// DAY
// ============================================================================

/// Day of week, ordered Monday first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Day::Monday => "Monday",
            Day::Tuesday => "Tuesday",
            Day::Wednesday => "Wednesday",
            Day::Thursday => "Thursday",
            Day::Friday => "Friday",
            Day::Saturday => "Saturday",
            Day::Sunday => "Sunday",
        }
    }
}

impl FromStr for Day {
    type Err = String;

    /// Accepts full names and three-letter abbreviations, any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Day::ALL
            .iter()
            .copied()
            .find(|day| {
                let name = day.name().to_ascii_lowercase();
                lower == name || lower == name[..3]
            })
            .ok_or_else(|| format!("unknown day {:?}", s))
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// TIME INTERVAL
// ============================================================================

/// Opening and closing time of one day, serialized as `["HH:MM", "HH:MM"]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "(String, String)", try_from = "(String, String)")]
pub struct TimeInterval {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl TimeInterval {
    /// Closing time numerically before opening time (past midnight)
    pub fn is_overnight(&self) -> bool {
        self.close < self.open
    }

    pub fn open_seconds(&self) -> u32 {
        self.open.num_seconds_from_midnight()
    }

    pub fn close_seconds(&self) -> u32 {
        self.close.num_seconds_from_midnight()
    }
}

impl From<TimeInterval> for (String, String) {
    fn from(interval: TimeInterval) -> Self {
        (
            interval.open.format("%H:%M").to_string(),
            interval.close.format("%H:%M").to_string(),
        )
    }
}

impl TryFrom<(String, String)> for TimeInterval {
    type Error = String;

    fn try_from((open, close): (String, String)) -> Result<Self, Self::Error> {
        Ok(TimeInterval {
            open: parse_clock(&open).ok_or_else(|| format!("bad time {:?}", open))?,
            close: parse_clock(&close).ok_or_else(|| format!("bad time {:?}", close))?,
        })
    }
}

/// "H:M", "HH:MM" or "H" -> time of day
fn parse_clock(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    let (hour, minute) = match text.split_once(':') {
        Some((h, m)) => (h.trim().parse::<u32>().ok()?, m.trim().parse::<u32>().ok()?),
        None => (text.parse::<u32>().ok()?, 0),
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parse a raw "open-close" range such as "6:0-22:0" or "09:00-17:00"
pub fn parse_hours_range(raw: &str) -> Option<TimeInterval> {
    let (open, close) = raw.split_once('-')?;
    Some(TimeInterval {
        open: parse_clock(open)?,
        close: parse_clock(close)?,
    })
}

/// Day -> interval; a missing day means closed
pub type Schedule = BTreeMap<Day, TimeInterval>;

// ============================================================================
// STORE PASS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Businesses that received a Schedule
    pub businesses: usize,
    /// Raw hours rows consumed
    pub raw_rows: usize,
    /// Stored intervals that close after midnight
    pub overnight: usize,
}

/// Replace every business's raw hours rows with one Schedule.
///
/// Days of one business are unioned key-wise, so rows may arrive in any
/// order. A row that does not parse aborts the whole pass (nothing committed).
pub fn merge_hours(conn: &mut Connection) -> Result<MergeReport> {
    let tx = conn.transaction()?;
    let mut report = MergeReport::default();

    {
        let mut select = tx.prepare(
            "SELECT business_id, day, hours FROM business_hours
             ORDER BY business_id, id",
        )?;
        let mut update =
            tx.prepare("UPDATE business SET working_days = ?1 WHERE business_id = ?2")?;

        let mut current: Option<(String, Schedule)> = None;
        let mut rows = select.query([])?;

        while let Some(row) = rows.next()? {
            let business_id: String = row.get(0)?;
            let day_name: String = row.get(1)?;
            let raw: String = row.get(2)?;
            report.raw_rows += 1;

            let invalid = || PipelineError::Hours {
                business_id: business_id.clone(),
                day: day_name.clone(),
                raw: raw.clone(),
            };
            let day: Day = day_name.parse().map_err(|_| invalid())?;
            let interval = parse_hours_range(&raw).ok_or_else(invalid)?;

            if current.as_ref().map(|(id, _)| id != &business_id).unwrap_or(true) {
                if let Some((id, schedule)) = current.take() {
                    write_schedule(&mut update, &id, &schedule, &mut report)?;
                }
                current = Some((business_id, Schedule::new()));
            }

            if let Some((_, schedule)) = current.as_mut() {
                schedule.insert(day, interval);
            }
        }

        if let Some((id, schedule)) = current.take() {
            write_schedule(&mut update, &id, &schedule, &mut report)?;
        }
    }

    tx.execute("DELETE FROM business_hours", [])
        .context("Failed to clear consumed hours rows")?;
    tx.commit()?;

    info!(
        businesses = report.businesses,
        raw_rows = report.raw_rows,
        overnight = report.overnight,
        "hours merged"
    );

    Ok(report)
}

fn write_schedule(
    update: &mut rusqlite::Statement<'_>,
    business_id: &str,
    schedule: &Schedule,
    report: &mut MergeReport,
) -> Result<()> {
    let json = serde_json::to_string(schedule)?;
    let updated = update
        .execute(params![json, business_id])
        .with_context(|| format!("Failed to store schedule of {}", business_id))?;
    if updated == 0 {
        warn!(business_id, "hours rows for unknown business dropped");
        return Ok(());
    }

    report.businesses += 1;
    report.overnight += schedule.values().filter(|i| i.is_overnight()).count();
    Ok(())
}

/// Read back a stored Schedule; `None` when the business has none
pub fn load_schedule(conn: &Connection, business_id: &str) -> Result<Option<Schedule>> {
    let json: Option<String> = conn.query_row(
        "SELECT working_days FROM business WHERE business_id = ?1",
        params![business_id],
        |row| row.get(0),
    )?;

    json.map(|text| serde_json::from_str(&text).context("Corrupt working_days column"))
        .transpose()
}
