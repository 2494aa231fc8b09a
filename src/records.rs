// 📄 Source Records - typed view of one JSON line per entity
// Required fields have no serde default, so their absence is a decode error.
// Optional fields tolerate both absence and explicit JSON null.

use chrono::NaiveDateTime;
use rusqlite::{params, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::batch::StoreRecord;

/// Timestamp layout used throughout the dataset
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A record type that one loader decodes from its source file
pub trait SourceRecord: DeserializeOwned + StoreRecord + Send {
    /// Post-deserialization checks that serde cannot express.
    /// Returns a human-readable reason on failure.
    fn validate(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Treat JSON null the same as an absent field
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Re-emit a timestamp in canonical form, rejecting anything unparseable
fn canonical_timestamp(field: &str, value: &str) -> Result<String, String> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .map_err(|e| format!("field `{}` = {:?} is not a timestamp: {}", field, value, e))
}

// ============================================================================
// BUSINESS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub business_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub address: String,
    #[serde(default, deserialize_with = "nullable")]
    pub city: String,
    #[serde(default, deserialize_with = "nullable")]
    pub state: String,
    #[serde(default, deserialize_with = "nullable")]
    pub postal_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "nullable")]
    pub stars: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub review_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub is_open: i64,
    /// Raw attribute values, mostly Python-repr strings
    #[serde(default, deserialize_with = "nullable")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Comma-separated category list
    #[serde(default)]
    pub categories: Option<String>,
    /// Day name -> "H:M-H:M"
    #[serde(default, deserialize_with = "nullable")]
    pub hours: BTreeMap<String, Option<String>>,
}

impl BusinessRecord {
    /// Split the comma-separated category string, dropping blanks
    pub fn category_list(&self) -> Vec<&str> {
        self.categories
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attributes as (name, raw text) pairs.
    ///
    /// The dataset ships values as Python-repr strings; values that arrive as
    /// native JSON (null, bools, nested objects) are rendered the same way so
    /// the normalizer sees one encoding.
    pub fn attribute_pairs(&self) -> Vec<(&str, String)> {
        self.attributes
            .iter()
            .map(|(name, value)| {
                let raw = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => python_repr(other),
                };
                (name.as_str(), raw)
            })
            .collect()
    }
}

fn python_repr(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(python_repr).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(k, v)| format!("'{}': {}", k, python_repr(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

impl SourceRecord for BusinessRecord {
    fn validate(&mut self) -> Result<(), String> {
        if self.business_id.trim().is_empty() {
            return Err("field `business_id` is empty".to_string());
        }
        Ok(())
    }
}

impl StoreRecord for BusinessRecord {
    const TABLE: &'static str = "business";

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<usize> {
        let mut rows = tx
            .prepare_cached(
                "INSERT INTO business (
                    business_id, name, address, city, state, postal_code,
                    latitude, longitude, stars, review_count, is_open
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?
            .execute(params![
                self.business_id,
                self.name,
                self.address,
                self.city,
                self.state,
                self.postal_code,
                self.latitude,
                self.longitude,
                self.stars,
                self.review_count,
                self.is_open,
            ])?;

        let mut attributes = tx.prepare_cached(
            "INSERT INTO business_attributes (business_id, name, value) VALUES (?1, ?2, ?3)",
        )?;
        for (name, value) in self.attribute_pairs() {
            rows += attributes.execute(params![self.business_id, name, value])?;
        }

        let mut categories = tx.prepare_cached(
            "INSERT INTO business_categories (business_id, category) VALUES (?1, ?2)",
        )?;
        for category in self.category_list() {
            rows += categories.execute(params![self.business_id, category])?;
        }

        let mut hours = tx.prepare_cached(
            "INSERT INTO business_hours (business_id, day, hours) VALUES (?1, ?2, ?3)",
        )?;
        for (day, range) in &self.hours {
            // null means closed that day; absence carries the same meaning
            if let Some(range) = range {
                rows += hours.execute(params![self.business_id, day, range])?;
            }
        }

        Ok(rows)
    }
}

// ============================================================================
// REVIEW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub review_id: String,
    pub user_id: String,
    pub business_id: String,
    pub stars: f64,
    pub date: String,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub useful: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub funny: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub cool: i64,
}

impl SourceRecord for ReviewRecord {
    fn validate(&mut self) -> Result<(), String> {
        self.date = canonical_timestamp("date", &self.date)?;
        Ok(())
    }
}

impl StoreRecord for ReviewRecord {
    const TABLE: &'static str = "review";

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<usize> {
        tx.prepare_cached(
            "INSERT INTO review (
                review_id, user_id, business_id, stars, date, text, useful, funny, cool
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?
        .execute(params![
            self.review_id,
            self.user_id,
            self.business_id,
            self.stars,
            self.date,
            self.text,
            self.useful,
            self.funny,
            self.cool,
        ])
    }
}

// ============================================================================
// TIP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipRecord {
    pub user_id: String,
    pub business_id: String,
    pub date: String,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable")]
    pub compliment_count: i64,
}

impl SourceRecord for TipRecord {
    fn validate(&mut self) -> Result<(), String> {
        self.date = canonical_timestamp("date", &self.date)?;
        Ok(())
    }
}

impl StoreRecord for TipRecord {
    const TABLE: &'static str = "tip";

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<usize> {
        tx.prepare_cached(
            "INSERT INTO tip (user_id, business_id, text, date, compliment_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            self.user_id,
            self.business_id,
            self.text,
            self.date,
            self.compliment_count,
        ])
    }
}

// ============================================================================
// USER
// ============================================================================

/// Per-compliment-type counters; the set is fixed by the dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compliments {
    #[serde(default, deserialize_with = "nullable", rename = "compliment_hot")]
    pub hot: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_more")]
    pub more: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_profile")]
    pub profile: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_cute")]
    pub cute: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_list")]
    pub list: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_note")]
    pub note: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_plain")]
    pub plain: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_cool")]
    pub cool: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_funny")]
    pub funny: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_writer")]
    pub writer: i64,
    #[serde(default, deserialize_with = "nullable", rename = "compliment_photos")]
    pub photos: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub yelping_since: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub review_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub useful: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub funny: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub cool: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub fans: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub average_stars: f64,
    /// Comma-separated years
    #[serde(default, deserialize_with = "nullable")]
    pub elite: String,
    /// Comma-separated user ids
    #[serde(default, deserialize_with = "nullable")]
    pub friends: String,
    #[serde(flatten)]
    pub compliments: Compliments,
}

impl SourceRecord for UserRecord {
    fn validate(&mut self) -> Result<(), String> {
        self.yelping_since = canonical_timestamp("yelping_since", &self.yelping_since)?;
        Ok(())
    }
}

impl StoreRecord for UserRecord {
    const TABLE: &'static str = "user";

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<usize> {
        let c = &self.compliments;
        tx.prepare_cached(
            "INSERT INTO user (
                user_id, name, review_count, yelping_since, useful, funny, cool, fans,
                average_stars, elite, friends,
                compliment_hot, compliment_more, compliment_profile, compliment_cute,
                compliment_list, compliment_note, compliment_plain, compliment_cool,
                compliment_funny, compliment_writer, compliment_photos
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                      ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        )?
        .execute(params![
            self.user_id,
            self.name,
            self.review_count,
            self.yelping_since,
            self.useful,
            self.funny,
            self.cool,
            self.fans,
            self.average_stars,
            self.elite,
            self.friends,
            c.hot,
            c.more,
            c.profile,
            c.cute,
            c.list,
            c.note,
            c.plain,
            c.cool,
            c.funny,
            c.writer,
            c.photos,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_tolerates_nulls() {
        let mut record: BusinessRecord = serde_json::from_str(
            r#"{"business_id":"b1","name":"Iron Temple","state":"FL",
                "attributes":null,"categories":null,"hours":null,"latitude":null}"#,
        )
        .unwrap();

        assert!(record.validate().is_ok());
        assert!(record.attributes.is_empty());
        assert!(record.category_list().is_empty());
        assert!(record.hours.is_empty());
        assert_eq!(record.latitude, None);
        assert_eq!(record.review_count, 0);
    }

    #[test]
    fn test_category_list_trims_and_drops_blanks() {
        let record: BusinessRecord = serde_json::from_str(
            r#"{"business_id":"b1","categories":"Gyms, Active Life,, Fitness & Instruction "}"#,
        )
        .unwrap();

        assert_eq!(
            record.category_list(),
            vec!["Gyms", "Active Life", "Fitness & Instruction"]
        );
    }

    #[test]
    fn test_attribute_pairs_keep_raw_text() {
        let record: BusinessRecord = serde_json::from_str(
            r#"{"business_id":"b1","attributes":{
                "WiFi":"u'free'",
                "GoodForKids":null,
                "BusinessParking":{"garage":false,"lot":true}
            }}"#,
        )
        .unwrap();

        let pairs = record.attribute_pairs();
        assert!(pairs.contains(&("WiFi", "u'free'".to_string())));
        assert!(pairs.contains(&("GoodForKids", "None".to_string())));
        assert!(pairs.contains(&(
            "BusinessParking",
            "{'garage': False, 'lot': True}".to_string()
        )));
    }

    #[test]
    fn test_review_counters_default_to_zero() {
        let mut record: ReviewRecord = serde_json::from_str(
            r#"{"review_id":"r1","user_id":"u1","business_id":"b1","stars":4.0,
                "date":"2018-07-07 22:09:11"}"#,
        )
        .unwrap();

        assert!(record.validate().is_ok());
        assert_eq!(record.text, "");
        assert_eq!((record.useful, record.funny, record.cool), (0, 0, 0));
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut record: TipRecord = serde_json::from_str(
            r#"{"user_id":"u1","business_id":"b1","date":"yesterday"}"#,
        )
        .unwrap();

        let err = record.validate().unwrap_err();
        assert!(err.contains("`date`"));
    }

    #[test]
    fn test_user_compliments_flattened() {
        let mut record: UserRecord = serde_json::from_str(
            r#"{"user_id":"u1","yelping_since":"2010-01-02 03:04:05",
                "compliment_hot":3,"compliment_photos":7,"friends":"None"}"#,
        )
        .unwrap();

        assert!(record.validate().is_ok());
        assert_eq!(record.compliments.hot, 3);
        assert_eq!(record.compliments.photos, 7);
        assert_eq!(record.compliments.writer, 0);
    }
}
