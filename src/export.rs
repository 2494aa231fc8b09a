// 📦 Exporter - cleaned store -> typed parquet files
//
// Files written into the export directory:
// - `business.parquet`  business columns + categories list + feature maps + working days
// - `review.parquet`, `tip.parquet`, `user.parquet`  one row per store row
// - `activity.parquet`  reviews and tips, each left-joined to user and business
//
// Rows are streamed out of the store and written in chunks of at most
// `chunk_size` rows. The store is never modified.

use arrow_array::builder::{
    ArrayBuilder, BooleanBuilder, ListBuilder, MapBuilder, StringBuilder, StructBuilder,
    Time32MillisecondBuilder,
};
use arrow_array::{
    Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray,
    TimestampMillisecondArray,
};
use arrow_schema::{ArrowError, DataType, Field, Schema, TimeUnit};
use chrono::NaiveDateTime;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::attributes::{FeatureMap, FeatureValue};
use crate::error::{PipelineError, PipelineResult};
use crate::hours::Schedule;
use crate::records::TIMESTAMP_FORMAT;

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
    /// Record batches written
    pub chunks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub files: Vec<ExportedFile>,
}

impl ExportReport {
    pub fn rows(&self, name: &str) -> Option<usize> {
        self.files.iter().find(|f| f.name == name).map(|f| f.rows)
    }
}

// ============================================================================
// DRIVER
// ============================================================================

/// Write every export file into `dir`, creating it if needed
pub fn export_all(conn: &Connection, dir: &Path, chunk_size: usize) -> PipelineResult<ExportReport> {
    fs::create_dir_all(dir)?;
    let chunk_size = chunk_size.max(1);

    let files = vec![
        export_table::<BusinessRow>(conn, dir, chunk_size)?,
        export_table::<ReviewRow>(conn, dir, chunk_size)?,
        export_table::<TipRow>(conn, dir, chunk_size)?,
        export_table::<UserRow>(conn, dir, chunk_size)?,
        export_table::<ActivityRow>(conn, dir, chunk_size)?,
    ];

    Ok(ExportReport { files })
}

/// One exported row shape: where it comes from and how a chunk becomes columns
trait ExportRow: Sized {
    const FILE: &'static str;
    const QUERY: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError>;
}

fn export_table<T: ExportRow>(
    conn: &Connection,
    dir: &Path,
    chunk_size: usize,
) -> PipelineResult<ExportedFile> {
    let path = dir.join(T::FILE);
    let failed = |reason: String| PipelineError::Export {
        file: T::FILE.to_string(),
        reason,
    };

    // an empty chunk still carries the full column layout
    let schema = T::to_batch(&[]).map_err(|e| failed(e.to_string()))?.schema();

    let file = File::create(&path).map_err(|e| failed(e.to_string()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, schema, Some(props)).map_err(|e| failed(e.to_string()))?;

    let mut stmt = conn.prepare(T::QUERY)?;
    let mut rows = stmt.query([])?;
    let mut buffer: Vec<T> = Vec::with_capacity(chunk_size);
    let mut written = 0;
    let mut chunks = 0;

    loop {
        let next = rows.next()?;
        if let Some(row) = next {
            buffer.push(T::from_row(row)?);
        }

        let full = buffer.len() >= chunk_size;
        let last = next.is_none() && !buffer.is_empty();
        if full || last {
            let batch = T::to_batch(&buffer).map_err(|e| failed(e.to_string()))?;
            writer.write(&batch).map_err(|e| failed(e.to_string()))?;
            written += buffer.len();
            chunks += 1;
            buffer.clear();
        }

        if next.is_none() {
            break;
        }
    }

    writer.close().map_err(|e| failed(e.to_string()))?;

    info!(file = T::FILE, rows = written, chunks, "export written");

    Ok(ExportedFile {
        name: T::FILE.trim_end_matches(".parquet").to_string(),
        path,
        rows: written,
        chunks,
    })
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

/// Every column is declared nullable so chunks of one file always share a schema
fn batch_from_columns(columns: Vec<(&str, ArrayRef)>) -> Result<RecordBatch, ArrowError> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

fn strings<'a, T: 'a>(rows: &'a [T], f: impl Fn(&'a T) -> Option<&'a str>) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn ints<T>(rows: &[T], f: impl Fn(&T) -> Option<i64>) -> ArrayRef {
    Arc::new(Int64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn floats<T>(rows: &[T], f: impl Fn(&T) -> Option<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn timestamps<T>(rows: &[T], f: impl Fn(&T) -> Option<&str>) -> ArrayRef {
    Arc::new(TimestampMillisecondArray::from(
        rows.iter()
            .map(|r| f(r).and_then(epoch_millis))
            .collect::<Vec<_>>(),
    ))
}

/// Stored "YYYY-MM-DD HH:MM:SS" -> milliseconds since the epoch
fn epoch_millis(text: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc().timestamp_millis())
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

// ============================================================================
// BUSINESS
// ============================================================================

#[derive(Debug)]
struct BusinessRow {
    business_id: String,
    name: String,
    address: String,
    city: String,
    state: String,
    postal_code: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    stars: f64,
    review_count: i64,
    is_open: i64,
    categories: Vec<String>,
    features: Option<FeatureMap>,
    working_days: Option<Schedule>,
}

impl ExportRow for BusinessRow {
    const FILE: &'static str = "business.parquet";
    const QUERY: &'static str = "
        SELECT b.business_id, b.name, b.address, b.city, b.state, b.postal_code,
               b.latitude, b.longitude, b.stars, b.review_count, b.is_open,
               b.features, b.working_days,
               (SELECT json_group_array(bc.category)
                FROM business_categories bc
                WHERE bc.business_id = b.business_id)
        FROM business b
        ORDER BY b.business_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(BusinessRow {
            business_id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            city: row.get(3)?,
            state: row.get(4)?,
            postal_code: row.get(5)?,
            latitude: row.get(6)?,
            longitude: row.get(7)?,
            stars: row.get(8)?,
            review_count: row.get(9)?,
            is_open: row.get(10)?,
            features: json_column(row, 11)?,
            working_days: json_column(row, 12)?,
            categories: json_column(row, 13)?.unwrap_or_default(),
        })
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        batch_from_columns(vec![
            ("business_id", strings(rows, |r| Some(r.business_id.as_str()))),
            ("name", strings(rows, |r| Some(r.name.as_str()))),
            ("address", strings(rows, |r| Some(r.address.as_str()))),
            ("city", strings(rows, |r| Some(r.city.as_str()))),
            ("state", strings(rows, |r| Some(r.state.as_str()))),
            ("postal_code", strings(rows, |r| Some(r.postal_code.as_str()))),
            ("latitude", floats(rows, |r| r.latitude)),
            ("longitude", floats(rows, |r| r.longitude)),
            ("stars", floats(rows, |r| Some(r.stars))),
            ("review_count", ints(rows, |r| Some(r.review_count))),
            ("is_open", ints(rows, |r| Some(r.is_open))),
            ("categories", categories_column(rows)),
            ("features", flags_column(rows)?),
            ("feature_notes", notes_column(rows)?),
            ("working_days", working_days_column(rows)?),
        ])
    }
}

fn categories_column(rows: &[BusinessRow]) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for row in rows {
        for category in &row.categories {
            builder.values().append_value(category);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

/// Boolean entries of the Feature Map
fn flags_column(rows: &[BusinessRow]) -> Result<ArrayRef, ArrowError> {
    let mut builder = MapBuilder::new(None, StringBuilder::new(), BooleanBuilder::new());
    for row in rows {
        match &row.features {
            Some(features) => {
                for (name, value) in features {
                    if let FeatureValue::Flag(flag) = value {
                        builder.keys().append_value(name);
                        builder.values().append_value(*flag);
                    }
                }
                builder.append(true)?;
            }
            None => builder.append(false)?,
        }
    }
    Ok(Arc::new(builder.finish()))
}

/// Text residuals of the Feature Map (values no coercion rule recognized)
fn notes_column(rows: &[BusinessRow]) -> Result<ArrayRef, ArrowError> {
    let mut builder = MapBuilder::new(None, StringBuilder::new(), StringBuilder::new());
    for row in rows {
        match &row.features {
            Some(features) => {
                for (name, value) in features {
                    if let FeatureValue::Text(text) = value {
                        builder.keys().append_value(name);
                        builder.values().append_value(text);
                    }
                }
                builder.append(true)?;
            }
            None => builder.append(false)?,
        }
    }
    Ok(Arc::new(builder.finish()))
}

fn interval_fields() -> Vec<Field> {
    vec![
        Field::new("open", DataType::Time32(TimeUnit::Millisecond), false),
        Field::new("close", DataType::Time32(TimeUnit::Millisecond), false),
    ]
}

/// day name -> struct<open, close>
fn working_days_column(rows: &[BusinessRow]) -> Result<ArrayRef, ArrowError> {
    let intervals = StructBuilder::new(
        interval_fields(),
        vec![
            Box::new(Time32MillisecondBuilder::new()) as Box<dyn ArrayBuilder>,
            Box::new(Time32MillisecondBuilder::new()),
        ],
    );
    let mut builder = MapBuilder::new(None, StringBuilder::new(), intervals);

    for row in rows {
        let Some(schedule) = &row.working_days else {
            builder.append(false)?;
            continue;
        };

        for (day, interval) in schedule {
            builder.keys().append_value(day.name());
            let values = builder.values();
            time_field(values, 0)?.append_value(interval.open_seconds() as i32 * 1000);
            time_field(values, 1)?.append_value(interval.close_seconds() as i32 * 1000);
            values.append(true);
        }
        builder.append(true)?;
    }

    Ok(Arc::new(builder.finish()))
}

fn time_field(
    values: &mut StructBuilder,
    idx: usize,
) -> Result<&mut Time32MillisecondBuilder, ArrowError> {
    values
        .field_builder::<Time32MillisecondBuilder>(idx)
        .ok_or_else(|| ArrowError::InvalidArgumentError(format!("interval field {} is not a time", idx)))
}

// ============================================================================
// REVIEW / TIP / USER
// ============================================================================

#[derive(Debug)]
struct ReviewRow {
    review_id: String,
    user_id: String,
    business_id: String,
    stars: f64,
    date: String,
    text: String,
    useful: i64,
    funny: i64,
    cool: i64,
}

impl ExportRow for ReviewRow {
    const FILE: &'static str = "review.parquet";
    const QUERY: &'static str = "
        SELECT review_id, user_id, business_id, stars, date, text, useful, funny, cool
        FROM review
        ORDER BY review_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ReviewRow {
            review_id: row.get(0)?,
            user_id: row.get(1)?,
            business_id: row.get(2)?,
            stars: row.get(3)?,
            date: row.get(4)?,
            text: row.get(5)?,
            useful: row.get(6)?,
            funny: row.get(7)?,
            cool: row.get(8)?,
        })
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        batch_from_columns(vec![
            ("review_id", strings(rows, |r| Some(r.review_id.as_str()))),
            ("user_id", strings(rows, |r| Some(r.user_id.as_str()))),
            ("business_id", strings(rows, |r| Some(r.business_id.as_str()))),
            ("stars", floats(rows, |r| Some(r.stars))),
            ("date", timestamps(rows, |r| Some(r.date.as_str()))),
            ("text", strings(rows, |r| Some(r.text.as_str()))),
            ("useful", ints(rows, |r| Some(r.useful))),
            ("funny", ints(rows, |r| Some(r.funny))),
            ("cool", ints(rows, |r| Some(r.cool))),
        ])
    }
}

#[derive(Debug)]
struct TipRow {
    tip_id: i64,
    user_id: String,
    business_id: String,
    text: String,
    date: String,
    compliment_count: i64,
}

impl ExportRow for TipRow {
    const FILE: &'static str = "tip.parquet";
    const QUERY: &'static str = "
        SELECT tip_id, user_id, business_id, text, date, compliment_count
        FROM tip
        ORDER BY tip_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TipRow {
            tip_id: row.get(0)?,
            user_id: row.get(1)?,
            business_id: row.get(2)?,
            text: row.get(3)?,
            date: row.get(4)?,
            compliment_count: row.get(5)?,
        })
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        batch_from_columns(vec![
            ("tip_id", ints(rows, |r| Some(r.tip_id))),
            ("user_id", strings(rows, |r| Some(r.user_id.as_str()))),
            ("business_id", strings(rows, |r| Some(r.business_id.as_str()))),
            ("text", strings(rows, |r| Some(r.text.as_str()))),
            ("date", timestamps(rows, |r| Some(r.date.as_str()))),
            ("compliment_count", ints(rows, |r| Some(r.compliment_count))),
        ])
    }
}

const COMPLIMENT_COLUMNS: [&str; 11] = [
    "compliment_hot",
    "compliment_more",
    "compliment_profile",
    "compliment_cute",
    "compliment_list",
    "compliment_note",
    "compliment_plain",
    "compliment_cool",
    "compliment_funny",
    "compliment_writer",
    "compliment_photos",
];

#[derive(Debug)]
struct UserRow {
    user_id: String,
    name: String,
    review_count: i64,
    yelping_since: String,
    useful: i64,
    funny: i64,
    cool: i64,
    fans: i64,
    average_stars: f64,
    elite: String,
    friends: String,
    compliments: [i64; 11],
}

impl ExportRow for UserRow {
    const FILE: &'static str = "user.parquet";
    const QUERY: &'static str = "
        SELECT user_id, name, review_count, yelping_since, useful, funny, cool, fans,
               average_stars, elite, friends,
               compliment_hot, compliment_more, compliment_profile, compliment_cute,
               compliment_list, compliment_note, compliment_plain, compliment_cool,
               compliment_funny, compliment_writer, compliment_photos
        FROM user
        ORDER BY user_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut compliments = [0i64; 11];
        for (i, slot) in compliments.iter_mut().enumerate() {
            *slot = row.get(11 + i)?;
        }

        Ok(UserRow {
            user_id: row.get(0)?,
            name: row.get(1)?,
            review_count: row.get(2)?,
            yelping_since: row.get(3)?,
            useful: row.get(4)?,
            funny: row.get(5)?,
            cool: row.get(6)?,
            fans: row.get(7)?,
            average_stars: row.get(8)?,
            elite: row.get(9)?,
            friends: row.get(10)?,
            compliments,
        })
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        let mut columns = vec![
            ("user_id", strings(rows, |r| Some(r.user_id.as_str()))),
            ("name", strings(rows, |r| Some(r.name.as_str()))),
            ("review_count", ints(rows, |r| Some(r.review_count))),
            ("yelping_since", timestamps(rows, |r| Some(r.yelping_since.as_str()))),
            ("useful", ints(rows, |r| Some(r.useful))),
            ("funny", ints(rows, |r| Some(r.funny))),
            ("cool", ints(rows, |r| Some(r.cool))),
            ("fans", ints(rows, |r| Some(r.fans))),
            ("average_stars", floats(rows, |r| Some(r.average_stars))),
            ("elite", strings(rows, |r| Some(r.elite.as_str()))),
            ("friends", strings(rows, |r| Some(r.friends.as_str()))),
        ];
        for (i, name) in COMPLIMENT_COLUMNS.iter().enumerate() {
            columns.push((*name, ints(rows, |r| Some(r.compliments[i]))));
        }
        batch_from_columns(columns)
    }
}

// ============================================================================
// ACTIVITY (reviews + tips joined to user and business)
// ============================================================================

#[derive(Debug)]
struct ActivityRow {
    kind: String,
    activity_id: String,
    business_id: String,
    user_id: String,
    stars: Option<f64>,
    text: String,
    date: String,
    user_name: Option<String>,
    user_review_count: Option<i64>,
    user_average_stars: Option<f64>,
    user_fans: Option<i64>,
    business_name: Option<String>,
    business_city: Option<String>,
    business_state: Option<String>,
    business_stars: Option<f64>,
}

impl ExportRow for ActivityRow {
    const FILE: &'static str = "activity.parquet";
    // left joins: a review or tip whose user/business is gone keeps NULL columns
    const QUERY: &'static str = "
        SELECT 'review', r.review_id, r.business_id, r.user_id, r.stars, r.text, r.date,
               u.name, u.review_count, u.average_stars, u.fans,
               b.name, b.city, b.state, b.stars
        FROM review r
        LEFT JOIN user u ON u.user_id = r.user_id
        LEFT JOIN business b ON b.business_id = r.business_id
        UNION ALL
        SELECT 'tip', CAST(t.tip_id AS TEXT), t.business_id, t.user_id, NULL, t.text, t.date,
               u.name, u.review_count, u.average_stars, u.fans,
               b.name, b.city, b.state, b.stars
        FROM tip t
        LEFT JOIN user u ON u.user_id = t.user_id
        LEFT JOIN business b ON b.business_id = t.business_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ActivityRow {
            kind: row.get(0)?,
            activity_id: row.get(1)?,
            business_id: row.get(2)?,
            user_id: row.get(3)?,
            stars: row.get(4)?,
            text: row.get(5)?,
            date: row.get(6)?,
            user_name: row.get(7)?,
            user_review_count: row.get(8)?,
            user_average_stars: row.get(9)?,
            user_fans: row.get(10)?,
            business_name: row.get(11)?,
            business_city: row.get(12)?,
            business_state: row.get(13)?,
            business_stars: row.get(14)?,
        })
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch, ArrowError> {
        batch_from_columns(vec![
            ("kind", strings(rows, |r| Some(r.kind.as_str()))),
            ("activity_id", strings(rows, |r| Some(r.activity_id.as_str()))),
            ("business_id", strings(rows, |r| Some(r.business_id.as_str()))),
            ("user_id", strings(rows, |r| Some(r.user_id.as_str()))),
            ("stars", floats(rows, |r| r.stars)),
            ("text", strings(rows, |r| Some(r.text.as_str()))),
            ("date", timestamps(rows, |r| Some(r.date.as_str()))),
            ("user_name", strings(rows, |r| r.user_name.as_deref())),
            ("user_review_count", ints(rows, |r| r.user_review_count)),
            ("user_average_stars", floats(rows, |r| r.user_average_stars)),
            ("user_fans", ints(rows, |r| r.user_fans)),
            ("business_name", strings(rows, |r| r.business_name.as_deref())),
            ("business_city", strings(rows, |r| r.business_city.as_deref())),
            ("business_state", strings(rows, |r| r.business_state.as_deref())),
            ("business_stars", floats(rows, |r| r.business_stars)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::setup_database;
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn read_back(path: &Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn seeded_store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute_batch(
            r#"INSERT INTO business (business_id, name, address, city, state, postal_code,
                                     stars, review_count, is_open, features, working_days)
               VALUES ('b1', 'Iron Temple', '1 Main St', 'Tampa', 'FL', '33601', 4.5, 2, 1,
                       '{"BikeParking":true,"WiFi":true,"Alcohol":"u''full_bar''"}',
                       '{"Monday":["06:00","22:00"],"Friday":["18:00","02:00"]}'),
                      ('b2', 'Bare Gym', '', 'Miami', 'FL', '', 3.0, 0, 0, NULL, NULL);
               INSERT INTO business_categories (business_id, category)
               VALUES ('b1', 'Gyms'), ('b1', 'Active Life'), ('b2', 'Gyms');
               INSERT INTO review (review_id, user_id, business_id, stars, date, text, useful, funny, cool)
               VALUES ('r1', 'u1', 'b1', 5, '2020-01-01 10:00:00', 'great', 1, 0, 0),
                      ('r2', 'ghost', 'b1', 2, '2020-01-02 10:00:00', 'meh', 0, 0, 0);
               INSERT INTO tip (user_id, business_id, text, date, compliment_count)
               VALUES ('u1', 'b1', 'Go early', '2020-02-01 08:00:00', 3);
               INSERT INTO user (user_id, name, review_count, yelping_since, useful, funny, cool, fans,
                                 average_stars, elite, friends,
                                 compliment_hot, compliment_more, compliment_profile, compliment_cute,
                                 compliment_list, compliment_note, compliment_plain, compliment_cool,
                                 compliment_funny, compliment_writer, compliment_photos)
               VALUES ('u1', 'Ana', 1, '2015-05-05 05:05:05', 0,0,0,7, 5.0, '2019', '',
                       1,0,0,0,0,0,0,0,0,0,2);"#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_business_export_carries_features_and_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let conn = seeded_store();

        let report = export_all(&conn, dir.path(), 100).unwrap();
        assert_eq!(report.rows("business"), Some(2));

        let batches = read_back(&dir.path().join("business.parquet"));
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);

        let features = batch.column_by_name("features").unwrap().as_map();
        assert!(features.is_valid(0));
        assert!(features.is_null(1));
        let b1 = features.value(0);
        let keys = b1.column(0).as_string::<i32>();
        let names: Vec<&str> = (0..keys.len()).map(|i| keys.value(i)).collect();
        assert_eq!(names, vec!["BikeParking", "WiFi"]);

        let notes = batch.column_by_name("feature_notes").unwrap().as_map();
        assert_eq!(notes.value_length(0), 1);

        let days = batch.column_by_name("working_days").unwrap().as_map();
        assert_eq!(days.value_length(0), 2);
        assert!(days.is_null(1));

        let categories = batch.column_by_name("categories").unwrap().as_list::<i32>();
        assert_eq!(categories.value_length(0), 2);
        assert_eq!(categories.value_length(1), 1);
    }

    #[test]
    fn test_activity_left_joins_missing_user() {
        let dir = tempfile::tempdir().unwrap();
        let conn = seeded_store();

        let report = export_all(&conn, dir.path(), 100).unwrap();
        assert_eq!(report.rows("activity"), Some(3));

        let batches = read_back(&dir.path().join("activity.parquet"));
        let batch = &batches[0];
        let ids = batch.column_by_name("activity_id").unwrap().as_string::<i32>();
        let users = batch.column_by_name("user_name").unwrap().as_string::<i32>();
        let kinds = batch.column_by_name("kind").unwrap().as_string::<i32>();

        let ghost = (0..batch.num_rows()).find(|&i| ids.value(i) == "r2").unwrap();
        assert!(users.is_null(ghost));
        assert_eq!(
            (0..batch.num_rows()).filter(|&i| kinds.value(i) == "tip").count(),
            1
        );
    }

    #[test]
    fn test_chunked_export_keeps_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let conn = seeded_store();

        let report = export_all(&conn, dir.path(), 1).unwrap();
        let review = report.files.iter().find(|f| f.name == "review").unwrap();
        assert_eq!(review.rows, 2);
        assert_eq!(review.chunks, 2);

        let total: usize = read_back(&review.path).iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 2);

        let users = read_back(&dir.path().join("user.parquet"));
        let photos = users[0]
            .column_by_name("compliment_photos")
            .unwrap()
            .as_primitive::<Int64Type>();
        assert_eq!(photos.value(0), 2);
    }

    #[test]
    fn test_empty_store_writes_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let report = export_all(&conn, dir.path(), 10).unwrap();

        assert_eq!(report.files.len(), 5);
        assert!(report.files.iter().all(|f| f.rows == 0 && f.chunks == 0));
        assert!(dir.path().join("tip.parquet").exists());
    }
}
