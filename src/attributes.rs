// 🏷️ Attribute Normalizer - raw attribute rows -> one Feature Map per business
//
// The dataset encodes attribute values as Python-repr text: "True", "False",
// "None", "u'free'", "'no'", "{'garage': False, 'street': True}", ... The
// coercion below is a heuristic over that text, not a parser. Dashboard
// feature counts are calibrated against it, so it is reproduced exactly.
//
// Rules, first match wins:
//   (a) excluded keys (price range) are dropped from the map entirely
//   (b) "True" / "False"                -> true / false
//   (c) text containing '{' or '}'      -> false when the number of ':' equals
//                                          the number of "False" occurrences,
//                                          true otherwise
//   (d) "None"                          -> false
//   (e) unquoted "free" / "no"          -> true / false   (u'free', 'no', ...)
//   (f) unquoted "True" / "False"       -> true / false   (u'True', 'False', ...)
//       anything else                   -> kept as opaque text
//
// "Unquoted" means one optional `u` prefix and one pair of surrounding single
// or double quotes removed.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Keys that never appear in a Feature Map
pub const EXCLUDED_KEYS: [&str; 1] = ["RestaurantsPriceRange2"];

// ============================================================================
// FEATURE VALUES
// ============================================================================

/// Coerced attribute value; serializes as a bare JSON bool or string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    /// Value no rule recognized, stored verbatim (trimmed)
    Text(String),
}

impl FeatureValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FeatureValue::Flag(b) => Some(*b),
            FeatureValue::Text(_) => None,
        }
    }
}

/// Attribute name -> coerced value for one business
pub type FeatureMap = BTreeMap<String, FeatureValue>;

// ============================================================================
// COERCION
// ============================================================================

/// Apply the coercion rules to one raw attribute.
/// Returns `None` when the key is excluded from Feature Maps.
pub fn coerce_attribute(key: &str, raw: &str) -> Option<FeatureValue> {
    if EXCLUDED_KEYS.contains(&key) {
        return None;
    }

    let value = raw.trim();

    let coerced = match value {
        "True" => FeatureValue::Flag(true),
        "False" => FeatureValue::Flag(false),
        v if v.contains('{') || v.contains('}') => {
            let pairs = v.matches(':').count();
            let falses = v.matches("False").count();
            FeatureValue::Flag(pairs != falses)
        }
        "None" => FeatureValue::Flag(false),
        v => match unquote(v) {
            "free" => FeatureValue::Flag(true),
            "no" => FeatureValue::Flag(false),
            "True" => FeatureValue::Flag(true),
            "False" => FeatureValue::Flag(false),
            _ => FeatureValue::Text(v.to_string()),
        },
    };

    Some(coerced)
}

/// Strip one `u` prefix and one pair of matching surrounding quotes
fn unquote(value: &str) -> &str {
    let body = match value.strip_prefix('u') {
        Some(rest) if rest.starts_with('\'') || rest.starts_with('"') => rest,
        _ => value,
    };

    for quote in ['\'', '"'] {
        if let Some(inner) = body
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    body
}

/// Fold raw (name, value) pairs in arrival order; a repeated name overwrites
pub fn fold_features<'a, I>(pairs: I) -> FeatureMap
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut map = FeatureMap::new();
    for (name, raw) in pairs {
        if let Some(value) = coerce_attribute(name, raw) {
            map.insert(name.to_string(), value);
        }
    }
    map
}

// ============================================================================
// STORE PASS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    /// Businesses that received a Feature Map
    pub businesses: usize,
    /// Raw attribute rows consumed
    pub raw_rows: usize,
    /// Rows dropped by the excluded-key rule
    pub excluded: usize,
    /// Entries left as text after every rule
    pub text_values: usize,
}

/// Replace every business's raw attribute rows with one Feature Map.
///
/// Runs in a single transaction: the maps are written to `business.features`
/// and the raw rows are deleted together. Without raw rows this is a no-op.
pub fn normalize_attributes(conn: &mut Connection) -> Result<NormalizeReport> {
    let tx = conn.transaction()?;
    let mut report = NormalizeReport::default();

    {
        let mut select = tx.prepare(
            "SELECT business_id, name, value FROM business_attributes
             ORDER BY business_id, id",
        )?;
        let mut update = tx.prepare("UPDATE business SET features = ?1 WHERE business_id = ?2")?;

        let mut current: Option<(String, FeatureMap)> = None;
        let mut rows = select.query([])?;

        while let Some(row) = rows.next()? {
            let business_id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let value: String = row.get(2)?;
            report.raw_rows += 1;

            if current.as_ref().map(|(id, _)| id != &business_id).unwrap_or(true) {
                if let Some((id, map)) = current.take() {
                    write_features(&mut update, &id, &map, &mut report)?;
                }
                current = Some((business_id, FeatureMap::new()));
            }

            if let Some((_, map)) = current.as_mut() {
                match coerce_attribute(&name, &value) {
                    Some(coerced) => {
                        map.insert(name, coerced);
                    }
                    None => report.excluded += 1,
                }
            }
        }

        if let Some((id, map)) = current.take() {
            write_features(&mut update, &id, &map, &mut report)?;
        }
    }

    tx.execute("DELETE FROM business_attributes", [])
        .context("Failed to clear consumed attribute rows")?;
    tx.commit()?;

    info!(
        businesses = report.businesses,
        raw_rows = report.raw_rows,
        excluded = report.excluded,
        text_values = report.text_values,
        "attributes normalized"
    );

    Ok(report)
}

fn write_features(
    update: &mut rusqlite::Statement<'_>,
    business_id: &str,
    map: &FeatureMap,
    report: &mut NormalizeReport,
) -> Result<()> {
    // only excluded keys: leave features NULL
    if map.is_empty() {
        return Ok(());
    }

    let json = serde_json::to_string(map)?;
    let updated = update
        .execute(params![json, business_id])
        .with_context(|| format!("Failed to store features of {}", business_id))?;
    if updated == 0 {
        warn!(business_id, "attribute rows for unknown business dropped");
        return Ok(());
    }

    report.businesses += 1;
    report.text_values += map.values().filter(|v| v.as_flag().is_none()).count();
    Ok(())
}

/// Read back a stored Feature Map; `None` when the business has none
pub fn load_features(conn: &Connection, business_id: &str) -> Result<Option<FeatureMap>> {
    let json: Option<String> = conn.query_row(
        "SELECT features FROM business WHERE business_id = ?1",
        params![business_id],
        |row| row.get(0),
    )?;

    json.map(|text| serde_json::from_str(&text).context("Corrupt features column"))
        .transpose()
}
