//! Administrative record loading from CSV text.
//!
//! The engine itself never touches the filesystem; callers hand in CSV
//! content they read however they like. Column names vary between registers,
//! so the mapping is configurable with defaults matching the common export
//! format.

use serde::Deserialize;

use crate::error::EngineError;
use crate::model::AdministrativeRecord;

/// Column-name mapping from a register CSV to [`AdministrativeRecord`].
#[derive(Debug, Clone, Deserialize)]
pub struct RecordColumns {
    #[serde(default = "col_id")]
    pub id: String,
    #[serde(default = "col_area")]
    pub expected_area: String,
    #[serde(default = "col_owner")]
    pub owner: String,
    #[serde(default = "col_land_type")]
    pub land_type: String,
}

fn col_id() -> String { "survey_no".into() }
fn col_area() -> String { "extent_sqm".into() }
fn col_owner() -> String { "owner_name".into() }
fn col_land_type() -> String { "land_type".into() }

impl Default for RecordColumns {
    fn default() -> Self {
        Self {
            id: col_id(),
            expected_area: col_area(),
            owner: col_owner(),
            land_type: col_land_type(),
        }
    }
}

/// Parse register records out of CSV content.
///
/// `id` and `expected_area` are required; `owner` and `land_type` fall back
/// to empty strings when their columns are absent. A malformed area value
/// fails the whole load, naming the offending record.
pub fn load_records_csv(
    content: &str,
    columns: &RecordColumns,
) -> Result<Vec<AdministrativeRecord>, EngineError> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());

    let headers =
        reader.headers().map_err(|e| EngineError::RecordRead(e.to_string()))?.clone();
    let position = |name: &str| headers.iter().position(|h| h == name);

    let id_col = position(&columns.id)
        .ok_or_else(|| EngineError::MissingColumn { column: columns.id.clone() })?;
    let area_col = position(&columns.expected_area)
        .ok_or_else(|| EngineError::MissingColumn { column: columns.expected_area.clone() })?;
    let owner_col = position(&columns.owner);
    let land_type_col = position(&columns.land_type);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| EngineError::RecordRead(e.to_string()))?;
        let id = row.get(id_col).unwrap_or("").trim().to_string();
        if id.is_empty() {
            continue;
        }
        let raw_area = row.get(area_col).unwrap_or("").trim();
        let expected_area: f64 =
            raw_area.parse().map_err(|_| EngineError::FieldParse {
                record_id: id.clone(),
                column: columns.expected_area.clone(),
                value: raw_area.to_string(),
            })?;

        records.push(AdministrativeRecord {
            id,
            expected_area,
            owner: field(&row, owner_col),
            land_type: field(&row, land_type_col),
        });
    }
    tracing::debug!(count = records.len(), "loaded administrative records");
    Ok(records)
}

fn field(row: &csv::StringRecord, col: Option<usize>) -> String {
    col.and_then(|c| row.get(c)).unwrap_or("").trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
