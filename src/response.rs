use anyhow::anyhow;
use serde_json::Value;

use crate::error::{LibError, Result};
use crate::models::{Envelope, Properties, Record};
use crate::statements::{BATCH_COLUMN, BATCH_SIZE_COLUMN, COUNT_COLUMN, START_INDEX_COLUMN};

/// Properties holding password material. They never leave this crate.
pub const SENSITIVE_FIELDS: &[&str] = &["password_hashed", "password_hash", "password"];

pub fn redact(mut properties: Properties) -> Properties {
    for field in SENSITIVE_FIELDS {
        properties.remove(*field);
    }
    properties
}

/// Extracts the entity in `column` of the first row, redacted. `None` when nothing matched.
pub fn single_entity(records: Vec<Record>, column: &str) -> Result<Option<Properties>> {
    let Some(mut record) = records.into_iter().next() else {
        return Ok(None);
    };

    match record.remove(column) {
        Some(Value::Object(properties)) => Ok(Some(redact(properties))),
        other => Err(malformed(column, other.as_ref())),
    }
}

/// Builds the batched envelope from the single aggregate row of a paginated read.
///
/// No row at all means the aggregation had nothing to group, which is reported as
/// [`crate::error::ErrorKind::EmptyResult`]. An empty batch inside a row is a valid page.
pub fn format_batched_response(records: Vec<Record>) -> Result<Envelope<Properties>> {
    let Some(mut record) = records.into_iter().next() else {
        return Err(LibError::empty_result(
            "Query did not yield any match",
            anyhow!("aggregate statement returned no rows"),
        ));
    };

    let items = match record.remove(BATCH_COLUMN) {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(properties) => Ok(redact(properties)),
                other => Err(malformed(BATCH_COLUMN, Some(&other))),
            })
            .collect::<Result<Vec<_>>>()?,
        other => return Err(malformed(BATCH_COLUMN, other.as_ref())),
    };

    Ok(Envelope {
        count: integer_column(&record, COUNT_COLUMN)?,
        batch_size: integer_column(&record, BATCH_SIZE_COLUMN)?,
        start_index: integer_column(&record, START_INDEX_COLUMN)?,
        items,
    })
}

fn integer_column(record: &Record, column: &str) -> Result<i64> {
    let value = record.get(column);
    value
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed(column, value))
}

fn malformed(column: &str, value: Option<&Value>) -> LibError {
    LibError::unknown(
        "Unexpected response from the database",
        anyhow!("column '{}' had unexpected value {:?}", column, value),
    )
}
