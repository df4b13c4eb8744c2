//! ZLTO amounts are stored as TEXT; SQLite has no exact decimal type.

use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::{Row, sqlite::SqliteRow};

/// Read an optional decimal column stored as text
pub fn try_get_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        Decimal::from_str(&value).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

/// Text form bound for an optional decimal column
pub fn to_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.normalize().to_string())
}
