//! Row decoding
//!
//! Converts a driver row into a [`Row`]. Every column of the result appears
//! in the output; a column the decoder cannot render becomes an empty string
//! and a warning is logged through the injected [`Logger`].

use tokio_postgres::Row as PgRow;

use crate::pg::logging::Logger;
use crate::pg::types::row::Row;
use crate::pg::types::value::ColumnValue;

/// Decode one driver row.
pub fn decode_row(row: &PgRow, logger: &Logger) -> Row {
    let columns = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), ColumnValue::from_column(row, idx)));
    decode_values(columns, logger)
}

/// Decode already classified `(column, value)` pairs.
pub fn decode_values<I, S>(columns: I, logger: &Logger) -> Row
where
    I: IntoIterator<Item = (S, ColumnValue)>,
    S: Into<String>,
{
    let mut row = Row::default();
    for (column, value) in columns {
        let column = column.into();
        let text = match value.to_text() {
            Some(text) => text,
            None => {
                logger.in_scope(|| {
                    tracing::warn!(column = %column, value = ?value, "Failed to decode column");
                });
                String::new()
            }
        };
        row.insert(column, text);
    }
    row
}
