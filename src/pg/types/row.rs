//! Normalized rows and their typed accessors.

use std::collections::hash_map;
use std::collections::HashMap;
use std::ops::Deref;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::pg::utils::parsing::{
    parse_bool, parse_float, parse_int, parse_timestamp, zero_timestamp, ParseError,
};

/// One decoded result row: column name to normalized text.
///
/// Typed getters re-parse the text. A value that does not parse is logged
/// and the type's zero value is returned; the call itself never fails.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use pgaccess::pg::Row;
///
/// let row = Row::from(HashMap::from([
///     ("id".to_string(), "42".to_string()),
///     ("active".to_string(), "true".to_string()),
/// ]));
///
/// assert_eq!(row.to_i64("id"), 42);
/// assert!(row.to_bool("active"));
/// assert_eq!(row.to_f64("missing"), 0.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: HashMap<String, String>,
}

impl Row {
    pub(crate) fn insert(&mut self, column: String, value: String) {
        self.values.insert(column, value);
    }

    /// Raw text of a column, `None` when the row has no such column
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Raw text of a column, empty when absent
    pub fn value(&self, column: &str) -> &str {
        self.get(column).unwrap_or_default()
    }

    pub fn to_bool(&self, column: &str) -> bool {
        self.typed(column, parse_bool).unwrap_or(false)
    }

    pub fn to_i64(&self, column: &str) -> i64 {
        self.typed(column, parse_int).unwrap_or(0)
    }

    pub fn to_f64(&self, column: &str) -> f64 {
        self.typed(column, parse_float).unwrap_or(0.0)
    }

    /// The column's text as bytes.
    pub fn to_bytes(&self, column: &str) -> Vec<u8> {
        self.value(column).as_bytes().to_vec()
    }

    /// Parse an RFC 3339 column; the zero time (`0001-01-01T00:00:00Z`) on failure.
    pub fn to_time(&self, column: &str) -> DateTime<FixedOffset> {
        self.typed(column, parse_timestamp)
            .unwrap_or_else(zero_timestamp)
    }

    /// Column names, in no particular order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, String> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn typed<T>(&self, column: &str, parse: fn(&str) -> Result<T, ParseError>) -> Option<T> {
        match parse(self.value(column)) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(column = %column, error = %err, "Failed to read column value");
                None
            }
        }
    }
}

impl From<HashMap<String, String>> for Row {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = (&'a String, &'a String);
    type IntoIter = hash_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Decoded rows in result order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordSet {
    rows: Vec<Row>,
}

impl RecordSet {
    /// True when at least one row has exactly `value` in `column`.
    pub fn find(&self, column: &str, value: &str) -> bool {
        self.rows.iter().any(|row| row.get(column) == Some(value))
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl Deref for RecordSet {
    type Target = [Row];

    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

impl From<Vec<Row>> for RecordSet {
    fn from(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

impl FromIterator<Row> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RecordSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>()
            .into()
    }

    #[test]
    fn test_typed_getters() {
        let r = row(&[
            ("flag", "t"),
            ("count", "0x2a"),
            ("ratio", "0.25"),
            ("blob", "abc"),
            ("at", "2020-01-02T03:04:05.5+01:00"),
        ]);
        assert!(r.to_bool("flag"));
        assert_eq!(r.to_i64("count"), 42);
        assert_eq!(r.to_f64("ratio"), 0.25);
        assert_eq!(r.to_bytes("blob"), b"abc".to_vec());
        assert_eq!(
            r.to_time("at"),
            Utc.with_ymd_and_hms(2020, 1, 2, 2, 4, 5).unwrap() + chrono::Duration::milliseconds(500)
        );
    }

    #[test]
    fn test_unparsable_values_return_zero() {
        let r = row(&[("flag", "yes"), ("count", "ten"), ("ratio", ""), ("at", "yesterday")]);
        assert!(!r.to_bool("flag"));
        assert_eq!(r.to_i64("count"), 0);
        assert_eq!(r.to_f64("ratio"), 0.0);
        assert_eq!(r.to_time("at"), zero_timestamp());
        assert!(r.to_bytes("missing").is_empty());
    }

    #[test]
    fn test_missing_column() {
        let r = row(&[("a", "1")]);
        assert_eq!(r.get("b"), None);
        assert_eq!(r.value("b"), "");
        assert_eq!(r.to_i64("b"), 0);
    }

    #[test]
    fn test_record_set_find() {
        let set: RecordSet = vec![
            row(&[("id", "1"), ("status", "open")]),
            row(&[("id", "2"), ("status", "closed")]),
        ]
        .into();

        assert_eq!(set.len(), 2);
        assert_eq!(set[0].value("id"), "1");
        assert!(set.find("status", "closed"));
        assert!(!set.find("status", "Closed"));
        assert!(!set.find("owner", "closed"));
    }

    #[test]
    fn test_record_set_keeps_order_and_serializes_flat() {
        let set: RecordSet = (1..=3).map(|i| row(&[("n", &i.to_string())])).collect();
        let ids: Vec<i64> = set.iter().map(|r| r.to_i64("n")).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(
            serde_json::to_string(&set).unwrap(),
            r#"[{"n":"1"},{"n":"2"},{"n":"3"}]"#
        );
    }

    #[test]
    fn test_row_deserializes_from_flat_json() {
        let r: Row = serde_json::from_str(r#"{"name":"bob","age":"30"}"#).unwrap();
        assert_eq!(r.value("name"), "bob");
        assert_eq!(r.to_i64("age"), 30);
    }
}
