//! Column values at the driver boundary.
//!
//! The driver hands back binary-encoded values tagged with a PostgreSQL type.
//! [`ColumnValue::from_column`] classifies each column into a closed set of
//! variants once; everything downstream pattern-matches on the variant.

use std::error::Error as StdError;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row as PgRow;
use uuid::Uuid;

use crate::pg::types::text;
use crate::pg::utils::parsing::{format_float, format_timestamp};

/// One decoded column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    Null,
    /// A value the decoder has no text form for; carries the type name or the
    /// driver's decode error.
    Unknown(String),
}

impl ColumnValue {
    /// Read column `idx` of a driver row.
    pub fn from_column(row: &PgRow, idx: usize) -> Self {
        row.try_get::<_, ColumnValue>(idx).unwrap_or_else(|err| {
            let ty = row.columns()[idx].type_();
            ColumnValue::Unknown(format!("{}: {}", ty.name(), err))
        })
    }

    /// True when values of `ty` decode to something other than
    /// [`ColumnValue::Unknown`].
    pub fn has_text_form(ty: &Type) -> bool {
        ColumnKind::of(ty) != ColumnKind::Other
    }

    /// The normalized text of this value, or `None` when it has none
    /// ([`ColumnValue::Unknown`]).
    pub fn to_text(&self) -> Option<String> {
        match self {
            ColumnValue::Integer(v) => Some(v.to_string()),
            ColumnValue::Float(v) => Some(format_float(*v)),
            ColumnValue::Boolean(v) => Some(v.to_string()),
            ColumnValue::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
            ColumnValue::Text(v) => Some(v.clone()),
            ColumnValue::Timestamp(v) => Some(format_timestamp(v)),
            ColumnValue::Null => Some(String::new()),
            ColumnValue::Unknown(_) => None,
        }
    }
}

impl<'a> FromSql<'a> for ColumnValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let value = match ColumnKind::of(ty) {
            ColumnKind::Integer => match ty.name() {
                "int2" => ColumnValue::Integer(i16::from_sql(ty, raw)?.into()),
                "int4" => ColumnValue::Integer(i32::from_sql(ty, raw)?.into()),
                "oid" => ColumnValue::Integer(u32::from_sql(ty, raw)?.into()),
                _ => ColumnValue::Integer(i64::from_sql(ty, raw)?),
            },
            ColumnKind::Float if ty.name() == "float4" => {
                // Go through the f32's own shortest text so 0.1 stays 0.1.
                let v = f32::from_sql(ty, raw)?;
                ColumnValue::Float(v.to_string().parse().unwrap_or(v as f64))
            }
            ColumnKind::Float => ColumnValue::Float(f64::from_sql(ty, raw)?),
            ColumnKind::Boolean => ColumnValue::Boolean(bool::from_sql(ty, raw)?),
            ColumnKind::Bytes => ColumnValue::Bytes(raw.to_vec()),
            // Enum labels and citext arrive as plain UTF-8 too.
            ColumnKind::Text => ColumnValue::Text(std::str::from_utf8(raw)?.to_string()),
            ColumnKind::Json => ColumnValue::Text(JsonValue::from_sql(ty, raw)?.to_string()),
            ColumnKind::Uuid => ColumnValue::Text(Uuid::from_sql(ty, raw)?.to_string()),
            ColumnKind::TimestampTz => {
                ColumnValue::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?.fixed_offset())
            }
            ColumnKind::Timestamp => {
                ColumnValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?.and_utc().fixed_offset())
            }
            ColumnKind::Date => ColumnValue::Timestamp(
                NaiveDate::from_sql(ty, raw)?
                    .and_time(NaiveTime::default())
                    .and_utc()
                    .fixed_offset(),
            ),
            ColumnKind::Time => {
                ColumnValue::Text(NaiveTime::from_sql(ty, raw)?.format("%H:%M:%S%.f").to_string())
            }
            ColumnKind::Formatted => ColumnValue::Text(text::render(ty, raw)?),
            ColumnKind::Other => ColumnValue::Unknown(ty.name().to_string()),
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(ColumnValue::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Logical category of a PostgreSQL type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Bytes,
    Text,
    Json,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    /// Types printed from their wire format (numeric, interval, arrays, ...)
    Formatted,
    Other,
}

impl ColumnKind {
    fn of(ty: &Type) -> Self {
        if let Kind::Enum(_) = ty.kind() {
            return ColumnKind::Text;
        }
        match ty.name() {
            "int2" | "int4" | "int8" | "oid" => ColumnKind::Integer,
            "float4" | "float8" => ColumnKind::Float,
            "bool" => ColumnKind::Boolean,
            "bytea" => ColumnKind::Bytes,
            "text" | "varchar" | "bpchar" | "name" | "unknown" | "citext" | "xml" => ColumnKind::Text,
            "json" | "jsonb" => ColumnKind::Json,
            "uuid" => ColumnKind::Uuid,
            "timestamptz" => ColumnKind::TimestampTz,
            "timestamp" => ColumnKind::Timestamp,
            "date" => ColumnKind::Date,
            "time" => ColumnKind::Time,
            _ if text::is_formatted(ty) => ColumnKind::Formatted,
            _ => ColumnKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_text_forms() {
        assert_eq!(ColumnValue::Integer(-42).to_text().unwrap(), "-42");
        assert_eq!(ColumnValue::Float(2.25).to_text().unwrap(), "2.25");
        assert_eq!(ColumnValue::Float(10.0).to_text().unwrap(), "10");
        assert_eq!(ColumnValue::Boolean(true).to_text().unwrap(), "true");
        assert_eq!(ColumnValue::Boolean(false).to_text().unwrap(), "false");
        assert_eq!(ColumnValue::Bytes(b"raw".to_vec()).to_text().unwrap(), "raw");
        assert_eq!(ColumnValue::Text("as is".into()).to_text().unwrap(), "as is");
        assert_eq!(ColumnValue::Null.to_text().unwrap(), "");
        assert_eq!(ColumnValue::Unknown("point".into()).to_text(), None);
    }

    #[test]
    fn test_timestamp_text_is_rfc3339_nano() {
        let t = Utc
            .with_ymd_and_hms(2024, 2, 29, 23, 59, 58)
            .unwrap()
            .with_nanosecond(5)
            .unwrap()
            .fixed_offset();
        assert_eq!(
            ColumnValue::Timestamp(t).to_text().unwrap(),
            "2024-02-29T23:59:58.000000005Z"
        );
    }

    #[test]
    fn test_column_kinds() {
        assert_eq!(ColumnKind::of(&Type::INT8), ColumnKind::Integer);
        assert_eq!(ColumnKind::of(&Type::INT2), ColumnKind::Integer);
        assert_eq!(ColumnKind::of(&Type::FLOAT4), ColumnKind::Float);
        assert_eq!(ColumnKind::of(&Type::BOOL), ColumnKind::Boolean);
        assert_eq!(ColumnKind::of(&Type::BYTEA), ColumnKind::Bytes);
        assert_eq!(ColumnKind::of(&Type::VARCHAR), ColumnKind::Text);
        assert_eq!(ColumnKind::of(&Type::XML), ColumnKind::Text);
        assert_eq!(ColumnKind::of(&Type::JSONB), ColumnKind::Json);
        assert_eq!(ColumnKind::of(&Type::UUID), ColumnKind::Uuid);
        assert_eq!(ColumnKind::of(&Type::TIMESTAMPTZ), ColumnKind::TimestampTz);
        assert_eq!(ColumnKind::of(&Type::TIMESTAMP), ColumnKind::Timestamp);
        assert_eq!(ColumnKind::of(&Type::DATE), ColumnKind::Date);
        assert_eq!(ColumnKind::of(&Type::NUMERIC), ColumnKind::Formatted);
        assert_eq!(ColumnKind::of(&Type::MONEY), ColumnKind::Formatted);
        assert_eq!(ColumnKind::of(&Type::INET), ColumnKind::Formatted);
        assert_eq!(ColumnKind::of(&Type::TEXT_ARRAY), ColumnKind::Formatted);
        assert_eq!(ColumnKind::of(&Type::POINT), ColumnKind::Other);
    }

    #[test]
    fn test_from_sql_by_type() {
        let decode = |ty: &Type, raw: &[u8]| ColumnValue::from_sql(ty, raw).unwrap();
        assert_eq!(decode(&Type::INT2, &7i16.to_be_bytes()), ColumnValue::Integer(7));
        assert_eq!(decode(&Type::OID, &42u32.to_be_bytes()), ColumnValue::Integer(42));
        assert_eq!(decode(&Type::FLOAT4, &0.1f32.to_be_bytes()), ColumnValue::Float(0.1));
        assert_eq!(decode(&Type::BOOL, &[1]), ColumnValue::Boolean(true));
        assert_eq!(decode(&Type::TEXT, b"hi"), ColumnValue::Text("hi".into()));
        assert_eq!(decode(&Type::MONEY, &1250i64.to_be_bytes()), ColumnValue::Text("$12.50".into()));
        assert_eq!(decode(&Type::POINT, &[0; 16]), ColumnValue::Unknown("point".into()));
        assert_eq!(ColumnValue::from_sql_null(&Type::INT4).unwrap(), ColumnValue::Null);
    }

    #[test]
    fn test_from_sql_rejects_bad_utf8() {
        assert!(ColumnValue::from_sql(&Type::TEXT, &[0xff, 0xfe]).is_err());
    }
}
