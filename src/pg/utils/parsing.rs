//! Text conversions shared by the row decoder, the row accessors and the
//! configuration loader.
//!
//! Every value in a decoded [`Row`](crate::pg::types::Row) is a string; these
//! helpers define the exact text each typed value is written as and how it is
//! read back.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Failure to read a typed value back from its text form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    kind: &'static str,
    input: String,
    reason: String,
}

impl ParseError {
    fn new(kind: &'static str, input: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parsing {} {:?}: {}", self.kind, self.input, self.reason)
    }
}

impl std::error::Error for ParseError {}

/// Parse a boolean.
///
/// # Examples
///
/// ```
/// use pgaccess::pg::utils::parsing::parse_bool;
///
/// assert_eq!(parse_bool("true"), Ok(true));
/// assert_eq!(parse_bool("T"), Ok(true));
/// assert_eq!(parse_bool("0"), Ok(false));
/// assert!(parse_bool("yes").is_err());
/// ```
pub fn parse_bool(input: &str) -> Result<bool, ParseError> {
    match input {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(ParseError::new("bool", input, "invalid syntax")),
    }
}

/// Parse a signed 64-bit integer, inferring the base from its prefix.
///
/// `0x` is hexadecimal, `0o` and a bare leading `0` are octal, `0b` is
/// binary, anything else is decimal. Underscores are allowed between digits
/// only when a base prefix is present.
///
/// # Examples
///
/// ```
/// use pgaccess::pg::utils::parsing::parse_int;
///
/// assert_eq!(parse_int("42"), Ok(42));
/// assert_eq!(parse_int("-0x1f"), Ok(-31));
/// assert_eq!(parse_int("0o17"), Ok(15));
/// assert_eq!(parse_int("017"), Ok(15));
/// assert_eq!(parse_int("0b1_01"), Ok(5));
/// assert!(parse_int("1_000").is_err());
/// ```
pub fn parse_int(input: &str) -> Result<i64, ParseError> {
    let (negative, unsigned) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits, prefixed) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest.to_string(), true)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest.to_string(), true)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest.to_string(), true)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, lower[1..].to_string(), true)
    } else {
        (10, lower, false)
    };

    if digits.contains('_') {
        let well_placed = prefixed
            && !digits.starts_with('_') && !digits.ends_with('_')
            && !digits.contains("__");
        if !well_placed {
            return Err(ParseError::new("int", input, "invalid syntax"));
        }
    }
    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(ParseError::new("int", input, "invalid syntax"));
    }

    let signed = if negative {
        format!("-{}", digits)
    } else {
        digits
    };
    i64::from_str_radix(&signed, radix)
        .map_err(|_| ParseError::new("int", input, "value out of range"))
}

/// Parse a 64-bit float.
pub fn parse_float(input: &str) -> Result<f64, ParseError> {
    input
        .parse::<f64>()
        .map_err(|e| ParseError::new("float", input, e.to_string()))
}

/// Format a float with the shortest digits that read back exactly.
///
/// Decimal exponents below -4 or from 21 up switch to exponent notation with
/// a signed, two-digit minimum exponent. Non-finite values render as `NaN`,
/// `+Inf` and `-Inf`.
///
/// # Examples
///
/// ```
/// use pgaccess::pg::utils::parsing::format_float;
///
/// assert_eq!(format_float(1.5), "1.5");
/// assert_eq!(format_float(3.0), "3");
/// assert_eq!(format_float(1e21), "1e+21");
/// assert_eq!(format_float(1e-7), "1e-07");
/// ```
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    let scientific = format!("{:e}", value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return value.to_string();
    };
    match exponent.parse::<i32>() {
        Ok(exp) if !(-4..21).contains(&exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.unsigned_abs())
        }
        _ => value.to_string(),
    }
}

/// Format a timestamp as RFC 3339 with nanoseconds, trailing fractional zeros
/// trimmed. UTC is written as `Z`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use pgaccess::pg::utils::parsing::format_timestamp;
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap().fixed_offset();
/// assert_eq!(format_timestamp(&t), "2024-03-01T12:30:00Z");
/// ```
pub fn format_timestamp(value: &DateTime<FixedOffset>) -> String {
    let full = value.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let Some(dot) = full.find('.') else {
        return full;
    };
    let zone_start = full[dot..]
        .find(|c: char| c == 'Z' || c == '+' || c == '-')
        .map(|offset| dot + offset)
        .unwrap_or(full.len());

    let fraction = full[dot + 1..zone_start].trim_end_matches('0');
    if fraction.is_empty() {
        format!("{}{}", &full[..dot], &full[zone_start..])
    } else {
        format!("{}.{}{}", &full[..dot], fraction, &full[zone_start..])
    }
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 text).
pub fn parse_timestamp(input: &str) -> Result<DateTime<FixedOffset>, ParseError> {
    DateTime::parse_from_rfc3339(input).map_err(|e| ParseError::new("time", input, e.to_string()))
}

/// The zero timestamp: `0001-01-01T00:00:00Z`.
pub fn zero_timestamp() -> DateTime<FixedOffset> {
    let midnight = NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN);
    Utc.from_utc_datetime(&midnight).fixed_offset()
}
