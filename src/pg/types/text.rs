//! PostgreSQL text output for types without a Rust mapping in the driver.
//!
//! The driver always asks for binary results. For the types below the binary
//! wire format is read directly and written back out the way the server's own
//! output functions print it, so `12.50::numeric` reads as `12.50` and
//! `ARRAY[1, NULL]` as `{1,NULL}`.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio_postgres::types::{FromSql, Kind, Type};

use crate::pg::types::value::ColumnValue;

type BoxError = Box<dyn StdError + Sync + Send>;

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const USECS_PER_SEC: i64 = 1_000_000;
const USECS_PER_MINUTE: i64 = 60 * USECS_PER_SEC;
const USECS_PER_HOUR: i64 = 60 * USECS_PER_MINUTE;

/// True when [`render`] knows the text form of `ty`.
pub(crate) fn is_formatted(ty: &Type) -> bool {
    match ty.kind() {
        Kind::Array(member) => ColumnValue::has_text_form(member),
        _ => matches!(
            ty.name(),
            "numeric" | "money" | "interval" | "inet" | "cidr" | "macaddr" | "macaddr8" | "bit" | "varbit" | "char"
        ),
    }
}

/// Text form of a binary value of type `ty`.
pub(crate) fn render(ty: &Type, raw: &[u8]) -> Result<String, BoxError> {
    if let Kind::Array(member) = ty.kind() {
        return array(member, raw);
    }
    match ty.name() {
        "numeric" => numeric(raw),
        "money" => money(raw),
        "interval" => interval(raw),
        "inet" => inet(raw, false),
        "cidr" => inet(raw, true),
        "macaddr" | "macaddr8" => Ok(raw.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")),
        "bit" | "varbit" => bits(raw),
        "char" => Ok(raw.iter().take_while(|b| **b != 0).map(|b| *b as char).collect()),
        other => Err(format!("no text form for {}", other).into()),
    }
}

/// Big-endian reader over a binary value
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BoxError> {
        if self.buf.len() < len {
            return Err("value too short".into());
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BoxError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, BoxError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, BoxError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn u16(&mut self) -> Result<u16, BoxError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, BoxError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, BoxError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}

/// Base-10000 digits with a weight, a sign word and a display scale.
fn numeric(raw: &[u8]) -> Result<String, BoxError> {
    let mut r = Reader::new(raw);
    let ndigits = r.i16()?.max(0) as usize;
    let weight = r.i16()? as i32;
    let sign = r.u16()?;
    let dscale = r.u16()? as usize;
    let digits = (0..ndigits).map(|_| r.i16()).collect::<Result<Vec<_>, _>>()?;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digit = |idx: i32| -> i16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for idx in 0..=weight {
            if idx == 0 {
                write!(out, "{}", digit(idx))?;
            } else {
                write!(out, "{:04}", digit(idx))?;
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit(idx))?;
            idx += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// Cents as `$1,234.56`, the server's default monetary locale.
fn money(raw: &[u8]) -> Result<String, BoxError> {
    let cents = Reader::new(raw).i64()?;
    let abs = cents.unsigned_abs();
    let units = (abs / 100).to_string();

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, c) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if cents < 0 { "-" } else { "" };
    Ok(format!("{}${}.{:02}", sign, grouped, abs % 100))
}

/// Microseconds, days and months in the `postgres` interval style.
fn interval(raw: &[u8]) -> Result<String, BoxError> {
    let mut r = Reader::new(raw);
    let time = r.i64()?;
    let days = r.i32()?;
    let months = r.i32()?;

    let mut parts: Vec<String> = Vec::new();
    // A later part gets an explicit `+` once an earlier one was negative.
    let mut after_negative = false;
    for (value, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if value == 0 {
            continue;
        }
        let plus = if after_negative && value > 0 { "+" } else { "" };
        let plural = if value.abs() == 1 { "" } else { "s" };
        parts.push(format!("{}{} {}{}", plus, value, unit, plural));
        after_negative = value < 0;
    }

    if parts.is_empty() || time != 0 {
        let sign = if time < 0 {
            "-"
        } else if after_negative {
            "+"
        } else {
            ""
        };
        let abs = time.unsigned_abs() as i64;
        let hours = abs / USECS_PER_HOUR;
        let minutes = (abs % USECS_PER_HOUR) / USECS_PER_MINUTE;
        let seconds = (abs % USECS_PER_MINUTE) / USECS_PER_SEC;
        let micros = abs % USECS_PER_SEC;

        let mut clock = format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds);
        if micros != 0 {
            let fraction = format!("{:06}", micros);
            clock.push('.');
            clock.push_str(fraction.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    Ok(parts.join(" "))
}

/// Family, prefix bits, cidr flag, address length, address.
fn inet(raw: &[u8], cidr: bool) -> Result<String, BoxError> {
    let mut r = Reader::new(raw);
    let _family = r.u8()?;
    let bits = r.u8()?;
    let _is_cidr = r.u8()?;
    let len = r.u8()? as usize;

    let (addr, max_bits) = match len {
        4 => (Ipv4Addr::from(r.array::<4>()?).to_string(), 32),
        16 => (Ipv6Addr::from(r.array::<16>()?).to_string(), 128),
        other => return Err(format!("invalid address length {}", other).into()),
    };
    if cidr || bits != max_bits {
        Ok(format!("{}/{}", addr, bits))
    } else {
        Ok(addr)
    }
}

/// Bit count followed by the bits, most significant first.
fn bits(raw: &[u8]) -> Result<String, BoxError> {
    let mut r = Reader::new(raw);
    let len = r.i32()?.max(0) as usize;
    let bytes = r.rest();
    if bytes.len() * 8 < len {
        return Err("bit string too short".into());
    }
    Ok((0..len)
        .map(|i| if bytes[i / 8] & (0x80 >> (i % 8)) != 0 { '1' } else { '0' })
        .collect())
}

/// Dimensions, lower bounds and elements as `{..}` text.
fn array(member: &Type, raw: &[u8]) -> Result<String, BoxError> {
    let mut r = Reader::new(raw);
    let ndim = r.i32()?.max(0) as usize;
    let _has_nulls = r.i32()?;
    let _element_oid = r.i32()?;

    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let len = r.i32()?.max(0) as usize;
        let lower = r.i32()?;
        dims.push((len, lower));
    }
    if dims.is_empty() || dims.iter().any(|(len, _)| *len == 0) {
        return Ok("{}".to_string());
    }

    let total: usize = dims.iter().map(|(len, _)| *len).product();
    let mut elements = Vec::with_capacity(total);
    for _ in 0..total {
        let len = r.i32()?;
        let value = if len < 0 {
            None
        } else {
            Some(r.take(len as usize)?)
        };
        elements.push(element(member, value)?);
    }

    let mut out = String::new();
    if dims.iter().any(|(_, lower)| *lower != 1) {
        for (len, lower) in &dims {
            write!(out, "[{}:{}]", lower, *lower as i64 + *len as i64 - 1)?;
        }
        out.push('=');
    }
    let mut next = elements.into_iter();
    nest(&dims, &mut next, &mut out);
    Ok(out)
}

fn nest(dims: &[(usize, i32)], elements: &mut impl Iterator<Item = String>, out: &mut String) {
    let Some(((len, _), inner)) = dims.split_first() else {
        return;
    };
    out.push('{');
    for i in 0..*len {
        if i > 0 {
            out.push(',');
        }
        if inner.is_empty() {
            if let Some(element) = elements.next() {
                out.push_str(&element);
            }
        } else {
            nest(inner, elements, out);
        }
    }
    out.push('}');
}

/// One array element, quoted the way `array_out` quotes it.
fn element(member: &Type, raw: Option<&[u8]>) -> Result<String, BoxError> {
    let value = ColumnValue::from_sql_nullable(member, raw)?;
    let text = match value {
        ColumnValue::Null => return Ok("NULL".to_string()),
        ColumnValue::Boolean(v) => return Ok(if v { "t" } else { "f" }.to_string()),
        ColumnValue::Bytes(v) => {
            let mut hex = String::from("\\x");
            for b in v {
                write!(hex, "{:02x}", b)?;
            }
            hex
        }
        other => other
            .to_text()
            .ok_or_else(|| format!("no text form for {}[]", member.name()))?,
    };

    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("NULL")
        || text
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_ascii_whitespace() || c == '\x0b');
    if !needs_quotes {
        return Ok(text);
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Ok(quoted)
}
