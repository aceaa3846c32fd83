//! Source-to-destination type mapping and per-cell coercion.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use tracing::trace;

use crate::{CellValue, DestType, SourceType};

/// Destination type for a source column type. Total over [`SourceType`].
pub const fn map_column_type(source: SourceType) -> DestType {
    match source {
        SourceType::Date => DestType::Date,
        SourceType::DateTime => DestType::DateTime,
        SourceType::BigInt | SourceType::Integer | SourceType::SmallInt => {
            DestType::Integer
        }
        SourceType::Boolean => DestType::Boolean,
        SourceType::Decimal | SourceType::Float => DestType::Float,
        SourceType::Time => DestType::Time,
        SourceType::String
        | SourceType::Text
        | SourceType::Json
        | SourceType::Enum
        | SourceType::Other => DestType::String,
    }
}

/// Convert one raw cell into the JSON scalar the warehouse load accepts.
///
/// Never fails: a value that does not parse as its declared type is sent
/// as text and left for the warehouse to accept or reject.
pub fn coerce_value(source: SourceType, raw: CellValue) -> Value {
    if raw.is_null() {
        return Value::Null;
    }

    match source {
        SourceType::Date => coerce_date(raw),
        SourceType::DateTime => coerce_datetime(raw),
        SourceType::Time => coerce_time(raw),
        SourceType::BigInt | SourceType::Integer | SourceType::SmallInt => {
            coerce_integer(raw)
        }
        SourceType::Boolean => coerce_boolean(raw),
        SourceType::Decimal | SourceType::Float => coerce_float(raw),
        SourceType::String
        | SourceType::Text
        | SourceType::Json
        | SourceType::Enum
        | SourceType::Other => text_value(raw),
    }
}

/// Decode bytes of unknown encoding into UTF-8.
///
/// Valid UTF-8 is taken as is. A byte-order mark selects UTF-16/UTF-8;
/// anything else is read as Windows-1252, the usual latin1 collation.
pub fn normalize_text(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_owned();
    }

    let (encoding, bom_len) = encoding_rs::Encoding::for_bom(bytes)
        .unwrap_or((encoding_rs::WINDOWS_1252, 0));
    trace!(encoding = encoding.name(), "transcoding non-utf8 value");
    let (decoded, _had_errors) =
        encoding.decode_without_bom_handling(&bytes[bom_len..]);
    decoded.into_owned()
}

// =============================================================================
// Per-type coercions
// =============================================================================

fn coerce_date(raw: CellValue) -> Value {
    match raw {
        CellValue::DateTime {
            year, month, day, ..
        } => {
            if year == 0 && month == 0 && day == 0 {
                Value::Null
            } else {
                Value::String(format!("{year:04}-{month:02}-{day:02}"))
            }
        }
        CellValue::Bytes(b) => {
            let text = normalize_text(&b);
            if is_zero_temporal(&text) {
                return Value::Null;
            }
            // Drop a time part if the driver rendered one.
            match text.split_once([' ', 'T']) {
                Some((date, _)) => Value::String(date.to_owned()),
                None => Value::String(text),
            }
        }
        other => text_value(other),
    }
}

fn coerce_datetime(raw: CellValue) -> Value {
    match raw {
        CellValue::DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            micros,
        } => {
            if year == 0 && month == 0 && day == 0 {
                return Value::Null;
            }
            let mut s = format!(
                "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
            );
            if micros > 0 {
                s.push_str(&format!(".{micros:06}"));
            }
            Value::String(s)
        }
        CellValue::Bytes(b) => {
            let text = normalize_text(&b);
            if is_zero_temporal(&text) {
                return Value::Null;
            }
            Value::String(iso_datetime(&text))
        }
        other => text_value(other),
    }
}

fn coerce_time(raw: CellValue) -> Value {
    match raw {
        CellValue::Time {
            negative,
            days,
            hours,
            minutes,
            seconds,
            micros,
        } => {
            let total_hours = days * 24 + u32::from(hours);
            let sign = if negative { "-" } else { "" };
            let mut s =
                format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
            if micros > 0 {
                s.push_str(&format!(".{micros:06}"));
            }
            Value::String(s)
        }
        other => text_value(other),
    }
}

fn coerce_integer(raw: CellValue) -> Value {
    match raw {
        CellValue::Int(i) => Value::from(i),
        CellValue::UInt(u) => Value::from(u),
        CellValue::Double(f) if f.fract() == 0.0 && f.is_finite() => {
            Value::from(f as i64)
        }
        CellValue::Bytes(b) => {
            let text = normalize_text(&b);
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Value::from(i)
            } else if let Ok(u) = trimmed.parse::<u64>() {
                Value::from(u)
            } else {
                Value::String(text)
            }
        }
        other => text_value(other),
    }
}

fn coerce_boolean(raw: CellValue) -> Value {
    match raw {
        CellValue::Int(i) => Value::Bool(i != 0),
        CellValue::UInt(u) => Value::Bool(u != 0),
        CellValue::Bytes(b) => {
            let text = normalize_text(&b);
            match text.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => Value::Bool(true),
                "0" | "false" => Value::Bool(false),
                _ => Value::String(text),
            }
        }
        other => text_value(other),
    }
}

fn coerce_float(raw: CellValue) -> Value {
    match raw {
        CellValue::Double(f) => float_or_null(f),
        CellValue::Int(i) => Value::from(i),
        CellValue::UInt(u) => Value::from(u),
        CellValue::Bytes(b) => {
            let text = normalize_text(&b);
            match text.trim().parse::<f64>() {
                Ok(f) => float_or_null(f),
                Err(_) => Value::String(text),
            }
        }
        other => text_value(other),
    }
}

fn float_or_null(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Textual rendition of any cell, used for string-typed destinations.
fn text_value(raw: CellValue) -> Value {
    match raw {
        CellValue::Null => Value::Null,
        CellValue::Bytes(b) => Value::String(normalize_text(&b)),
        CellValue::Int(i) => Value::String(i.to_string()),
        CellValue::UInt(u) => Value::String(u.to_string()),
        CellValue::Double(f) => Value::String(f.to_string()),
        dt @ CellValue::DateTime { .. } => coerce_datetime(dt),
        t @ CellValue::Time { .. } => coerce_time(t),
    }
}

fn is_zero_temporal(text: &str) -> bool {
    let t = text.trim();
    t.is_empty()
        || (t.starts_with("0000-00-00")
            && t.chars().all(|c| matches!(c, '0' | '-' | ':' | ' ' | '.' | 'T')))
}

/// `2024-01-05 10:00:00` -> `2024-01-05T10:00:00`. Bare dates gain no time.
fn iso_datetime(text: &str) -> String {
    const FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
        }
    }
    if NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() {
        return text.to_owned();
    }
    text.replacen(' ', "T", 1)
}
