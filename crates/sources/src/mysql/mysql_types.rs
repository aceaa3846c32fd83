//! MySQL column types and driver values in rowsync terms.

use mysql_async::Value;
use rowsync_core::{CellValue, SourceType};

/// Classify a column from `INFORMATION_SCHEMA.COLUMNS`.
///
/// `data_type` is the bare type (`tinyint`), `column_type` the full
/// declaration (`tinyint(1) unsigned`); the latter tells booleans apart.
pub fn source_type_for(data_type: &str, column_type: &str) -> SourceType {
    let data_type = data_type.to_ascii_lowercase();
    let column_type = column_type.to_ascii_lowercase();

    match data_type.as_str() {
        "tinyint" if column_type.starts_with("tinyint(1)") => {
            SourceType::Boolean
        }
        "bool" | "boolean" => SourceType::Boolean,
        "tinyint" | "smallint" => SourceType::SmallInt,
        "mediumint" | "int" | "integer" | "year" => SourceType::Integer,
        "bigint" => SourceType::BigInt,
        "decimal" | "numeric" => SourceType::Decimal,
        "float" | "double" | "real" => SourceType::Float,
        "date" => SourceType::Date,
        "datetime" | "timestamp" => SourceType::DateTime,
        "time" => SourceType::Time,
        "char" | "varchar" => SourceType::String,
        "tinytext" | "text" | "mediumtext" | "longtext" => SourceType::Text,
        "json" => SourceType::Json,
        "enum" | "set" => SourceType::Enum,
        _ => SourceType::Other,
    }
}

pub fn cell_from_value(value: Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(b) => CellValue::Bytes(b),
        Value::Int(i) => CellValue::Int(i),
        Value::UInt(u) => CellValue::UInt(u),
        Value::Float(f) => CellValue::Double(f64::from(f)),
        Value::Double(d) => CellValue::Double(d),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            CellValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                micros,
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            CellValue::Time {
                negative,
                days,
                hours,
                minutes,
                seconds,
                micros,
            }
        }
    }
}

/// Quote an identifier with backticks, doubling embedded backticks.
/// `db.table` is quoted part by part.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("`{}`", part.replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}
