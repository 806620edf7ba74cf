//! Row-value serialization for query results.
//!
//! Date and time values become ISO-8601 strings, null stays null, numeric,
//! boolean, and string values pass through, and anything else falls back to
//! its display form.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value};
use serde_json::{json, Map, Value as JsonValue};

fn to_micros(unit: &TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn date32_to_string(days: i32) -> String {
    NaiveDate::default()
        .checked_add_signed(Duration::days(days as i64))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn timestamp_to_string(unit: &TimeUnit, value: i64) -> String {
    DateTime::from_timestamp_micros(to_micros(unit, value))
        .map(|ts| ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        .unwrap_or_else(|| value.to_string())
}

fn time64_to_string(unit: &TimeUnit, value: i64) -> String {
    let micros = to_micros(unit, value);
    let seconds = (micros / 1_000_000) as u32;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
        .map(|time| time.format("%H:%M:%S%.f").to_string())
        .unwrap_or_else(|| value.to_string())
}

fn float_to_json(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(value.to_string()))
}

/// Serialize a single column value.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => json!(b),
        Value::TinyInt(i) => json!(i),
        Value::SmallInt(i) => json!(i),
        Value::Int(i) => json!(i),
        Value::BigInt(i) => json!(i),
        Value::HugeInt(i) => match i64::try_from(*i) {
            Ok(fits) => json!(fits),
            Err(_) => JsonValue::String(i.to_string()),
        },
        Value::UTinyInt(i) => json!(i),
        Value::USmallInt(i) => json!(i),
        Value::UInt(i) => json!(i),
        Value::UBigInt(i) => json!(i),
        Value::Float(f) => float_to_json(*f as f64),
        Value::Double(f) => float_to_json(*f),
        Value::Decimal(d) => JsonValue::String(d.to_string()),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Blob(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).to_string()),
        Value::Date32(days) => JsonValue::String(date32_to_string(*days)),
        Value::Timestamp(unit, ts) => JsonValue::String(timestamp_to_string(unit, *ts)),
        Value::Time64(unit, t) => JsonValue::String(time64_to_string(unit, *t)),
        other => JsonValue::String(format!("{:?}", other)),
    }
}

/// Build one result row as a JSON object keyed by column name.
pub fn row_object(columns: &[String], values: &[Value]) -> JsonValue {
    let mut object = Map::new();
    for (column, value) in columns.iter().zip(values.iter()) {
        object.insert(column.clone(), value_to_json(value));
    }
    JsonValue::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_become_iso_strings() {
        // 2025-01-01 is 20089 days after the epoch
        assert_eq!(value_to_json(&Value::Date32(20089)), json!("2025-01-01"));
    }

    #[test]
    fn timestamps_become_iso_strings() {
        let micros = 1_735_689_600_000_000; // 2025-01-01T00:00:00 UTC
        assert_eq!(
            value_to_json(&Value::Timestamp(TimeUnit::Microsecond, micros)),
            json!("2025-01-01T00:00:00")
        );
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(value_to_json(&Value::Null), JsonValue::Null);
        assert_eq!(value_to_json(&Value::Boolean(true)), json!(true));
        assert_eq!(value_to_json(&Value::Int(42)), json!(42));
        assert_eq!(value_to_json(&Value::Double(1.5)), json!(1.5));
        assert_eq!(
            value_to_json(&Value::Text("abc".to_string())),
            json!("abc")
        );
    }

    #[test]
    fn row_serialization_matches_wire_shape() {
        let columns = vec![
            "created_date".to_string(),
            "cost".to_string(),
            "id".to_string(),
        ];
        let values = vec![
            Value::Date32(20089),
            Value::Null,
            Value::Text("abc".to_string()),
        ];

        let row = row_object(&columns, &values);

        assert_eq!(
            row,
            json!({"created_date": "2025-01-01", "cost": null, "id": "abc"})
        );
    }
}
