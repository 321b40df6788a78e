//! DuckDB value to JSON conversion

use chrono::{DateTime, Duration, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value as DuckValue, ValueRef};
use serde_json::{Map, Number, Value};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Convert one cell to JSON. Dates, times and timestamps become strings.
pub(crate) fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => blob(b.len()),
        other => from_value(other.to_owned()),
    }
}

/// Owned values, including the elements of lists, arrays, structs, maps
/// and unions
pub(crate) fn from_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        DuckValue::UHugeInt(i) => u64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::Float(f) => float(f64::from(f)),
        DuckValue::Double(f) => float(f),
        DuckValue::Decimal(d) => {
            let text = d.to_string();
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(text))
        }
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Blob(b) | DuckValue::Geometry(b) => blob(b.len()),
        DuckValue::Date32(days) => date(days),
        DuckValue::Time64(unit, t) => time(micros(unit, t)),
        DuckValue::Timestamp(unit, t) => timestamp(micros(unit, t)),
        DuckValue::Interval {
            months,
            days,
            nanos,
        } => Value::String(format!("{months} months {days} days {nanos} nanoseconds")),
        DuckValue::List(items) | DuckValue::Array(items) => {
            Value::Array(items.into_iter().map(from_value).collect())
        }
        DuckValue::Struct(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), from_value(field.clone())))
                .collect(),
        ),
        DuckValue::Map(entries) => {
            let mut object = Map::new();
            for (key, entry) in entries.iter() {
                let key = match from_value(key.clone()) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                object.insert(key, from_value(entry.clone()));
            }
            Value::Object(object)
        }
        DuckValue::Union(inner) => from_value(*inner),
        other => Value::String(format!("{other:?}")),
    }
}

fn blob(len: usize) -> Value {
    Value::String(format!("<blob {len} bytes>"))
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn date(days: i32) -> Value {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(i64::from(days))))
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or_else(|| Value::String(format!("<date {days} days since epoch>")))
}

fn time(micros: i64) -> Value {
    let secs = micros.div_euclid(1_000_000);
    let nanos = micros.rem_euclid(1_000_000) * 1_000;
    u32::try_from(secs)
        .ok()
        .zip(u32::try_from(nanos).ok())
        .and_then(|(secs, nanos)| NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos))
        .map(|t| Value::String(t.format(TIME_FORMAT).to_string()))
        .unwrap_or_else(|| Value::String(format!("<time {micros} microseconds>")))
}

fn timestamp(micros: i64) -> Value {
    DateTime::from_timestamp_micros(micros)
        .map(|ts| Value::String(ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()))
        .unwrap_or_else(|| Value::String(format!("<timestamp {micros} microseconds>")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(to_json(ValueRef::Null), Value::Null);
        assert_eq!(to_json(ValueRef::Boolean(true)), json!(true));
        assert_eq!(to_json(ValueRef::Int(42)), json!(42));
        assert_eq!(to_json(ValueRef::Double(1200.0)), json!(1200.0));
        assert_eq!(to_json(ValueRef::Double(f64::NAN)), Value::Null);
        assert_eq!(to_json(ValueRef::Text(b"Audio")), json!("Audio"));
        assert_eq!(to_json(ValueRef::Blob(&[1, 2, 3])), json!("<blob 3 bytes>"));
    }

    #[test]
    fn test_huge_int_out_of_range_is_text() {
        let big = i128::from(i64::MAX) + 1;
        assert_eq!(to_json(ValueRef::HugeInt(big)), json!(big.to_string()));
        assert_eq!(to_json(ValueRef::HugeInt(7)), json!(7));
    }

    #[test]
    fn test_date() {
        // 2023-01-15 is 19372 days after the epoch
        assert_eq!(to_json(ValueRef::Date32(19372)), json!("2023-01-15"));
        assert_eq!(to_json(ValueRef::Date32(-1)), json!("1969-12-31"));
    }

    #[test]
    fn test_timestamp_units() {
        let secs = 1_673_776_800; // 2023-01-15 10:00:00 UTC
        let expected = json!("2023-01-15 10:00:00");
        assert_eq!(to_json(ValueRef::Timestamp(TimeUnit::Second, secs)), expected);
        assert_eq!(
            to_json(ValueRef::Timestamp(TimeUnit::Millisecond, secs * 1_000)),
            expected
        );
        assert_eq!(
            to_json(ValueRef::Timestamp(TimeUnit::Microsecond, secs * 1_000_000)),
            expected
        );
        assert_eq!(
            to_json(ValueRef::Timestamp(TimeUnit::Nanosecond, secs * 1_000_000_000)),
            expected
        );
    }

    #[test]
    fn test_timestamp_fraction() {
        let micros = 1_673_776_800_250_000;
        assert_eq!(
            to_json(ValueRef::Timestamp(TimeUnit::Microsecond, micros)),
            json!("2023-01-15 10:00:00.250")
        );
    }

    #[test]
    fn test_enum_is_text() {
        assert_eq!(
            from_value(DuckValue::Enum("happy".to_string())),
            json!("happy")
        );
    }

    #[test]
    fn test_list_converts_each_element() {
        let list = DuckValue::List(vec![
            DuckValue::Text("Laptop Pro X".to_string()),
            DuckValue::Null,
            DuckValue::Date32(19372),
        ]);
        assert_eq!(from_value(list), json!(["Laptop Pro X", null, "2023-01-15"]));

        let nested = DuckValue::Array(vec![DuckValue::List(vec![DuckValue::Int(1)])]);
        assert_eq!(from_value(nested), json!([[1]]));
    }

    #[test]
    fn test_struct_and_map_become_objects() {
        let record = DuckValue::Struct(
            vec![
                ("name".to_string(), DuckValue::Text("Alice Smith".to_string())),
                ("orders".to_string(), DuckValue::BigInt(4)),
            ]
            .into(),
        );
        assert_eq!(from_value(record), json!({"name": "Alice Smith", "orders": 4}));

        let counts = DuckValue::Map(
            vec![
                (DuckValue::Text("USA".to_string()), DuckValue::Int(1)),
                (DuckValue::Int(7), DuckValue::Boolean(true)),
            ]
            .into(),
        );
        assert_eq!(from_value(counts), json!({"USA": 1, "7": true}));
    }

    #[test]
    fn test_union_unwraps() {
        let value = DuckValue::Union(Box::new(DuckValue::Double(2.5)));
        assert_eq!(from_value(value), json!(2.5));
    }

    #[test]
    fn test_time() {
        let micros = (14 * 3600 + 5 * 60 + 9) * 1_000_000;
        assert_eq!(
            to_json(ValueRef::Time64(TimeUnit::Microsecond, micros)),
            json!("14:05:09")
        );
    }
}
