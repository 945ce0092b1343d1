use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::charset;
use crate::record::{Kind, RawValue, TimeOfDay};

/// A sink-native value, tagged over the closed field kinds plus a typed
/// null marker and the synthetic row id.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Typed null: the kind records what the column would have held.
    Null(Kind),
    /// Synthetic time-ordered row identity.
    Id(Uuid),
    Date(NaiveDate),
    Time(TimeOfDay),
    Timestamp(DateTime<Utc>),
    Ip(IpAddr),
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

/// Convert one loosely typed parsed value into its sink-native form.
///
/// Absent values become the typed null marker for the kind, except text
/// kinds, which become the empty string (text columns are non-nullable).
/// Temporal zero values are treated the same as absent. Text runs through
/// the charset-repair chain on its way in.
pub fn convert(kind: Kind, raw: Option<&RawValue>) -> FieldValue {
    let Some(raw) = raw else {
        return default_value(kind);
    };
    match (kind, raw) {
        (_, RawValue::Empty) => default_value(kind),
        (Kind::Date, RawValue::Date(d)) => FieldValue::Date(*d),
        (Kind::Time, RawValue::Time(t)) => {
            if t.is_zero() {
                default_value(kind)
            } else {
                FieldValue::Time(*t)
            }
        }
        (Kind::Timestamp, RawValue::Timestamp(ts)) => {
            if ts.timestamp() == 0 && ts.timestamp_subsec_nanos() == 0 {
                default_value(kind)
            } else {
                FieldValue::Timestamp(*ts)
            }
        }
        (Kind::Ip, RawValue::Ip(addr)) => FieldValue::Ip(*addr),
        (Kind::Float64, RawValue::Float(v)) => FieldValue::Float(*v),
        (Kind::Int64, RawValue::Int(v)) => FieldValue::Int(*v),
        (Kind::Bool, RawValue::Bool(v)) => FieldValue::Bool(*v),
        (Kind::Uri | Kind::String, RawValue::Text(bytes)) => {
            FieldValue::Text(charset::repair(bytes))
        }
        // A parser value that disagrees with the guessed kind: texts still
        // take the string path, typed kinds degrade to their null marker.
        (Kind::Uri | Kind::String, other) => FieldValue::Text(textify(other)),
        _ => default_value(kind),
    }
}

/// The canonical "nothing here" representation for a kind.
fn default_value(kind: Kind) -> FieldValue {
    match kind {
        Kind::Uri | Kind::String => FieldValue::Text(String::new()),
        other => FieldValue::Null(other),
    }
}

fn textify(raw: &RawValue) -> String {
    match raw {
        RawValue::Text(bytes) => charset::repair(bytes),
        RawValue::Int(v) => v.to_string(),
        RawValue::Float(v) => v.to_string(),
        RawValue::Bool(v) => v.to_string(),
        RawValue::Ip(addr) => addr.to_string(),
        RawValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        RawValue::Timestamp(ts) => ts.to_rfc3339(),
        RawValue::Time(t) => format!("{:02}:{:02}:{:02}", t.hour, t.minute, t.second),
        RawValue::Empty => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_becomes_typed_null() {
        assert_eq!(convert(Kind::Date, None), FieldValue::Null(Kind::Date));
        assert_eq!(convert(Kind::Ip, None), FieldValue::Null(Kind::Ip));
        assert_eq!(convert(Kind::Int64, None), FieldValue::Null(Kind::Int64));
        assert_eq!(
            convert(Kind::Float64, Some(&RawValue::Empty)),
            FieldValue::Null(Kind::Float64)
        );
    }

    #[test]
    fn absent_text_becomes_empty_string() {
        assert_eq!(convert(Kind::String, None), FieldValue::Text(String::new()));
        assert_eq!(
            convert(Kind::Uri, Some(&RawValue::Empty)),
            FieldValue::Text(String::new())
        );
    }

    #[test]
    fn zero_time_is_null() {
        let zero = RawValue::Time(TimeOfDay::default());
        assert_eq!(convert(Kind::Time, Some(&zero)), FieldValue::Null(Kind::Time));

        let t = TimeOfDay::new(8, 30, 0, 0);
        assert_eq!(
            convert(Kind::Time, Some(&RawValue::Time(t))),
            FieldValue::Time(t)
        );
    }

    #[test]
    fn zero_timestamp_is_null() {
        let zero = RawValue::Timestamp(DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            convert(Kind::Timestamp, Some(&zero)),
            FieldValue::Null(Kind::Timestamp)
        );
    }

    #[test]
    fn numerics_pass_through() {
        assert_eq!(
            convert(Kind::Int64, Some(&RawValue::Int(404))),
            FieldValue::Int(404)
        );
        assert_eq!(
            convert(Kind::Float64, Some(&RawValue::Float(0.25))),
            FieldValue::Float(0.25)
        );
        assert_eq!(
            convert(Kind::Bool, Some(&RawValue::Bool(true))),
            FieldValue::Bool(true)
        );
    }

    #[test]
    fn text_is_charset_repaired() {
        let raw = RawValue::Text(b"caf\xe9".to_vec());
        assert_eq!(
            convert(Kind::String, Some(&raw)),
            FieldValue::Text("café".to_string())
        );
    }

    #[test]
    fn mismatched_variant_degrades() {
        // Parser produced a number where the name promised an address.
        assert_eq!(
            convert(Kind::Ip, Some(&RawValue::Int(42))),
            FieldValue::Null(Kind::Ip)
        );
        // Texts absorb anything.
        assert_eq!(
            convert(Kind::String, Some(&RawValue::Int(42))),
            FieldValue::Text("42".to_string())
        );
    }
}
