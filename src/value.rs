use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// A single row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Cell value of a loaded table.
///
/// Every loader maps its native cell types onto this closed set, so search text and
/// filter tokens can be derived by exhaustive matching.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
    Null,
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    /// Null, or a string with nothing but whitespace in it.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Value::Sequence(_) | Value::Mapping(_))
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => number_to_json(*n),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => serde_json::Value::String(iso_datetime(d)),
            Value::Null => serde_json::Value::Null,
            Value::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Mapping(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Plain rendering that never goes through a serializer.
    pub fn coerce_to_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => number_to_string(*n),
            Value::Bool(b) => b.to_string(),
            Value::Date(d) => display_datetime(d),
            Value::Null => String::new(),
            Value::Sequence(items) => items
                .iter()
                .map(Value::coerce_to_string)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Mapping(map) => map
                .iter()
                .map(|(k, v)| format!("{k}: {}", v.coerce_to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Compare two cells for sorting. Numbers and dates compare by value, everything
    /// else by its display string. Nulls sort last.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Number(_), _) => Ordering::Less,
            (_, Value::Number(_)) => Ordering::Greater,
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (a, b) => a.to_string().cmp(&b.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Sequence(_) | Value::Mapping(_) => write!(f, "{}", self.to_json()),
            Value::Null => f.write_str("∅"),
            other => f.write_str(&other.coerce_to_string()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => match parse_iso_datetime(&s) {
                Some(d) => Value::Date(d),
                None => Value::String(s),
            },
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Mapping(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d.and_time(NaiveTime::MIN))
    }
}

/// Decimal string of a number, the way a browser would print it.
pub fn number_to_string(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        n.to_string()
    }
}

/// Number with grouped thousands and at most three fraction digits: `1,234,567.5`.
pub fn format_grouped_number(n: f64) -> String {
    if !n.is_finite() {
        return number_to_string(n);
    }
    let fixed = format!("{:.3}", n.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, c) in digits.iter().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }

    let negative = n < 0.0 && (grouped != "0" || !frac_part.is_empty());
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

// Largest integer an f64 holds exactly
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Integral numbers become JSON integers so nested values print like top level cells.
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INTEGER {
        return serde_json::Value::from(n as i64);
    }
    match serde_json::Number::from_f64(n) {
        Some(number) => serde_json::Value::Number(number),
        None => {
            warn!("Number {n} has no JSON form, keeping it as text");
            serde_json::Value::String(number_to_string(n))
        }
    }
}

/// `2026-03-01T00:00:00.000Z`
pub fn iso_datetime(d: &NaiveDateTime) -> String {
    d.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// `01/03/2026`, with `HH:MM` appended when the time is not midnight.
pub fn localized_date(d: &NaiveDateTime) -> String {
    if d.time() == NaiveTime::MIN {
        d.format("%d/%m/%Y").to_string()
    } else {
        d.format("%d/%m/%Y %H:%M").to_string()
    }
}

fn display_datetime(d: &NaiveDateTime) -> String {
    if d.time() == NaiveTime::MIN {
        d.format("%Y-%m-%d").to_string()
    } else {
        d.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Recognizes the date shapes the backend emits: `2026-03-01`, `2026-03-01T10:00:00`
/// with optional fraction, and full RFC 3339 timestamps (converted to UTC).
pub fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.len() < 10 || !s.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN));
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_objects_become_closed_values() {
        let v = Value::from(json!({
            "monto": 1500.5,
            "activo": true,
            "tags": ["a", null],
            "inicio": "2026-01-15",
        }));
        let Value::Mapping(map) = v else {
            panic!("expected mapping");
        };
        assert_eq!(map["monto"], Value::Number(1500.5));
        assert_eq!(map["activo"], Value::Bool(true));
        assert_eq!(
            map["tags"],
            Value::Sequence(vec![Value::String("a".into()), Value::Null])
        );
        assert!(matches!(map["inicio"], Value::Date(_)));
    }

    #[test]
    fn plain_strings_are_not_taken_for_dates() {
        assert_eq!(parse_iso_datetime("2026"), None);
        assert_eq!(parse_iso_datetime("Contrato 2026-01"), None);
        assert!(parse_iso_datetime("2026-01-15T08:30:00Z").is_some());
        assert!(parse_iso_datetime("2026-01-15T08:30:00.250").is_some());
    }

    #[test]
    fn numbers_print_like_a_browser() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1234.5), "1234.5");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
    }

    #[test]
    fn grouped_numbers() {
        assert_eq!(format_grouped_number(1234567.5), "1,234,567.5");
        assert_eq!(format_grouped_number(999.0), "999");
        assert_eq!(format_grouped_number(-1000.0), "-1,000");
        assert_eq!(format_grouped_number(0.12345), "0.123");
        assert_eq!(format_grouped_number(-0.0001), "0");
    }

    #[test]
    fn dates_format_iso_and_localized() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(iso_datetime(&d), "2026-03-01T00:00:00.000Z");
        assert_eq!(localized_date(&d), "01/03/2026");

        let d = d.date().and_hms_opt(14, 5, 0).unwrap();
        assert_eq!(localized_date(&d), "01/03/2026 14:05");
    }

    #[test]
    fn nulls_sort_last() {
        let mut values = vec![Value::Null, Value::Number(2.0), Value::Number(10.0)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![Value::Number(2.0), Value::Number(10.0), Value::Null]
        );
    }

    #[test]
    fn nested_values_display_as_json() {
        let v = Value::Sequence(vec![Value::Number(1.0), Value::String("x".into())]);
        assert_eq!(v.to_string(), "[1,\"x\"]");
        assert_eq!(v.coerce_to_string(), "1, x");
    }

    #[test]
    fn nested_numbers_keep_their_plain_form() {
        let v = Value::from(json!({"monto": 600000, "iva": 0.16, "neg": -3}));
        assert_eq!(v.to_string(), r#"{"iva":0.16,"monto":600000,"neg":-3}"#);
        assert_eq!(v.to_json(), json!({"monto": 600000, "iva": 0.16, "neg": -3}));
        assert_eq!(Value::Number(-0.0).to_json(), json!(0));
        assert_eq!(Value::Number(f64::NAN).to_json(), json!("NaN"));
        assert_eq!(
            Value::Sequence(vec![Value::Number(f64::NEG_INFINITY)]).to_string(),
            r#"["-Infinity"]"#
        );
        assert_eq!(Value::Number(1e300).to_json(), json!(1e300));
    }
}
