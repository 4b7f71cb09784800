//! Defensive payload unwrapping and field-alias normalization.
//!
//! Upstream payloads are inconsistently shaped (sometimes a bare array,
//! sometimes an object wrapping the rows) and rename fields between API
//! versions. Both problems are handled here as pure data-driven lookups:
//! an ordered list of container fields, and per-logical-field alias tables
//! evaluated in priority order with documented defaults at the call sites.
//!
//! The alias tables living in the fetcher modules are provisional; several of
//! the original field names were never confirmed against live samples, so
//! keeping them as plain constants makes revisions cheap.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Container fields tried in priority order when a listing payload is not a
/// bare array. The first field holding an array wins.
const ROW_CONTAINER_FIELDS: &[&str] = &["results", "list", "rows"];

/// Timestamps at or above this magnitude are milliseconds, below it seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Unwrap a listing payload into its rows, or `None` when no known shape matches.
pub(crate) fn unwrap_rows(payload: &Value) -> Option<&Vec<Value>> {
    if let Value::Array(rows) = payload {
        return Some(rows);
    }
    for field in ROW_CONTAINER_FIELDS {
        if let Some(Value::Array(rows)) = payload.get(field) {
            return Some(rows);
        }
    }
    None
}

/// Resolve a dotted path (`"author.name"`) inside a JSON object.
fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = row;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// First alias resolving to a non-empty string wins.
pub(crate) fn string_field(row: &Value, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        if let Some(value) = lookup(row, alias) {
            match value {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

/// First alias resolving to an unsigned integer wins. Upstreams encode ids
/// both as numbers and as numeric strings.
pub(crate) fn u64_field(row: &Value, aliases: &[&str]) -> Option<u64> {
    for alias in aliases {
        if let Some(value) = lookup(row, alias) {
            match value {
                Value::Number(n) => {
                    if let Some(v) = n.as_u64() {
                        return Some(v);
                    }
                }
                Value::String(s) => {
                    if let Ok(v) = s.trim().parse::<u64>() {
                        return Some(v);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// First alias resolving to a truthy value wins; absent is `false`.
pub(crate) fn bool_field(row: &Value, aliases: &[&str]) -> bool {
    for alias in aliases {
        if let Some(value) = lookup(row, alias) {
            match value {
                Value::Bool(b) => return *b,
                Value::Number(n) => return n.as_i64().unwrap_or(0) != 0,
                Value::String(s) => return !s.is_empty() && s != "0" && s != "false",
                _ => {}
            }
        }
    }
    false
}

/// First alias parsing as a timestamp wins. Accepts RFC 3339 strings,
/// `YYYY-MM-DD` strings, and epoch numbers (seconds or milliseconds,
/// disambiguated by magnitude; numeric strings included).
pub(crate) fn date_field(row: &Value, aliases: &[&str]) -> Option<DateTime<Utc>> {
    for alias in aliases {
        if let Some(value) = lookup(row, alias) {
            let parsed = match value {
                Value::String(s) => parse_date_str(s),
                Value::Number(n) => n.as_i64().and_then(from_epoch),
                _ => None,
            };
            if parsed.is_some() {
                return parsed;
            }
        }
    }
    None
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    s.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_bare_array() {
        let payload = json!([{"a": 1}, {"a": 2}]);
        assert_eq!(unwrap_rows(&payload).map(Vec::len), Some(2));
    }

    #[test]
    fn unwraps_container_fields_in_priority_order() {
        let payload = json!({"list": [{"a": 1}]});
        assert_eq!(unwrap_rows(&payload).map(Vec::len), Some(1));

        // `results` outranks `list` when both are present
        let payload = json!({"results": [{"a": 1}, {"a": 2}], "list": [{"a": 3}]});
        let rows = unwrap_rows(&payload).expect("rows");
        assert_eq!(rows.len(), 2);

        let payload = json!({"rows": []});
        assert_eq!(unwrap_rows(&payload).map(Vec::len), Some(0));
    }

    #[test]
    fn unknown_shape_is_none() {
        assert!(unwrap_rows(&json!({"data": [1]})).is_none());
        assert!(unwrap_rows(&json!("nope")).is_none());
    }

    #[test]
    fn string_field_alias_priority() {
        let row = json!({"user_name": "bob", "author": {"name": "carol"}});
        assert_eq!(
            string_field(&row, &["username", "user_name", "author.name"]),
            Some("bob".into())
        );
        assert_eq!(
            string_field(&row, &["username", "author.name"]),
            Some("carol".into())
        );
        assert_eq!(string_field(&row, &["username"]), None);
    }

    #[test]
    fn string_field_skips_empty() {
        let row = json!({"username": "", "user_name": "bob"});
        assert_eq!(
            string_field(&row, &["username", "user_name"]),
            Some("bob".into())
        );
    }

    #[test]
    fn u64_field_accepts_numbers_and_numeric_strings() {
        let row = json!({"uid": "123"});
        assert_eq!(u64_field(&row, &["uid"]), Some(123));

        let row = json!({"uid": 456});
        assert_eq!(u64_field(&row, &["uid"]), Some(456));

        let row = json!({"uid": "abc"});
        assert_eq!(u64_field(&row, &["uid"]), None);
    }

    #[test]
    fn bool_field_handles_loose_encodings() {
        assert!(bool_field(&json!({"is_sa": true}), &["is_sa"]));
        assert!(bool_field(&json!({"is_sa": 1}), &["is_sa"]));
        assert!(bool_field(&json!({"is_sa": "1"}), &["is_sa"]));
        assert!(!bool_field(&json!({"is_sa": false}), &["is_sa"]));
        assert!(!bool_field(&json!({"is_sa": "0"}), &["is_sa"]));
        assert!(!bool_field(&json!({}), &["is_sa"]));
    }

    #[test]
    fn date_field_parses_rfc3339() {
        let row = json!({"created": "2025-03-15T12:30:00+00:00"});
        let dt = date_field(&row, &["created"]).expect("date");
        assert_eq!(dt.to_rfc3339(), "2025-03-15T12:30:00+00:00");
    }

    #[test]
    fn date_field_parses_plain_date() {
        let row = json!({"created": "2025-03-15"});
        let dt = date_field(&row, &["created"]).expect("date");
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2025-03-15");
    }

    #[test]
    fn date_field_disambiguates_epoch_units() {
        // Seconds
        let row = json!({"created": 1_742_038_200i64});
        let secs = date_field(&row, &["created"]).expect("date");

        // Same instant in milliseconds
        let row = json!({"created": 1_742_038_200_000i64});
        let millis = date_field(&row, &["created"]).expect("date");
        assert_eq!(secs, millis);

        // Numeric string of seconds
        let row = json!({"created": "1742038200"});
        assert_eq!(date_field(&row, &["created"]), Some(secs));
    }

    #[test]
    fn date_field_absent_is_none() {
        assert_eq!(date_field(&json!({}), &["created"]), None);
        assert_eq!(date_field(&json!({"created": "soon"}), &["created"]), None);
    }
}
