/**
 * ROW TRANSFORMERS - Raw remote rows -> canonical dashboard entities
 *
 * ROLE :
 * Maps the untyped rows coming from the backend (query results and change
 * events) onto `Incident`, `Unit` and `LogEntry`.
 *
 * RULES :
 * - Never fails: every function here returns a value for any input
 * - Coordinates accept numbers or numeric strings ("-1.2834"), anything else -> 0
 * - Text fields accept strings, numbers and booleans, anything else -> ""
 * - Log time-of-day falls back to "--:--:--"
 */

use crate::models::{Incident, LogEntry, RawRecord, Record, Unit};
use serde_json::Value;

pub const TIME_PLACEHOLDER: &str = "--:--:--";

/// Incident row: `summary` becomes the description and `created_at` the timestamp.
pub fn transform_incident(raw: &RawRecord) -> Incident {
    Incident {
        id: text_field(raw, "id"),
        kind: text_field(raw, "type"),
        description: text_field(raw, "summary"),
        location: text_field(raw, "location"),
        lat: coord_field(raw, "lat"),
        lng: coord_field(raw, "lng"),
        severity: text_field(raw, "severity"),
        timestamp: text_field(raw, "created_at"),
        source: text_field(raw, "source"),
        status: text_field(raw, "status"),
    }
}

pub fn transform_unit(raw: &RawRecord) -> Unit {
    Unit {
        id: text_field(raw, "id"),
        name: text_field(raw, "name"),
        kind: text_field(raw, "type"),
        status: text_field(raw, "status"),
        lat: coord_field(raw, "lat"),
        lng: coord_field(raw, "lng"),
    }
}

pub fn format_log(raw: &RawRecord) -> LogEntry {
    let time_part = format_time_of_day(raw.get("created_at"));
    LogEntry(format!("[{}] {}", time_part, text_field(raw, "message")))
}

/// Time-of-day component of a source timestamp.
///
/// "2024-01-01T08:15:30.000Z" -> "08:15:30", "2024-01-01 08:15:30" -> "08:15:30".
/// Absent, empty or non-string values give `TIME_PLACEHOLDER`.
pub fn format_time_of_day(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(ts)) => time_of_day(ts),
        _ => TIME_PLACEHOLDER.to_string(),
    }
}

pub fn time_of_day(ts: &str) -> String {
    if ts.is_empty() {
        return TIME_PLACEHOLDER.to_string();
    }

    let part: String = match ts.split_once('T') {
        Some((_, rest)) => {
            // only up to the next separator, like a plain split
            let rest = rest.split('T').next().unwrap_or_default();
            rest.chars().take(8).collect()
        }
        None => {
            let len = ts.chars().count();
            ts.chars().skip(len.saturating_sub(8)).collect()
        }
    };

    if part.is_empty() {
        TIME_PLACEHOLDER.to_string()
    } else {
        part
    }
}

/// Text value of a field; numbers and booleans are rendered, other shapes are empty.
pub fn text_field(raw: &RawRecord, key: &str) -> String {
    match raw.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Numeric value of a coordinate field, 0 when missing or unusable.
pub fn coord_field(raw: &RawRecord, key: &str) -> f64 {
    let parsed = match raw.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_float_prefix(s),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Longest leading float in `s` ("36.82 E" -> 36.82), after leading whitespace.
///
/// Single pass over `[sign] digits [. digits] [e [sign] digits]`, then one parse.
fn parse_float_prefix(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let bytes = trimmed.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_end = digits_from(i);
    let mut mantissa_digits = int_end - i;
    i = int_end;
    if bytes.get(i) == Some(&b'.') {
        let frac_end = digits_from(i + 1);
        mantissa_digits += frac_end - (i + 1);
        i = frac_end;
    }
    if mantissa_digits == 0 {
        return None;
    }

    let mut end = i;
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut exp = i + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    // everything before `end` is ASCII
    trimmed[..end].parse::<f64>().ok()
}

/// Rows without an id never match another entry.
fn non_empty(id: &str) -> Option<&str> {
    (!id.is_empty()).then_some(id)
}

impl Record for Incident {
    fn from_raw(raw: &RawRecord) -> Self {
        transform_incident(raw)
    }

    fn record_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }
}

impl Record for Unit {
    fn from_raw(raw: &RawRecord) -> Self {
        transform_unit(raw)
    }

    fn record_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }
}

impl Record for LogEntry {
    fn from_raw(raw: &RawRecord) -> Self {
        format_log(raw)
    }

    fn record_id(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    #[test]
    fn test_transform_incident_maps_fields() {
        let row = raw(json!({
            "id": "inc-1",
            "type": "Robbery",
            "summary": "Armed robbery at M-Pesa agent",
            "location": "CBD, Moi Avenue",
            "lat": "-1.2834",
            "lng": 36.8235,
            "severity": "High",
            "created_at": "2024-01-01T08:15:30.000Z",
            "source": "Radio",
            "status": "Active",
            "bias_score": 0.12
        }));

        let incident = transform_incident(&row);
        assert_eq!(incident.id, "inc-1");
        assert_eq!(incident.kind, "Robbery");
        assert_eq!(incident.description, "Armed robbery at M-Pesa agent");
        assert_eq!(incident.location, "CBD, Moi Avenue");
        assert_eq!(incident.lat, -1.2834);
        assert_eq!(incident.lng, 36.8235);
        assert_eq!(incident.severity, "High");
        assert_eq!(incident.timestamp, "2024-01-01T08:15:30.000Z");
        assert_eq!(incident.source, "Radio");
        assert_eq!(incident.status, "Active");
    }

    #[test]
    fn test_malformed_coordinates_default_to_zero() {
        let cases = [
            json!({}),
            json!({"lat": null, "lng": null}),
            json!({"lat": "north", "lng": ""}),
            json!({"lat": true, "lng": [1.0]}),
            json!({"lat": {"deg": 1}, "lng": "e"}),
            json!({"lat": "1e999", "lng": "-"}),
        ];

        for case in cases {
            let row = raw(case.clone());
            let incident = transform_incident(&row);
            let unit = transform_unit(&row);
            assert_eq!((incident.lat, incident.lng), (0.0, 0.0), "incident {case}");
            assert_eq!((unit.lat, unit.lng), (0.0, 0.0), "unit {case}");
        }
    }

    #[test]
    fn test_coordinate_prefix_parsing() {
        let row = raw(json!({"lat": "  -1.3133 S", "lng": "36.7828deg"}));
        let unit = transform_unit(&row);
        assert_eq!(unit.lat, -1.3133);
        assert_eq!(unit.lng, 36.7828);

        let row = raw(json!({"lat": "1.5e3x", "lng": "-.25e"}));
        let unit = transform_unit(&row);
        assert_eq!(unit.lat, 1500.0);
        assert_eq!(unit.lng, -0.25);
    }

    #[test]
    fn test_long_coordinate_strings_parse_in_one_pass() {
        let mut noisy = String::from("1");
        noisy.push_str(&"e".repeat(200_000));
        let row = raw(json!({"lat": noisy, "lng": "7".repeat(400)}));
        let unit = transform_unit(&row);
        assert_eq!(unit.lat, 1.0);
        assert_eq!(unit.lng, 0.0); // 7777... overflows to inf
    }

    #[test]
    fn test_missing_id_has_no_record_id() {
        let incident = transform_incident(&raw(json!({"summary": "no id"})));
        assert_eq!(incident.record_id(), None);
        let unit = transform_unit(&raw(json!({"id": "u1"})));
        assert_eq!(unit.record_id(), Some("u1"));
    }

    #[test]
    fn test_transform_unit_numeric_id() {
        let row = raw(json!({"id": 7, "name": "Alpha-1", "type": "Patrol", "status": "Idle"}));
        let unit = transform_unit(&row);
        assert_eq!(unit.id, "7");
        assert_eq!(unit.name, "Alpha-1");
        assert_eq!(unit.kind, "Patrol");
        assert_eq!(unit.status, "Idle");
    }

    #[test]
    fn test_time_of_day_extraction() {
        assert_eq!(time_of_day("2024-01-01T08:15:30.000Z"), "08:15:30");
        assert_eq!(time_of_day("2024-01-01T08:15"), "08:15");
        assert_eq!(time_of_day("2024-01-01 21:04:59"), "21:04:59");
        assert_eq!(time_of_day("09:00"), "09:00");
        assert_eq!(time_of_day(""), TIME_PLACEHOLDER);
        assert_eq!(time_of_day("2024-01-01T"), TIME_PLACEHOLDER);
    }

    #[test]
    fn test_time_of_day_fallbacks() {
        assert_eq!(format_time_of_day(None), "--:--:--");
        assert_eq!(format_time_of_day(Some(&Value::Null)), "--:--:--");
        assert_eq!(format_time_of_day(Some(&json!(1704096930))), "--:--:--");
        assert_eq!(format_time_of_day(Some(&json!("2024-01-01T08:15:30.000Z"))), "08:15:30");
    }

    #[test]
    fn test_time_of_day_multibyte_input() {
        // must not split inside a char
        assert_eq!(time_of_day("día 08:15:30"), "08:15:30");
        assert_eq!(time_of_day("éé"), "éé");
    }

    #[test]
    fn test_format_log() {
        let row = raw(json!({"created_at": "2024-03-02T17:45:01+00:00", "message": "Sentinel: signal picked up"}));
        assert_eq!(format_log(&row).as_str(), "[17:45:01] Sentinel: signal picked up");

        let row = raw(json!({"message": "no timestamp"}));
        assert_eq!(format_log(&row).as_str(), "[--:--:--] no timestamp");
    }

    #[test]
    fn test_record_ids() {
        let row = raw(json!({"id": "u-1"}));
        assert_eq!(Unit::from_raw(&row).record_id(), Some("u-1"));
        assert_eq!(LogEntry::from_raw(&row).record_id(), None);
    }
}
