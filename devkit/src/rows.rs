/*!
Builders for backend rows

Rows come back from the backend as loose JSON objects. These helpers build
them the way the backend does (string coordinates, `summary` instead of
`description`, `created_at` timestamps) so tests exercise the real transformers.
*/

use serde_json::{Number, Value};
use shield_sync::models::RawRecord;

/// Fluent builder of one raw row
#[derive(Debug, Clone, Default)]
pub struct RowBuilder {
    fields: RawRecord,
}

impl RowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id<S: Into<String>>(self, id: S) -> Self {
        self.set_string("id", id)
    }

    /// Sets any field
    pub fn set_field<S: Into<String>>(mut self, field: S, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn set_string<S: Into<String>, V: Into<String>>(self, field: S, value: V) -> Self {
        self.set_field(field, Value::String(value.into()))
    }

    /// Non-finite numbers are stored as JSON null
    pub fn set_number<S: Into<String>>(self, field: S, value: f64) -> Self {
        let value = Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null);
        self.set_field(field, value)
    }

    pub fn set_bool<S: Into<String>>(self, field: S, value: bool) -> Self {
        self.set_field(field, Value::Bool(value))
    }

    pub fn without<S: AsRef<str>>(mut self, field: S) -> Self {
        self.fields.remove(field.as_ref());
        self
    }

    pub fn with_created_at<V: Into<String>>(self, created_at: V) -> Self {
        self.set_string("created_at", created_at)
    }

    /// Stamps `created_at` with the current time (ISO 8601)
    pub fn with_timestamp(self) -> Self {
        self.with_created_at(chrono::Utc::now().to_rfc3339())
    }

    pub fn build(self) -> RawRecord {
        self.fields
    }
}

/// Ready-made rows of the three collections
pub struct ShieldRows;

impl ShieldRows {
    pub fn incident(id: &str, severity: &str, created_at: &str) -> RawRecord {
        RowBuilder::new()
            .with_id(id)
            .set_string("type", "Theft")
            .set_string("summary", format!("Incident {id}"))
            .set_string("location", "Eastleigh")
            .set_string("lat", "-1.2833")
            .set_string("lng", "36.8500")
            .set_string("severity", severity)
            .set_string("source", "Simulator")
            .set_string("status", "Active")
            .with_created_at(created_at)
            .build()
    }

    pub fn unit(id: &str, status: &str) -> RawRecord {
        RowBuilder::new()
            .with_id(id)
            .set_string("name", format!("Unit {id}"))
            .set_string("type", "Patrol")
            .set_string("status", status)
            .set_number("lat", -1.2921)
            .set_number("lng", 36.8219)
            .build()
    }

    pub fn log(message: &str, created_at: Option<&str>) -> RawRecord {
        let row = RowBuilder::new().set_string("message", message);
        match created_at {
            Some(created_at) => row.with_created_at(created_at).build(),
            None => row.build(),
        }
    }
}
