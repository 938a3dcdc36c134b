//! Business events.
//!
//! An [`Event`] is a flat, insertion-ordered JSON object that has already been enriched and is
//! ready to serialize. Every event carries a non-empty `event_type`, a unique `event_id`, and an
//! `event_time`; everything else is optional and simply absent when unset (never `null`).
//!
//! ```rust
//! use biztel::{Event, EventType};
//!
//! let event = Event::new(EventType::OrderPlaced)
//!     .with("order_id", "o-1")
//!     .with("order_total", 42.5)
//!     .with("customer_email", None::<String>); // dropped, not null-padded
//!
//! assert_eq!(event.event_type(), "order.placed");
//! assert!(event.get("customer_email").is_none());
//! ```

use crate::catalog::{EventSource, EventType};
use crate::error::EventError;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub(crate) const EVENT_ID: &str = "event_id";
pub(crate) const EVENT_TYPE: &str = "event_type";
pub(crate) const EVENT_SOURCE: &str = "event_source";
pub(crate) const EVENT_TIME: &str = "event_time";

/// An enriched business event.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Create an event of the given type with a fresh id and the current UTC time.
    pub fn new(event_type: EventType) -> Self {
        let mut fields = Map::new();
        fields.insert(EVENT_ID.into(), Value::String(uuid::Uuid::new_v4().to_string()));
        fields.insert(EVENT_TYPE.into(), Value::String(event_type.as_str().to_string()));
        fields.insert(EVENT_TIME.into(), Value::String(now_rfc3339()));
        Self { fields }
    }

    /// Decode and validate an event from an arbitrary JSON value.
    ///
    /// The type tag is resolved through the [`EventType`] table and the fields that type
    /// requires are checked here, at decode time. A missing `event_id` or `event_time` is
    /// generated; `null` fields are dropped.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let Value::Object(raw) = value else {
            return Err(EventError::NotAnObject);
        };

        let tag = match raw.get(EVENT_TYPE) {
            Some(Value::String(tag)) => tag.clone(),
            _ => return Err(EventError::MissingType),
        };
        let event_type = EventType::from_tag(&tag)?;

        let mut fields: Map<String, Value> =
            raw.into_iter().filter(|(_, value)| !value.is_null()).collect();

        for field in event_type.required_fields() {
            if !fields.contains_key(*field) {
                return Err(EventError::MissingField {
                    event_type: event_type.as_str().to_string(),
                    field: *field,
                });
            }
        }
        for key in [EVENT_ID, EVENT_SOURCE, EVENT_TIME] {
            if let Some(value) = fields.get(key) {
                if !value.is_string() {
                    return Err(EventError::WrongType { field: key.into(), expected: "a string" });
                }
            }
        }

        if !matches!(fields.get(EVENT_ID), Some(Value::String(id)) if !id.is_empty()) {
            fields.insert(EVENT_ID.into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        if !fields.contains_key(EVENT_TIME) {
            fields.insert(EVENT_TIME.into(), Value::String(now_rfc3339()));
        }
        Ok(Self { fields })
    }

    /// Builder-style setter. A value that converts to `null` removes the field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a field in place. A value that converts to `null` removes the field.
    ///
    /// The identity fields (`event_id`, `event_type`) cannot be removed this way.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if value.is_null() {
            if key != EVENT_ID && key != EVENT_TYPE {
                self.fields.shift_remove(&key);
            }
            return;
        }
        self.fields.insert(key, value);
    }

    /// Set a field only when the event does not already carry a non-empty value for it.
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<Value>) -> bool {
        let present = match self.fields.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };
        if present {
            return false;
        }
        self.set(key, value);
        self.fields.contains_key(key)
    }

    /// Set the producer source.
    pub fn with_source(self, source: &EventSource) -> Self {
        self.with(EVENT_SOURCE, source.as_str())
    }

    /// Unique event id.
    pub fn id(&self) -> &str {
        self.str_field(EVENT_ID).unwrap_or_default()
    }

    /// Type tag as it appears on the wire.
    pub fn event_type(&self) -> &str {
        self.str_field(EVENT_TYPE).unwrap_or_default()
    }

    /// Parsed type tag.
    pub fn kind(&self) -> EventType {
        EventType::from_tag(self.event_type())
            .unwrap_or_else(|_| EventType::Custom(self.event_type().to_string()))
    }

    /// Producer source, if set.
    pub fn source(&self) -> Option<&str> {
        self.str_field(EVENT_SOURCE)
    }

    /// Event timestamp (RFC 3339), if set.
    pub fn time(&self) -> Option<&str> {
        self.str_field(EVENT_TIME)
    }

    /// Raw field access.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Compact single-line JSON.
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    /// Serialize to compact JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

impl TryFrom<Value> for Event {
    type Error = EventError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Event::from_value(value)
    }
}

impl From<Event> for Value {
    fn from(event: Event) -> Self {
        Value::Object(event.fields)
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
