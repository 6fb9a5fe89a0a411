//! Event decoding.
//!
//! An event is a JSON object. CloudEvents envelopes (objects carrying
//! `specversion` and `data`) are unwrapped: `data` becomes the event payload
//! and the envelope `id` becomes the correlation event id. A string `data`
//! holding JSON is decoded as well.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("event payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Decoded event payload plus envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub data: Value,
    pub id: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
}

pub fn parse_event(raw: &[u8]) -> Result<Event, EventError> {
    let decoded: Value = serde_json::from_slice(raw)?;
    let mut envelope = match decoded {
        Value::Object(envelope) => envelope,
        other => return Err(EventError::NotAnObject(crate::criteria::type_name(&other))),
    };

    if !envelope.contains_key("specversion") || !envelope.contains_key("data") {
        return Ok(Event {
            data: Value::Object(envelope),
            id: None,
            event_type: None,
            source: None,
        });
    }

    let text_field = |value: Option<Value>| match value {
        Some(Value::String(text)) => Some(text),
        _ => None,
    };
    let id = text_field(envelope.remove("id"));
    let event_type = text_field(envelope.remove("type"));
    let source = text_field(envelope.remove("source"));
    let data = match envelope.remove("data") {
        Some(Value::String(text)) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Some(other) => other,
        None => Value::Null,
    };
    if !data.is_object() {
        return Err(EventError::NotAnObject(crate::criteria::type_name(&data)));
    }
    Ok(Event {
        data,
        id,
        event_type,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_objects_pass_through() {
        let event = parse_event(br#"{"id": "c1", "generation": 2}"#).unwrap();
        assert_eq!(event.data, json!({"id": "c1", "generation": 2}));
        assert_eq!(event.id, None);
    }

    #[test]
    fn cloud_events_are_unwrapped() {
        let raw = br#"{"specversion": "1.0", "id": "evt-7", "type": "cluster.updated", "source": "/api", "data": {"id": "c1"}}"#;
        let event = parse_event(raw).unwrap();
        assert_eq!(event.data, json!({"id": "c1"}));
        assert_eq!(event.id.as_deref(), Some("evt-7"));
        assert_eq!(event.event_type.as_deref(), Some("cluster.updated"));
    }

    #[test]
    fn cloud_event_string_data_is_decoded() {
        let raw = br#"{"specversion": "1.0", "id": "e", "data": "{\"id\": \"c2\"}"}"#;
        assert_eq!(parse_event(raw).unwrap().data, json!({"id": "c2"}));
    }

    #[test]
    fn rejects_invalid_payloads() {
        assert!(matches!(parse_event(b"{not json"), Err(EventError::InvalidJson(_))));
        assert!(matches!(parse_event(b"[1, 2]"), Err(EventError::NotAnObject("list"))));
    }
}
