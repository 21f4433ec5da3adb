//! Event envelope
//!
//! The wire shape shared by ingress jobs and egress outcome events:
//! `{eventId, eventType, timestamp, payload}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A versioned event wrapper around a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<T> {
    /// Producer-assigned unique id, used as the correlation id downstream.
    pub event_id: String,

    /// Event type tag (e.g. "ImageProcessed").
    pub event_type: String,

    /// Event creation time, ISO 8601 UTC on the wire.
    pub timestamp: DateTime<Utc>,

    /// The event payload.
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Wrap a payload in a freshly-stamped envelope.
    pub fn new(event_type: impl Into<String>, payload: T) -> Self {
        Self {
            event_id: new_event_id(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Generate an event id of the form `evt_<unix-ms>_<7-char-random>`.
pub fn new_event_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(7).collect();
    format!("evt_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct TestPayload {
        image_id: String,
    }

    #[test]
    fn test_event_id_format() {
        let id = new_event_id();
        let parts: Vec<&str> = id.splitn(3, '_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "evt");
        assert!(parts[1].parse::<i64>().is_ok(), "millis segment: {}", parts[1]);
        assert_eq!(parts[2].len(), 7);
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = EventEnvelope::new(
            "ImageProcessed",
            TestPayload {
                image_id: "i1".to_string(),
            },
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("eventId").is_some());
        assert_eq!(json["eventType"], "ImageProcessed");
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["payload"]["imageId"], "i1");
    }

    #[test]
    fn test_envelope_decodes_ingress_message() {
        let raw = r#"{
            "eventId": "evt_1700000000000_ab12cd3",
            "eventType": "image.uploaded",
            "timestamp": "2026-08-01T12:00:00Z",
            "payload": { "imageId": "i1" }
        }"#;

        let envelope: EventEnvelope<TestPayload> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.event_id, "evt_1700000000000_ab12cd3");
        assert_eq!(envelope.event_type, "image.uploaded");
        assert_eq!(envelope.payload.image_id, "i1");
    }

    #[test]
    fn test_envelope_rejects_invalid_json() {
        let result: Result<EventEnvelope<TestPayload>, _> = serde_json::from_str("not json");
        assert!(result.is_err());
    }
}
