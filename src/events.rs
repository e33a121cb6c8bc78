//! Typed events carried as JSON payloads on the bus.
//!
//! Exactly one variant travels per topic; an agent only ever decodes the
//! variant matching its input topic. Field names match the wire format of the
//! upstream producer (`lat_lon`, `vec`, `ts`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::bus::Message;
use crate::error::AgentError;

/// A purchase as produced by the storefront.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub id: String,
    pub customer_id: String,
    pub amount: f64,
    #[serde(rename = "lat_lon", default)]
    pub location: LatLon,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "vec", default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// A scored anomaly finding emitted by the detection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: String,
    pub purchase_id: String,
    pub customer_id: String,
    pub score: f64,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

/// An intent to notify a customer, emitted by the reasoning stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub purchase_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

/// Decode a message payload into a typed event.
///
/// A malformed payload is a handling failure: the message is not
/// committed/acked and becomes eligible for redelivery.
pub fn decode<T: DeserializeOwned>(event: &'static str, msg: &Message) -> Result<T, AgentError> {
    serde_json::from_slice(&msg.payload).map_err(|e| AgentError::Decode {
        event,
        reason: e.to_string(),
    })
}

/// Encode a typed event into a JSON payload.
pub fn encode<T: Serialize>(event: &T) -> Vec<u8> {
    // Events are plain structs; serialization cannot fail.
    serde_json::to_vec(event).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(payload: &str) -> Message {
        Message {
            topic: "purchases".to_string(),
            key: vec!["p1".to_string()],
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn decodes_purchase_wire_format() {
        let msg = message(
            r#"{
                "id": "p1",
                "customer_id": "c1",
                "amount": 99.5,
                "lat_lon": {"lat": 51.5, "lon": -0.1},
                "ts": "2026-01-01T00:00:00Z",
                "vec": [0.1, 0.2]
            }"#,
        );

        let event: PurchaseEvent = decode("purchase", &msg).unwrap();
        assert_eq!(event.id, "p1");
        assert_eq!(event.customer_id, "c1");
        assert_eq!(event.amount, 99.5);
        assert_eq!(event.embedding.len(), 2);
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let msg = message("{not json");
        let err = decode::<PurchaseEvent>("purchase", &msg).unwrap_err();
        assert!(matches!(err, AgentError::Decode { event: "purchase", .. }));
    }

    #[test]
    fn anomaly_round_trips_through_wire_names() {
        let event = AnomalyEvent {
            id: "a1".to_string(),
            purchase_id: "p1".to_string(),
            customer_id: "c1".to_string(),
            score: 0.9,
            status: "open".to_string(),
            timestamp: Utc::now(),
        };

        let bytes = encode(&event);
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("ts").is_some(), "timestamp must serialize as `ts`");

        let msg = Message {
            topic: "anomalies".to_string(),
            key: vec![],
            payload: bytes,
        };
        let decoded: AnomalyEvent = decode("anomaly", &msg).unwrap();
        assert_eq!(decoded.purchase_id, "p1");
        assert_eq!(decoded.score, 0.9);
    }
}
