//! Wire Envelope
//!
//! Every WebSocket text frame exchanged between the feeder, the broadcast
//! server and dashboards is one JSON envelope:
//!
//! ```json
//! {"event": "data", "data": {"timestamp": 12.5, "channels": [1.0, 2.0]}}
//! ```
//!
//! Events:
//! - `status` (server → client): `{message}` connection acknowledgment
//! - `client_status` (feeder → server): `{message}` lifecycle note
//! - data event, `data` by default (feeder → server → subscribers): a
//!   [`Record`]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::Record;

/// Server acknowledgment event
pub const STATUS_EVENT: &str = "status";

/// Producer-side lifecycle note
pub const CLIENT_STATUS_EVENT: &str = "client_status";

/// Default name of the record event
pub const DEFAULT_DATA_EVENT: &str = "data";

/// One named event and its JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

/// Payload of `status` and `client_status` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Server acknowledgment
    pub fn status(message: impl Into<String>) -> Self {
        Self::message(STATUS_EVENT, message)
    }

    /// Producer lifecycle note
    pub fn client_status(message: impl Into<String>) -> Self {
        Self::message(CLIENT_STATUS_EVENT, message)
    }

    /// A record under the given data event name
    ///
    /// Non-finite values are encoded as `null`.
    pub fn record(event: &str, record: &Record) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event, serde_json::to_value(record)?))
    }

    fn message(event: &str, message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::String(message.into()));
        Self::new(event, Value::Object(payload))
    }

    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode as a text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Interpret the payload as a record
    pub fn to_record(&self) -> Result<Record, serde_json::Error> {
        Record::deserialize(&self.data)
    }

    /// Interpret the payload as a status message
    pub fn to_status(&self) -> Result<StatusMessage, serde_json::Error> {
        StatusMessage::deserialize(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{normalize, RawSample};
    use ndarray::ArrayD;

    #[test]
    fn test_record_envelope_json() {
        let envelope = Envelope::record("data", &Record::new(12.5, vec![1.0, 2.0, 3.0])).unwrap();
        let json = envelope.encode().unwrap();
        assert!(json.contains("\"event\":\"data\""));
        assert!(json.contains("\"timestamp\":12.5"));
        assert!(json.contains("\"channels\":[1.0,2.0,3.0]"));
    }

    #[test]
    fn test_non_finite_values_survive_relay() {
        let sample = RawSample::wrapped(
            ArrayD::from_shape_vec(vec![4], vec![12.5, 1.0, f64::NAN, 3.0]).unwrap(),
        );
        let record = normalize(&sample).unwrap();

        let text = Envelope::record("data", &record).unwrap().encode().unwrap();
        assert!(text.contains("[1.0,null,3.0]"));

        let relayed = Envelope::decode(&text).unwrap().to_record().unwrap();
        assert_eq!(relayed.timestamp, 12.5);
        assert_eq!(relayed.channels.len(), 3);
        assert_eq!(relayed.channels[0], 1.0);
        assert!(relayed.channels[1].is_nan());
        assert_eq!(relayed.channels[2], 3.0);
    }

    #[test]
    fn test_infinite_timestamp_round_trip() {
        let record = Record::new(f64::INFINITY, vec![f64::NEG_INFINITY]);
        let text = Envelope::record("data", &record).unwrap().encode().unwrap();

        let relayed = Envelope::decode(&text).unwrap().to_record().unwrap();
        assert!(relayed.timestamp.is_nan());
        assert!(relayed.channels[0].is_nan());
    }

    #[test]
    fn test_status_envelope_json() {
        let json = Envelope::status("connected").encode().unwrap();
        assert_eq!(json, r#"{"event":"status","data":{"message":"connected"}}"#);
    }

    #[test]
    fn test_decode_record() {
        let text = r#"{"event": "wind_turbine_buffer", "data": {"timestamp": 1.0, "channels": [2.0]}}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.event, "wind_turbine_buffer");
        assert_eq!(envelope.to_record().unwrap(), Record::new(1.0, vec![2.0]));
    }

    #[test]
    fn test_decode_without_payload() {
        let envelope = Envelope::decode(r#"{"event": "ping"}"#).unwrap();
        assert_eq!(envelope.data, Value::Null);
        assert!(envelope.to_record().is_err());
    }

    #[test]
    fn test_client_status_payload() {
        let envelope = Envelope::client_status("client connected");
        assert_eq!(envelope.event, CLIENT_STATUS_EVENT);
        assert_eq!(envelope.to_status().unwrap().message, "client connected");
    }
}
