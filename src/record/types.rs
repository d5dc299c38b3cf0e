//! Record type definitions
//!
//! The canonical unit of transport between producer, server and dashboards.

use serde::{Deserialize, Deserializer, Serialize};

/// Maximum number of channels carried by a record
pub const MAX_CHANNELS: usize = 43;

/// Device sentinel: readings at or above this timestamp are stale
pub const STALE_TIMESTAMP_THRESHOLD: f64 = 40_000.0;

/// One normalized telemetry reading
///
/// Channels are identified by position only. A record never carries more
/// than [`MAX_CHANNELS`] channels; longer inputs are truncated on
/// construction and on deserialization.
///
/// JSON has no NaN or infinity, so non-finite values are written as `null`
/// and read back as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Device timestamp (first element of the raw sample)
    #[serde(deserialize_with = "deserialize_value")]
    pub timestamp: f64,
    /// Channel values in device order
    #[serde(default, deserialize_with = "deserialize_channels")]
    pub channels: Vec<f64>,
}

impl Record {
    /// Create a record, keeping at most the first [`MAX_CHANNELS`] channels
    pub fn new(timestamp: f64, mut channels: Vec<f64>) -> Self {
        channels.truncate(MAX_CHANNELS);
        Self {
            timestamp,
            channels,
        }
    }

    /// Whether the device flagged this reading as stale
    pub fn is_stale(&self) -> bool {
        self.timestamp >= STALE_TIMESTAMP_THRESHOLD
    }

    /// The first `n` channels, for log previews
    pub fn preview(&self, n: usize) -> &[f64] {
        &self.channels[..self.channels.len().min(n)]
    }
}

fn deserialize_channels<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let channels = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(channels
        .into_iter()
        .take(MAX_CHANNELS)
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

fn deserialize_value<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_truncates_channels() {
        let record = Record::new(1.0, (0..60).map(|i| i as f64).collect());
        assert_eq!(record.channels.len(), MAX_CHANNELS);
        assert_eq!(record.channels[0], 0.0);
        assert_eq!(record.channels[42], 42.0);
    }

    #[test]
    fn test_stale_threshold() {
        assert!(!Record::new(39_999.9, vec![]).is_stale());
        assert!(Record::new(40_000.0, vec![]).is_stale());
        assert!(Record::new(45_000.0, vec![1.0]).is_stale());
    }

    #[test]
    fn test_json_shape() {
        let record = Record::new(12.5, vec![1.0, 2.0]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"timestamp":12.5,"channels":[1.0,2.0]}"#);
    }

    #[test]
    fn test_deserialize_truncates() {
        let channels: Vec<String> = (0..50).map(|i| format!("{}.0", i)).collect();
        let json = format!(r#"{{"timestamp": 3.0, "channels": [{}]}}"#, channels.join(","));
        let record: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(record.channels.len(), MAX_CHANNELS);
    }

    #[test]
    fn test_null_values_read_as_nan() {
        let json = r#"{"timestamp": null, "channels": [1.0, null, 3.0]}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert!(record.timestamp.is_nan());
        assert_eq!(record.channels[0], 1.0);
        assert!(record.channels[1].is_nan());
        assert_eq!(record.channels[2], 3.0);
    }

    #[test]
    fn test_missing_channels_default_empty() {
        let record: Record = serde_json::from_str(r#"{"timestamp": 7.0}"#).unwrap();
        assert_eq!(record, Record::new(7.0, vec![]));
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        assert!(serde_json::from_str::<Record>(r#"{"channels": [1.0]}"#).is_err());
    }

    #[test]
    fn test_preview() {
        let record = Record::new(0.0, vec![1.0, 2.0, 3.0]);
        assert_eq!(record.preview(5), &[1.0, 2.0, 3.0]);
        assert_eq!(record.preview(2), &[1.0, 2.0]);
    }
}
