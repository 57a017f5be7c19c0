//! Stream samples, buffered stream data and resolved frames.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One timestamped value on a named stream. The payload is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSample {
    pub stream: String,
    pub timestamp: f64,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl StreamSample {
    pub fn new(stream: impl Into<String>, timestamp: f64, value: serde_json::Value) -> Self {
        Self {
            stream: stream.into(),
            timestamp,
            value,
        }
    }
}

/// Raw buffered data by stream name, samples ordered by timestamp.
pub type Streams = BTreeMap<String, Vec<StreamSample>>;

/// Closed time interval in log seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }

    /// Smallest range covering both
    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Frame resolved by a synchronizer for one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFrame {
    pub timestamp: f64,
    pub look_ahead: f64,
    /// Latest sample per visible stream
    pub streams: BTreeMap<String, StreamSample>,
}

impl LogFrame {
    pub fn stream(&self, name: &str) -> Option<&StreamSample> {
        self.streams.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_union() {
        let a = TimeRange::new(1.0, 3.0);
        let b = TimeRange::new(2.0, 5.0);
        let u = a.union(&b);
        assert_eq!(u, TimeRange::new(1.0, 5.0));
        assert!(u.contains(5.0));
        assert!(!u.contains(0.5));
    }

    #[test]
    fn test_sample_value_defaults_to_null() {
        let s: StreamSample = serde_json::from_str(r#"{"stream": "/a", "timestamp": 2.0}"#).unwrap();
        assert_eq!(s.value, serde_json::Value::Null);
    }
}
