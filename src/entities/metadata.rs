//! Log metadata as consumed by the playback core.
//!
//! Only the fields the core reads are modelled strictly; descriptor details
//! the core never inspects ride along in `extra`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-stream description published in the log metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamDescriptor {
    pub category: Option<String>,
    pub unit: Option<String>,
    /// Anything else the producer attached to the stream
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StreamDescriptor {
    pub fn with_category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }
}

/// Log metadata: time bounds plus the stream catalogue.
///
/// Bounds are optional because a connector may publish partial metadata
/// before the full log extent is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogMetadata {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub streams: BTreeMap<String, StreamDescriptor>,
}

impl LogMetadata {
    /// Metadata with bounds and no streams
    pub fn with_bounds(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time: Some(start_time),
            end_time: Some(end_time),
            streams: BTreeMap::new(),
        }
    }

    /// Builder-style stream registration
    pub fn with_stream(mut self, name: impl Into<String>, descriptor: StreamDescriptor) -> Self {
        self.streams.insert(name.into(), descriptor);
        self
    }

    /// Duration of the log in seconds, if both bounds are known
    pub fn duration(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
