//! Per-stream visibility settings.
//!
//! Settings start out as the metadata's stream descriptors (every described
//! stream visible) and are then toggled by the UI with plain booleans.
//! Numeric flags (`{"a": 1}`) are accepted too: non-zero means visible.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::metadata::StreamDescriptor;

/// Visibility/config value for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamSetting {
    Visible(bool),
    Flag(f64),
    Descriptor(StreamDescriptor),
}

impl StreamSetting {
    /// Descriptors count as enabled; booleans speak for themselves.
    pub fn is_enabled(&self) -> bool {
        match self {
            StreamSetting::Visible(v) => *v,
            StreamSetting::Flag(v) => *v != 0.0 && !v.is_nan(),
            StreamSetting::Descriptor(_) => true,
        }
    }
}

impl From<bool> for StreamSetting {
    fn from(v: bool) -> Self {
        StreamSetting::Visible(v)
    }
}

impl From<StreamDescriptor> for StreamSetting {
    fn from(d: StreamDescriptor) -> Self {
        StreamSetting::Descriptor(d)
    }
}

/// Stream name -> setting.
pub type StreamSettings = BTreeMap<String, StreamSetting>;

/// Settings seeded from a metadata stream catalogue.
pub fn settings_from_descriptors(streams: &BTreeMap<String, StreamDescriptor>) -> StreamSettings {
    streams
        .iter()
        .map(|(name, d)| (name.clone(), StreamSetting::Descriptor(d.clone())))
        .collect()
}

/// Shallow merge: keys in `update` overwrite, all other keys in `base` survive.
pub fn merge_settings(base: Option<&StreamSettings>, update: StreamSettings) -> StreamSettings {
    let mut merged = base.cloned().unwrap_or_default();
    merged.extend(update);
    merged
}

/// Whether `name` is enabled in `settings` (absent entries are hidden)
pub fn is_stream_enabled(settings: &StreamSettings, name: &str) -> bool {
    settings.get(name).is_some_and(StreamSetting::is_enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_existing_keys() {
        let mut base = StreamSettings::new();
        base.insert("a".into(), true.into());
        base.insert("b".into(), true.into());

        let mut update = StreamSettings::new();
        update.insert("b".into(), false.into());
        update.insert("c".into(), true.into());

        let merged = merge_settings(Some(&base), update);
        assert_eq!(merged.len(), 3);
        assert!(is_stream_enabled(&merged, "a"));
        assert!(!is_stream_enabled(&merged, "b"));
        assert!(is_stream_enabled(&merged, "c"));
        assert!(!is_stream_enabled(&merged, "missing"));
    }

    #[test]
    fn test_descriptor_settings_are_enabled() {
        let mut streams = BTreeMap::new();
        streams.insert("/lidar".to_string(), StreamDescriptor::with_category("primitive"));
        let settings = settings_from_descriptors(&streams);
        assert!(is_stream_enabled(&settings, "/lidar"));
    }

    #[test]
    fn test_untagged_serde() {
        let settings: StreamSettings =
            serde_json::from_str(r#"{"a": true, "b": false, "c": {"category": "pose"}}"#).unwrap();
        assert_eq!(settings["a"], StreamSetting::Visible(true));
        assert!(!settings["b"].is_enabled());
        assert!(settings["c"].is_enabled());
    }

    #[test]
    fn test_numeric_flags() {
        let settings: StreamSettings =
            serde_json::from_str(r#"{"a": 1, "b": 0, "c": 0.5}"#).unwrap();
        assert_eq!(settings["a"], StreamSetting::Flag(1.0));
        assert!(is_stream_enabled(&settings, "a"));
        assert!(!is_stream_enabled(&settings, "b"));
        assert!(is_stream_enabled(&settings, "c"));
        assert!(!StreamSetting::Flag(f64::NAN).is_enabled());
    }
}
