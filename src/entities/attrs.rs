//! Playback attribute keys and values.
//!
//! The key set is closed: every piece of playback state the loader keeps has
//! a variant here, so a typo is a compile error rather than a silent miss.
//! Sameness notes:
//! - scalars compare by value (`f64` uses `==`, so NaN is never "same")
//! - shared objects compare by `Arc` identity, never by content

use std::collections::HashMap;
use std::sync::Arc;

use super::metadata::LogMetadata;
use super::stream_settings::StreamSettings;

/// Known attribute keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttrKey {
    /// Current playhead, log seconds
    Timestamp,
    /// Look-ahead offset, seconds
    LookAhead,
    Metadata,
    StreamSettings,
    /// Bumped whenever buffered data or the data collaborators change
    DataVersion,
}

impl AttrKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKey::Timestamp => "timestamp",
            AttrKey::LookAhead => "lookAhead",
            AttrKey::Metadata => "metadata",
            AttrKey::StreamSettings => "streamSettings",
            AttrKey::DataVersion => "dataVersion",
        }
    }
}

impl std::fmt::Display for AttrKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute value.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Float(f64),
    UInt(u64),
    Metadata(Arc<LogMetadata>),
    StreamSettings(Arc<StreamSettings>),
}

impl AttrValue {
    /// Strict sameness used for change detection.
    pub fn same(&self, other: &AttrValue) -> bool {
        use AttrValue::*;
        match (self, other) {
            (Float(a), Float(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Metadata(a), Metadata(b)) => Arc::ptr_eq(a, b),
            (StreamSettings(a), StreamSettings(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Float(_) => "Float",
            AttrValue::UInt(_) => "UInt",
            AttrValue::Metadata(_) => "Metadata",
            AttrValue::StreamSettings(_) => "StreamSettings",
        }
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::UInt(v)
    }
}

impl From<Arc<LogMetadata>> for AttrValue {
    fn from(v: Arc<LogMetadata>) -> Self {
        AttrValue::Metadata(v)
    }
}

impl From<Arc<StreamSettings>> for AttrValue {
    fn from(v: Arc<StreamSettings>) -> Self {
        AttrValue::StreamSettings(v)
    }
}

/// Attribute container: key -> typed value. No versioning here; see
/// [`AttributeStore`](crate::core::store::AttributeStore) for that.
#[derive(Debug, Clone, Default)]
pub struct Attrs {
    map: HashMap<AttrKey, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert `value` unless the stored value is the same.
    /// Returns true if the map changed.
    pub fn set(&mut self, key: AttrKey, value: AttrValue) -> bool {
        if let Some(current) = self.map.get(&key)
            && current.same(&value)
        {
            return false;
        }
        self.map.insert(key, value);
        true
    }

    pub fn get(&self, key: AttrKey) -> Option<&AttrValue> {
        self.map.get(&key)
    }

    pub fn get_float(&self, key: AttrKey) -> Option<f64> {
        match self.map.get(&key) {
            Some(AttrValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_uint(&self, key: AttrKey) -> Option<u64> {
        match self.map.get(&key) {
            Some(AttrValue::UInt(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_metadata(&self) -> Option<Arc<LogMetadata>> {
        match self.map.get(&AttrKey::Metadata) {
            Some(AttrValue::Metadata(m)) => Some(Arc::clone(m)),
            _ => None,
        }
    }

    pub fn get_stream_settings(&self) -> Option<Arc<StreamSettings>> {
        match self.map.get(&AttrKey::StreamSettings) {
            Some(AttrValue::StreamSettings(s)) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub fn contains(&self, key: AttrKey) -> bool {
        self.map.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
