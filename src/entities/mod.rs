//! Entities module - data types shared by the playback core and connectors
//!
//! - `attrs`: closed attribute key set and typed values
//! - `metadata`, `frame`, `stream_settings`: log data model
//! - `traits`: collaborator interfaces (synchronizer, stream source)
//! - `buffer`: in-memory implementations of those interfaces

pub mod attrs;
pub mod buffer;
pub mod frame;
pub mod metadata;
pub mod stream_settings;
pub mod traits;

pub use attrs::{AttrKey, AttrValue, Attrs};
pub use buffer::{BufferSynchronizer, StreamBuffer};
pub use frame::{LogFrame, StreamSample, Streams, TimeRange};
pub use metadata::{LogMetadata, StreamDescriptor};
pub use stream_settings::{StreamSetting, StreamSettings};
pub use traits::{LogSynchronizer, StreamSource};
