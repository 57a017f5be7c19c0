//! Abstract collaborator traits for dependency inversion.
//!
//! The playback core only talks to these; concrete implementations live with
//! the connectors (see [`buffer`](super::buffer) for the bundled ones).

use std::sync::Arc;

use super::frame::{LogFrame, Streams, TimeRange};
use super::stream_settings::StreamSettings;

/// Maps a point in time plus a look-ahead offset to a concrete frame.
///
/// Stateful: the last time and offset are retained across calls, so callers
/// must push both before every `current_frame` read.
pub trait LogSynchronizer: Send + Sync {
    fn set_time(&self, timestamp: f64);

    fn set_look_ahead_time_offset(&self, offset: f64);

    /// Frame for the last pushed time/offset, restricted to `settings` if given.
    fn current_frame(&self, settings: Option<&StreamSettings>) -> Option<Arc<LogFrame>>;
}

/// Source of raw buffered stream data.
pub trait StreamSource: Send + Sync {
    /// Buffered data by stream. Must return the same `Arc` until data changes.
    fn streams(&self) -> Option<Arc<Streams>>;

    /// Time ranges currently held in the buffer.
    fn buffered_time_ranges(&self) -> Vec<TimeRange> {
        Vec::new()
    }
}
