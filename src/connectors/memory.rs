//! Connector over a recording held in memory.
//!
//! Everything is known at connect time, so one `connect()` runs the full
//! lifecycle: `ready` with the metadata, `update` once the samples are
//! buffered, then `finish`.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::{Connector, ConnectorError};
use crate::core::event_bus::{EventPayload, LoaderEvent};
use crate::core::loader::LoaderContext;
use crate::entities::{
    BufferSynchronizer, LogMetadata, LogSynchronizer, StreamBuffer, StreamSample, StreamSource,
    TimeRange,
};

/// Metadata plus samples, as stored in a recording file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recording {
    pub metadata: LogMetadata,
    pub samples: Vec<StreamSample>,
}

impl Recording {
    pub fn from_json(text: &str) -> Result<Self, ConnectorError> {
        serde_json::from_str(text).map_err(|e| ConnectorError::Malformed(e.to_string()))
    }

    /// Load a JSON recording from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording: {}", path.display()))?;
        let recording = Self::from_json(&text)
            .with_context(|| format!("Failed to parse recording: {}", path.display()))?;
        debug!(
            "Recording {}: {} samples, {} streams",
            path.display(),
            recording.samples.len(),
            recording.metadata.streams.len()
        );
        Ok(recording)
    }
}

/// Connector replaying a [`Recording`].
#[derive(Debug)]
pub struct MemoryConnector {
    recording: Recording,
    buffer: Option<Arc<StreamBuffer>>,
}

impl MemoryConnector {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            buffer: None,
        }
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    /// Swap in a new recording on an open connector and replay it.
    pub fn reload(&mut self, ctx: &LoaderContext<'_>, recording: Recording) -> Result<(), ConnectorError> {
        if !self.is_open() {
            return Err(ConnectorError::NotOpen);
        }
        self.close(ctx);
        self.recording = recording;
        self.connect(ctx)
    }
}

impl Connector for MemoryConnector {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    fn connect(&mut self, ctx: &LoaderContext<'_>) -> Result<(), ConnectorError> {
        if self.is_open() {
            return Err(ConnectorError::AlreadyOpen);
        }

        let buffer = Arc::new(StreamBuffer::new());
        let stored = buffer.insert(self.recording.samples.iter().cloned());
        self.buffer = Some(Arc::clone(&buffer));

        // Bounds missing from the metadata fall back to the sample extent
        let mut metadata = self.recording.metadata.clone();
        if let Some(range) = buffer.time_range() {
            metadata.start_time = metadata.start_time.or(Some(range.start));
            metadata.end_time = metadata.end_time.or(Some(range.end));
        }
        let metadata = Arc::new(metadata);

        let source: Arc<dyn StreamSource> = buffer.clone();
        let sync: Arc<dyn LogSynchronizer> = Arc::new(BufferSynchronizer::new(buffer));
        ctx.controller.set_stream_source(Some(source));
        ctx.controller.set_synchronizer(Some(sync));
        ctx.controller.set_metadata(Arc::clone(&metadata));
        info!("MemoryConnector: buffered {} samples", stored);

        ctx.bus.emit(LoaderEvent::Ready, EventPayload::Metadata(metadata));
        let version = ctx.controller.data_version();
        ctx.bus.emit(LoaderEvent::Update, EventPayload::DataVersion(version));
        ctx.bus.emit(LoaderEvent::Finish, EventPayload::None);
        Ok(())
    }

    fn close(&mut self, ctx: &LoaderContext<'_>) {
        if self.buffer.take().is_none() {
            return;
        }
        ctx.controller.set_synchronizer(None);
        ctx.controller.set_stream_source(None);
        debug!("MemoryConnector: closed");
    }

    fn buffer_range(&self, _ctx: &LoaderContext<'_>) -> Option<TimeRange> {
        self.buffer.as_ref().and_then(|b| b.time_range())
    }
}
