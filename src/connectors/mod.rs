//! Connectors own the data-source lifecycle of a loader.
//!
//! The playback core never opens anything itself: a connector installs the
//! stream source and synchronizer on the controller, feeds metadata and
//! samples in, and decides when the loader emits its lifecycle events.
//!
//! - [`MemoryConnector`]: whole recording supplied up front
//! - [`StreamConnector`]: messages pushed over a channel by a host transport
//!
//! [`ConnectorKind`] wraps both for loaders that pick the source at runtime.

pub mod memory;
pub mod stream;

use enum_dispatch::enum_dispatch;

use crate::core::loader::LoaderContext;
use crate::entities::TimeRange;

pub use memory::{MemoryConnector, Recording};
pub use stream::{LogMessage, StreamConnector};

/// Connector failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorError {
    AlreadyOpen,
    NotOpen,
    Disconnected,
    Malformed(String),
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::AlreadyOpen => write!(f, "Connector already open"),
            ConnectorError::NotOpen => write!(f, "Connector not open"),
            ConnectorError::Disconnected => write!(f, "Data source disconnected"),
            ConnectorError::Malformed(msg) => write!(f, "Malformed log data: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Data-source lifecycle of a loader.
#[enum_dispatch]
pub trait Connector: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn is_open(&self) -> bool;

    /// Open the source and install collaborators on the controller.
    fn connect(&mut self, ctx: &LoaderContext<'_>) -> Result<(), ConnectorError>;

    /// Release the source and uninstall collaborators. No-op when closed.
    fn close(&mut self, ctx: &LoaderContext<'_>);

    /// Process pending input. Returns the number of messages handled.
    fn poll(&mut self, _ctx: &LoaderContext<'_>) -> usize {
        0
    }

    /// Extent of buffered data
    fn buffer_range(&self, ctx: &LoaderContext<'_>) -> Option<TimeRange>;

    /// Earliest playable time, the log start by default
    fn buffer_start(&self, ctx: &LoaderContext<'_>) -> Option<f64> {
        ctx.controller.log_start_time()
    }

    /// Latest playable time, the log end by default
    fn buffer_end(&self, ctx: &LoaderContext<'_>) -> Option<f64> {
        ctx.controller.log_end_time()
    }
}

/// Runtime choice of connector.
#[enum_dispatch(Connector)]
pub enum ConnectorKind {
    Memory(MemoryConnector),
    Stream(StreamConnector),
}

impl ConnectorKind {
    pub fn is_memory(&self) -> bool {
        matches!(self, ConnectorKind::Memory(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ConnectorKind::Stream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::core::loader::{Loader, LoaderOptions};
    use crate::core::scheduler::ManualScheduler;
    use crate::entities::{LogMetadata, StreamSample};
    use std::sync::Arc;

    fn options() -> LoaderOptions {
        LoaderOptions::new(Arc::new(ManualScheduler::new()))
            .with_config(Arc::new(LoaderConfig::default()))
            .with_look_ahead(0.0)
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ConnectorError::AlreadyOpen.to_string(), "Connector already open");
        assert_eq!(
            ConnectorError::Malformed("eof".into()).to_string(),
            "Malformed log data: eof"
        );
    }

    #[test]
    fn test_kind_dispatch_memory() {
        let recording = Recording {
            metadata: LogMetadata::with_bounds(0.0, 10.0),
            samples: vec![StreamSample::new("a", 1.0, serde_json::json!(1))],
        };
        let kind: ConnectorKind = MemoryConnector::new(recording).into();
        assert!(kind.is_memory());

        let mut loader = Loader::new(kind, options());
        assert_eq!(loader.connector().name(), "memory");
        loader.connect().unwrap();
        assert!(loader.is_open());
        assert_eq!(loader.buffer_range(), Some(TimeRange::new(1.0, 1.0)));
        assert_eq!(loader.poll(), 0);
    }

    #[test]
    fn test_kind_dispatch_stream() {
        let connector = StreamConnector::new();
        let tx = connector.sender().unwrap();
        let kind = ConnectorKind::from(connector);
        assert!(kind.is_stream());

        let mut loader = Loader::new(kind, options());
        loader.connect().unwrap();
        tx.send(LogMessage::Metadata(LogMetadata::with_bounds(0.0, 5.0))).unwrap();
        assert_eq!(loader.poll(), 1);
        assert_eq!(loader.buffer_end(), Some(5.0));
    }
}
