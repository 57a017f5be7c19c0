//! logplay - reactive playback state for telemetry log replay
//!
//! Re-exports all modules for use by binary targets.

// Core engine (store, selectors, scheduler, events, loader)
pub mod core;

pub mod cli;
pub mod config;
pub mod connectors;
pub mod entities;
pub mod utils;

// Re-export commonly used types from core
pub use core::event_bus::{EventBus, EventPayload, LoaderEvent};
pub use core::loader::{Loader, LoaderOptions};
pub use core::controller::{PlaybackState, TimeController};
pub use core::scheduler::{ChannelScheduler, ManualScheduler, Scheduler, TimerScheduler};

// Re-export entities
pub use entities::{AttrKey, AttrValue, LogFrame, LogMetadata, StreamSettings};
pub use connectors::{Connector, ConnectorError, ConnectorKind};
