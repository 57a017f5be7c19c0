//! Core playback engine - store, selectors, scheduling, events, loader
//!
//! Independent of any data source; connectors plug in through
//! [`loader::LoaderContext`].

pub mod controller;
pub mod event_bus;
pub mod loader;
pub mod scheduler;
pub mod selector;
pub mod stats;
pub mod store;

// Re-exports for convenience
pub use controller::{PlaybackState, TimeController};
pub use event_bus::{EventBus, EventCallback, EventPayload, LoaderEvent};
pub use loader::{Loader, LoaderContext, LoaderOptions};
pub use scheduler::{ChannelScheduler, ManualScheduler, Scheduler, Task, TickHandle, TimerScheduler};
pub use selector::{Memo, Selector};
pub use stats::Stats;
pub use store::{AttributeStore, Listener, Subscriber};
