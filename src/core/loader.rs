//! Loader facade: event bus + time controller + connector.
//!
//! A `Loader` is what hosts hold on to. It forwards the playback operations
//! to its [`TimeController`], the lifecycle events to its [`EventBus`], and
//! the data-source lifecycle to its [`Connector`]. Both the bus and the store
//! report into one shared [`Stats`] registry.
//!
//! Dropping a loader closes the connector, cancels any pending flush and
//! drops every listener and callback.

use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use super::controller::{PlaybackState, TimeController};
use super::event_bus::{EventBus, EventCallback, EventPayload, LoaderEvent};
use super::scheduler::Scheduler;
use super::stats::Stats;
use super::store::{AttributeStore, Listener};
use crate::config::{ConfigProvider, GlobalConfig};
use crate::connectors::{Connector, ConnectorError, ConnectorKind};
use crate::entities::{
    AttrKey, AttrValue, LogFrame, LogMetadata, StreamDescriptor, StreamSettings, Streams, TimeRange,
};

/// What a connector gets to touch while it runs.
pub struct LoaderContext<'a> {
    pub bus: &'a EventBus,
    pub controller: &'a TimeController,
}

/// Construction parameters for [`Loader`].
pub struct LoaderOptions {
    pub scheduler: Arc<dyn Scheduler>,
    pub config: Arc<dyn ConfigProvider>,
    /// Look-ahead override; `None` takes the config's default.
    /// Written at creation when non-zero.
    pub look_ahead: Option<f64>,
}

impl LoaderOptions {
    /// Options reading the process-wide config.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            config: Arc::new(GlobalConfig),
            look_ahead: None,
        }
    }

    pub fn with_config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = config;
        self
    }

    pub fn with_look_ahead(mut self, look_ahead: f64) -> Self {
        self.look_ahead = Some(look_ahead);
        self
    }
}

/// Playback data loader.
pub struct Loader<C: Connector = ConnectorKind> {
    id: Uuid,
    bus: EventBus,
    controller: TimeController,
    connector: C,
}

impl<C: Connector> std::fmt::Debug for Loader<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("id", &self.id)
            .field("connector", &self.connector.name())
            .field("open", &self.connector.is_open())
            .field("controller", &self.controller)
            .finish()
    }
}

impl<C: Connector> Loader<C> {
    pub fn new(connector: C, options: LoaderOptions) -> Self {
        let stats = Arc::new(Stats::new());
        let bus = EventBus::with_stats(Arc::clone(&stats));
        let store = AttributeStore::with_stats(options.scheduler, stats);
        let look_ahead = options
            .look_ahead
            .unwrap_or_else(|| options.config.default_look_ahead());
        let controller = TimeController::new(store, options.config);
        if look_ahead != 0.0 {
            controller.set_look_ahead(look_ahead);
        }

        let id = Uuid::new_v4();
        debug!("Loader {}: created with {} connector", id, connector.name());
        Self {
            id,
            bus,
            controller,
            connector,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn controller(&self) -> &TimeController {
        &self.controller
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    /// Diagnostic counters shared by bus and store
    pub fn stats(&self) -> &Arc<Stats> {
        self.bus.stats()
    }

    fn parts(&mut self) -> (LoaderContext<'_>, &mut C) {
        (
            LoaderContext {
                bus: &self.bus,
                controller: &self.controller,
            },
            &mut self.connector,
        )
    }

    fn context(&self) -> LoaderContext<'_> {
        LoaderContext {
            bus: &self.bus,
            controller: &self.controller,
        }
    }

    // ========== Events ==========

    pub fn on(&self, event: LoaderEvent, callback: EventCallback) -> &Self {
        self.bus.on(event, callback);
        self
    }

    pub fn off(&self, event: LoaderEvent, callback: &EventCallback) -> &Self {
        self.bus.off(event, callback);
        self
    }

    /// Returns the number of callbacks that panicked
    pub fn emit(&self, event: LoaderEvent, payload: EventPayload) -> usize {
        self.bus.emit(event, payload)
    }

    // ========== Store ==========

    pub fn subscribe(&self, listener: Listener) {
        self.controller.store().subscribe(listener);
    }

    pub fn unsubscribe(&self, listener: &Listener) {
        self.controller.store().unsubscribe(listener);
    }

    pub fn get(&self, key: AttrKey) -> Option<AttrValue> {
        self.controller.store().get(key)
    }

    /// Raw attribute write, bypassing clamping
    pub fn set(&self, key: AttrKey, value: impl Into<AttrValue>) -> bool {
        self.controller.store().set(key, value)
    }

    pub fn generation(&self) -> u64 {
        self.controller.store().generation()
    }

    // ========== Playback ==========

    pub fn seek(&self, timestamp: f64) {
        self.controller.seek(timestamp);
    }

    pub fn set_look_ahead(&self, look_ahead: f64) {
        self.controller.set_look_ahead(look_ahead);
    }

    pub fn update_stream_settings(&self, update: StreamSettings) {
        self.controller.update_stream_settings(update);
    }

    pub fn set_metadata(&self, metadata: Arc<LogMetadata>) {
        self.controller.set_metadata(metadata);
    }

    pub fn current_time(&self) -> Option<f64> {
        self.controller.current_time()
    }

    pub fn look_ahead(&self) -> f64 {
        self.controller.look_ahead()
    }

    pub fn metadata(&self) -> Option<Arc<LogMetadata>> {
        self.controller.metadata()
    }

    pub fn stream_settings(&self) -> Option<Arc<StreamSettings>> {
        self.controller.stream_settings()
    }

    pub fn raw_streams(&self) -> Option<Arc<Streams>> {
        self.controller.raw_streams()
    }

    pub fn streams(&self) -> Option<Arc<Streams>> {
        self.controller.streams()
    }

    pub fn streams_metadata(&self) -> Arc<std::collections::BTreeMap<String, StreamDescriptor>> {
        self.controller.streams_metadata()
    }

    pub fn log_start_time(&self) -> Option<f64> {
        self.controller.log_start_time()
    }

    pub fn log_end_time(&self) -> Option<f64> {
        self.controller.log_end_time()
    }

    pub fn buffered_time_ranges(&self) -> Arc<Vec<TimeRange>> {
        self.controller.buffered_time_ranges()
    }

    pub fn current_frame(&self) -> Option<Arc<LogFrame>> {
        self.controller.current_frame()
    }

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    // ========== Connector ==========

    pub fn is_open(&self) -> bool {
        self.connector.is_open()
    }

    pub fn connect(&mut self) -> Result<(), ConnectorError> {
        let (ctx, connector) = self.parts();
        connector.connect(&ctx)?;
        info!("Loader {}: {} connector open", self.id, self.connector.name());
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.connector.is_open() {
            return;
        }
        let (ctx, connector) = self.parts();
        connector.close(&ctx);
        info!("Loader {}: {} connector closed", self.id, self.connector.name());
    }

    /// Let the connector process whatever arrived. Returns the message count.
    pub fn poll(&mut self) -> usize {
        let (ctx, connector) = self.parts();
        connector.poll(&ctx)
    }

    pub fn buffer_start(&self) -> Option<f64> {
        self.connector.buffer_start(&self.context())
    }

    pub fn buffer_end(&self) -> Option<f64> {
        self.connector.buffer_end(&self.context())
    }

    pub fn buffer_range(&self) -> Option<TimeRange> {
        self.connector.buffer_range(&self.context())
    }

    /// Close the connector, cancel the pending flush, drop all callbacks.
    pub fn teardown(&mut self) {
        self.close();
        self.controller.store().teardown();
        self.bus.clear();
        debug!("Loader {}: torn down", self.id);
    }
}

impl<C: Connector> Drop for Loader<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}
