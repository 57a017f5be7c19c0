//! Playback time control over the attribute store.
//!
//! `TimeController` owns the store plus the memoized views consumers read
//! every frame. Writes go through a handful of operations (`seek`,
//! `set_look_ahead`, `update_stream_settings`, `set_metadata`); everything
//! else is derived on read and cached until one of its inputs changes.
//!
//! Selector graph:
//! ```text
//! Timestamp ─────> current_time ──┐
//! LookAhead ─────> look_ahead ────┤
//! StreamSettings > stream_settings┼──> current_frame (via synchronizer)
//! DataVersion ───> data_version ──┤
//!                       │         │
//!                       └> raw_streams ──> streams (visible only)
//! Metadata ──────> metadata ─> log_start_time / log_end_time / streams_metadata
//! ```

use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::selector::Selector;
use super::store::AttributeStore;
use crate::config::ConfigProvider;
use crate::entities::stream_settings::{is_stream_enabled, merge_settings, settings_from_descriptors};
use crate::entities::{
    AttrKey, LogFrame, LogMetadata, LogSynchronizer, StreamDescriptor, StreamSettings, StreamSource,
    Streams, TimeRange,
};
use crate::utils::{clamp, finite};

type SharedSync = Option<Arc<dyn LogSynchronizer>>;
type SharedSource = Option<Arc<dyn StreamSource>>;
type StreamCatalogue = Arc<BTreeMap<String, StreamDescriptor>>;

type FrameInputs = (
    Option<Arc<StreamSettings>>,
    Option<f64>,
    f64,
    u64,
    SharedSync,
);

/// Where playback is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No metadata yet
    Uninitialized,
    /// Metadata known, no finite timestamp: frames resolve to `None`
    Ready,
    /// Finite timestamp: frames resolve through the synchronizer
    Active,
}

struct Selectors {
    current_time: Selector<TimeController, Option<f64>, Option<f64>>,
    look_ahead: Selector<TimeController, Option<f64>, f64>,
    metadata: Selector<TimeController, Option<Arc<LogMetadata>>, Option<Arc<LogMetadata>>>,
    stream_settings:
        Selector<TimeController, Option<Arc<StreamSettings>>, Option<Arc<StreamSettings>>>,
    raw_streams: Selector<TimeController, (u64, SharedSource), Option<Arc<Streams>>>,
    streams: Selector<
        TimeController,
        (Option<Arc<Streams>>, Option<Arc<StreamSettings>>),
        Option<Arc<Streams>>,
    >,
    log_start_time: Selector<TimeController, (Option<Arc<LogMetadata>>,), Option<f64>>,
    log_end_time: Selector<TimeController, (Option<Arc<LogMetadata>>,), Option<f64>>,
    streams_metadata: Selector<TimeController, (Option<Arc<LogMetadata>>,), StreamCatalogue>,
    buffered_time_ranges: Selector<TimeController, (u64, SharedSource), Arc<Vec<TimeRange>>>,
    current_frame: Selector<TimeController, FrameInputs, Option<Arc<LogFrame>>>,
}

impl Selectors {
    fn new() -> Self {
        Self {
            current_time: Selector::new(
                "current_time",
                |c: &TimeController| c.store.get_float(AttrKey::Timestamp),
                |_c: &TimeController, t: &Option<f64>| *t,
            ),
            look_ahead: Selector::new(
                "look_ahead",
                |c: &TimeController| c.store.get_float(AttrKey::LookAhead),
                |_c: &TimeController, v: &Option<f64>| v.unwrap_or(0.0),
            ),
            metadata: Selector::new(
                "metadata",
                |c: &TimeController| c.store.get_metadata(),
                |_c: &TimeController, m: &Option<Arc<LogMetadata>>| m.clone(),
            ),
            stream_settings: Selector::new(
                "stream_settings",
                |c: &TimeController| c.store.get_stream_settings(),
                |_c: &TimeController, s: &Option<Arc<StreamSettings>>| s.clone(),
            ),
            raw_streams: Selector::new(
                "raw_streams",
                |c: &TimeController| (c.data_version(), c.stream_source()),
                |_c: &TimeController, (_version, source): &(u64, SharedSource)| {
                    source.as_ref().and_then(|s| s.streams())
                },
            ),
            streams: Selector::new(
                "streams",
                |c: &TimeController| {
                    (
                        c.selectors.raw_streams.evaluate(c),
                        c.selectors.stream_settings.evaluate(c),
                    )
                },
                |_c: &TimeController,
                 (raw, settings): &(Option<Arc<Streams>>, Option<Arc<StreamSettings>>)| {
                    match (raw, settings) {
                        (Some(raw), Some(settings)) => Some(Arc::new(
                            raw.iter()
                                .filter(|(name, _)| is_stream_enabled(settings, name))
                                .map(|(name, samples)| (name.clone(), samples.clone()))
                                .collect::<Streams>(),
                        )),
                        _ => raw.clone(),
                    }
                },
            ),
            log_start_time: Selector::new(
                "log_start_time",
                |c: &TimeController| (c.selectors.metadata.evaluate(c),),
                |c: &TimeController, (metadata,): &(Option<Arc<LogMetadata>>,)| {
                    let window = c.config.time_window();
                    metadata
                        .as_ref()
                        .and_then(|m| m.start_time)
                        .map(|start| start + window)
                },
            ),
            log_end_time: Selector::new(
                "log_end_time",
                |c: &TimeController| (c.selectors.metadata.evaluate(c),),
                |_c: &TimeController, (metadata,): &(Option<Arc<LogMetadata>>,)| {
                    metadata.as_ref().and_then(|m| m.end_time)
                },
            ),
            streams_metadata: Selector::new(
                "streams_metadata",
                |c: &TimeController| (c.selectors.metadata.evaluate(c),),
                |_c: &TimeController, (metadata,): &(Option<Arc<LogMetadata>>,)| {
                    Arc::new(metadata.as_ref().map(|m| m.streams.clone()).unwrap_or_default())
                },
            ),
            buffered_time_ranges: Selector::new(
                "buffered_time_ranges",
                |c: &TimeController| (c.data_version(), c.stream_source()),
                |_c: &TimeController, (_version, source): &(u64, SharedSource)| {
                    Arc::new(
                        source
                            .as_ref()
                            .map(|s| s.buffered_time_ranges())
                            .unwrap_or_default(),
                    )
                },
            ),
            current_frame: Selector::new(
                "current_frame",
                |c: &TimeController| {
                    (
                        c.selectors.stream_settings.evaluate(c),
                        c.selectors.current_time.evaluate(c),
                        c.selectors.look_ahead.evaluate(c),
                        c.data_version(),
                        c.synchronizer(),
                    )
                },
                |_c: &TimeController,
                 (settings, time, look_ahead, _version, sync): &FrameInputs|
                 -> Option<Arc<LogFrame>> {
                    let sync = sync.as_ref()?;
                    let time = finite(*time)?;
                    // Synchronizer is stateful: time first, then offset, then read
                    sync.set_time(time);
                    sync.set_look_ahead_time_offset(*look_ahead);
                    sync.current_frame(settings.as_deref())
                },
            ),
        }
    }
}

/// Seek / look-ahead / visibility control plus derived playback views.
pub struct TimeController {
    store: AttributeStore,
    config: Arc<dyn ConfigProvider>,
    synchronizer: RwLock<SharedSync>,
    source: RwLock<SharedSource>,
    selectors: Selectors,
}

impl std::fmt::Debug for TimeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeController")
            .field("store", &self.store)
            .field("state", &self.state())
            .finish()
    }
}

impl TimeController {
    pub fn new(store: AttributeStore, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            store,
            config,
            synchronizer: RwLock::new(None),
            source: RwLock::new(None),
            selectors: Selectors::new(),
        }
    }

    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    pub fn config(&self) -> &Arc<dyn ConfigProvider> {
        &self.config
    }

    // ========== Collaborators ==========

    pub fn synchronizer(&self) -> SharedSync {
        self.synchronizer.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Install (or remove) the synchronizer. Bumps the data version.
    pub fn set_synchronizer(&self, synchronizer: SharedSync) {
        *self.synchronizer.write().unwrap_or_else(|e| e.into_inner()) = synchronizer;
        self.bump_data_version();
    }

    pub fn stream_source(&self) -> SharedSource {
        self.source.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Install (or remove) the raw stream source. Bumps the data version.
    pub fn set_stream_source(&self, source: SharedSource) {
        *self.source.write().unwrap_or_else(|e| e.into_inner()) = source;
        self.bump_data_version();
    }

    // ========== Operations ==========

    /// Move playback to `timestamp`, clamped into the log bounds when both
    /// are known and finite.
    pub fn seek(&self, timestamp: f64) {
        let bounds = self.metadata().and_then(|_| {
            let start = finite(self.log_start_time())?;
            let end = finite(self.log_end_time())?;
            Some((start, end))
        });

        let target = match bounds {
            Some((start, end)) => clamp(timestamp, start, end),
            None => timestamp,
        };
        if target != timestamp && !timestamp.is_nan() {
            trace!("TimeController: seek {} clamped to {}", timestamp, target);
        }
        self.store.set(AttrKey::Timestamp, target);
    }

    pub fn set_look_ahead(&self, look_ahead: f64) {
        self.store.set(AttrKey::LookAhead, look_ahead);
    }

    /// Shallow-merge `update` into the current settings.
    pub fn update_stream_settings(&self, update: StreamSettings) {
        let current = self.store.get_stream_settings();
        let merged = merge_settings(current.as_deref(), update);
        self.store.set(AttrKey::StreamSettings, Arc::new(merged));
    }

    /// Install log metadata.
    ///
    /// A non-empty stream catalogue replaces the stream settings wholesale.
    /// The timestamp is then re-applied through `seek` so it lands inside the
    /// new bounds: the current one if finite, else the log start.
    pub fn set_metadata(&self, metadata: Arc<LogMetadata>) {
        debug!(
            "TimeController: metadata start={:?} end={:?} streams={}",
            metadata.start_time,
            metadata.end_time,
            metadata.streams.len()
        );
        self.store.set(AttrKey::Metadata, Arc::clone(&metadata));

        if !metadata.streams.is_empty() {
            self.store.set(
                AttrKey::StreamSettings,
                Arc::new(settings_from_descriptors(&metadata.streams)),
            );
        }

        let existing = finite(self.store.get_float(AttrKey::Timestamp));
        if let Some(t) = existing.or(finite(metadata.start_time)) {
            self.seek(t);
        }
    }

    /// Mark buffered data as changed. Returns the new version.
    pub fn bump_data_version(&self) -> u64 {
        let next = self.data_version() + 1;
        self.store.set(AttrKey::DataVersion, next);
        next
    }

    // ========== Derived ==========

    pub fn data_version(&self) -> u64 {
        self.store.get_uint(AttrKey::DataVersion).unwrap_or(0)
    }

    pub fn current_time(&self) -> Option<f64> {
        self.selectors.current_time.evaluate(self)
    }

    /// Look-ahead offset in seconds, 0 when unset
    pub fn look_ahead(&self) -> f64 {
        self.selectors.look_ahead.evaluate(self)
    }

    pub fn metadata(&self) -> Option<Arc<LogMetadata>> {
        self.selectors.metadata.evaluate(self)
    }

    pub fn stream_settings(&self) -> Option<Arc<StreamSettings>> {
        self.selectors.stream_settings.evaluate(self)
    }

    /// Everything the stream source holds, visible or not
    pub fn raw_streams(&self) -> Option<Arc<Streams>> {
        self.selectors.raw_streams.evaluate(self)
    }

    /// Raw streams restricted to enabled settings. Passes raw data through
    /// when either side is missing.
    pub fn streams(&self) -> Option<Arc<Streams>> {
        self.selectors.streams.evaluate(self)
    }

    /// Metadata start shifted by the configured time window
    pub fn log_start_time(&self) -> Option<f64> {
        self.selectors.log_start_time.evaluate(self)
    }

    pub fn log_end_time(&self) -> Option<f64> {
        self.selectors.log_end_time.evaluate(self)
    }

    pub fn streams_metadata(&self) -> StreamCatalogue {
        self.selectors.streams_metadata.evaluate(self)
    }

    pub fn buffered_time_ranges(&self) -> Arc<Vec<TimeRange>> {
        self.selectors.buffered_time_ranges.evaluate(self)
    }

    /// Frame at the current time, `None` without a synchronizer or a finite
    /// timestamp.
    pub fn current_frame(&self) -> Option<Arc<LogFrame>> {
        self.selectors.current_frame.evaluate(self)
    }

    pub fn state(&self) -> PlaybackState {
        if self.metadata().is_none() {
            PlaybackState::Uninitialized
        } else if finite(self.current_time()).is_some() {
            PlaybackState::Active
        } else {
            PlaybackState::Ready
        }
    }

    /// How often the frame selector has actually consulted the synchronizer
    pub fn frame_recomputations(&self) -> u64 {
        self.selectors.current_frame.recomputations()
    }
}
