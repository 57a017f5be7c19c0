//! In-memory stream buffer and the synchronizer that reads it.
//!
//! Used by the bundled connectors. Samples are kept per stream in timestamp
//! order; a frame at time `t` is the latest sample of every visible stream at
//! or before `t + look_ahead`.
//!
//! The buffer hands out one shared snapshot of its data and only rebuilds it
//! after an insert, so selectors keyed on `Arc` identity see a change exactly
//! when the data changed.

use log::{trace, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use super::frame::{LogFrame, StreamSample, Streams, TimeRange};
use super::stream_settings::{StreamSettings, is_stream_enabled};
use super::traits::{LogSynchronizer, StreamSource};

#[derive(Debug, Default)]
struct BufferData {
    streams: Streams,
    snapshot: Option<Arc<Streams>>,
    range: Option<TimeRange>,
}

/// Time-ordered per-stream sample buffer.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    data: RwLock<BufferData>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert samples, keeping each stream sorted. Samples with a non-finite
    /// timestamp are dropped. Returns how many were stored.
    pub fn insert<I>(&self, samples: I) -> usize
    where
        I: IntoIterator<Item = StreamSample>,
    {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let mut stored = 0;

        for sample in samples {
            if !sample.timestamp.is_finite() {
                warn!(
                    "StreamBuffer: dropping sample on {} with timestamp {}",
                    sample.stream, sample.timestamp
                );
                continue;
            }
            let point = TimeRange::new(sample.timestamp, sample.timestamp);
            data.range = Some(match data.range {
                Some(r) => r.union(&point),
                None => point,
            });

            let samples = data.streams.entry(sample.stream.clone()).or_default();
            // Equal timestamps keep arrival order
            let idx = samples.partition_point(|s| s.timestamp <= sample.timestamp);
            samples.insert(idx, sample);
            stored += 1;
        }

        if stored > 0 {
            data.snapshot = None;
            trace!("StreamBuffer: stored {} samples", stored);
        }
        stored
    }

    /// Total sample count across streams
    pub fn len(&self) -> usize {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.streams.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extent of buffered samples
    pub fn time_range(&self) -> Option<TimeRange> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).range
    }

    /// Latest sample of `stream` at or before `t`
    pub fn latest_at(&self, stream: &str, t: f64) -> Option<StreamSample> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let samples = data.streams.get(stream)?;
        latest_before(samples, t).cloned()
    }

    pub fn clear(&self) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        *data = BufferData::default();
    }
}

fn latest_before(samples: &[StreamSample], t: f64) -> Option<&StreamSample> {
    let idx = samples.partition_point(|s| s.timestamp <= t);
    idx.checked_sub(1).map(|i| &samples[i])
}

impl StreamSource for StreamBuffer {
    fn streams(&self) -> Option<Arc<Streams>> {
        {
            let data = self.data.read().unwrap_or_else(|e| e.into_inner());
            if data.streams.is_empty() {
                return None;
            }
            if let Some(snapshot) = &data.snapshot {
                return Some(Arc::clone(snapshot));
            }
        }
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        // Another reader may have built it between the locks
        if let Some(snapshot) = &data.snapshot {
            return Some(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(data.streams.clone());
        data.snapshot = Some(Arc::clone(&snapshot));
        Some(snapshot)
    }

    fn buffered_time_ranges(&self) -> Vec<TimeRange> {
        self.time_range().into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct SyncState {
    time: f64,
    look_ahead: f64,
}

/// Synchronizer over a [`StreamBuffer`].
#[derive(Debug)]
pub struct BufferSynchronizer {
    buffer: Arc<StreamBuffer>,
    state: Mutex<SyncState>,
}

impl BufferSynchronizer {
    pub fn new(buffer: Arc<StreamBuffer>) -> Self {
        Self {
            buffer,
            state: Mutex::new(SyncState {
                time: f64::NAN,
                look_ahead: 0.0,
            }),
        }
    }

    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buffer
    }
}

impl LogSynchronizer for BufferSynchronizer {
    fn set_time(&self, timestamp: f64) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).time = timestamp;
    }

    fn set_look_ahead_time_offset(&self, offset: f64) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).look_ahead = offset;
    }

    fn current_frame(&self, settings: Option<&StreamSettings>) -> Option<Arc<LogFrame>> {
        let SyncState { time, look_ahead } = *self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !time.is_finite() {
            return None;
        }
        let cutoff = if look_ahead.is_finite() { time + look_ahead } else { time };

        let data = self.buffer.data.read().unwrap_or_else(|e| e.into_inner());
        if data.streams.is_empty() {
            return None;
        }

        let mut streams = BTreeMap::new();
        for (name, samples) in &data.streams {
            if let Some(settings) = settings
                && !is_stream_enabled(settings, name)
            {
                continue;
            }
            if let Some(sample) = latest_before(samples, cutoff) {
                streams.insert(name.clone(), sample.clone());
            }
        }

        Some(Arc::new(LogFrame {
            timestamp: time,
            look_ahead,
            streams,
        }))
    }
}
