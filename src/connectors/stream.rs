//! Connector fed by a live message channel.
//!
//! The host owns the transport (socket, pipe, reader thread) and pushes
//! decoded [`LogMessage`]s into the connector's channel. Nothing happens
//! until the host calls `poll()`, which drains the channel on the caller's
//! thread:
//!
//! - `Metadata` installs metadata and emits `ready`
//! - `Data` batches are buffered; one `update` per poll if anything landed
//! - `Error` is forwarded as an `error` event
//! - `End` emits `finish` after the rest of the batch is applied
//!
//! A channel whose senders are all gone emits one `error` (disconnected).

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Connector, ConnectorError};
use crate::core::event_bus::{EventPayload, LoaderEvent};
use crate::core::loader::LoaderContext;
use crate::entities::{
    BufferSynchronizer, LogMetadata, LogSynchronizer, StreamBuffer, StreamSample, StreamSource,
    TimeRange,
};

/// One unit of input from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LogMessage {
    Metadata(LogMetadata),
    Data(Vec<StreamSample>),
    Error(String),
    End,
}

impl LogMessage {
    /// Decode one JSON line, e.g. `{"type": "data", "data": [...]}`
    pub fn from_json(line: &str) -> Result<Self, ConnectorError> {
        serde_json::from_str(line).map_err(|e| ConnectorError::Malformed(e.to_string()))
    }
}

/// Connector draining a channel of [`LogMessage`]s.
#[derive(Debug)]
pub struct StreamConnector {
    tx: Option<Sender<LogMessage>>,
    rx: Receiver<LogMessage>,
    buffer: Option<Arc<StreamBuffer>>,
    finished: bool,
}

impl Default for StreamConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamConnector {
    /// Connector with its own channel; hand `sender()` to the transport.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx: Some(tx),
            rx,
            buffer: None,
            finished: false,
        }
    }

    /// Connector over an existing receiver. Dropping every sender
    /// disconnects it.
    pub fn with_receiver(rx: Receiver<LogMessage>) -> Self {
        Self {
            tx: None,
            rx,
            buffer: None,
            finished: false,
        }
    }

    /// Sender for the transport side. `None` for connectors built with
    /// [`StreamConnector::with_receiver`].
    pub fn sender(&self) -> Option<Sender<LogMessage>> {
        self.tx.clone()
    }

    /// Whether `End` (or a disconnect) has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, ctx: &LoaderContext<'_>) {
        if !self.finished {
            self.finished = true;
            ctx.bus.emit(LoaderEvent::Finish, EventPayload::None);
        }
    }
}

impl Connector for StreamConnector {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    fn connect(&mut self, ctx: &LoaderContext<'_>) -> Result<(), ConnectorError> {
        if self.is_open() {
            return Err(ConnectorError::AlreadyOpen);
        }
        let buffer = Arc::new(StreamBuffer::new());
        let source: Arc<dyn StreamSource> = buffer.clone();
        let sync: Arc<dyn LogSynchronizer> = Arc::new(BufferSynchronizer::new(Arc::clone(&buffer)));
        ctx.controller.set_stream_source(Some(source));
        ctx.controller.set_synchronizer(Some(sync));
        self.buffer = Some(buffer);
        self.finished = false;
        info!("StreamConnector: listening");
        Ok(())
    }

    fn close(&mut self, ctx: &LoaderContext<'_>) {
        if self.buffer.take().is_none() {
            return;
        }
        ctx.controller.set_synchronizer(None);
        ctx.controller.set_stream_source(None);
        debug!("StreamConnector: closed");
    }

    fn poll(&mut self, ctx: &LoaderContext<'_>) -> usize {
        let Some(buffer) = self.buffer.clone() else {
            return 0;
        };

        let mut handled = 0;
        let mut stored = 0;
        let mut ended = false;
        loop {
            let message = match self.rx.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.finished && !ended {
                        warn!("StreamConnector: transport disconnected");
                        let err = ConnectorError::Disconnected;
                        ctx.bus.emit(LoaderEvent::Error, EventPayload::Message(err.to_string()));
                        ended = true;
                    }
                    break;
                }
            };
            handled += 1;

            match message {
                LogMessage::Metadata(metadata) => {
                    let metadata = Arc::new(metadata);
                    ctx.controller.set_metadata(Arc::clone(&metadata));
                    ctx.bus.emit(LoaderEvent::Ready, EventPayload::Metadata(metadata));
                }
                LogMessage::Data(samples) => {
                    stored += buffer.insert(samples);
                }
                LogMessage::Error(msg) => {
                    warn!("StreamConnector: source error: {}", msg);
                    ctx.bus.emit(LoaderEvent::Error, EventPayload::Message(msg));
                }
                LogMessage::End => ended = true,
            }
        }

        if stored > 0 {
            let version = ctx.controller.bump_data_version();
            trace!("StreamConnector: {} samples, data version {}", stored, version);
            ctx.bus.emit(LoaderEvent::Update, EventPayload::DataVersion(version));
        }
        if ended {
            self.finish(ctx);
        }
        handled
    }

    fn buffer_range(&self, _ctx: &LoaderContext<'_>) -> Option<TimeRange> {
        self.buffer.as_ref().and_then(|b| b.time_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::core::controller::TimeController;
    use crate::core::event_bus::EventBus;
    use crate::core::scheduler::ManualScheduler;
    use crate::core::store::AttributeStore;
    use std::sync::Mutex;

    struct Harness {
        bus: EventBus,
        controller: TimeController,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new() -> Self {
            let store = AttributeStore::new(Arc::new(ManualScheduler::new()));
            let config = LoaderConfig {
                time_window: 0.0,
                ..LoaderConfig::default()
            };
            let bus = EventBus::new();
            let events = Arc::new(Mutex::new(Vec::new()));
            for event in LoaderEvent::ALL {
                let e = Arc::clone(&events);
                bus.on(
                    event,
                    Arc::new(move |event: LoaderEvent, payload: &EventPayload| {
                        let tag = match payload {
                            EventPayload::Message(m) => format!("{}:{}", event, m),
                            _ => event.to_string(),
                        };
                        e.lock().unwrap().push(tag);
                    }),
                );
            }
            Self {
                bus,
                controller: TimeController::new(store, Arc::new(config)),
                events,
            }
        }

        fn ctx(&self) -> LoaderContext<'_> {
            LoaderContext {
                bus: &self.bus,
                controller: &self.controller,
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    fn data(stream: &str, t: f64) -> LogMessage {
        LogMessage::Data(vec![StreamSample::new(stream, t, serde_json::json!(t))])
    }

    #[test]
    fn test_poll_before_connect_is_noop() {
        let h = Harness::new();
        let mut conn = StreamConnector::new();
        conn.sender().unwrap().send(LogMessage::End).unwrap();
        assert_eq!(conn.poll(&h.ctx()), 0);
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_message_flow() {
        let h = Harness::new();
        let mut conn = StreamConnector::new();
        let tx = conn.sender().unwrap();
        conn.connect(&h.ctx()).unwrap();

        tx.send(LogMessage::Metadata(LogMetadata::with_bounds(0.0, 10.0))).unwrap();
        tx.send(data("a", 1.0)).unwrap();
        tx.send(data("a", 3.0)).unwrap();
        assert_eq!(conn.poll(&h.ctx()), 3);
        // Two data batches, one update
        assert_eq!(h.events(), vec!["ready", "update"]);

        h.controller.seek(2.0);
        let frame = h.controller.current_frame().unwrap();
        assert_eq!(frame.stream("a").unwrap().timestamp, 1.0);

        tx.send(data("a", 2.0)).unwrap();
        tx.send(LogMessage::End).unwrap();
        assert_eq!(conn.poll(&h.ctx()), 2);
        assert_eq!(h.events(), vec!["ready", "update", "update", "finish"]);
        assert!(conn.is_finished());

        // New data version: frame recomputed against the grown buffer
        let frame = h.controller.current_frame().unwrap();
        assert_eq!(frame.stream("a").unwrap().timestamp, 2.0);
        assert_eq!(conn.buffer_range(&h.ctx()), Some(TimeRange::new(1.0, 3.0)));
    }

    #[test]
    fn test_source_error_forwarded() {
        let h = Harness::new();
        let mut conn = StreamConnector::new();
        conn.connect(&h.ctx()).unwrap();
        conn.sender().unwrap().send(LogMessage::Error("bad frame".into())).unwrap();
        conn.poll(&h.ctx());
        assert_eq!(h.events(), vec!["error:bad frame"]);
    }

    #[test]
    fn test_disconnect_reported_once() {
        let h = Harness::new();
        let (tx, rx) = unbounded();
        let mut conn = StreamConnector::with_receiver(rx);
        conn.connect(&h.ctx()).unwrap();

        tx.send(data("a", 1.0)).unwrap();
        drop(tx);
        assert_eq!(conn.poll(&h.ctx()), 1);
        assert_eq!(conn.poll(&h.ctx()), 0);

        let expected = format!("error:{}", ConnectorError::Disconnected);
        assert_eq!(h.events(), vec![expected, "update".to_string(), "finish".to_string()]);
    }

    #[test]
    fn test_connect_twice_fails() {
        let h = Harness::new();
        let mut conn = StreamConnector::new();
        conn.connect(&h.ctx()).unwrap();
        assert_eq!(conn.connect(&h.ctx()), Err(ConnectorError::AlreadyOpen));
        conn.close(&h.ctx());
        assert!(conn.connect(&h.ctx()).is_ok());
    }

    #[test]
    fn test_json_messages() {
        let msg = LogMessage::from_json(
            r#"{"type": "data", "data": [{"stream": "a", "timestamp": 1.5, "value": true}]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            LogMessage::Data(vec![StreamSample::new("a", 1.5, serde_json::json!(true))])
        );
        assert_eq!(LogMessage::from_json(r#"{"type": "end"}"#).unwrap(), LogMessage::End);
        assert!(matches!(
            LogMessage::from_json(r#"{"type": "bogus"}"#),
            Err(ConnectorError::Malformed(_))
        ));
    }
}
