//! Deferred single-shot task scheduling.
//!
//! The attribute store arms at most one flush per tick through a
//! [`Scheduler`]. Which "tick" that is depends on the host:
//! - [`ManualScheduler`]: the caller drains pending tasks explicitly (tests)
//! - [`ChannelScheduler`]: a host event loop drains a channel each frame
//! - [`TimerScheduler`]: a ticker thread fires tasks on frame boundaries
//!
//! Contract: `schedule_once()` must never run the task inline; it always
//! runs on a later turn. Cancelled tasks are dropped without running.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, trace};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Boxed deferred task
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle for a scheduled task, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

impl TickHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Host scheduling primitive.
pub trait Scheduler: Send + Sync {
    /// Run `task` once on a later tick.
    fn schedule_once(&self, task: Task) -> TickHandle;

    /// Drop a pending task. No-op if it already ran.
    fn cancel(&self, handle: TickHandle);
}

/// Monotonic handle source shared by the implementations below
#[derive(Debug, Default)]
struct HandleGen(AtomicU64);

impl HandleGen {
    fn next(&self) -> TickHandle {
        TickHandle(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ========== Manual ==========

/// Scheduler drained by explicit `run_pending()` calls.
///
/// Each `run_pending()` is one tick: it runs the tasks queued before the call.
/// Tasks scheduled while it runs wait for the next call.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<(TickHandle, Task)>>,
    handles: HandleGen,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one tick. Returns the number of tasks executed.
    pub fn run_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()));
        let count = batch.len();
        for (handle, task) in batch {
            trace!("ManualScheduler: running task {}", handle.id());
            task();
        }
        count
    }

    /// Tasks waiting for the next tick
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, task: Task) -> TickHandle {
        let handle = self.handles.next();
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((handle, task));
        handle
    }

    fn cancel(&self, handle: TickHandle) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(h, _)| *h != handle);
    }
}

// ========== Channel ==========

/// Scheduler feeding a channel that the host loop drains with `poll()`.
///
/// Same idea as the host calling `poll()` once per UI frame: everything
/// queued before the call runs, anything queued during it waits.
pub struct ChannelScheduler {
    tx: Sender<(TickHandle, Task)>,
    rx: Receiver<(TickHandle, Task)>,
    cancelled: Mutex<HashSet<TickHandle>>,
    handles: HandleGen,
}

impl Default for ChannelScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelScheduler {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            cancelled: Mutex::new(HashSet::new()),
            handles: HandleGen::default(),
        }
    }

    /// Run everything queued so far. Returns the number of tasks executed.
    pub fn poll(&self) -> usize {
        let batch: Vec<(TickHandle, Task)> = self.rx.try_iter().collect();
        let mut ran = 0;
        for (handle, task) in batch {
            if self
                .cancelled
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&handle)
            {
                continue;
            }
            task();
            ran += 1;
        }
        ran
    }

    pub fn is_idle(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Scheduler for ChannelScheduler {
    fn schedule_once(&self, task: Task) -> TickHandle {
        let handle = self.handles.next();
        // Receiver lives in self, so the send cannot fail
        let _ = self.tx.send((handle, task));
        handle
    }

    fn cancel(&self, handle: TickHandle) {
        self.cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle);
    }
}

// ========== Timer ==========

/// Scheduler backed by a ticker thread.
///
/// Tasks run on the ticker thread at the next frame boundary (`interval`
/// after the previous tick), which is the non-UI stand-in for an animation
/// frame callback. The thread exits when the scheduler is dropped.
pub struct TimerScheduler {
    tx: Option<Sender<(TickHandle, Task)>>,
    cancelled: Arc<Mutex<HashSet<TickHandle>>>,
    handle: Option<thread::JoinHandle<()>>,
    handles: HandleGen,
    interval: Duration,
}

impl TimerScheduler {
    pub fn new(interval: Duration) -> Self {
        let (tx, rx) = unbounded::<(TickHandle, Task)>();
        let cancelled = Arc::new(Mutex::new(HashSet::new()));
        let thread_cancelled = Arc::clone(&cancelled);

        let handle = thread::Builder::new()
            .name("logplay-ticker".to_string())
            .spawn(move || Self::run(rx, thread_cancelled, interval))
            .ok();

        if handle.is_none() {
            log::error!("TimerScheduler: failed to spawn ticker thread");
        }

        Self {
            tx: Some(tx),
            cancelled,
            handle,
            handles: HandleGen::default(),
            interval,
        }
    }

    pub fn from_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms.max(1)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn run(
        rx: Receiver<(TickHandle, Task)>,
        cancelled: Arc<Mutex<HashSet<TickHandle>>>,
        interval: Duration,
    ) {
        debug!("TimerScheduler: ticker started ({:?})", interval);
        let mut next_tick = Instant::now() + interval;
        loop {
            // Wait for work; once something arrives, hold it until the frame boundary
            let first = match rx.recv() {
                Ok(item) => item,
                Err(_) => break,
            };
            let now = Instant::now();
            if next_tick < now {
                next_tick = now + interval;
            }
            let mut batch = vec![first];
            loop {
                let wait = next_tick.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(item) => batch.push(item),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("TimerScheduler: ticker stopped");
                        return;
                    }
                }
            }
            next_tick += interval;

            for (handle, task) in batch {
                let skip = cancelled
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&handle);
                if !skip {
                    task();
                }
            }
        }
        debug!("TimerScheduler: ticker stopped");
    }
}

impl Scheduler for TimerScheduler {
    fn schedule_once(&self, task: Task) -> TickHandle {
        let handle = self.handles.next();
        if let Some(tx) = &self.tx {
            let _ = tx.send((handle, task));
        }
        handle
    }

    fn cancel(&self, handle: TickHandle) {
        self.cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle);
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        // Closing the channel stops the ticker; pending tasks are discarded
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            // Last owner released from inside a task: the ticker exits on its own
            if handle.thread().id() == thread::current().id() {
                debug!("TimerScheduler: dropped on ticker thread, detaching");
                return;
            }
            let _ = handle.join();
        }
    }
}
