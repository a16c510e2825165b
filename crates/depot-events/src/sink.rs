use std::sync::{mpsc, Mutex};

use crate::SyncEvent;

/// Receives every event a pipeline run emits.
///
/// Stages get their sink injected at construction time; depot never
/// installs a process-wide default.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Discards everything. Stands in wherever nobody listens.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SyncEvent) {}
}

/// Hands events to a consumer outside the runtime, such as a progress
/// display, over a std mpsc channel.
///
/// Emitting after the receiver is gone is a no-op: a sync must not fail
/// because its observer went away.
pub struct ChannelSink {
    tx: mpsc::Sender<SyncEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

/// Buffers every event in emission order, for assertions in tests.
#[derive(Default)]
pub struct CollectorSink {
    buffer: Mutex<Vec<SyncEvent>>,
}

impl CollectorSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.buffer.lock().unwrap().clone()
    }

    /// How many buffered events satisfy `pred`.
    pub fn count_where(&self, pred: impl Fn(&SyncEvent) -> bool) -> usize {
        self.buffer
            .lock()
            .unwrap()
            .iter()
            .filter(|event| pred(event))
            .count()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: SyncEvent) {
        self.buffer.lock().unwrap().push(event);
    }
}
