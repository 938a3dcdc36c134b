#![allow(dead_code)]

use async_trait::async_trait;
use biztel::{Destination, Event, SinkError, SinkKind, WriteReport};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// In-memory destination that records each write and can be told to fail or stall.
#[derive(Clone)]
pub struct MemoryDestination {
    kind: SinkKind,
    writes: Arc<Mutex<Vec<Vec<Event>>>>,
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl MemoryDestination {
    pub fn new(kind: SinkKind) -> Self {
        Self {
            kind,
            writes: Arc::default(),
            calls: Arc::default(),
            failing: Arc::default(),
            delay: None,
        }
    }

    /// Every write sleeps this long before recording, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<Vec<Event>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.writes().into_iter().flatten().collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn write(&self, events: &[Event]) -> Result<WriteReport, SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Send(format!("{} unreachable", self.kind)));
        }
        self.writes.lock().unwrap().push(events.to_vec());
        Ok(WriteReport::all(events.len()))
    }
}
