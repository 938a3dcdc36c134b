//! Sink contract and the batching engine behind every plain destination.
//!
//! A [`Sink`] buffers events and delivers them to a destination in batches. The
//! [`BatchingSink`] implements that contract once, generically over a [`Destination`] that only
//! knows how to write one batch:
//!
//! - `send` appends under a short synchronous lock and flushes inline when the buffer reaches a
//!   whole batch.
//! - A periodic task flushes whatever is buffered every `flush_interval`.
//! - Drains are serialized by an async write gate, so at most one destination write is in flight.
//! - A failed flush puts the drained events back at the front of the buffer. Each failure counts
//!   as one attempt; at `max_attempts` the event moves to a bounded dead-letter queue.
//! - Destination errors never escape: they become a failed [`SinkResult`].
//!
//! ```rust,no_run
//! use biztel::{BatchOptions, BatchingSink, ConsoleDestination, Event, EventType, Sink};
//!
//! # async fn demo() {
//! let sink = BatchingSink::new(ConsoleDestination::compact(), BatchOptions::default());
//! sink.start().await;
//! sink.send(Event::new(EventType::OrderPlaced).with("order_id", "o-1")).await;
//! sink.stop().await; // final flush, nothing buffered is dropped
//! # }
//! ```

use crate::error::{SinkError, SinkKind};
use crate::event::Event;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome of one flush or batch write.
///
/// `events_sent` counts what the destination accepted, so events it refused individually or
/// discarded while unavailable are not included.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SinkResult {
    pub success: bool,
    pub sink: SinkKind,
    pub events_sent: usize,
    pub error: Option<String>,
    pub latency_ms: Option<f64>,
}

impl SinkResult {
    pub fn ok(sink: SinkKind, events_sent: usize, latency_ms: Option<f64>) -> Self {
        Self { success: true, sink, events_sent, error: None, latency_ms }
    }

    pub fn failed(sink: SinkKind, error: impl ToString, latency_ms: Option<f64>) -> Self {
        Self { success: false, sink, events_sent: 0, error: Some(error.to_string()), latency_ms }
    }

    /// Successful no-op (nothing was buffered).
    pub fn empty(sink: SinkKind) -> Self {
        Self::ok(sink, 0, None)
    }
}

/// What a destination did with one batch.
///
/// Events in `rejected` were refused individually (for example a message larger than an empty
/// physical batch). They are not retried.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub accepted: usize,
    pub rejected: Vec<(Event, String)>,
}

impl WriteReport {
    /// Every event of the batch was accepted.
    pub fn all(accepted: usize) -> Self {
        Self { accepted, rejected: Vec::new() }
    }

    pub fn reject(&mut self, event: Event, reason: impl Into<String>) {
        self.rejected.push((event, reason.into()));
    }
}

/// Wire-level half of a sink: writes one batch to one destination.
#[async_trait]
pub trait Destination: Send + Sync + 'static {
    fn kind(&self) -> SinkKind;

    /// Whether the destination's client can be constructed in this build. Resolved once at
    /// construction.
    fn available(&self) -> bool {
        true
    }

    /// Write `events` in order. `Err` means the whole batch should be retried.
    async fn write(&self, events: &[Event]) -> Result<WriteReport, SinkError>;

    /// Release client resources. Called once from [`Sink::stop`].
    async fn close(&self) {}
}

/// Buffered, batch-oriented delivery of events.
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Begin the periodic flush cycle. Idempotent.
    async fn start(&self);

    /// Accept an event into the pipeline. `false` means it was not accepted (buffer full).
    async fn send(&self, event: Event) -> bool;

    /// Write exactly `events` now, bypassing the buffer.
    async fn send_batch(&self, events: Vec<Event>) -> Result<SinkResult, SinkError>;

    /// Drain the buffer and write everything drained.
    async fn flush(&self) -> Result<SinkResult, SinkError>;

    /// Cancel the periodic cycle and flush one last time.
    async fn stop(&self);

    /// Events currently buffered.
    fn buffered(&self) -> usize;
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Buffer length that triggers an inline flush.
    pub batch_size: usize,
    /// Period of the background flush.
    pub flush_interval: Duration,
    /// Hard cap on buffered events; `send` refuses beyond it.
    pub max_buffered: usize,
    /// Failed flushes an event survives before it is dead-lettered.
    pub max_attempts: u32,
    /// Dead letters retained before the oldest are evicted.
    pub dead_letter_capacity: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_buffered: 10_000,
            max_attempts: 5,
            dead_letter_capacity: 1_000,
        }
    }
}

impl BatchOptions {
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self { batch_size, flush_interval, ..Self::default() }
    }

    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.max_buffered = self.max_buffered.max(self.batch_size);
        self.max_attempts = self.max_attempts.max(1);
        // tokio intervals panic on a zero period
        self.flush_interval = self.flush_interval.max(Duration::from_millis(1));
        self
    }
}

/// An event the engine gave up on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub event: Event,
    pub reason: String,
    /// Failed flushes the event went through; 0 for individually rejected events.
    pub attempts: u32,
}

/// Bounded FIFO of dead letters. The oldest entry is evicted when full.
#[derive(Debug)]
pub struct DeadLetterQueue {
    letters: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl DeadLetterQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            letters: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn push(&self, letter: DeadLetter) {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(letter);
    }

    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetter>> {
        self.letters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time copy of a sink's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub accepted: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub flushes_ok: u64,
    pub flushes_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    dead_lettered: AtomicU64,
    flushes_ok: AtomicU64,
    flushes_failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SinkStats {
        SinkStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            flushes_ok: self.flushes_ok.load(Ordering::Relaxed),
            flushes_failed: self.flushes_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Pending {
    event: Event,
    attempts: u32,
}

struct Inner<D: Destination> {
    destination: D,
    options: BatchOptions,
    buffer: Mutex<VecDeque<Pending>>,
    write_gate: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    started: AtomicBool,
    dead_letters: DeadLetterQueue,
    counters: Counters,
}

/// Generic buffering engine over a [`Destination`].
pub struct BatchingSink<D: Destination> {
    inner: Arc<Inner<D>>,
}

impl<D: Destination> BatchingSink<D> {
    pub fn new(destination: D, options: BatchOptions) -> Self {
        let options = options.normalized();
        let dead_letters = DeadLetterQueue::with_capacity(options.dead_letter_capacity);
        Self {
            inner: Arc::new(Inner {
                destination,
                options,
                buffer: Mutex::new(VecDeque::new()),
                write_gate: tokio::sync::Mutex::new(()),
                task: Mutex::new(None),
                shutdown: Arc::new(Notify::new()),
                started: AtomicBool::new(false),
                dead_letters,
                counters: Counters::default(),
            }),
        }
    }

    pub fn destination(&self) -> &D {
        &self.inner.destination
    }

    pub fn options(&self) -> &BatchOptions {
        &self.inner.options
    }

    pub fn stats(&self) -> SinkStats {
        self.inner.counters.snapshot()
    }

    /// Events given up on, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.snapshot()
    }

    /// Remove and return the dead letters, e.g. to replay them elsewhere.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.drain()
    }

    /// Dead letters dropped because the queue was full.
    pub fn dead_letters_evicted(&self) -> u64 {
        self.inner.dead_letters.evicted()
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Snapshot of the buffered events in delivery order.
    pub fn buffered_events(&self) -> Vec<Event> {
        self.inner.lock_buffer().iter().map(|p| p.event.clone()).collect()
    }
}

impl<D: Destination> Inner<D> {
    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<Pending>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn kind(&self) -> SinkKind {
        self.destination.kind()
    }

    async fn flush(&self) -> SinkResult {
        let _gate = self.write_gate.lock().await;
        let drained: Vec<Pending> = self.lock_buffer().drain(..).collect();
        if drained.is_empty() {
            return SinkResult::empty(self.kind());
        }
        let (events, attempts): (Vec<Event>, Vec<u32>) =
            drained.into_iter().map(|p| (p.event, p.attempts)).unzip();

        let started = Instant::now();
        let outcome = self.destination.write(&events).await;
        let latency_ms = elapsed_ms(started);

        match outcome {
            Ok(report) => {
                let sent = report.accepted;
                self.settle(report);
                Counters::bump(&self.counters.flushes_ok, 1);
                tracing::debug!(sink = %self.kind(), events = sent, latency_ms, "flushed");
                SinkResult::ok(self.kind(), sent, Some(latency_ms))
            }
            Err(err) => {
                Counters::bump(&self.counters.flushes_failed, 1);
                let count = events.len();
                tracing::error!(sink = %self.kind(), events = count, error = %err, "flush failed");
                self.requeue(events, attempts, &err);
                SinkResult::failed(self.kind(), err, Some(latency_ms))
            }
        }
    }

    /// Put a failed batch back at the front of the buffer, dead-lettering events that ran out
    /// of attempts.
    fn requeue(&self, events: Vec<Event>, attempts: Vec<u32>, err: &SinkError) {
        let mut retry = Vec::with_capacity(events.len());
        for (event, attempts) in events.into_iter().zip(attempts) {
            let attempts = attempts + 1;
            if attempts >= self.options.max_attempts {
                self.dead_letter(event, err.to_string(), attempts);
            } else {
                retry.push(Pending { event, attempts });
            }
        }
        let mut buffer = self.lock_buffer();
        for pending in retry.into_iter().rev() {
            buffer.push_front(pending);
        }
    }

    fn settle(&self, report: WriteReport) {
        Counters::bump(&self.counters.delivered, report.accepted);
        for (event, reason) in report.rejected {
            let kind = self.kind();
            tracing::warn!(sink = %kind, event_id = event.id(), error = %reason, "event rejected");
            self.dead_letter(event, reason, 0);
        }
    }

    fn dead_letter(&self, event: Event, reason: String, attempts: u32) {
        Counters::bump(&self.counters.dead_lettered, 1);
        self.dead_letters.push(DeadLetter { event, reason, attempts });
    }
}

impl<D: Destination> Drop for Inner<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }
}

async fn run_periodic<D: Destination>(
    inner: Weak<Inner<D>>,
    period: Duration,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {}
        }
        // Runs outside the select so a shutdown never interrupts a drain in flight.
        let Some(inner) = inner.upgrade() else { break };
        if !inner.lock_buffer().is_empty() {
            inner.flush().await;
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[async_trait]
impl<D: Destination> Sink for BatchingSink<D> {
    fn kind(&self) -> SinkKind {
        self.inner.kind()
    }

    async fn start(&self) {
        let mut task = self.inner.lock_task();
        if task.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let shutdown = Arc::clone(&self.inner.shutdown);
        *task = Some(tokio::spawn(run_periodic(weak, self.inner.options.flush_interval, shutdown)));
        self.inner.started.store(true, Ordering::Release);
        let available = self.inner.destination.available();
        tracing::info!(sink = %self.kind(), available, "sink started");
    }

    async fn send(&self, event: Event) -> bool {
        if !self.is_running() {
            tracing::debug!(sink = %self.kind(), "send before start; buffering");
        }
        let len = {
            let mut buffer = self.inner.lock_buffer();
            if buffer.len() >= self.inner.options.max_buffered {
                drop(buffer);
                Counters::bump(&self.inner.counters.rejected, 1);
                tracing::debug!(sink = %self.kind(), "buffer full; event refused");
                return false;
            }
            buffer.push_back(Pending { event, attempts: 0 });
            buffer.len()
        };
        Counters::bump(&self.inner.counters.accepted, 1);
        // Whole multiples only, so a re-queued backlog is not retried on every send.
        if len % self.inner.options.batch_size == 0 {
            self.inner.flush().await;
        }
        true
    }

    async fn send_batch(&self, events: Vec<Event>) -> Result<SinkResult, SinkError> {
        if events.is_empty() {
            return Ok(SinkResult::empty(self.kind()));
        }
        let _gate = self.inner.write_gate.lock().await;
        let started = Instant::now();
        let outcome = self.inner.destination.write(&events).await;
        let latency_ms = elapsed_ms(started);
        Ok(match outcome {
            Ok(report) => {
                let sent = report.accepted;
                self.inner.settle(report);
                SinkResult::ok(self.kind(), sent, Some(latency_ms))
            }
            Err(err) => {
                let events = events.len();
                tracing::error!(sink = %self.kind(), events, error = %err, "batch write failed");
                SinkResult::failed(self.kind(), err, Some(latency_ms))
            }
        })
    }

    async fn flush(&self) -> Result<SinkResult, SinkError> {
        Ok(self.inner.flush().await)
    }

    async fn stop(&self) {
        let handle = self.inner.lock_task().take();
        if let Some(handle) = handle {
            self.inner.shutdown.notify_one();
            if let Err(err) = handle.await {
                tracing::warn!(sink = %self.kind(), error = %err, "flush task ended abnormally");
            }
        }
        self.inner.started.store(false, Ordering::Release);

        let result = self.inner.flush().await;
        if !result.success {
            tracing::warn!(sink = %self.kind(), remaining = self.buffered(), "final flush failed");
        }
        self.inner.destination.close().await;
        tracing::info!(sink = %self.kind(), "sink stopped");
    }

    fn buffered(&self) -> usize {
        self.inner.lock_buffer().len()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Recording;
    use super::*;
    use crate::EventType;

    fn event(n: u64) -> Event {
        Event::new(EventType::OrderPlaced).with("order_id", format!("o{n}")).with("n", n)
    }

    fn numbers(events: &[Event]) -> Vec<u64> {
        events.iter().map(|e| e.get("n").and_then(|v| v.as_u64()).unwrap()).collect()
    }

    fn sink(dest: &Recording, batch_size: usize) -> BatchingSink<Recording> {
        BatchingSink::new(dest.clone(), BatchOptions::new(batch_size, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn one_flush_per_complete_batch() {
        let dest = Recording::default();
        let sink = sink(&dest, 3);
        for n in 0..7 {
            assert!(sink.send(event(n)).await);
        }
        let writes = dest.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(numbers(&writes[0]), vec![0, 1, 2]);
        assert_eq!(numbers(&writes[1]), vec![3, 4, 5]);
        assert_eq!(sink.buffered(), 1);
        assert_eq!(sink.stats().accepted, 7);
        assert_eq!(sink.stats().delivered, 6);
    }

    #[tokio::test]
    async fn stop_delivers_everything_buffered() {
        let dest = Recording::default();
        let sink = sink(&dest, 100);
        sink.start().await;
        for n in 0..5 {
            sink.send(event(n)).await;
        }
        assert!(dest.writes().is_empty());
        sink.stop().await;
        assert_eq!(dest.delivered(), 5);
        assert_eq!(sink.buffered(), 0);
        assert!(dest.closed.load(Ordering::SeqCst));
        assert!(!sink.is_running());
    }

    #[tokio::test]
    async fn failed_flush_requeues_ahead_of_new_events() {
        let dest = Recording::default();
        let sink = sink(&dest, 100);
        sink.send(event(1)).await;
        sink.send(event(2)).await;
        dest.set_failing(true);

        let result = sink.flush().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.events_sent, 0);
        assert!(result.error.as_deref().unwrap().contains("destination down"));

        sink.send(event(3)).await;
        assert_eq!(numbers(&sink.buffered_events()), vec![1, 2, 3]);

        dest.set_failing(false);
        let result = sink.flush().await.unwrap();
        assert!(result.success);
        assert_eq!(numbers(&dest.writes()[0]), vec![1, 2, 3]);
        assert_eq!(sink.stats().flushes_failed, 1);
        assert_eq!(sink.stats().flushes_ok, 1);
    }

    #[tokio::test]
    async fn events_dead_letter_after_max_attempts() {
        let dest = Recording::default();
        let options = BatchOptions::new(100, Duration::from_secs(60)).with_max_attempts(2);
        let sink = BatchingSink::new(dest.clone(), options);
        dest.set_failing(true);
        sink.send(event(1)).await;

        sink.flush().await.unwrap();
        assert_eq!(sink.buffered(), 1);
        assert!(sink.dead_letters().is_empty());

        sink.flush().await.unwrap();
        assert_eq!(sink.buffered(), 0);
        let letters = sink.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 2);
        assert!(letters[0].reason.contains("destination down"));
        assert_eq!(sink.stats().dead_lettered, 1);
    }

    #[tokio::test]
    async fn rejected_events_are_dead_lettered_immediately() {
        let dest = Recording { poison_field: Some("poison"), ..Recording::default() };
        let sink = sink(&dest, 100);
        sink.send(event(1)).await;
        sink.send(event(2).with("poison", true)).await;
        sink.send(event(3)).await;

        let result = sink.flush().await.unwrap();
        assert!(result.success);
        assert_eq!(numbers(&dest.writes()[0]), vec![1, 3]);
        let letters = sink.take_dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 0);
        assert!(sink.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn full_buffer_refuses_events() {
        let dest = Recording::default();
        let options = BatchOptions::new(10, Duration::from_secs(60)).with_max_buffered(10);
        let sink = BatchingSink::new(dest.clone(), options);
        dest.set_failing(true);
        for n in 0..10 {
            assert!(sink.send(event(n)).await);
        }
        // the tenth send flushed, failed, and re-queued all ten
        assert_eq!(sink.buffered(), 10);
        assert!(!sink.send(event(10)).await);
        assert_eq!(sink.stats().rejected, 1);
    }

    #[tokio::test]
    async fn send_batch_bypasses_the_buffer() {
        let dest = Recording::default();
        let sink = sink(&dest, 100);
        sink.send(event(1)).await;
        let result = sink.send_batch(vec![event(7), event(8)]).await.unwrap();
        assert!(result.success);
        assert_eq!(result.events_sent, 2);
        assert!(result.latency_ms.is_some());
        assert_eq!(numbers(&dest.writes()[0]), vec![7, 8]);
        assert_eq!(sink.buffered(), 1);
    }

    #[tokio::test]
    async fn send_batch_failure_is_a_result_not_an_error() {
        let dest = Recording::default();
        dest.set_failing(true);
        let sink = sink(&dest, 100);
        let result = sink.send_batch(vec![event(1)]).await.unwrap();
        assert!(!result.success);
        assert_eq!(sink.buffered(), 0);
    }

    #[tokio::test]
    async fn empty_flush_is_successful_noop() {
        let dest = Recording::default();
        let sink = sink(&dest, 100);
        let result = sink.flush().await.unwrap();
        assert_eq!(result, SinkResult::empty(SinkKind::File));
        assert!(dest.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_cycle_flushes_on_interval() {
        let dest = Recording::default();
        let sink = BatchingSink::new(dest.clone(), BatchOptions::new(100, Duration::from_secs(5)));
        sink.start().await;
        sink.start().await;
        sink.send(event(1)).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(dest.writes().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(dest.delivered(), 1);

        sink.send(event(2)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(dest.writes().len(), 2);
        sink.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_failures_stay_contained() {
        let dest = Recording::default();
        dest.set_failing(true);
        let sink = BatchingSink::new(dest.clone(), BatchOptions::new(100, Duration::from_secs(1)));
        sink.start().await;
        sink.send(event(1)).await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(sink.stats().flushes_failed, 2);
        assert_eq!(sink.buffered(), 1);

        dest.set_failing(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dest.delivered(), 1);
        sink.stop().await;
    }

    #[test]
    fn options_are_normalized() {
        let options = BatchOptions::new(0, Duration::ZERO)
            .with_max_buffered(0)
            .with_max_attempts(0)
            .normalized();
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.max_buffered, 1);
        assert_eq!(options.max_attempts, 1);
        assert!(options.flush_interval > Duration::ZERO);
    }

    #[test]
    fn dead_letter_queue_evicts_oldest() {
        let queue = DeadLetterQueue::with_capacity(2);
        for n in 0..3 {
            queue.push(DeadLetter { event: event(n), reason: "x".into(), attempts: 1 });
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.evicted(), 1);
        let kept: Vec<Event> = queue.snapshot().into_iter().map(|l| l.event).collect();
        assert_eq!(numbers(&kept), vec![1, 2]);
    }
}
