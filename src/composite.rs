//! Fan-out router over child sinks.
//!
//! The composite owns no buffer. Each operation is forwarded to every child in order, one child
//! at a time, so failures are attributed deterministically.

use crate::error::{SinkError, SinkKind};
use crate::event::Event;
use crate::sink::{Sink, SinkResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

/// What a child failure does to the rest of the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and keep going.
    #[default]
    BestEffort,
    /// Return the first failure as an error; later children are not attempted.
    FailFast,
}

pub struct CompositeSink {
    sinks: Vec<Arc<dyn Sink>>,
    policy: FailurePolicy,
    last_results: Mutex<Vec<SinkResult>>,
}

#[derive(Clone, Copy)]
enum Op<'a> {
    Flush,
    Batch(&'a [Event]),
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, policy: FailurePolicy) -> Self {
        Self { sinks, policy, last_results: Mutex::new(Vec::new()) }
    }

    pub fn best_effort(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self::new(sinks, FailurePolicy::BestEffort)
    }

    pub fn fail_fast(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self::new(sinks, FailurePolicy::FailFast)
    }

    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Per-child results of the most recent `flush` or `send_batch`, in child order.
    pub fn last_results(&self) -> Vec<SinkResult> {
        self.last_results.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, results: Vec<SinkResult>) {
        *self.last_results.lock().unwrap_or_else(PoisonError::into_inner) = results;
    }

    async fn fan_out(&self, op: Op<'_>) -> Result<SinkResult, SinkError> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let outcome = match op {
                Op::Flush => sink.flush().await,
                Op::Batch(events) => sink.send_batch(events.to_vec()).await,
            };
            let result = outcome.unwrap_or_else(|err| SinkResult::failed(sink.kind(), err, None));
            if !result.success {
                let message = result.error.clone().unwrap_or_default();
                tracing::error!(sink = %result.sink, error = %message, "composite child failed");
                if self.policy == FailurePolicy::FailFast {
                    let sink = result.sink;
                    results.push(result);
                    self.record(results);
                    return Err(SinkError::Composite { sink, message });
                }
            }
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        tracing::debug!(succeeded, total = results.len(), "composite fan-out");
        let aggregate = aggregate(&results, self.policy);
        self.record(results);
        Ok(aggregate)
    }
}

/// Under fail-fast a failure has already returned, so every result here succeeded. Best-effort
/// succeeds when at least one child did; `events_sent` is the least any successful child delivered and the
/// failed children are listed in `error`.
fn aggregate(results: &[SinkResult], policy: FailurePolicy) -> SinkResult {
    let failures: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| format!("{}: {}", r.sink, r.error.as_deref().unwrap_or("failed")))
        .collect();
    let latency: Option<f64> = results.iter().filter_map(|r| r.latency_ms).reduce(|a, b| a + b);
    let sent = results.iter().filter(|r| r.success).map(|r| r.events_sent).min();
    match sent {
        Some(sent) if failures.is_empty() || policy == FailurePolicy::BestEffort => {
            let mut result = SinkResult::ok(SinkKind::Composite, sent, latency);
            if !failures.is_empty() {
                result.error = Some(failures.join("; "));
            }
            result
        }
        None if failures.is_empty() => SinkResult::ok(SinkKind::Composite, 0, latency),
        _ => SinkResult::failed(SinkKind::Composite, failures.join("; "), latency),
    }
}

impl std::fmt::Debug for CompositeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<SinkKind> = self.sinks.iter().map(|s| s.kind()).collect();
        f.debug_struct("CompositeSink")
            .field("sinks", &kinds)
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl Sink for CompositeSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Composite
    }

    async fn start(&self) {
        for sink in &self.sinks {
            sink.start().await;
        }
        tracing::info!(sinks = self.sinks.len(), policy = ?self.policy, "composite sink started");
    }

    /// Best-effort accepts when any child did; fail-fast needs every child.
    async fn send(&self, event: Event) -> bool {
        let (mut accepted, mut refused) = (0, 0);
        for sink in &self.sinks {
            if sink.send(event.clone()).await {
                accepted += 1;
            } else {
                refused += 1;
                tracing::warn!(sink = %sink.kind(), "composite child refused event");
                if self.policy == FailurePolicy::FailFast {
                    return false;
                }
            }
        }
        match self.policy {
            FailurePolicy::FailFast => true,
            FailurePolicy::BestEffort => accepted > 0 || refused == 0,
        }
    }

    async fn send_batch(&self, events: Vec<Event>) -> Result<SinkResult, SinkError> {
        self.fan_out(Op::Batch(&events)).await
    }

    async fn flush(&self) -> Result<SinkResult, SinkError> {
        self.fan_out(Op::Flush).await
    }

    async fn stop(&self) {
        for sink in &self.sinks {
            sink.stop().await;
        }
        tracing::info!("composite sink stopped");
    }

    fn buffered(&self) -> usize {
        self.sinks.iter().map(|s| s.buffered()).sum()
    }
}
