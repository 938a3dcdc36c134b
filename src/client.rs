//! Caller-facing telemetry client.
//!
//! The client owns one [`Sink`], stamps ambient context onto every event, and reports a plain
//! `bool` per emit. Delivery failures never surface as errors here: telemetry must not fail the
//! business operation it is attached to.
//!
//! ```rust
//! use biztel::{
//!     ClientOptions, EventSource, SessionContext, SinkConfig, SinkFactory, TelemetryClient,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = SinkFactory::new().build_or_console(&SinkConfig::console(false));
//! let options = ClientOptions::default().with_source(EventSource::OrderService);
//! let client = TelemetryClient::new(sink, options);
//! client.start().await;
//! client.set_context(SessionContext::default().with_session("s-1"));
//! assert!(client.emit_order_status_checked("o-1", "shipped").await);
//! client.stop().await;
//! # }
//! ```

use crate::catalog::EventSource;
use crate::config::TelemetryConfig;
use crate::error::SinkError;
use crate::event::{Event, EVENT_SOURCE};
use crate::events;
use crate::factory::SinkFactory;
use crate::sink::{Sink, SinkResult};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub enabled: bool,
    pub environment: String,
    pub service_version: String,
    /// Stamped as `event_source` on events that carry none.
    pub default_source: Option<EventSource>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let defaults = TelemetryConfig::default();
        Self {
            enabled: defaults.enabled,
            environment: defaults.environment,
            service_version: defaults.service_version,
            default_source: None,
        }
    }
}

impl ClientOptions {
    pub fn with_source(mut self, source: EventSource) -> Self {
        self.default_source = Some(source);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl From<&TelemetryConfig> for ClientOptions {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            environment: config.environment.clone(),
            service_version: config.service_version.clone(),
            default_source: EventSource::from_service_name(&config.service_name),
        }
    }
}

/// Session correlation. `None` fields leave the current value untouched when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl SessionContext {
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    fn fields(&self) -> [(&'static str, &Option<String>); 3] {
        [
            ("session_id", &self.session_id),
            ("user_id", &self.user_id),
            ("correlation_id", &self.correlation_id),
        ]
    }

    fn merge(&mut self, other: SessionContext) {
        merge(&mut self.session_id, other.session_id);
        merge(&mut self.user_id, other.user_id);
        merge(&mut self.correlation_id, other.correlation_id);
    }
}

/// Customer identity stamped on every event for entity correlation downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerContext {
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    /// Channel the customer came through, e.g. `Web` or `CustomerAgent`.
    pub channel: Option<String>,
}

impl CustomerContext {
    fn fields(&self) -> [(&'static str, &Option<String>); 4] {
        [
            ("customer_id", &self.customer_id),
            ("customer_name", &self.customer_name),
            ("customer_email", &self.customer_email),
            ("channel", &self.channel),
        ]
    }

    fn merge(&mut self, other: CustomerContext) {
        merge(&mut self.customer_id, other.customer_id);
        merge(&mut self.customer_name, other.customer_name);
        merge(&mut self.customer_email, other.customer_email);
        merge(&mut self.channel, other.channel);
    }
}

/// Where the emitting workload runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfrastructureContext {
    /// `{cluster_id}/{namespace}/agents/{agent_name}`
    pub agent_id: Option<String>,
    /// `{agent_id}/sessions/{session_id}`
    pub agent_session_id: Option<String>,
    /// `{cluster_id}/{namespace}/{controller_name}`
    pub workload_id: Option<String>,
    pub cluster_id: Option<String>,
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
    pub deployment_name: Option<String>,
}

impl InfrastructureContext {
    fn fields(&self) -> [(&'static str, &Option<String>); 7] {
        [
            ("agent_id", &self.agent_id),
            ("agent_session_id", &self.agent_session_id),
            ("workload_id", &self.workload_id),
            ("cluster_id", &self.cluster_id),
            ("namespace", &self.namespace),
            ("pod_name", &self.pod_name),
            ("deployment_name", &self.deployment_name),
        ]
    }

    fn merge(&mut self, other: InfrastructureContext) {
        merge(&mut self.agent_id, other.agent_id);
        merge(&mut self.agent_session_id, other.agent_session_id);
        merge(&mut self.workload_id, other.workload_id);
        merge(&mut self.cluster_id, other.cluster_id);
        merge(&mut self.namespace, other.namespace);
        merge(&mut self.pod_name, other.pod_name);
        merge(&mut self.deployment_name, other.deployment_name);
    }
}

fn merge(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

#[derive(Debug, Default)]
struct Context {
    session: SessionContext,
    customer: CustomerContext,
    infrastructure: InfrastructureContext,
}

pub struct TelemetryClient {
    sink: Arc<dyn Sink>,
    options: ClientOptions,
    context: Mutex<Context>,
    started: AtomicBool,
}

impl TelemetryClient {
    pub fn new(sink: Arc<dyn Sink>, options: ClientOptions) -> Self {
        Self {
            sink,
            options,
            context: Mutex::new(Context::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Build the configured sink (falling back to console) and wrap it.
    pub fn from_config(config: &TelemetryConfig, factory: &SinkFactory) -> Self {
        Self::new(factory.build_or_console(&config.sink), ClientOptions::from(config))
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub async fn start(&self) {
        if !self.options.enabled {
            tracing::info!("business telemetry disabled");
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sink.start().await;
        tracing::info!(sink = %self.sink.kind(), "telemetry client started");
    }

    /// Stop the sink, flushing whatever it still buffers.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.sink.stop().await;
        tracing::info!(sink = %self.sink.kind(), "telemetry client stopped");
    }

    pub fn set_context(&self, context: SessionContext) {
        self.lock_context().session.merge(context);
    }

    pub fn clear_context(&self) {
        self.lock_context().session = SessionContext::default();
    }

    pub fn set_customer_context(&self, context: CustomerContext) {
        self.lock_context().customer.merge(context);
    }

    pub fn clear_customer_context(&self) {
        self.lock_context().customer = CustomerContext::default();
    }

    pub fn set_infrastructure_context(&self, context: InfrastructureContext) {
        self.lock_context().infrastructure.merge(context);
    }

    pub fn clear_infrastructure_context(&self) {
        self.lock_context().infrastructure = InfrastructureContext::default();
    }

    /// Enrich and hand the event to the sink. `false` when disabled or when the sink refuses it.
    pub async fn emit(&self, mut event: Event) -> bool {
        if !self.options.enabled {
            return false;
        }
        self.enrich(&mut event);
        self.sink.send(event).await
    }

    /// Enrich and write the events immediately, bypassing the sink's buffer.
    pub async fn emit_batch(&self, mut batch: Vec<Event>) -> bool {
        if !self.options.enabled {
            return false;
        }
        for event in &mut batch {
            self.enrich(event);
        }
        match self.sink.send_batch(batch).await {
            Ok(result) => result.success,
            Err(err) => {
                tracing::error!(sink = %self.sink.kind(), error = %err, "emit_batch failed");
                false
            }
        }
    }

    pub async fn flush(&self) -> Result<SinkResult, SinkError> {
        self.sink.flush().await
    }

    /// Fill context fields the event does not carry. `environment` and `service_version` always
    /// reflect this client.
    pub fn enrich(&self, event: &mut Event) {
        {
            let context = self.lock_context();
            let fields = context
                .session
                .fields()
                .into_iter()
                .chain(context.customer.fields())
                .chain(context.infrastructure.fields());
            for (key, value) in fields {
                if let Some(value) = value {
                    event.set_if_absent(key, value.as_str());
                }
            }
        }
        if let Some(source) = &self.options.default_source {
            event.set_if_absent(EVENT_SOURCE, source.as_str());
        }
        event.set("environment", self.options.environment.as_str());
        event.set("service_version", self.options.service_version.as_str());
    }

    /// Open a session scope: sets the session context and emits `customer.session_started`.
    /// Call [`Session::end`] to emit `customer.session_ended` and clear the context.
    pub async fn session(
        &self,
        session_id: impl Into<String>,
        user_id: Option<String>,
    ) -> Session<'_> {
        let session_id = session_id.into();
        let mut context = SessionContext::default().with_session(session_id.clone());
        context.user_id = user_id.clone();
        self.set_context(context);
        self.emit_session_started(session_id.clone(), user_id).await;
        Session { client: self, session_id, started: Instant::now(), ended: false }
    }

    fn lock_context(&self) -> MutexGuard<'_, Context> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn emit_product_viewed(
        &self,
        product_id: impl Into<String>,
        product_name: impl Into<String>,
    ) -> bool {
        self.emit(events::product_viewed(product_id, product_name)).await
    }

    pub async fn emit_product_searched(
        &self,
        query: impl Into<String>,
        results_count: u64,
        product_ids: Option<Vec<String>>,
    ) -> bool {
        self.emit(events::product_searched(query, results_count, product_ids)).await
    }

    pub async fn emit_products_listed(
        &self,
        product_ids: Vec<String>,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> bool {
        self.emit(events::products_listed(product_ids, page, page_size)).await
    }

    pub async fn emit_order_placed(
        &self,
        order_id: impl Into<String>,
        items: Vec<Value>,
        total: f64,
    ) -> bool {
        self.emit(events::order_placed(order_id, items, total)).await
    }

    pub async fn emit_order_status_checked(
        &self,
        order_id: impl Into<String>,
        status: impl Into<String>,
    ) -> bool {
        self.emit(events::order_status_checked(order_id, status)).await
    }

    pub async fn emit_order_completed(
        &self,
        order_id: impl Into<String>,
        processing_duration_ms: Option<u64>,
    ) -> bool {
        self.emit(events::order_completed(order_id, processing_duration_ms)).await
    }

    pub async fn emit_session_started(
        &self,
        session_id: impl Into<String>,
        user_id: Option<String>,
    ) -> bool {
        self.emit(events::session_started(session_id, user_id)).await
    }

    pub async fn emit_session_ended(
        &self,
        session_id: impl Into<String>,
        duration_ms: Option<u64>,
        interaction_count: Option<u64>,
    ) -> bool {
        self.emit(events::session_ended(session_id, duration_ms, interaction_count)).await
    }

    pub async fn emit_customer_query(&self, query_text: impl Into<String>) -> bool {
        self.emit(events::customer_query(query_text)).await
    }

    pub async fn emit_inventory_updated(
        &self,
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        previous_quantity: i64,
        new_quantity: i64,
    ) -> bool {
        let event =
            events::inventory_updated(product_id, product_name, previous_quantity, new_quantity);
        self.emit(event).await
    }

    pub async fn emit_ai_recommendation(
        &self,
        model_name: impl Into<String>,
        request_type: impl Into<String>,
    ) -> bool {
        self.emit(events::ai_recommendation(model_name, request_type)).await
    }
}

impl fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("sink", &self.sink.kind())
            .field("options", &self.options)
            .field("started", &self.is_started())
            .finish()
    }
}

/// An open session scope, see [`TelemetryClient::session`].
#[must_use = "call `end` to emit customer.session_ended"]
pub struct Session<'a> {
    client: &'a TelemetryClient,
    session_id: String,
    started: Instant,
    ended: bool,
}

impl Session<'_> {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Emit `customer.session_ended` with the elapsed duration and clear the session context.
    pub async fn end(mut self) -> bool {
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let sent =
            self.client.emit_session_ended(self.session_id.clone(), Some(duration_ms), None).await;
        self.client.clear_context();
        self.ended = true;
        sent
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.ended {
            tracing::debug!(session_id = %self.session_id, "session dropped without end");
            self.client.clear_context();
        }
    }
}
