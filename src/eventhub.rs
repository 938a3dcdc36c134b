//! Streaming destination: batches of messages to an Event Hubs style endpoint.
//!
//! The adapter is written against a small client seam ([`StreamConnector`],
//! [`StreamProducer`], [`MessageBatch`]) so the wire client can live in a companion crate and be
//! swapped for an in-memory double in tests.
//!
//! A logical batch from the engine is cut into physical batches by byte size: each message is
//! offered to the current batch, and when the batch refuses it the batch is sent and the message
//! starts a new one.

use crate::error::{SinkError, SinkKind};
use crate::event::{Event, EVENT_SOURCE, EVENT_TYPE};
use crate::sink::{Destination, WriteReport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default physical batch ceiling (1 MiB, the standard-tier limit).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

const DEFAULT_DOMAIN: &str = "servicebus.windows.net";

/// Parsed namespace connection string.
///
/// Debug output never includes the key; use [`ConnectionString::expose`] to hand the raw string
/// to a client.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    endpoint: String,
    key_name: String,
    key: String,
    entity_path: Option<String>,
}

impl ConnectionString {
    /// Parse `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...[;EntityPath=...]`.
    pub fn parse(raw: &str) -> Result<Self, SinkError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;
        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                SinkError::InvalidConfig("connection string segment without '='".into())
            })?;
            let value = value.trim().to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(value),
                "entitypath" => entity_path = Some(value).filter(|v| !v.is_empty()),
                _ => {}
            }
        }
        let missing =
            |what: &str| SinkError::InvalidConfig(format!("connection string lacks {what}"));
        Ok(Self {
            raw: raw.trim().to_string(),
            endpoint: endpoint.filter(|v| !v.is_empty()).ok_or_else(|| missing("Endpoint"))?,
            key_name: key_name.ok_or_else(|| missing("SharedAccessKeyName"))?,
            key: key.ok_or_else(|| missing("SharedAccessKey"))?,
            entity_path,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `ns.servicebus.windows.net`, without scheme or trailing slash.
    pub fn host(&self) -> &str {
        let host = self.endpoint.split_once("://").map_or(self.endpoint.as_str(), |(_, h)| h);
        host.trim_end_matches('/')
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }

    /// The original string, for clients that authenticate with it directly.
    pub fn expose(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("key_name", &self.key_name)
            .field("key", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Shared-access-key connection string.
    ConnectionString(ConnectionString),
    /// Identity-based access to a namespace. The token comes from the connector's
    /// [`TokenSource`](crate::TokenSource).
    ManagedIdentity { namespace: String },
}

/// Network path to the endpoint, chosen once in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Native protocol port.
    #[default]
    Direct,
    /// Tunnelled over web sockets on 443, for networks that block the native port.
    WebSocket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHubSettings {
    pub credential: Credential,
    pub event_hub_name: String,
    pub transport: Transport,
    pub max_batch_bytes: usize,
}

impl EventHubSettings {
    /// Settings from a connection string. The hub name falls back to the string's `EntityPath`.
    pub fn from_connection_string(
        raw: &str,
        event_hub_name: Option<&str>,
    ) -> Result<Self, SinkError> {
        let conn = ConnectionString::parse(raw)?;
        let name = event_hub_name
            .map(str::to_string)
            .filter(|n| !n.is_empty())
            .or_else(|| conn.entity_path().map(str::to_string))
            .ok_or_else(|| SinkError::InvalidConfig("event hub name required".into()))?;
        Ok(Self::new(Credential::ConnectionString(conn), name))
    }

    pub fn managed_identity(
        namespace: impl Into<String>,
        event_hub_name: impl Into<String>,
    ) -> Self {
        let credential = Credential::ManagedIdentity { namespace: namespace.into() };
        Self::new(credential, event_hub_name.into())
    }

    fn new(credential: Credential, event_hub_name: String) -> Self {
        Self {
            credential,
            event_hub_name,
            transport: Transport::Direct,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_max_batch_bytes(mut self, max_batch_bytes: usize) -> Self {
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    /// Namespace host, e.g. `shop.servicebus.windows.net`. A bare namespace name gets the
    /// public cloud domain appended.
    pub fn fully_qualified_namespace(&self) -> String {
        match &self.credential {
            Credential::ConnectionString(conn) => conn.host().to_string(),
            Credential::ManagedIdentity { namespace } if namespace.contains('.') => {
                namespace.trim_end_matches('/').to_string()
            }
            Credential::ManagedIdentity { namespace } => format!("{namespace}.{DEFAULT_DOMAIN}"),
        }
    }
}

/// One outgoing message: the serialized event plus routing properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub body: Vec<u8>,
    pub properties: BTreeMap<String, String>,
}

impl StreamMessage {
    /// Serialize `event` and copy its type and source into the message properties.
    pub fn from_event(event: &Event) -> Result<Self, SinkError> {
        let mut properties = BTreeMap::new();
        properties.insert(EVENT_TYPE.to_string(), event.event_type().to_string());
        if let Some(source) = event.source() {
            properties.insert(EVENT_SOURCE.to_string(), source.to_string());
        }
        Ok(Self { body: event.to_bytes()?, properties })
    }

    /// Bytes counted against the batch ceiling.
    pub fn size(&self) -> usize {
        self.body.len() + self.properties.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
    }
}

/// A physical batch being filled.
pub trait MessageBatch: Send {
    /// Add a message, or hand it back if it does not fit.
    fn try_add(&mut self, message: StreamMessage) -> Result<(), StreamMessage>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_messages(self: Box<Self>) -> Vec<StreamMessage>;
}

/// Byte-ceiling batch usable by any producer that does not impose its own framing.
#[derive(Debug, Clone)]
pub struct SizedBatch {
    max_bytes: usize,
    used: usize,
    messages: Vec<StreamMessage>,
}

impl SizedBatch {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes, used: 0, messages: Vec::new() }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.used
    }
}

impl MessageBatch for SizedBatch {
    fn try_add(&mut self, message: StreamMessage) -> Result<(), StreamMessage> {
        let size = message.size();
        if self.used + size > self.max_bytes {
            return Err(message);
        }
        self.used += size;
        self.messages.push(message);
        Ok(())
    }

    fn len(&self) -> usize {
        self.messages.len()
    }

    fn into_messages(self: Box<Self>) -> Vec<StreamMessage> {
        self.messages
    }
}

/// A connected client for one hub.
#[async_trait]
pub trait StreamProducer: Send + Sync {
    async fn create_batch(&self) -> Result<Box<dyn MessageBatch>, SinkError>;

    async fn send_batch(&self, batch: Box<dyn MessageBatch>) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError>;
}

/// Builds producers. Returning [`SinkError::Unavailable`] from `connect` disables the
/// destination for the rest of its life.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Whether this build can produce a client at all.
    fn available(&self) -> bool {
        true
    }

    /// Whether `connect` can serve `settings`. The factory refuses to build a destination the
    /// connector would reject on first use.
    fn supports(&self, _settings: &EventHubSettings) -> bool {
        true
    }

    async fn connect(
        &self,
        settings: &EventHubSettings,
    ) -> Result<Box<dyn StreamProducer>, SinkError>;
}

/// Streaming destination with a lazily built, replace-on-failure producer.
pub struct EventHubDestination {
    settings: EventHubSettings,
    connector: Arc<dyn StreamConnector>,
    producer: tokio::sync::Mutex<Option<Box<dyn StreamProducer>>>,
    disabled: AtomicBool,
    unavailable_logged: AtomicBool,
}

impl EventHubDestination {
    pub fn new(settings: EventHubSettings, connector: Arc<dyn StreamConnector>) -> Self {
        let disabled = AtomicBool::new(!connector.available());
        Self {
            settings,
            connector,
            producer: tokio::sync::Mutex::new(None),
            disabled,
            unavailable_logged: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &EventHubSettings {
        &self.settings
    }

    fn log_unavailable(&self, reason: &str) {
        self.disabled.store(true, Ordering::Release);
        if !self.unavailable_logged.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                sink = %SinkKind::EventHub,
                reason,
                "streaming client unavailable; destination disabled and events discarded"
            );
        }
    }

    async fn send_all(
        &self,
        producer: &dyn StreamProducer,
        events: &[Event],
    ) -> Result<WriteReport, SinkError> {
        let mut report = WriteReport::default();
        let mut batch = producer.create_batch().await?;
        for event in events {
            let message = match StreamMessage::from_event(event) {
                Ok(message) => message,
                Err(err) => {
                    report.reject(event.clone(), err.to_string());
                    continue;
                }
            };
            let Err(message) = batch.try_add(message) else { continue };
            if batch.is_empty() {
                report.reject(event.clone(), "event exceeds the maximum message size");
                continue;
            }
            let full = std::mem::replace(&mut batch, producer.create_batch().await?);
            report.accepted += full.len();
            producer.send_batch(full).await?;
            if batch.try_add(message).is_err() {
                report.reject(event.clone(), "event exceeds the maximum message size");
            }
        }
        if !batch.is_empty() {
            report.accepted += batch.len();
            producer.send_batch(batch).await?;
        }
        Ok(report)
    }
}

impl fmt::Debug for EventHubDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHubDestination")
            .field("namespace", &self.settings.fully_qualified_namespace())
            .field("event_hub_name", &self.settings.event_hub_name)
            .field("transport", &self.settings.transport)
            .finish()
    }
}

#[async_trait]
impl Destination for EventHubDestination {
    fn kind(&self) -> SinkKind {
        SinkKind::EventHub
    }

    fn available(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    async fn write(&self, events: &[Event]) -> Result<WriteReport, SinkError> {
        if !self.available() {
            self.log_unavailable("no client connector in this build");
            tracing::debug!(sink = %SinkKind::EventHub, events = events.len(), "skipping batch");
            return Ok(WriteReport::default());
        }

        let mut slot = self.producer.lock().await;
        if slot.is_none() {
            match self.connector.connect(&self.settings).await {
                Ok(producer) => {
                    tracing::info!(
                        sink = %SinkKind::EventHub,
                        namespace = %self.settings.fully_qualified_namespace(),
                        hub = %self.settings.event_hub_name,
                        transport = ?self.settings.transport,
                        "producer connected"
                    );
                    *slot = Some(producer);
                }
                Err(SinkError::Unavailable(reason)) => {
                    self.log_unavailable(&reason);
                    return Ok(WriteReport::default());
                }
                Err(err) => return Err(err),
            }
        }
        let Some(producer) = slot.as_deref() else {
            return Err(SinkError::Connect("producer missing after connect".into()));
        };

        match self.send_all(producer, events).await {
            Ok(report) => {
                tracing::info!(sink = %SinkKind::EventHub, events = report.accepted, "sent events");
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(
                    sink = %SinkKind::EventHub,
                    error = %err,
                    "send failed, resetting producer"
                );
                if let Some(broken) = slot.take() {
                    if let Err(close_err) = broken.close().await {
                        tracing::debug!(error = %close_err, "closing broken producer");
                    }
                }
                Err(err)
            }
        }
    }

    async fn close(&self) {
        if let Some(producer) = self.producer.lock().await.take() {
            if let Err(err) = producer.close().await {
                tracing::debug!(sink = %SinkKind::EventHub, error = %err, "error closing producer");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockConnector;
    use super::*;
    use crate::{EventSource, EventType};
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;

    const CONN: &str = "Endpoint=sb://shop.servicebus.windows.net/;SharedAccessKeyName=send;\
                        SharedAccessKey=abc123=;EntityPath=events";

    fn event(n: usize) -> Event {
        Event::new(EventType::ProductViewed)
            .with("product_id", format!("p{n}"))
            .with_source(&EventSource::CustomerAgent)
    }

    fn destination(connector: &MockConnector, max_batch_bytes: usize) -> EventHubDestination {
        let settings = EventHubSettings::from_connection_string(CONN, None)
            .unwrap()
            .with_max_batch_bytes(max_batch_bytes);
        EventHubDestination::new(settings, Arc::new(connector.clone()))
    }

    #[test]
    fn parses_connection_string() {
        let conn = ConnectionString::parse(CONN).unwrap();
        assert_eq!(conn.endpoint(), "sb://shop.servicebus.windows.net/");
        assert_eq!(conn.host(), "shop.servicebus.windows.net");
        assert_eq!(conn.key_name(), "send");
        assert_eq!(conn.key(), "abc123=");
        assert_eq!(conn.entity_path(), Some("events"));
        assert!(!format!("{conn:?}").contains("abc123"));
    }

    #[test]
    fn connection_string_requires_key() {
        let err = ConnectionString::parse("Endpoint=sb://x/;SharedAccessKeyName=n").unwrap_err();
        assert!(err.to_string().contains("SharedAccessKey"));
        assert!(ConnectionString::parse("garbage").is_err());
    }

    #[test]
    fn hub_name_prefers_explicit_value() {
        let settings = EventHubSettings::from_connection_string(CONN, Some("orders")).unwrap();
        assert_eq!(settings.event_hub_name, "orders");
        let no_path =
            "Endpoint=sb://x.servicebus.windows.net/;SharedAccessKeyName=a;SharedAccessKey=b";
        assert!(EventHubSettings::from_connection_string(no_path, None).is_err());
    }

    #[test]
    fn managed_identity_namespace_is_qualified() {
        let bare = EventHubSettings::managed_identity("shop", "events");
        assert_eq!(bare.fully_qualified_namespace(), "shop.servicebus.windows.net");
        let full = EventHubSettings::managed_identity("shop.servicebus.chinacloudapi.cn", "events");
        assert_eq!(full.fully_qualified_namespace(), "shop.servicebus.chinacloudapi.cn");
    }

    #[test]
    fn messages_carry_routing_properties() {
        let message = StreamMessage::from_event(&event(1)).unwrap();
        let property = |name: &str| message.properties.get(name).map(String::as_str);
        assert_eq!(property("event_type"), Some("product.viewed"));
        assert_eq!(property("event_source"), Some("customer-agent"));
        let body: serde_json::Value = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body["product_id"], "p1");
    }

    #[test]
    fn sized_batch_hands_back_what_does_not_fit() {
        let message = StreamMessage::from_event(&event(1)).unwrap();
        let mut batch = SizedBatch::new(message.size() * 2);
        assert!(batch.try_add(message.clone()).is_ok());
        assert!(batch.try_add(message.clone()).is_ok());
        let back = batch.try_add(message.clone()).unwrap_err();
        assert_eq!(back, message);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn splits_into_physical_batches_in_order() {
        let connector = MockConnector::default();
        let one = StreamMessage::from_event(&event(0)).unwrap().size();
        let dest = destination(&connector, one * 2 + 1);

        let events: Vec<Event> = (0..5).map(event).collect();
        let report = dest.write(&events).await.unwrap();
        assert_eq!(report.accepted, 5);
        assert!(report.rejected.is_empty());

        let sizes: Vec<usize> = connector.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let ids: Vec<String> = connector
            .batches()
            .into_iter()
            .flatten()
            .map(|m| serde_json::from_slice::<serde_json::Value>(&m.body).unwrap())
            .map(|v| v["product_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4"]);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_event_is_rejected_alone() {
        let connector = MockConnector::default();
        let one = StreamMessage::from_event(&event(0)).unwrap().size();
        let dest = destination(&connector, one + 10);

        let huge = event(1).with("blob", "x".repeat(one * 3));
        let report = dest.write(&[event(0), huge, event(2)]).await.unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0.get("product_id"), Some(&serde_json::json!("p1")));
    }

    #[tokio::test]
    async fn send_failure_discards_the_producer() {
        let connector = MockConnector::default();
        let dest = destination(&connector, DEFAULT_MAX_BATCH_BYTES);

        connector.fail_sends.store(true, Ordering::SeqCst);
        assert!(dest.write(&[event(1)]).await.is_err());
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

        connector.fail_sends.store(false, Ordering::SeqCst);
        dest.write(&[event(1)]).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_releases_the_producer() {
        let connector = MockConnector::default();
        let dest = destination(&connector, DEFAULT_MAX_BATCH_BYTES);
        dest.write(&[event(1)]).await.unwrap();
        dest.close().await;
        dest.close().await;
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_client_discards_and_warns_once() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = crate::console::testing::SharedBuffer(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(move || writer.clone()))
            .with_ansi(false)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let connector = MockConnector { unavailable: true, ..MockConnector::default() };
        let dest = destination(&connector, DEFAULT_MAX_BATCH_BYTES);
        assert!(!dest.available());

        for _ in 0..3 {
            let report = dest.write(&[event(1)]).await.unwrap();
            assert_eq!(report.accepted, 0);
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("streaming client unavailable").count(), 1);
        assert!(!logs.contains("abc123"));
    }
}
