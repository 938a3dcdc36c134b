//! Kafka-protocol client for the `biztel` streaming destination (companion crate).
//!
//! Event Hubs namespaces expose a Kafka listener on port 9093, so a plain Kafka producer can
//! deliver the destination's batches. The producer lives behind the `client` feature
//! (`rdkafka`); without it [`KafkaConnector`] reports itself unavailable and the destination
//! degrades to a no-op.
//!
//! ```rust,no_run
//! use biztel::{BatchOptions, BatchingSink, EventHubDestination, EventHubSettings};
//! use biztel_kafka::KafkaConnector;
//! use std::sync::Arc;
//!
//! let settings = EventHubSettings::from_connection_string(
//!     "Endpoint=sb://shop.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=...",
//!     Some("business-events"),
//! )
//! .unwrap();
//! let destination = EventHubDestination::new(settings, Arc::new(KafkaConnector::new()));
//! let sink = BatchingSink::new(destination, BatchOptions::default());
//! ```

use async_trait::async_trait;
use biztel::{
    Credential, EventHubSettings, SinkError, StreamConnector, StreamProducer, TokenSource,
    Transport,
};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "client")]
mod client;

/// Port of the Kafka listener on an Event Hubs namespace.
pub const KAFKA_PORT: u16 = 9093;
/// SASL user name that tells the broker the password is a connection string.
pub const CONNECTION_STRING_USER: &str = "$ConnectionString";

#[derive(Clone)]
pub struct KafkaConnector {
    token_source: Option<Arc<dyn TokenSource>>,
    message_timeout: Duration,
    overrides: Vec<(String, String)>,
}

impl Default for KafkaConnector {
    fn default() -> Self {
        Self { token_source: None, message_timeout: Duration::from_secs(30), overrides: Vec::new() }
    }
}

impl std::fmt::Debug for KafkaConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.overrides.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("KafkaConnector")
            .field("token_source", &self.token_source.is_some())
            .field("message_timeout", &self.message_timeout)
            .field("overrides", &keys)
            .finish()
    }
}

impl KafkaConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token source for managed-identity credentials (OAUTHBEARER).
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    /// Per-message delivery timeout; a batch fails when any message exceeds it.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Raw producer property, applied after the derived ones.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Producer properties for `settings`. The returned list holds the SASL password, so it
    /// must not be logged.
    pub fn properties(
        &self,
        settings: &EventHubSettings,
    ) -> Result<Vec<(String, String)>, SinkError> {
        if settings.transport == Transport::WebSocket {
            return Err(SinkError::Unavailable(
                "web-socket transport is not supported by the Kafka client".into(),
            ));
        }
        let mut props: Vec<(String, String)> = vec![
            (
                "bootstrap.servers".into(),
                format!("{}:{KAFKA_PORT}", settings.fully_qualified_namespace()),
            ),
            ("security.protocol".into(), "SASL_SSL".into()),
            ("message.timeout.ms".into(), self.message_timeout.as_millis().to_string()),
            ("message.max.bytes".into(), settings.max_batch_bytes.to_string()),
        ];
        match &settings.credential {
            Credential::ConnectionString(conn) => {
                props.push(("sasl.mechanism".into(), "PLAIN".into()));
                props.push(("sasl.username".into(), CONNECTION_STRING_USER.into()));
                props.push(("sasl.password".into(), conn.expose().to_string()));
            }
            Credential::ManagedIdentity { .. } => {
                if self.token_source.is_none() {
                    return Err(SinkError::InvalidConfig(
                        "managed identity requires a token source".into(),
                    ));
                }
                props.push(("sasl.mechanism".into(), "OAUTHBEARER".into()));
            }
        }
        for (key, value) in &self.overrides {
            match props.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => props.push((key.clone(), value.clone())),
            }
        }
        Ok(props)
    }
}

#[async_trait]
impl StreamConnector for KafkaConnector {
    fn available(&self) -> bool {
        cfg!(feature = "client")
    }

    /// Direct transport only, and managed identity needs a token source.
    fn supports(&self, settings: &EventHubSettings) -> bool {
        self.properties(settings).is_ok()
    }

    async fn connect(
        &self,
        settings: &EventHubSettings,
    ) -> Result<Box<dyn StreamProducer>, SinkError> {
        let props = self.properties(settings)?;
        #[cfg(feature = "client")]
        {
            let producer = client::KafkaProducer::create(
                props,
                settings.event_hub_name.clone(),
                settings.max_batch_bytes,
                self.message_timeout,
                self.token_source.clone(),
            )?;
            tracing::info!(
                namespace = %settings.fully_qualified_namespace(),
                hub = %settings.event_hub_name,
                "kafka producer created"
            );
            Ok(Box::new(producer))
        }
        #[cfg(not(feature = "client"))]
        {
            let _ = props;
            Err(SinkError::Unavailable("biztel-kafka built without the `client` feature".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biztel::StaticToken;

    const CONN: &str =
        "Endpoint=sb://shop.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=k1";

    fn value<'a>(props: &'a [(String, String)], key: &str) -> Option<&'a str> {
        props.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn connection_string_uses_sasl_plain() {
        let settings = EventHubSettings::from_connection_string(CONN, Some("events")).unwrap();
        let props = KafkaConnector::new().properties(&settings).unwrap();
        assert_eq!(value(&props, "bootstrap.servers"), Some("shop.servicebus.windows.net:9093"));
        assert_eq!(value(&props, "security.protocol"), Some("SASL_SSL"));
        assert_eq!(value(&props, "sasl.mechanism"), Some("PLAIN"));
        assert_eq!(value(&props, "sasl.username"), Some("$ConnectionString"));
        assert_eq!(value(&props, "sasl.password"), Some(CONN));
    }

    #[test]
    fn managed_identity_needs_a_token_source() {
        let settings = EventHubSettings::managed_identity("shop", "events");
        let err = KafkaConnector::new().properties(&settings).unwrap_err();
        assert!(matches!(err, SinkError::InvalidConfig(_)));

        let connector = KafkaConnector::new().with_token_source(Arc::new(StaticToken::new("t")));
        let props = connector.properties(&settings).unwrap();
        assert_eq!(value(&props, "sasl.mechanism"), Some("OAUTHBEARER"));
        assert!(value(&props, "sasl.password").is_none());
    }

    #[test]
    fn overrides_replace_derived_properties() {
        let settings = EventHubSettings::from_connection_string(CONN, Some("events")).unwrap();
        let props = KafkaConnector::new()
            .with_property("security.protocol", "PLAINTEXT")
            .with_property("linger.ms", "5")
            .properties(&settings)
            .unwrap();
        assert_eq!(value(&props, "security.protocol"), Some("PLAINTEXT"));
        assert_eq!(value(&props, "linger.ms"), Some("5"));
    }

    #[test]
    fn websocket_transport_is_unavailable() {
        let settings = EventHubSettings::from_connection_string(CONN, Some("events"))
            .unwrap()
            .with_transport(Transport::WebSocket);
        let err = KafkaConnector::new().properties(&settings).unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
        assert!(!KafkaConnector::new().supports(&settings));

        let direct = settings.with_transport(Transport::Direct);
        assert!(KafkaConnector::new().supports(&direct));
    }

    #[test]
    fn debug_hides_override_values() {
        let connector = KafkaConnector::new().with_property("sasl.password", "hunter2");
        assert!(!format!("{connector:?}").contains("hunter2"));
    }

    #[cfg(not(feature = "client"))]
    #[tokio::test]
    async fn without_client_feature_connect_is_unavailable() {
        let settings = EventHubSettings::from_connection_string(CONN, Some("events")).unwrap();
        let connector = KafkaConnector::new();
        assert!(!connector.available());
        let err = connector.connect(&settings).await.err().unwrap();
        assert!(matches!(err, SinkError::Unavailable(_)));
    }
}
