//! `rdkafka` producer behind the `client` feature.

use async_trait::async_trait;
use biztel::auth::EVENT_HUBS_SCOPE;
use biztel::{MessageBatch, SinkError, SizedBatch, StreamProducer, TokenSource};
use rdkafka::client::{ClientContext, OAuthToken};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Hands librdkafka OAUTHBEARER tokens from the configured source.
pub(crate) struct TokenContext {
    source: Option<Arc<dyn TokenSource>>,
}

impl ClientContext for TokenContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn Error>> {
        let source = self.source.as_ref().ok_or("no token source configured")?;
        let token = source.token(EVENT_HUBS_SCOPE)?;
        let expires_at =
            token.expires_at.unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::hours(1));
        Ok(OAuthToken {
            token: token.token,
            principal_name: String::new(),
            lifetime_ms: expires_at.timestamp_millis(),
        })
    }
}

pub(crate) struct KafkaProducer {
    producer: FutureProducer<TokenContext>,
    topic: String,
    max_batch_bytes: usize,
    timeout: Duration,
}

impl KafkaProducer {
    pub(crate) fn create(
        props: Vec<(String, String)>,
        topic: String,
        max_batch_bytes: usize,
        timeout: Duration,
        source: Option<Arc<dyn TokenSource>>,
    ) -> Result<Self, SinkError> {
        let mut config = ClientConfig::new();
        for (key, value) in &props {
            config.set(key, value);
        }
        let producer = config
            .create_with_context(TokenContext { source })
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        Ok(Self { producer, topic, max_batch_bytes, timeout })
    }
}

#[async_trait]
impl StreamProducer for KafkaProducer {
    async fn create_batch(&self) -> Result<Box<dyn MessageBatch>, SinkError> {
        Ok(Box::new(SizedBatch::new(self.max_batch_bytes)))
    }

    /// Queue every message, then wait for all delivery reports. Any failure fails the batch.
    async fn send_batch(&self, batch: Box<dyn MessageBatch>) -> Result<(), SinkError> {
        let mut deliveries = Vec::new();
        for message in batch.into_messages() {
            let mut headers = OwnedHeaders::new();
            for (key, value) in &message.properties {
                headers =
                    headers.insert(Header { key: key.as_str(), value: Some(value.as_bytes()) });
            }
            let record =
                FutureRecord::<(), _>::to(&self.topic).payload(&message.body).headers(headers);
            let delivery = self
                .producer
                .send_result(record)
                .map_err(|(e, _)| SinkError::Send(e.to_string()))?;
            deliveries.push(delivery);
        }
        for delivery in deliveries {
            match delivery.await {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => return Err(SinkError::Send(e.to_string())),
                Err(_) => return Err(SinkError::Send("delivery report dropped".into())),
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| SinkError::Send(e.to_string()))?
            .map_err(|e| SinkError::Send(e.to_string()))
    }
}
