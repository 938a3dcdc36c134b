//! Partitioned lakehouse destination.
//!
//! Each flush is grouped by event type and every group becomes one file under
//! `{base}/{event_type}/year=YYYY/month=MM/day=DD/`. The storage client sits behind
//! [`StoreConnector`]/[`StoreClient`] so the REST client can live in a companion crate.

use crate::clock::{Clock, SystemClock};
use crate::encoding::{encode_jsonl, Encoder, OutputFormat};
use crate::error::{SinkError, SinkKind};
use crate::event::Event;
use crate::partition::{batch_file_name, group_by_type, partition_path};
use crate::sink::{Destination, WriteReport};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_ACCOUNT: &str = "onelake";
pub const DEFAULT_BASE_PATH: &str = "Files/business_telemetry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneLakeSettings {
    pub account_name: String,
    pub workspace_id: Option<String>,
    pub lakehouse_id: Option<String>,
    pub base_path: String,
    pub output_format: OutputFormat,
}

impl Default for OneLakeSettings {
    fn default() -> Self {
        Self {
            account_name: DEFAULT_ACCOUNT.to_string(),
            workspace_id: None,
            lakehouse_id: None,
            base_path: DEFAULT_BASE_PATH.to_string(),
            output_format: OutputFormat::Jsonl,
        }
    }
}

impl OneLakeSettings {
    pub fn new(workspace_id: impl Into<String>, lakehouse_id: impl Into<String>) -> Self {
        Self {
            workspace_id: Some(workspace_id.into()),
            lakehouse_id: Some(lakehouse_id.into()),
            ..Self::default()
        }
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// File system name: `{workspace}/{lakehouse}`, or `default` without a workspace.
    pub fn container(&self) -> String {
        match (&self.workspace_id, &self.lakehouse_id) {
            (Some(ws), Some(lh)) => format!("{ws}/{lh}"),
            (Some(ws), None) => ws.clone(),
            _ => "default".to_string(),
        }
    }

    pub fn account_url(&self) -> String {
        format!("https://{}.dfs.fabric.microsoft.com", self.account_name)
    }
}

/// Connected storage client.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Create `path` (and parents) in `container`. May fail if it already exists.
    async fn create_directory(&self, container: &str, path: &str) -> Result<(), SinkError>;

    /// Create or overwrite the file at `path` with `data`.
    async fn upload(&self, container: &str, path: &str, data: Vec<u8>) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    fn available(&self) -> bool {
        true
    }

    async fn connect(&self, settings: &OneLakeSettings) -> Result<Box<dyn StoreClient>, SinkError>;
}

pub struct OneLakeDestination {
    settings: OneLakeSettings,
    connector: Arc<dyn StoreConnector>,
    client: tokio::sync::Mutex<Option<Box<dyn StoreClient>>>,
    encoder: Encoder,
    clock: Arc<dyn Clock>,
    disabled: AtomicBool,
    unavailable_logged: AtomicBool,
}

impl OneLakeDestination {
    pub fn new(settings: OneLakeSettings, connector: Arc<dyn StoreConnector>) -> Self {
        Self::with_clock(settings, connector, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: OneLakeSettings,
        connector: Arc<dyn StoreConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let encoder = Encoder::new(settings.output_format);
        let disabled = AtomicBool::new(!connector.available());
        Self {
            settings,
            connector,
            client: tokio::sync::Mutex::new(None),
            encoder,
            clock,
            disabled,
            unavailable_logged: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &OneLakeSettings {
        &self.settings
    }

    /// Format actually written after build-time fallback.
    pub fn output_format(&self) -> OutputFormat {
        self.encoder.format()
    }

    fn log_unavailable(&self, reason: &str) {
        self.disabled.store(true, Ordering::Release);
        if !self.unavailable_logged.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                sink = %SinkKind::OneLake,
                reason,
                "storage client unavailable; destination disabled and events discarded"
            );
        }
    }

    fn encode(&self, group: &[&Event]) -> Result<(Vec<u8>, &'static str), SinkError> {
        match self.encoder.encode(group) {
            Ok(data) => Ok((data, self.encoder.format().extension())),
            Err(err) => {
                tracing::warn!(
                    sink = %SinkKind::OneLake,
                    error = %err,
                    "encoding failed, writing jsonl"
                );
                Ok((encode_jsonl(group)?, OutputFormat::Jsonl.extension()))
            }
        }
    }

    async fn upload_groups(
        &self,
        client: &dyn StoreClient,
        events: &[Event],
    ) -> Result<(), SinkError> {
        let container = self.settings.container();
        let now = self.clock.now();
        for (event_type, group) in group_by_type(events) {
            let dir = partition_path(&self.settings.base_path, &event_type, now);
            if let Err(err) = client.create_directory(&container, &dir).await {
                tracing::debug!(path = %dir, error = %err, "create directory (may already exist)");
            }
            let (data, extension) = self.encode(&group)?;
            let path = format!("{dir}/{}", batch_file_name(now, extension));
            client.upload(&container, &path, data).await?;
            let count = group.len();
            tracing::info!(sink = %SinkKind::OneLake, events = count, path = %path, "wrote events");
        }
        Ok(())
    }
}

impl fmt::Debug for OneLakeDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneLakeDestination")
            .field("settings", &self.settings)
            .field("output_format", &self.encoder.format())
            .finish()
    }
}

#[async_trait]
impl Destination for OneLakeDestination {
    fn kind(&self) -> SinkKind {
        SinkKind::OneLake
    }

    fn available(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    async fn write(&self, events: &[Event]) -> Result<WriteReport, SinkError> {
        if !self.available() {
            self.log_unavailable("no storage connector in this build");
            tracing::debug!(sink = %SinkKind::OneLake, events = events.len(), "skipping batch");
            return Ok(WriteReport::default());
        }

        let mut slot = self.client.lock().await;
        if slot.is_none() {
            match self.connector.connect(&self.settings).await {
                Ok(client) => {
                    tracing::info!(
                        sink = %SinkKind::OneLake,
                        url = %self.settings.account_url(),
                        "storage client connected"
                    );
                    *slot = Some(client);
                }
                Err(SinkError::Unavailable(reason)) => {
                    self.log_unavailable(&reason);
                    return Ok(WriteReport::default());
                }
                Err(err) => return Err(err),
            }
        }
        let Some(client) = slot.as_deref() else {
            return Err(SinkError::Connect("storage client missing after connect".into()));
        };

        match self.upload_groups(client, events).await {
            Ok(()) => Ok(WriteReport::all(events.len())),
            Err(err) => {
                tracing::warn!(
                    sink = %SinkKind::OneLake,
                    error = %err,
                    "upload failed, resetting client"
                );
                *slot = None;
                Err(err)
            }
        }
    }

    async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(err) = client.close().await {
                tracing::debug!(
                    sink = %SinkKind::OneLake,
                    error = %err,
                    "error closing storage client"
                );
            }
        }
    }
}
