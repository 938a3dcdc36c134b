//! Builds sinks from configuration.
//!
//! Destination clients are injected: register a [`StreamConnector`] and/or a
//! [`StoreConnector`] and the factory offers the destinations they make buildable. Console, file
//! and composite sinks are always buildable.
//!
//! ```rust
//! use biztel::{SinkConfig, SinkFactory, SinkKind};
//!
//! let factory = SinkFactory::new();
//! assert_eq!(
//!     factory.buildable_kinds(),
//!     vec![SinkKind::Console, SinkKind::File, SinkKind::Composite]
//! );
//! let sink = factory.build(&SinkConfig::console(false)).unwrap();
//! assert_eq!(sink.kind(), SinkKind::Console);
//! ```

use crate::composite::{CompositeSink, FailurePolicy};
use crate::config::SinkConfig;
use crate::console::ConsoleDestination;
use crate::error::{ConfigError, SinkKind};
use crate::eventhub::{EventHubDestination, EventHubSettings, StreamConnector, Transport};
use crate::file::{FileDestination, FileOptions};
use crate::onelake::{OneLakeDestination, OneLakeSettings, StoreConnector};
use crate::sink::{BatchingSink, Sink};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct SinkFactory {
    stream: Option<Arc<dyn StreamConnector>>,
    store: Option<Arc<dyn StoreConnector>>,
}

impl SinkFactory {
    /// A factory that can build only the local sinks.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream_connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.stream = Some(connector);
        self
    }

    pub fn with_store_connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.store = Some(connector);
        self
    }

    /// Whether `build` can produce a sink of this kind. Remote destinations need a registered
    /// connector that reports itself available.
    pub fn is_buildable(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::Console | SinkKind::File | SinkKind::Composite => true,
            SinkKind::EventHub => self.stream.as_ref().is_some_and(|c| c.available()),
            SinkKind::OneLake => self.store.as_ref().is_some_and(|c| c.available()),
        }
    }

    pub fn buildable_kinds(&self) -> Vec<SinkKind> {
        [
            SinkKind::EventHub,
            SinkKind::OneLake,
            SinkKind::Console,
            SinkKind::File,
            SinkKind::Composite,
        ]
        .into_iter()
        .filter(|kind| self.is_buildable(*kind))
        .collect()
    }

    /// Validate `config` and build it. The sink is not started.
    pub fn build(&self, config: &SinkConfig) -> Result<Arc<dyn Sink>, ConfigError> {
        config.validate()?;
        self.build_validated(config)
    }

    /// Build `config`, or a pretty console sink if that fails. Composite children that cannot
    /// be built are dropped; if none remain the composite itself falls back.
    pub fn build_or_console(&self, config: &SinkConfig) -> Arc<dyn Sink> {
        let attempt = match config {
            SinkConfig::Composite { sinks, fail_fast } => {
                let children: Vec<Arc<dyn Sink>> = sinks
                    .iter()
                    .filter_map(|child| match self.build(child) {
                        Ok(sink) => Some(sink),
                        Err(err) => {
                            tracing::warn!(
                                sink = %child.kind(),
                                error = %err,
                                "composite child skipped"
                            );
                            None
                        }
                    })
                    .collect();
                if children.is_empty() {
                    Err(ConfigError::invalid("sinks", "no composite child could be built"))
                } else {
                    Ok(composite(children, *fail_fast))
                }
            }
            other => self.build(other),
        };
        attempt.unwrap_or_else(|err| {
            tracing::warn!(sink = %config.kind(), error = %err, "falling back to console sink");
            console_sink(&SinkConfig::console(true))
        })
    }

    fn build_validated(&self, config: &SinkConfig) -> Result<Arc<dyn Sink>, ConfigError> {
        let options = config.batch_options();
        let sink: Arc<dyn Sink> = match config {
            SinkConfig::Console { .. } => console_sink(config),
            SinkConfig::File { output_dir, partition_by_type, partition_by_date, .. } => {
                let file = FileOptions {
                    output_dir: output_dir.clone(),
                    partition_by_type: *partition_by_type,
                    partition_by_date: *partition_by_date,
                };
                Arc::new(BatchingSink::new(FileDestination::new(file), options))
            }
            SinkConfig::EventHub {
                connection_string,
                event_hub_name,
                namespace,
                use_websockets,
                ..
            } => {
                let connector = self
                    .stream
                    .clone()
                    .filter(|c| c.available())
                    .ok_or(ConfigError::Unavailable(SinkKind::EventHub))?;
                let settings = match (connection_string, namespace) {
                    (Some(conn), _) => EventHubSettings::from_connection_string(
                        conn.expose(),
                        event_hub_name.as_deref(),
                    )
                    .map_err(|e| ConfigError::invalid("connection_string", e.to_string()))?,
                    (None, Some(ns)) => {
                        let name = event_hub_name.clone().ok_or(ConfigError::Missing {
                            sink: SinkKind::EventHub,
                            key: "event_hub_name",
                        })?;
                        EventHubSettings::managed_identity(ns.clone(), name)
                    }
                    (None, None) => {
                        return Err(ConfigError::Missing {
                            sink: SinkKind::EventHub,
                            key: "connection_string or namespace",
                        })
                    }
                };
                let transport =
                    if *use_websockets { Transport::WebSocket } else { Transport::Direct };
                let settings = settings.with_transport(transport);
                if !connector.supports(&settings) {
                    tracing::debug!(?transport, "stream connector cannot serve these settings");
                    return Err(ConfigError::Unavailable(SinkKind::EventHub));
                }
                let destination = EventHubDestination::new(settings, connector);
                Arc::new(BatchingSink::new(destination, options))
            }
            SinkConfig::OneLake {
                account_name,
                workspace_id,
                lakehouse_id,
                base_path,
                output_format,
                ..
            } => {
                let connector = self
                    .store
                    .clone()
                    .filter(|c| c.available())
                    .ok_or(ConfigError::Unavailable(SinkKind::OneLake))?;
                let settings = OneLakeSettings {
                    account_name: account_name.clone(),
                    workspace_id: workspace_id.clone(),
                    lakehouse_id: lakehouse_id.clone(),
                    base_path: base_path.clone(),
                    output_format: *output_format,
                };
                Arc::new(BatchingSink::new(OneLakeDestination::new(settings, connector), options))
            }
            SinkConfig::Composite { sinks, fail_fast } => {
                let children = sinks
                    .iter()
                    .map(|child| self.build_validated(child))
                    .collect::<Result<Vec<_>, _>>()?;
                composite(children, *fail_fast)
            }
        };
        tracing::debug!(sink = %config.kind(), "sink built");
        Ok(sink)
    }
}

fn console_sink(config: &SinkConfig) -> Arc<dyn Sink> {
    let pretty = matches!(config, SinkConfig::Console { pretty_print: true, .. });
    Arc::new(BatchingSink::new(ConsoleDestination::new(pretty), config.batch_options()))
}

fn composite(children: Vec<Arc<dyn Sink>>, fail_fast: bool) -> Arc<dyn Sink> {
    let policy = if fail_fast { FailurePolicy::FailFast } else { FailurePolicy::BestEffort };
    Arc::new(CompositeSink::new(children, policy))
}

impl fmt::Debug for SinkFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkFactory").field("buildable", &self.buildable_kinds()).finish()
    }
}
