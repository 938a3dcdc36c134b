//! Sink and client configuration.
//!
//! [`SinkConfig`] is a serde-tagged description of one sink (or a composite of sinks);
//! [`TelemetryConfig`] adds the client-level settings. Both can be deserialized from any serde
//! format or read from `FABRIC_*` environment variables:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `FABRIC_TELEMETRY_ENABLED` | master switch (default `true`) |
//! | `FABRIC_SINK_TYPE` | `console`, `file`, `eventhub`, `onelake`, `composite` |
//! | `FABRIC_COMPOSITE_SINKS` | comma-separated child kinds |
//! | `FABRIC_COMPOSITE_FAIL_FAST` | composite failure policy |
//! | `FABRIC_EVENT_HUB_CONNECTION_STRING` | shared-key credential |
//! | `FABRIC_EVENT_HUB_NAMESPACE` | managed-identity namespace |
//! | `FABRIC_EVENT_HUB_NAME`, `FABRIC_EVENT_HUB_USE_WEBSOCKETS` | streaming endpoint |
//! | `FABRIC_ONELAKE_WORKSPACE_ID`, `FABRIC_ONELAKE_LAKEHOUSE_ID` | lakehouse |
//! | `FABRIC_ONELAKE_ACCOUNT_NAME`, `FABRIC_ONELAKE_BASE_PATH` | lakehouse location |
//! | `FABRIC_ONELAKE_OUTPUT_FORMAT` | `jsonl` or `parquet` |
//! | `FABRIC_FILE_PARTITION_BY_TYPE`, `FABRIC_FILE_PARTITION_BY_DATE` | file layout |
//! | `FABRIC_OUTPUT_DIR` | file sink directory |
//! | `FABRIC_BATCH_SIZE`, `FABRIC_FLUSH_INTERVAL` | batching overrides for every sink |
//! | `FABRIC_PRETTY_PRINT` | console format |
//! | `FABRIC_ENVIRONMENT`, `FABRIC_SERVICE_NAME`, `FABRIC_SERVICE_VERSION` | enrichment |
//!
//! ```rust
//! use biztel::{SinkConfig, SinkKind};
//!
//! let config: SinkConfig = serde_json::from_str(r#"{
//!     "type": "composite",
//!     "fail_fast": false,
//!     "sinks": [
//!         {"type": "console", "pretty_print": false},
//!         {"type": "file", "output_dir": "/tmp/telemetry", "batch": {"batch_size": 500}}
//!     ]
//! }"#).unwrap();
//! assert_eq!(config.kind(), SinkKind::Composite);
//! config.validate().unwrap();
//! ```

use crate::encoding::OutputFormat;
use crate::error::{ConfigError, SinkKind};
use crate::eventhub::ConnectionString;
use crate::file::DEFAULT_OUTPUT_DIR;
use crate::onelake::{DEFAULT_ACCOUNT, DEFAULT_BASE_PATH};
use crate::sink::BatchOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const MAX_BATCH_SIZE: usize = 10_000;
const MIN_FLUSH_SECS: f64 = 0.1;
const MAX_FLUSH_SECS: f64 = 300.0;

/// A credential string that never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Batching overrides. Unset fields take the destination's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub batch_size: Option<usize>,
    pub flush_interval_secs: Option<f64>,
    pub max_buffered: Option<usize>,
    pub max_attempts: Option<u32>,
}

impl BatchConfig {
    /// Defaults for a destination: console flushes almost immediately, the lakehouse batches
    /// large and slow.
    pub fn defaults_for(kind: SinkKind) -> BatchOptions {
        let (batch_size, millis) = match kind {
            SinkKind::Console => (1, 100),
            SinkKind::File => (100, 10_000),
            SinkKind::OneLake => (1_000, 60_000),
            SinkKind::EventHub | SinkKind::Composite => (100, 5_000),
        };
        BatchOptions::new(batch_size, Duration::from_millis(millis))
    }

    /// Resolve against the defaults for `kind`.
    pub fn resolve(&self, kind: SinkKind) -> BatchOptions {
        let mut options = Self::defaults_for(kind);
        if let Some(size) = self.batch_size {
            options.batch_size = size;
        }
        if let Some(secs) = self.flush_interval_secs {
            let secs = secs.clamp(MIN_FLUSH_SECS, MAX_FLUSH_SECS);
            options.flush_interval = Duration::from_secs_f64(secs);
        }
        if let Some(max) = self.max_buffered {
            options.max_buffered = max;
        }
        if let Some(attempts) = self.max_attempts {
            options.max_attempts = attempts;
        }
        options
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(size) = self.batch_size {
            if !(1..=MAX_BATCH_SIZE).contains(&size) {
                return Err(ConfigError::invalid(
                    "batch_size",
                    format!("{size} is outside 1..={MAX_BATCH_SIZE}"),
                ));
            }
        }
        if let Some(secs) = self.flush_interval_secs {
            if !(MIN_FLUSH_SECS..=MAX_FLUSH_SECS).contains(&secs) {
                return Err(ConfigError::invalid(
                    "flush_interval_secs",
                    format!("{secs} is outside {MIN_FLUSH_SECS}..={MAX_FLUSH_SECS}"),
                ));
            }
        }
        if self.max_buffered == Some(0) {
            return Err(ConfigError::invalid("max_buffered", "must be at least 1"));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    fn merge(&mut self, overrides: &BatchConfig) {
        self.batch_size = overrides.batch_size.or(self.batch_size);
        self.flush_interval_secs = overrides.flush_interval_secs.or(self.flush_interval_secs);
        self.max_buffered = overrides.max_buffered.or(self.max_buffered);
        self.max_attempts = overrides.max_attempts.or(self.max_attempts);
    }
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_account() -> String {
    DEFAULT_ACCOUNT.to_string()
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

/// One sink, selected by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    Console {
        #[serde(default = "default_true")]
        pretty_print: bool,
        #[serde(default)]
        batch: BatchConfig,
    },
    File {
        #[serde(default = "default_output_dir")]
        output_dir: PathBuf,
        #[serde(default = "default_true")]
        partition_by_type: bool,
        #[serde(default = "default_true")]
        partition_by_date: bool,
        #[serde(default)]
        batch: BatchConfig,
    },
    EventHub {
        #[serde(default)]
        connection_string: Option<Secret>,
        #[serde(default)]
        event_hub_name: Option<String>,
        /// Namespace for identity-based access, used when no connection string is given.
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        use_websockets: bool,
        #[serde(default)]
        batch: BatchConfig,
    },
    OneLake {
        #[serde(default = "default_account")]
        account_name: String,
        #[serde(default)]
        workspace_id: Option<String>,
        #[serde(default)]
        lakehouse_id: Option<String>,
        #[serde(default = "default_base_path")]
        base_path: String,
        #[serde(default)]
        output_format: OutputFormat,
        #[serde(default)]
        batch: BatchConfig,
    },
    Composite {
        sinks: Vec<SinkConfig>,
        #[serde(default)]
        fail_fast: bool,
    },
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::console(true)
    }
}

impl SinkConfig {
    pub fn console(pretty_print: bool) -> Self {
        SinkConfig::Console { pretty_print, batch: BatchConfig::default() }
    }

    pub fn file(output_dir: impl Into<PathBuf>) -> Self {
        SinkConfig::File {
            output_dir: output_dir.into(),
            partition_by_type: true,
            partition_by_date: true,
            batch: BatchConfig::default(),
        }
    }

    pub fn kind(&self) -> SinkKind {
        match self {
            SinkConfig::Console { .. } => SinkKind::Console,
            SinkConfig::File { .. } => SinkKind::File,
            SinkConfig::EventHub { .. } => SinkKind::EventHub,
            SinkConfig::OneLake { .. } => SinkKind::OneLake,
            SinkConfig::Composite { .. } => SinkKind::Composite,
        }
    }

    /// Batching overrides; `None` for a composite, which does not buffer.
    pub fn batch(&self) -> Option<&BatchConfig> {
        match self {
            SinkConfig::Console { batch, .. }
            | SinkConfig::File { batch, .. }
            | SinkConfig::EventHub { batch, .. }
            | SinkConfig::OneLake { batch, .. } => Some(batch),
            SinkConfig::Composite { .. } => None,
        }
    }

    fn batch_mut(&mut self) -> Option<&mut BatchConfig> {
        match self {
            SinkConfig::Console { batch, .. }
            | SinkConfig::File { batch, .. }
            | SinkConfig::EventHub { batch, .. }
            | SinkConfig::OneLake { batch, .. } => Some(batch),
            SinkConfig::Composite { .. } => None,
        }
    }

    /// Engine options with this sink's overrides applied to its kind's defaults.
    pub fn batch_options(&self) -> BatchOptions {
        match self.batch() {
            Some(batch) => batch.resolve(self.kind()),
            None => BatchConfig::defaults_for(self.kind()),
        }
    }

    /// Apply batching overrides to this sink and, for a composite, to every child.
    pub fn apply_batch_overrides(&mut self, overrides: &BatchConfig) {
        if let SinkConfig::Composite { sinks, .. } = self {
            for child in sinks {
                child.apply_batch_overrides(overrides);
            }
        } else if let Some(batch) = self.batch_mut() {
            batch.merge(overrides);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(batch) = self.batch() {
            batch.validate()?;
        }
        match self {
            SinkConfig::Console { .. } | SinkConfig::File { .. } => Ok(()),
            SinkConfig::EventHub { connection_string, event_hub_name, namespace, .. } => {
                let name = event_hub_name.as_deref().filter(|n| !n.is_empty());
                match (connection_string, namespace.as_deref().filter(|n| !n.is_empty())) {
                    (Some(conn), _) => {
                        let parsed = ConnectionString::parse(conn.expose())
                            .map_err(|e| ConfigError::invalid("connection_string", e.to_string()))?;
                        if name.is_none() && parsed.entity_path().is_none() {
                            return Err(missing_hub_name());
                        }
                        Ok(())
                    }
                    (None, Some(_)) if name.is_some() => Ok(()),
                    (None, Some(_)) => Err(missing_hub_name()),
                    (None, None) => Err(ConfigError::Missing {
                        sink: SinkKind::EventHub,
                        key: "connection_string or namespace",
                    }),
                }
            }
            SinkConfig::OneLake { workspace_id, lakehouse_id, .. } => {
                let required = [("workspace_id", workspace_id), ("lakehouse_id", lakehouse_id)];
                for (key, value) in required {
                    if value.as_deref().unwrap_or_default().is_empty() {
                        return Err(ConfigError::Missing { sink: SinkKind::OneLake, key });
                    }
                }
                Ok(())
            }
            SinkConfig::Composite { sinks, .. } => {
                if !sinks.iter().any(|s| s.kind() != SinkKind::Composite) {
                    return Err(ConfigError::invalid(
                        "sinks",
                        "composite needs at least one non-composite child",
                    ));
                }
                sinks.iter().try_for_each(SinkConfig::validate)
            }
        }
    }
}

/// Client-level settings plus the sink to deliver to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub environment: String,
    pub service_name: String,
    pub service_version: String,
    pub sink: SinkConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            environment: "production".to_string(),
            service_name: "business-telemetry".to_string(),
            service_version: "1.0.0".to_string(),
            sink: SinkConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Read `FABRIC_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Read `FABRIC_*` variables from `vars`. Names are matched case-insensitively; unrelated
    /// variables are ignored. The result is validated.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let vars = Vars::collect(vars);
        let defaults = Self::default();

        let mut sink = match vars.get("SINK_TYPE") {
            Some(raw) => sink_from_vars(parse_kind("FABRIC_SINK_TYPE", raw)?, &vars)?,
            None => sink_from_vars(SinkKind::Console, &vars)?,
        };
        let overrides = BatchConfig {
            batch_size: vars.parse("BATCH_SIZE")?,
            flush_interval_secs: vars.parse("FLUSH_INTERVAL")?,
            ..BatchConfig::default()
        };
        sink.apply_batch_overrides(&overrides);

        let config = Self {
            enabled: vars.flag("TELEMETRY_ENABLED")?.unwrap_or(defaults.enabled),
            environment: vars.string("ENVIRONMENT").unwrap_or(defaults.environment),
            service_name: vars.string("SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: vars.string("SERVICE_VERSION").unwrap_or(defaults.service_version),
            sink,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::invalid("service_name", "must not be empty"));
        }
        self.sink.validate()
    }
}

fn missing_hub_name() -> ConfigError {
    ConfigError::Missing { sink: SinkKind::EventHub, key: "event_hub_name" }
}

fn parse_kind(key: &str, raw: &str) -> Result<SinkKind, ConfigError> {
    SinkKind::parse(raw)
        .ok_or_else(|| ConfigError::invalid(key, format!("unknown sink type `{raw}`")))
}

fn sink_from_vars(kind: SinkKind, vars: &Vars) -> Result<SinkConfig, ConfigError> {
    Ok(match kind {
        SinkKind::Console => SinkConfig::Console {
            pretty_print: vars.flag("PRETTY_PRINT")?.unwrap_or(true),
            batch: BatchConfig::default(),
        },
        SinkKind::File => SinkConfig::File {
            output_dir: vars
                .string("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_output_dir),
            partition_by_type: vars.flag("FILE_PARTITION_BY_TYPE")?.unwrap_or(true),
            partition_by_date: vars.flag("FILE_PARTITION_BY_DATE")?.unwrap_or(true),
            batch: BatchConfig::default(),
        },
        SinkKind::EventHub => SinkConfig::EventHub {
            connection_string: vars.string("EVENT_HUB_CONNECTION_STRING").map(Secret),
            event_hub_name: vars.string("EVENT_HUB_NAME"),
            namespace: vars.string("EVENT_HUB_NAMESPACE"),
            use_websockets: vars.flag("EVENT_HUB_USE_WEBSOCKETS")?.unwrap_or(false),
            batch: BatchConfig::default(),
        },
        SinkKind::OneLake => SinkConfig::OneLake {
            account_name: vars.string("ONELAKE_ACCOUNT_NAME").unwrap_or_else(default_account),
            workspace_id: vars.string("ONELAKE_WORKSPACE_ID"),
            lakehouse_id: vars.string("ONELAKE_LAKEHOUSE_ID"),
            base_path: vars.string("ONELAKE_BASE_PATH").unwrap_or_else(default_base_path),
            output_format: match vars.get("ONELAKE_OUTPUT_FORMAT") {
                Some(raw) => OutputFormat::parse(raw).ok_or_else(|| {
                    ConfigError::invalid(
                        "FABRIC_ONELAKE_OUTPUT_FORMAT",
                        format!("unknown format `{raw}`"),
                    )
                })?,
                None => OutputFormat::Jsonl,
            },
            batch: BatchConfig::default(),
        },
        SinkKind::Composite => {
            let raw = vars
                .get("COMPOSITE_SINKS")
                .ok_or(ConfigError::Missing {
                    sink: SinkKind::Composite,
                    key: "FABRIC_COMPOSITE_SINKS",
                })?;
            let mut sinks = Vec::new();
            for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                let child = parse_kind("FABRIC_COMPOSITE_SINKS", name)?;
                if child == SinkKind::Composite {
                    return Err(ConfigError::invalid(
                        "FABRIC_COMPOSITE_SINKS",
                        "composite cannot contain itself",
                    ));
                }
                sinks.push(sink_from_vars(child, vars)?);
            }
            let fail_fast = vars.flag("COMPOSITE_FAIL_FAST")?.unwrap_or(false);
            SinkConfig::Composite { sinks, fail_fast }
        }
    })
}

/// `FABRIC_`-prefixed variables keyed by the upper-cased remainder.
struct Vars(HashMap<String, String>);

impl Vars {
    fn collect<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let map = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let key = k.as_ref().to_ascii_uppercase();
                key.strip_prefix("FABRIC_").map(|rest| (rest.to_string(), v.into()))
            })
            .collect();
        Self(map)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.get(key) else { return Ok(None) };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::invalid(
                format!("FABRIC_{key}"),
                format!("`{raw}` is not a boolean"),
            )),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| {
                    let reason = format!("`{raw}` is not a number");
                    ConfigError::invalid(format!("FABRIC_{key}"), reason)
                })
            })
            .transpose()
    }
}
