//! Error types for sinks, events, and configuration.
use std::fmt;

/// Failure while delivering events to a destination.
///
/// Ordinary destination failures never escape a sink's `flush`/`send_batch`: they are folded
/// into a failed [`SinkResult`](crate::SinkResult). The only variant that reaches callers as an
/// `Err` is [`SinkError::Composite`], raised by a fail-fast composite router.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// The destination client could not be constructed or connected.
    #[error("connect: {0}")]
    Connect(String),
    /// The destination rejected or failed a write.
    #[error("send: {0}")]
    Send(String),
    /// Local filesystem failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// An event or group of events could not be encoded.
    #[error("encode: {0}")]
    Encode(String),
    /// The destination's client dependency is not available in this build.
    #[error("destination unavailable: {0}")]
    Unavailable(String),
    /// Destination settings are incomplete or contradictory.
    #[error("invalid destination config: {0}")]
    InvalidConfig(String),
    /// A composite child failed under the fail-fast policy.
    #[error("sink {sink} failed: {message}")]
    Composite {
        /// Kind of the child sink that failed.
        sink: SinkKind,
        /// Error description reported by the child.
        message: String,
    },
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Encode(err.to_string())
    }
}

/// Destination identifier carried by results, logs, and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Streaming message bus.
    EventHub,
    /// Partitioned lakehouse file store.
    OneLake,
    /// Human-readable stdout output.
    Console,
    /// Local partitioned files.
    File,
    /// Fan-out router over child sinks.
    Composite,
}

impl SinkKind {
    /// Stable lowercase name, matching the configuration selector.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SinkKind::EventHub => "eventhub",
            SinkKind::OneLake => "onelake",
            SinkKind::Console => "console",
            SinkKind::File => "file",
            SinkKind::Composite => "composite",
        }
    }

    /// Parse a configuration selector (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eventhub" => Some(SinkKind::EventHub),
            "onelake" => Some(SinkKind::OneLake),
            "console" => Some(SinkKind::Console),
            "file" => Some(SinkKind::File),
            "composite" => Some(SinkKind::Composite),
            _ => None,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event failed decode-time validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The decoded value was not a JSON object.
    #[error("event must be a JSON object")]
    NotAnObject,
    /// `event_type` is missing, empty, or not a string.
    #[error("event_type must be a non-empty string")]
    MissingType,
    /// A field required by the event's type is absent.
    #[error("{event_type} requires field `{field}`")]
    MissingField {
        /// The event's type tag.
        event_type: String,
        /// The absent field.
        field: &'static str,
    },
    /// A field has the wrong JSON type.
    #[error("field `{field}` must be {expected}")]
    WrongType {
        /// The offending field.
        field: String,
        /// Human-readable expected type.
        expected: &'static str,
    },
}

/// Configuration could not be loaded, validated, or built.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// An option is outside its accepted range or malformed.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Option name.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A destination requires an option that was not provided.
    #[error("{sink} sink requires {key}")]
    Missing {
        /// Destination being configured.
        sink: SinkKind,
        /// Required option.
        key: &'static str,
    },
    /// No client connector is registered for this destination.
    #[error("{0} sink cannot be built: no client connector registered")]
    Unavailable(SinkKind),
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { key: key.into(), reason: reason.into() }
    }
}
