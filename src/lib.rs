#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # biztel
//!
//! Business telemetry delivery for async Rust: producers emit enriched business events, and
//! sinks buffer them and deliver them in batches to one or more destinations.
//!
//! ## Features
//!
//! - **Batching engine**: size- and time-triggered flushes over one shared buffer, with
//!   re-queue on failure, a retry ceiling, and a bounded dead-letter queue
//! - **Destinations**: streaming endpoint, partitioned lakehouse store, local files, console
//! - **Fan-out** to several destinations with a best-effort or fail-fast policy
//! - **Graceful shutdown**: `stop` drains the buffer before closing the destination
//! - **Configuration** from serde or `FABRIC_*` environment variables
//! - **Blocking facade** for synchronous callers, backed by one worker thread
//!
//! Remote destination clients are injected through connector traits; the `biztel-kafka` and
//! `biztel-onelake` workspace crates provide them.
//!
//! ## Quick Start
//!
//! ```rust
//! use biztel::{BatchOptions, BatchingSink, ConsoleDestination, Event, EventType, Sink};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = BatchingSink::new(
//!         ConsoleDestination::compact(),
//!         BatchOptions::new(100, Duration::from_secs(5)),
//!     );
//!     sink.start().await;
//!
//!     sink.send(Event::new(EventType::ProductViewed).with("product_id", "p-1")).await;
//!
//!     // Flushes whatever is still buffered.
//!     sink.stop().await;
//! }
//! ```

pub mod auth;
pub mod catalog;
pub mod client;
pub mod clock;
pub mod composite;
pub mod config;
pub mod console;
pub mod encoding;
pub mod error;
pub mod event;
pub mod eventhub;
pub mod events;
pub mod factory;
pub mod file;
pub mod onelake;
pub mod partition;
pub mod sink;
pub mod worker;

// Re-exports
pub use auth::{AccessToken, StaticToken, TokenSource};
pub use catalog::{EventCategory, EventSource, EventType};
pub use client::{
    ClientOptions, CustomerContext, InfrastructureContext, Session, SessionContext, TelemetryClient,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use composite::{CompositeSink, FailurePolicy};
pub use config::{BatchConfig, Secret, SinkConfig, TelemetryConfig};
pub use console::ConsoleDestination;
pub use encoding::{Encoder, OutputFormat};
pub use error::{ConfigError, EventError, SinkError, SinkKind};
pub use event::Event;
pub use eventhub::{
    ConnectionString, Credential, EventHubDestination, EventHubSettings, MessageBatch, SizedBatch,
    StreamConnector, StreamMessage, StreamProducer, Transport,
};
pub use factory::SinkFactory;
pub use file::{FileDestination, FileOptions};
pub use onelake::{OneLakeDestination, OneLakeSettings, StoreClient, StoreConnector};
pub use sink::{
    BatchOptions, BatchingSink, DeadLetter, DeadLetterQueue, Destination, Sink, SinkResult,
    SinkStats, WriteReport,
};
pub use worker::BlockingClient;
