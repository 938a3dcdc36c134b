//! Synchronous facade over [`TelemetryClient`].
//!
//! One dedicated thread owns a current-thread runtime and drains a single command queue for the
//! life of the handle. Every call posts a command and blocks until the worker replies, so the
//! methods must not be called from inside an async runtime.
//!
//! ```rust
//! use biztel::{BlockingClient, ClientOptions, SinkConfig, SinkFactory, TelemetryClient};
//!
//! let sink = SinkFactory::new().build_or_console(&SinkConfig::console(false));
//! let client = TelemetryClient::new(sink, ClientOptions::default());
//! let worker = BlockingClient::spawn(client).unwrap();
//! worker.start();
//! assert!(worker.emit(biztel::events::customer_query("hello")));
//! drop(worker); // stops the client and joins the thread
//! ```

use crate::client::TelemetryClient;
use crate::error::SinkError;
use crate::event::Event;
use crate::sink::SinkResult;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Emit(Event, oneshot::Sender<bool>),
    EmitBatch(Vec<Event>, oneshot::Sender<bool>),
    Flush(oneshot::Sender<Result<SinkResult, SinkError>>),
}

pub struct BlockingClient {
    client: Arc<TelemetryClient>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl BlockingClient {
    /// Start the worker thread. The client itself is not started; call [`start`](Self::start).
    pub fn spawn(client: TelemetryClient) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let client = Arc::new(client);
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Arc::clone(&client);
        let thread = std::thread::Builder::new()
            .name("biztel-worker".into())
            .spawn(move || runtime.block_on(run(worker, rx)))?;
        Ok(Self { client, commands: Some(tx), thread: Some(thread) })
    }

    /// The wrapped client, for context setters and inspection.
    pub fn client(&self) -> &TelemetryClient {
        &self.client
    }

    pub fn start(&self) {
        self.call(Command::Start);
    }

    pub fn stop(&self) {
        self.call(Command::Stop);
    }

    pub fn emit(&self, event: Event) -> bool {
        self.call(|reply| Command::Emit(event, reply)).unwrap_or(false)
    }

    pub fn emit_batch(&self, events: Vec<Event>) -> bool {
        self.call(|reply| Command::EmitBatch(events, reply)).unwrap_or(false)
    }

    pub fn flush(&self) -> Result<SinkResult, SinkError> {
        self.call(Command::Flush)
            .unwrap_or_else(|| Err(SinkError::Unavailable("telemetry worker has exited".into())))
    }

    fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let commands = self.commands.as_ref()?;
        let (reply, response) = oneshot::channel();
        if commands.send(command(reply)).is_err() {
            tracing::warn!("telemetry worker has exited; command dropped");
            return None;
        }
        response.blocking_recv().ok()
    }
}

async fn run(client: Arc<TelemetryClient>, mut commands: mpsc::UnboundedReceiver<Command>) {
    tracing::debug!("telemetry worker running");
    while let Some(command) = commands.recv().await {
        // A dropped reply receiver only means the caller went away.
        match command {
            Command::Start(reply) => {
                client.start().await;
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                client.stop().await;
                let _ = reply.send(());
            }
            Command::Emit(event, reply) => {
                let _ = reply.send(client.emit(event).await);
            }
            Command::EmitBatch(events, reply) => {
                let _ = reply.send(client.emit_batch(events).await);
            }
            Command::Flush(reply) => {
                let _ = reply.send(client.flush().await);
            }
        }
    }
    client.stop().await;
    tracing::debug!("telemetry worker exited");
}

impl Drop for BlockingClient {
    fn drop(&mut self) {
        self.stop();
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("telemetry worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("client", &self.client)
            .field("running", &self.thread.is_some())
            .finish()
    }
}
