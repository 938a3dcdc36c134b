//! Human-readable output for development.

use crate::error::{SinkError, SinkKind};
use crate::event::{Event, EVENT_ID, EVENT_SOURCE, EVENT_TIME, EVENT_TYPE};
use crate::sink::{Destination, WriteReport};
use async_trait::async_trait;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

const RULE: &str = "============================================================";

/// Prints each event either as a framed, indented block or as one compact JSON line.
pub struct ConsoleDestination {
    pretty_print: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleDestination {
    /// Writes to stdout.
    pub fn new(pretty_print: bool) -> Self {
        Self::with_writer(pretty_print, std::io::stdout())
    }

    /// One line of compact JSON per event on stdout.
    pub fn compact() -> Self {
        Self::new(false)
    }

    pub fn with_writer(pretty_print: bool, writer: impl Write + Send + 'static) -> Self {
        Self { pretty_print, out: Mutex::new(Box::new(writer)) }
    }

    pub fn pretty_print(&self) -> bool {
        self.pretty_print
    }

    fn render(&self, out: &mut dyn Write, event: &Event) -> Result<(), SinkError> {
        if !self.pretty_print {
            serde_json::to_writer(&mut *out, event.fields())?;
            writeln!(out)?;
            return Ok(());
        }
        let field = |key: &str| event.get(key).and_then(|v| v.as_str()).unwrap_or("unknown");
        writeln!(out)?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "Business Event: {}", field(EVENT_TYPE))?;
        writeln!(out, "   Source: {}", field(EVENT_SOURCE))?;
        writeln!(out, "   Time: {}", field(EVENT_TIME))?;
        writeln!(out, "   ID: {}", field(EVENT_ID))?;
        writeln!(out, "{RULE}")?;
        serde_json::to_writer_pretty(&mut *out, event.fields())?;
        writeln!(out)?;
        Ok(())
    }
}

impl std::fmt::Debug for ConsoleDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleDestination").field("pretty_print", &self.pretty_print).finish()
    }
}

#[async_trait]
impl Destination for ConsoleDestination {
    fn kind(&self) -> SinkKind {
        SinkKind::Console
    }

    async fn write(&self, events: &[Event]) -> Result<WriteReport, SinkError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        for event in events {
            self.render(&mut **out, event)?;
        }
        out.flush()?;
        Ok(WriteReport::all(events.len()))
    }
}
