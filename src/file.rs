//! Local partitioned JSON Lines files.

use crate::clock::{Clock, SystemClock};
use crate::encoding::encode_jsonl;
use crate::error::{SinkError, SinkKind};
use crate::event::Event;
use crate::partition::{batch_file_name, date_segment, group_by_type, type_segment};
use crate::sink::{Destination, WriteReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "./business_telemetry_output";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOptions {
    pub output_dir: PathBuf,
    /// Add an `{event_type}` directory level.
    pub partition_by_type: bool,
    /// Add `year=/month=/day=` directory levels.
    pub partition_by_date: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            partition_by_type: true,
            partition_by_date: true,
        }
    }
}

impl FileOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into(), ..Self::default() }
    }
}

/// Writes one file per event type per flush, laid out like the lakehouse partitions but on the
/// local filesystem.
#[derive(Debug)]
pub struct FileDestination {
    options: FileOptions,
    clock: Arc<dyn Clock>,
}

impl FileDestination {
    pub fn new(options: FileOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: FileOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    /// Directory that receives `event_type` files at `now`.
    pub fn directory_for(&self, event_type: &str, now: DateTime<Utc>) -> PathBuf {
        let mut dir = self.options.output_dir.clone();
        if self.options.partition_by_type {
            dir.push(type_segment(event_type));
        }
        if self.options.partition_by_date {
            dir.extend(date_segment(now).split('/'));
        }
        dir
    }

    async fn write_group(
        &self,
        dir: &Path,
        now: DateTime<Utc>,
        events: &[&Event],
    ) -> Result<PathBuf, SinkError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(batch_file_name(now, "jsonl"));
        tokio::fs::write(&path, encode_jsonl(events)?).await?;
        Ok(path)
    }
}

#[async_trait]
impl Destination for FileDestination {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    async fn write(&self, events: &[Event]) -> Result<WriteReport, SinkError> {
        let now = self.clock.now();
        for (event_type, group) in group_by_type(events) {
            let dir = self.directory_for(&event_type, now);
            let path = self.write_group(&dir, now, &group).await?;
            tracing::info!(
                sink = %SinkKind::File,
                events = group.len(),
                path = %path.display(),
                "wrote events"
            );
        }
        Ok(WriteReport::all(events.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::EventType;
    use chrono::TimeZone;

    fn destination(root: &Path, options: impl FnOnce(&mut FileOptions)) -> FileDestination {
        let mut opts = FileOptions::new(root);
        options(&mut opts);
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap());
        FileDestination::with_clock(opts, Arc::new(clock))
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                out.extend(files_under(&path));
            } else {
                out.push(path);
            }
        }
        out.sort();
        out
    }

    #[tokio::test]
    async fn writes_partitioned_jsonl_per_type() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path(), |_| {});
        let events = vec![
            Event::new(EventType::ProductViewed).with("product_id", "p1"),
            Event::new(EventType::OrderPlaced).with("order_id", "o1"),
            Event::new(EventType::ProductViewed).with("product_id", "p2"),
        ];
        let report = dest.write(&events).await.unwrap();
        assert_eq!(report.accepted, 3);

        let viewed = tmp.path().join("product_viewed/year=2024/month=03/day=07");
        let files = files_under(&viewed);
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("20240307_120000_"));
        assert!(name.ends_with(".jsonl"));

        let content = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"p1\""));
        assert!(lines[1].contains("\"p2\""));

        assert_eq!(files_under(&tmp.path().join("order_placed")).len(), 1);
    }

    #[tokio::test]
    async fn partitioning_can_be_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path(), |o| {
            o.partition_by_type = false;
            o.partition_by_date = false;
        });
        dest.write(&[Event::new(EventType::OrderPlaced).with("order_id", "o1")]).await.unwrap();
        let files = files_under(tmp.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].parent().unwrap(), tmp.path());
    }

    #[tokio::test]
    async fn unwritable_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let dest = destination(&blocker, |_| {});
        let err = dest.write(&[Event::new(EventType::OrderPlaced).with("order_id", "o1")]).await;
        assert!(matches!(err, Err(SinkError::Io(_))));
    }
}
