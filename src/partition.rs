//! Type-and-date partitioning shared by the file and lakehouse destinations.
//!
//! Layout: `{base}/{event_type}/year={YYYY}/month={MM}/day={DD}/{YYYYmmdd_HHMMSS}_{hex8}.{ext}`,
//! with dots in the type tag replaced by underscores.

use crate::event::Event;
use chrono::{DateTime, Datelike, Utc};

/// Directory-safe form of a type tag (`product.viewed` -> `product_viewed`).
pub fn type_segment(event_type: &str) -> String {
    let trimmed = event_type.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.replace('.', "_")
}

/// `year=YYYY/month=MM/day=DD` for the given instant.
pub fn date_segment(now: DateTime<Utc>) -> String {
    format!("year={}/month={:02}/day={:02}", now.year(), now.month(), now.day())
}

/// Full partition directory for one event type. `base` may be empty.
pub fn partition_path(base: &str, event_type: &str, now: DateTime<Utc>) -> String {
    let base = base.trim_end_matches('/');
    let rest = format!("{}/{}", type_segment(event_type), date_segment(now));
    if base.is_empty() {
        rest
    } else {
        format!("{base}/{rest}")
    }
}

/// Collision-resistant batch file name: UTC timestamp plus 8 random hex digits.
pub fn batch_file_name(now: DateTime<Utc>, extension: &str) -> String {
    format!("{}_{:08x}.{}", now.format("%Y%m%d_%H%M%S"), rand::random::<u32>(), extension)
}

/// Group events by type tag, keeping first-seen type order and submission order within a group.
pub fn group_by_type(events: &[Event]) -> Vec<(String, Vec<&Event>)> {
    let mut groups: Vec<(String, Vec<&Event>)> = Vec::new();
    for event in events {
        let tag = event.event_type();
        match groups.iter_mut().find(|(t, _)| t == tag) {
            Some((_, members)) => members.push(event),
            None => groups.push((tag.to_string(), vec![event])),
        }
    }
    groups
}
