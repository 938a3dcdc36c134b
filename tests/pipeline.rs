mod common;

use biztel::{
    CompositeSink, CustomerContext, Event, EventSource, EventType, FailurePolicy, Sink,
    SinkError, SinkFactory, SinkKind, TelemetryClient, TelemetryConfig,
};
use common::test_helpers::{init_tracing, MemoryDestination};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

fn memory_sink(dest: &MemoryDestination) -> Arc<dyn Sink> {
    Arc::new(biztel::BatchingSink::new(
        dest.clone(),
        biztel::BatchOptions::new(100, Duration::from_secs(60)),
    ))
}

#[tokio::test]
async fn environment_to_partitioned_files() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = TelemetryConfig::from_vars([
        ("FABRIC_SINK_TYPE", "file"),
        ("FABRIC_OUTPUT_DIR", dir.path().to_str().unwrap()),
        ("FABRIC_BATCH_SIZE", "2"),
        ("FABRIC_ENVIRONMENT", "test"),
        ("FABRIC_SERVICE_NAME", "order-service"),
    ])
    .unwrap();

    let client = TelemetryClient::from_config(&config, &SinkFactory::new());
    assert_eq!(client.sink().kind(), SinkKind::File);
    client.start().await;
    client.set_customer_context(CustomerContext {
        customer_id: Some("c-1".into()),
        ..CustomerContext::default()
    });

    assert!(client.emit_order_placed("o-1", vec![serde_json::json!({"sku": "mug"})], 9.5).await);
    assert!(client.emit_order_completed("o-1", Some(800)).await);
    assert!(client.emit_product_viewed("p-1", "Mug").await);
    client.stop().await;

    let files = files_under(dir.path());
    assert_eq!(files.len(), 3, "{files:?}");
    let mut events = Vec::new();
    for file in &files {
        let relative = file.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned();
        assert!(relative.contains("/year="), "{relative}");
        assert!(relative.ends_with(".jsonl"), "{relative}");
        for line in std::fs::read_to_string(file).unwrap().lines() {
            let value: Value = serde_json::from_str(line).unwrap();
            events.push(Event::from_value(value).unwrap());
        }
    }
    assert_eq!(events.len(), 3);
    for event in &events {
        assert_eq!(event.source(), Some("order-service"));
        assert_eq!(event.get("environment"), Some(&Value::from("test")));
        assert_eq!(event.get("customer_id"), Some(&Value::from("c-1")));
    }
    let types: Vec<EventType> = events.iter().map(Event::kind).collect();
    assert!(types.contains(&EventType::OrderPlaced));
    assert!(types.contains(&EventType::ProductViewed));
}

#[tokio::test]
async fn fan_out_survives_one_destination_outage() {
    let (stream, lake) = (
        MemoryDestination::new(SinkKind::EventHub),
        MemoryDestination::new(SinkKind::OneLake),
    );
    stream.set_failing(true);
    let composite =
        Arc::new(CompositeSink::best_effort(vec![memory_sink(&stream), memory_sink(&lake)]));
    let client = TelemetryClient::new(
        composite.clone(),
        biztel::ClientOptions::default().with_source(EventSource::StoreFront),
    );
    client.start().await;
    for i in 0..3 {
        assert!(client.emit_customer_query(format!("q{i}")).await);
    }
    assert!(client.emit_batch(vec![biztel::events::customer_query("direct")]).await);
    assert_eq!(lake.events().len(), 1);

    let result = client.flush().await.unwrap();
    assert!(result.success, "one healthy destination is enough under best-effort");
    assert_eq!(result.events_sent, 3);
    assert!(result.error.unwrap_or_default().contains("eventhub"));
    assert!(!composite.last_results()[0].success);
    assert_eq!(lake.events().len(), 4);
    assert!(stream.events().is_empty());
    assert_eq!(composite.buffered(), 3, "the failed child keeps its events");

    stream.set_failing(false);
    client.stop().await;
    assert_eq!(stream.events().len(), 3, "direct batches are not re-queued");
    assert_eq!(lake.events().len(), 4);
}

#[tokio::test]
async fn fail_fast_surfaces_the_failing_destination() {
    let (first, second) =
        (MemoryDestination::new(SinkKind::File), MemoryDestination::new(SinkKind::Console));
    first.set_failing(true);
    let composite = CompositeSink::new(
        vec![memory_sink(&first), memory_sink(&second)],
        FailurePolicy::FailFast,
    );
    let events = vec![Event::new(EventType::OrderFailed).with("order_id", "o-9")];
    match composite.send_batch(events).await {
        Err(SinkError::Composite { sink, .. }) => assert_eq!(sink, SinkKind::File),
        other => panic!("expected a composite error, got {other:?}"),
    }
    assert_eq!(second.calls(), 0);
}
