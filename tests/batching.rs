mod common;

use biztel::{BatchOptions, BatchingSink, Event, EventType, Sink, SinkKind};
use common::test_helpers::{init_tracing, MemoryDestination};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn event(i: usize) -> Event {
    Event::new(EventType::ProductViewed).with("product_id", format!("p{i}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_lose_and_duplicate_nothing() {
    init_tracing();
    let dest = MemoryDestination::new(SinkKind::EventHub).with_delay(Duration::from_millis(1));
    let sink = Arc::new(BatchingSink::new(
        dest.clone(),
        BatchOptions::new(7, Duration::from_millis(5)),
    ));
    sink.start().await;

    let mut handles = Vec::new();
    for t in 0..8 {
        let sink = Arc::clone(&sink);
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..50 {
                let event = event(t * 1000 + i);
                ids.push(event.id().to_string());
                assert!(sink.send(event).await);
            }
            ids
        }));
    }
    let mut sent = HashSet::new();
    for handle in handles {
        sent.extend(handle.await.unwrap());
    }
    sink.stop().await;

    let delivered: Vec<String> = dest.events().iter().map(|e| e.id().to_string()).collect();
    assert_eq!(delivered.len(), 400);
    let unique: HashSet<String> = delivered.into_iter().collect();
    assert_eq!(unique, sent);
    assert_eq!(sink.buffered(), 0);

    let stats = sink.stats();
    assert_eq!(stats.accepted, 400);
    assert_eq!(stats.delivered, 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_producer_order_is_preserved() {
    let dest = MemoryDestination::new(SinkKind::File);
    let sink = BatchingSink::new(dest.clone(), BatchOptions::new(10, Duration::from_millis(3)));
    sink.start().await;
    for i in 0..95 {
        sink.send(event(i)).await;
    }
    sink.stop().await;

    let ids: Vec<String> = dest
        .events()
        .iter()
        .map(|e| e.get("product_id").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        .collect();
    let expected: Vec<String> = (0..95).map(|i| format!("p{i}")).collect();
    assert_eq!(ids, expected);
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_partial_batches_and_retries_after_outage() {
    let dest = MemoryDestination::new(SinkKind::OneLake);
    let sink = BatchingSink::new(dest.clone(), BatchOptions::new(100, Duration::from_secs(60)));
    sink.start().await;
    dest.set_failing(true);

    sink.send(event(1)).await;
    sink.send(event(2)).await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(dest.calls(), 1);
    assert_eq!(sink.buffered(), 2);

    sink.send(event(3)).await;
    dest.set_failing(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    let ids: Vec<String> = dest
        .events()
        .iter()
        .map(|e| e.get("product_id").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, vec!["p1", "p2", "p3"]);
    assert_eq!(sink.stats().flushes_failed, 1);

    sink.stop().await;
    assert!(!sink.is_running());
}

#[tokio::test]
async fn clean_stop_without_start_still_delivers() {
    let dest = MemoryDestination::new(SinkKind::Console);
    let sink = BatchingSink::new(dest.clone(), BatchOptions::new(50, Duration::from_secs(1)));
    for i in 0..5 {
        sink.send(event(i)).await;
    }
    sink.stop().await;
    assert_eq!(dest.events().len(), 5);
}
