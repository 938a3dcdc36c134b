use biztel::{
    BatchOptions, BatchingSink, Event, EventType, OneLakeDestination, OneLakeSettings, Sink,
    StaticToken,
};
use biztel_onelake::DfsConnector;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Seen {
    request_line: String,
    authorization: Option<String>,
    body: Vec<u8>,
}

/// Minimal HTTP/1.1 endpoint that answers every request with `status` and records it.
async fn serve(status: &'static str) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut stream = BufReader::new(stream);
                loop {
                    let mut request_line = String::new();
                    if stream.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let mut content_length = 0usize;
                    let mut authorization = None;
                    loop {
                        let mut header = String::new();
                        stream.read_line(&mut header).await.expect("header");
                        let header = header.trim_end();
                        if header.is_empty() {
                            break;
                        }
                        if let Some((name, value)) = header.split_once(':') {
                            match name.to_ascii_lowercase().as_str() {
                                "content-length" => {
                                    content_length = value.trim().parse().expect("length")
                                }
                                "authorization" => authorization = Some(value.trim().to_string()),
                                _ => {}
                            }
                        }
                    }
                    let mut body = vec![0; content_length];
                    stream.read_exact(&mut body).await.expect("body");
                    log.lock().unwrap().push(Seen {
                        request_line: request_line.trim_end().to_string(),
                        authorization,
                        body,
                    });
                    let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\n\r\n");
                    stream.get_mut().write_all(response.as_bytes()).await.expect("write");
                }
            });
        }
    });
    (format!("http://{addr}"), seen)
}

fn sink(endpoint: &str) -> BatchingSink<OneLakeDestination> {
    let connector = DfsConnector::new(Arc::new(StaticToken::new("test-token")))
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(5));
    let destination =
        OneLakeDestination::new(OneLakeSettings::new("ws", "lh"), Arc::new(connector));
    BatchingSink::new(destination, BatchOptions::new(100, Duration::from_secs(60)))
}

#[tokio::test]
async fn upload_is_create_append_flush() {
    let (endpoint, seen) = serve("201 Created").await;
    let sink = sink(&endpoint);

    sink.send(Event::new(EventType::OrderPlaced).with("order_id", "o-1")).await;
    sink.send(Event::new(EventType::OrderPlaced).with("order_id", "o-2")).await;
    let result = sink.flush().await.expect("flush");
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.events_sent, 2);

    let seen = seen.lock().unwrap().clone();
    let lines: Vec<&str> = seen.iter().map(|s| s.request_line.as_str()).collect();
    assert_eq!(lines.len(), 4, "{lines:?}");
    assert!(lines[0].starts_with("PUT /ws/lh/Files/business_telemetry/order_placed/year="));
    assert!(lines[0].contains("?resource=directory"));
    assert!(lines[1].starts_with("PUT ") && lines[1].contains(".jsonl?resource=file"));
    assert!(lines[2].starts_with("PATCH ") && lines[2].contains("action=append&position=0"));

    let body = String::from_utf8(seen[2].body.clone()).unwrap();
    assert_eq!(body.lines().count(), 2);
    assert!(body.contains("\"order_id\":\"o-1\""));
    assert!(lines[3].contains(&format!("action=flush&position={}", seen[2].body.len())));
    assert!(seen.iter().all(|s| s.authorization.as_deref() == Some("Bearer test-token")));
}

#[tokio::test]
async fn server_errors_requeue_the_batch() {
    let (endpoint, seen) = serve("503 Service Unavailable").await;
    let sink = sink(&endpoint);

    sink.send(Event::new(EventType::ProductViewed).with("product_id", "p-1")).await;
    let result = sink.flush().await.expect("flush");
    assert!(!result.success);
    assert!(result.error.unwrap_or_default().contains("503"));
    assert_eq!(sink.buffered(), 1);
    // Directory creation failure is tolerated; the file create is what fails.
    assert_eq!(seen.lock().unwrap().len(), 2);
}
