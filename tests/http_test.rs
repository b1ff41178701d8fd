use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use webhook_relay::{
    verify_webhook_request, EventType, InMemoryStorage, MessageData, NewDestination, RelayConfig,
    UserId, VerificationError, WebhookService, SIGNATURE_HEADER,
};

#[derive(Debug, Clone)]
struct Received {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

type Inbox = Arc<Mutex<Vec<Received>>>;

async fn accept(State(inbox): State<Inbox>, headers: HeaderMap, body: Bytes) -> &'static str {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    inbox.lock().unwrap().push(Received {
        headers,
        body: body.to_vec(),
    });
    "received"
}

async fn reject() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn stall() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn chatty() -> String {
    "x".repeat(10_000)
}

async fn receiver() -> (SocketAddr, Inbox) {
    let inbox: Inbox = Arc::default();
    let app = Router::new()
        .route("/hook", post(accept))
        .route("/fail", post(reject))
        .route("/slow", post(stall))
        .route("/chatty", post(chatty))
        .with_state(inbox.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, inbox)
}

fn message() -> MessageData {
    MessageData {
        sender_id: "15550001111".into(),
        sender_phone: "15550001111".into(),
        content: "ping".into(),
        message_id: "ABC123".into(),
        unix_timestamp: 1_700_000_000,
        ..MessageData::default()
    }
}

fn header<'a>(received: &'a Received, name: &str) -> Option<&'a str> {
    received
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn signed_post_verifies_on_the_receiver() {
    let (addr, inbox) = receiver().await;
    let service = WebhookService::new(Arc::new(InMemoryStorage::new()), RelayConfig::default());
    let user = UserId::from("user-1");

    service
        .register_destination(
            &user,
            &NewDestination::new(format!("http://{addr}/hook"), &[EventType::MessageReceived])
                .with_secret("shared-secret"),
        )
        .await
        .unwrap();

    let records = service
        .trigger_message_received(&user, message())
        .await
        .wait()
        .await;
    assert_eq!(records.len(), 1);
    assert!(records[0].success, "{:?}", records[0].error_message);
    assert_eq!(records[0].response_status, 200);
    assert_eq!(records[0].response_body, "received");

    let received = inbox.lock().unwrap()[0].clone();
    assert_eq!(received.body, records[0].payload.as_bytes());
    assert_eq!(header(&received, "content-type"), Some("application/json"));
    assert!(header(&received, "user-agent").unwrap().starts_with("webhook-relay/"));
    assert!(header(&received, SIGNATURE_HEADER).unwrap().starts_with("sha256="));

    let pairs = || received.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()));
    assert_eq!(
        verify_webhook_request(pairs(), &received.body, "shared-secret", SIGNATURE_HEADER),
        Ok(())
    );
    assert_eq!(
        verify_webhook_request(pairs(), &received.body, "wrong-secret", SIGNATURE_HEADER),
        Err(VerificationError::InvalidSignature)
    );
}

#[tokio::test]
async fn non_2xx_is_a_failure_with_status() {
    let (addr, _inbox) = receiver().await;
    let service = WebhookService::new(Arc::new(InMemoryStorage::new()), RelayConfig::default());
    let user = UserId::from("user-1");
    let view = service
        .register_destination(
            &user,
            &NewDestination::new(format!("http://{addr}/fail"), &[EventType::MessageReceived]),
        )
        .await
        .unwrap();

    let record = service.test_destination(&user, view.id).await.unwrap();
    assert!(!record.success);
    assert_eq!(record.response_status, 500);
    assert_eq!(record.response_body, "boom");
    assert_eq!(record.error_message.as_deref(), Some("endpoint returned HTTP 500"));
}

#[tokio::test]
async fn refused_connection_has_no_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = WebhookService::new(Arc::new(InMemoryStorage::new()), RelayConfig::default());
    let user = UserId::from("user-1");
    service
        .register_destination(
            &user,
            &NewDestination::new(format!("http://{addr}/hook"), &[EventType::MessageReceived]),
        )
        .await
        .unwrap();

    let records = service
        .trigger_message_received(&user, message())
        .await
        .wait()
        .await;
    assert!(!records[0].success);
    assert_eq!(records[0].response_status, 0);
    assert!(records[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("failed to send webhook"));
    assert!(records[0].next_retry_at.is_some());
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let (addr, _inbox) = receiver().await;
    let config = RelayConfig {
        request_timeout: Duration::from_millis(200),
        ..RelayConfig::default()
    };
    let service = WebhookService::new(Arc::new(InMemoryStorage::new()), config);
    let user = UserId::from("user-1");
    let view = service
        .register_destination(
            &user,
            &NewDestination::new(format!("http://{addr}/slow"), &[EventType::MessageReceived]),
        )
        .await
        .unwrap();

    let record = service.test_destination(&user, view.id).await.unwrap();
    assert!(!record.success);
    assert_eq!(record.response_status, 0);
    assert!(record
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("request timed out"));
}

#[tokio::test]
async fn long_response_bodies_are_truncated() {
    let (addr, _inbox) = receiver().await;
    let service = WebhookService::new(Arc::new(InMemoryStorage::new()), RelayConfig::default());
    let user = UserId::from("user-1");
    let view = service
        .register_destination(
            &user,
            &NewDestination::new(format!("http://{addr}/chatty"), &[EventType::MessageReceived]),
        )
        .await
        .unwrap();

    let record = service.test_destination(&user, view.id).await.unwrap();
    assert!(record.success);
    assert_eq!(record.response_body.len(), 4096);
}

/// Answers one request with a 200 head and `body`, then holds the socket
/// open without finishing the declared content length.
async fn stalling_endpoint(content_length: usize, body: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {content_length}\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });
    addr
}

async fn test_send(addr: SocketAddr, config: RelayConfig) -> webhook_relay::DeliveryRecord {
    let service = WebhookService::new(Arc::new(InMemoryStorage::new()), config);
    let user = UserId::from("user-1");
    let view = service
        .register_destination(
            &user,
            &NewDestination::new(format!("http://{addr}/hook"), &[EventType::MessageReceived]),
        )
        .await
        .unwrap();
    service.test_destination(&user, view.id).await.unwrap()
}

#[tokio::test]
async fn oversized_body_stops_reading_at_the_cap() {
    let addr = stalling_endpoint(10_000_000, vec![b'y'; 8192]).await;
    let config = RelayConfig {
        request_timeout: Duration::from_secs(5),
        ..RelayConfig::default()
    };

    let started = Instant::now();
    let record = test_send(addr, config).await;

    assert!(started.elapsed() < Duration::from_secs(3), "waited for the whole body");
    assert!(record.success);
    assert_eq!(record.response_status, 200);
    assert_eq!(record.response_body, "y".repeat(4096));
}

#[tokio::test]
async fn body_read_timeout_keeps_status_and_partial_body() {
    let addr = stalling_endpoint(100, b"accepted".to_vec()).await;
    let config = RelayConfig {
        request_timeout: Duration::from_millis(300),
        ..RelayConfig::default()
    };

    let record = test_send(addr, config).await;

    assert!(record.success);
    assert_eq!(record.response_status, 200);
    assert_eq!(record.response_body, "accepted");
    assert_eq!(record.error_message, None);
}
