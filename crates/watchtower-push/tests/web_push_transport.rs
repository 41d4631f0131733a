//! End-to-end delivery through the real web push transport against a local
//! push service.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use watchtower_push::{
    NotificationDispatcher, Subscription, SubscriptionKeys, SubscriptionRegistry,
    VapidCredentials,
};

const SERVER_PUBLIC_KEY: &str =
    "BHlhcqR4i8RegfzKgA7tIXt9iTS6CXG8z_3DCYkKSUpgwMNSlZyBKJ9THpSiHsKKyUAmh3vWk3ELvR4TugUK5ok";
const SERVER_PRIVATE_KEY: &str = "zDO2dKZEklSqGvyGcdh3ITP6ZBJCHyXarEmifJ5nleY";
const CLIENT_P256DH: &str =
    "BBvms0EkmaKGL3CwvgoHbpILDKnNJgryxcFgZZad8F8SzvvRiS5P3TKWC4m1TkKIDzggUosotReVTkNJ-gCf9Jg";
const CLIENT_AUTH: &str = "oIM4ABAsKWdXpyOx3CVVAA";

/// Request line path and lowercased headers of one received push.
#[derive(Debug, Clone)]
struct ReceivedPush {
    path: String,
    headers: HashMap<String, String>,
    body_len: usize,
}

/// Minimal push service: `/gone` answers 410, everything else 201.
async fn start_push_service() -> (SocketAddr, Arc<Mutex<Vec<ReceivedPush>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&received);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let log = Arc::clone(&log);
            tokio::spawn(serve_push(stream, log));
        }
    });

    (addr, received)
}

async fn serve_push(stream: TcpStream, log: Arc<Mutex<Vec<ReceivedPush>>>) {
    let _ = read_and_answer(stream, &log).await;
}

/// Records the push before answering so the caller sees it once dispatch returns.
async fn read_and_answer(
    mut stream: TcpStream,
    log: &Mutex<Vec<ReceivedPush>>,
) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let status = if path == "/gone" { "410 Gone" } else { "201 Created" };
    log.lock().unwrap().push(ReceivedPush {
        path,
        headers,
        body_len: buf.len() - header_end,
    });

    let response = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()
}

fn subscription(addr: SocketAddr, path: &str) -> Subscription {
    Subscription {
        endpoint: format!("http://{addr}{path}"),
        keys: SubscriptionKeys {
            p256dh: CLIENT_P256DH.to_string(),
            auth: CLIENT_AUTH.to_string(),
        },
    }
}

fn credentials() -> VapidCredentials {
    VapidCredentials::from_parts(
        Some(SERVER_PUBLIC_KEY),
        Some(SERVER_PRIVATE_KEY),
        Some("ops@example.com"),
    )
    .expect("both keys present")
}

#[test]
fn valid_key_pair_passes_validation() {
    assert!(credentials().validate().is_ok());
}

#[tokio::test]
async fn configure_with_valid_keys_enables_dispatch() {
    let dispatcher =
        NotificationDispatcher::configure(SubscriptionRegistry::new(), Some(credentials()), 60);
    assert!(dispatcher.is_configured());
}

#[tokio::test]
async fn encrypted_delivery_removes_gone_endpoint() {
    let (addr, received) = start_push_service().await;

    let registry = SubscriptionRegistry::new();
    registry.add(subscription(addr, "/gone")).unwrap();
    registry.add(subscription(addr, "/live")).unwrap();
    let dispatcher = NotificationDispatcher::configure(registry.clone(), Some(credentials()), 60);
    assert!(dispatcher.is_configured());

    let result = dispatcher
        .notify_all("Person Detected!", "Motion detected")
        .await
        .expect("dispatch should run");

    assert_eq!(result.sent, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.removed, 1);
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(&format!("http://{addr}/live")));
    assert!(!registry.contains(&format!("http://{addr}/gone")));

    let received = received.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    for push in &received {
        assert_eq!(
            push.headers.get("content-encoding").map(String::as_str),
            Some("aes128gcm"),
            "{}",
            push.path
        );
        assert_eq!(push.headers.get("ttl").map(String::as_str), Some("60"));
        let authorization = push.headers.get("authorization").expect("vapid header");
        assert!(authorization.starts_with("vapid t="), "{authorization}");
        assert!(push.body_len > 0);
    }
}
