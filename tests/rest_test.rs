//! Integration tests for the quarantine REST surface.
//!
//! The API server is bound on an OS-assigned port and driven with raw
//! HTTP/1.1 requests over TCP, the same way the operator frontend
//! talks to it.

mod fake_upstream;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use fake_upstream::FakeUpstream;
use imap_quarantine_proxy::line::LineReader;
use imap_quarantine_proxy::{
    AccountStore, ApiServer, MessageMeta, Proxy, ProxyConfig, QuarantineStore,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn start_api(store: QuarantineStore) -> (ApiServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let accounts = Arc::new(AccountStore::open(dir.path().join("accounts.json")).unwrap());
    let api = ApiServer::bind("127.0.0.1", 0, store, accounts)
        .await
        .unwrap();
    (api, dir)
}

/// Issue one HTTP request and return (status, parsed JSON body).
async fn request(
    addr: SocketAddr,
    method: &str,
    path_query: &str,
    body: Option<&str>,
) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = body.unwrap_or("");
    let raw = format!(
        "{method} {path_query} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    );
    stream.write_all(raw.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);

    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let payload = text
        .find("\r\n\r\n")
        .map_or(Value::Null, |i| {
            serde_json::from_str(&text[i + 4..]).unwrap_or(Value::Null)
        });
    (status, payload)
}

fn sample_meta() -> MessageMeta {
    MessageMeta {
        sender: "Billing <billing@example.com>".to_string(),
        subject: "Bill".to_string(),
        amount: 2500.0,
    }
}

// ── Quarantine routes ──────────────────────────────────────────────

#[tokio::test]
async fn listing_is_a_map_keyed_by_id() {
    let store = QuarantineStore::new();
    let id = store.insert(b"raw bytes".to_vec(), sample_meta());
    let (api, _dir) = start_api(store).await;

    let (status, body) = request(api.addr(), "GET", "/quarantine", None).await;
    assert_eq!(status, 200);

    let record = &body[&id];
    assert_eq!(record["id"], id);
    assert_eq!(record["status"], "held");
    assert_eq!(record["meta"]["subject"], "Bill");
    assert_eq!(record["meta"]["sender"], "Billing <billing@example.com>");
    assert_eq!(record["meta"]["amount"], 2500.0);
    assert_eq!(record["content"], BASE64.encode(b"raw bytes"));
}

#[tokio::test]
async fn fetch_single_record_or_404() {
    let store = QuarantineStore::new();
    let id = store.insert(b"raw".to_vec(), sample_meta());
    let (api, _dir) = start_api(store).await;

    let (status, body) = request(api.addr(), "GET", &format!("/quarantine/{id}"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], id);

    let (status, body) = request(api.addr(), "GET", "/quarantine/missing", None).await;
    assert_eq!(status, 404);
    assert_eq!(body["detail"], "Held message not found");
}

#[tokio::test]
async fn approve_is_one_way() {
    let store = QuarantineStore::new();
    let id = store.insert(b"raw".to_vec(), sample_meta());
    let (api, _dir) = start_api(store.clone()).await;

    let approve = format!("/quarantine/{id}/approve");
    let (status, body) = request(api.addr(), "POST", &approve, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "approved");

    // Any second resolution conflicts, in either direction.
    let (status, _) = request(api.addr(), "POST", &approve, None).await;
    assert_eq!(status, 409);
    let (status, _) =
        request(api.addr(), "POST", &format!("/quarantine/{id}/delete"), None).await;
    assert_eq!(status, 409);

    let (_, body) = request(api.addr(), "GET", &format!("/quarantine/{id}"), None).await;
    assert_eq!(body["status"], "approved");
}

#[tokio::test]
async fn delete_discards() {
    let store = QuarantineStore::new();
    let id = store.insert(b"raw".to_vec(), sample_meta());
    let (api, _dir) = start_api(store).await;

    let (status, body) =
        request(api.addr(), "POST", &format!("/quarantine/{id}/delete"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "discarded");

    let (status, _) =
        request(api.addr(), "POST", "/quarantine/missing/approve", None).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let (api, _dir) = start_api(QuarantineStore::new()).await;
    let (status, _) = request(api.addr(), "GET", "/nope", None).await;
    assert_eq!(status, 404);
    let (status, _) = request(api.addr(), "DELETE", "/quarantine", None).await;
    assert_eq!(status, 404);
}

// ── End to end: held APPEND shows up in the API ────────────────────

#[tokio::test]
async fn held_append_flows_through_the_quarantine_lifecycle() {
    let upstream = FakeUpstream::start().await;
    let store = QuarantineStore::new();
    let config = ProxyConfig {
        upstream_host: "127.0.0.1".to_string(),
        upstream_port: upstream.addr().port(),
        upstream_tls: false,
        listen_host: "127.0.0.1".to_string(),
        unsecure_port: 0,
        secure_port: 0,
        tls_cert_file: None,
        tls_key_file: None,
        quarantine_enabled: true,
        min_amount: 1000.0,
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        accounts_file: "unused.json".into(),
    };
    let proxy = Proxy::bind(Arc::new(config), store.clone()).await.unwrap();
    let (api, _dir) = start_api(store).await;

    // Upload an invoice over the threshold through the proxy.
    let message = b"From: billing@example.com\r\n\
         To: bob@example.com\r\n\
         Subject: Bill\r\n\
         \r\n\
         Total: 2500.00\r\n"
        .to_vec();
    let stream = TcpStream::connect(proxy.plain_addr()).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut reader = LineReader::new(read);
    reader.read_line().await.unwrap(); // greeting
    write
        .write_all(format!("a2 APPEND INBOX {{{}}}\r\n", message.len()).as_bytes())
        .await
        .unwrap();
    reader.read_line().await.unwrap(); // continuation
    write.write_all(&message).await.unwrap();
    write.write_all(b"\r\n").await.unwrap();
    let done = reader.read_line().await.unwrap();
    assert_eq!(done, b"a2 OK APPEND completed (held by proxy)\r\n");
    assert!(upstream.received().is_empty());

    // It is listed, with the original bytes intact.
    let (status, listing) = request(api.addr(), "GET", "/quarantine", None).await;
    assert_eq!(status, 200);
    let ids: Vec<&String> = listing.as_object().unwrap().keys().collect();
    assert_eq!(ids.len(), 1);
    let id = ids[0].clone();
    let stored = BASE64
        .decode(listing[&id]["content"].as_str().unwrap())
        .unwrap();
    assert_eq!(stored, message);

    // Approve it and observe the transition stick.
    let (status, body) =
        request(api.addr(), "POST", &format!("/quarantine/{id}/approve"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "approved");
    let (_, body) = request(api.addr(), "GET", &format!("/quarantine/{id}"), None).await;
    assert_eq!(body["status"], "approved");
}

// ── Account routes ─────────────────────────────────────────────────

#[tokio::test]
async fn account_crud_round_trip() {
    let (api, _dir) = start_api(QuarantineStore::new()).await;
    let account = json!({
        "email": "a@example.com",
        "password": "secret",
        "imap_host": "imap.example.com",
        "imap_port": 993,
        "ssl": true,
    })
    .to_string();

    let (status, body) =
        request(api.addr(), "POST", "/api/config/account", Some(&account)).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["account"]["password"], "****");

    // Duplicate email is rejected.
    let (status, body) =
        request(api.addr(), "POST", "/api/config/account", Some(&account)).await;
    assert_eq!(status, 400);
    assert_eq!(body["detail"], "Account already exists");

    // Listing never exposes passwords.
    let (status, body) = request(api.addr(), "GET", "/api/config/accounts", None).await;
    assert_eq!(status, 200);
    assert_eq!(body[0]["email"], "a@example.com");
    assert_eq!(body[0]["password"], "****");

    // Update by email.
    let changed = json!({
        "email": "a@example.com",
        "password": "secret",
        "imap_host": "imap2.example.com",
        "imap_port": 143,
        "ssl": false,
    })
    .to_string();
    let (status, body) =
        request(api.addr(), "PUT", "/api/config/account", Some(&changed)).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let (_, body) = request(api.addr(), "GET", "/api/config/accounts", None).await;
    assert_eq!(body[0]["imap_host"], "imap2.example.com");

    // Delete, idempotently.
    let (status, _) = request(
        api.addr(),
        "DELETE",
        "/api/config/account?email=a@example.com",
        None,
    )
    .await;
    assert_eq!(status, 200);
    let (_, body) = request(api.addr(), "GET", "/api/config/accounts", None).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn invalid_account_payloads_are_rejected() {
    let (api, _dir) = start_api(QuarantineStore::new()).await;

    let (status, body) =
        request(api.addr(), "POST", "/api/config/account", Some("not json")).await;
    assert_eq!(status, 400);
    assert_eq!(body["detail"], "Invalid account payload");

    let missing = json!({"email": "x@example.com"}).to_string();
    let (status, _) =
        request(api.addr(), "PUT", "/api/config/account", Some(&missing)).await;
    assert_eq!(status, 400);

    let (status, body) = request(api.addr(), "DELETE", "/api/config/account", None).await;
    assert_eq!(status, 400);
    assert_eq!(body["detail"], "Missing email parameter");

    let unknown = json!({
        "email": "ghost@example.com",
        "password": "p",
        "imap_host": "h",
        "imap_port": 1,
    })
    .to_string();
    let (status, _) =
        request(api.addr(), "PUT", "/api/config/account", Some(&unknown)).await;
    assert_eq!(status, 404);
}
