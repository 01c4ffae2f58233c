//! Quarantine and account REST surface
//!
//! JSON over HTTP/1.1 on a plain tokio listener. The surface is four
//! fixed quarantine routes plus the account CRUD routes; every
//! response closes the connection, so no keep-alive bookkeeping is
//! needed. REST failures map to status codes and never touch proxy
//! sessions.

use crate::accounts::{Account, AccountError, AccountStore};
use crate::error::Result;
use crate::line::LineReader;
use crate::store::{Disposition, QuarantineStore, StoreError};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running REST server handle.
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ApiServer {
    /// Bind and start serving.
    pub async fn bind(
        host: &str,
        port: u16,
        store: QuarantineStore,
        accounts: Arc<AccountStore>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        info!("Quarantine API listening on {addr}");

        let (shutdown, mut signal) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let store = store.clone();
                        let accounts = Arc::clone(&accounts);
                        tokio::spawn(async move {
                            serve_connection(stream, &store, &accounts).await;
                        });
                    }
                    _ = signal.changed() => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) {
        self.shutdown.send(true).ok();
        self.handle.await.ok();
    }
}

struct Request {
    method: String,
    path: String,
    query: Option<String>,
    body: Vec<u8>,
}

async fn serve_connection(stream: TcpStream, store: &QuarantineStore, accounts: &AccountStore) {
    let (read, mut write) = stream.into_split();
    let mut reader = LineReader::new(read);

    match read_request(&mut reader).await {
        Ok(Some(request)) => {
            let (status, body) = route(&request, store, accounts);
            debug!(method = %request.method, path = %request.path, status, "api request");
            write.write_all(&http_response(status, &body)).await.ok();
        }
        Ok(None) => {}
        Err(e) => warn!("api request failed: {e}"),
    }
    write.shutdown().await.ok();
}

/// Parse request line and headers; read the body when a Content-Length
/// is announced.
async fn read_request<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut LineReader<R>,
) -> std::io::Result<Option<Request>> {
    let line = reader.read_line().await?;
    if line.is_empty() {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(&line);
    let mut parts = text.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    let mut content_length = 0;
    loop {
        let header = reader.read_line().await?;
        let header = String::from_utf8_lossy(&header);
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let body = if content_length > 0 {
        reader.read_exact(content_length).await?
    } else {
        Vec::new()
    };

    Ok(Some(Request {
        method,
        path,
        query,
        body,
    }))
}

fn route(request: &Request, store: &QuarantineStore, accounts: &AccountStore) -> (u16, Value) {
    let segments: Vec<&str> = request
        .path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["quarantine"]) => {
            let map: serde_json::Map<String, Value> = store
                .list()
                .into_iter()
                .map(|m| (m.id.clone(), json!(m)))
                .collect();
            (200, Value::Object(map))
        }
        ("GET", ["quarantine", id]) => store
            .get(id)
            .map_or_else(not_found, |message| (200, json!(message))),
        ("POST", ["quarantine", id, "approve"]) => resolve(store, id, Disposition::Approved),
        ("POST", ["quarantine", id, "delete"]) => resolve(store, id, Disposition::Discarded),

        ("GET", ["api", "config", "accounts"]) => (200, json!(accounts.list_masked())),
        ("POST", ["api", "config", "account"]) => match parse_account(&request.body) {
            Some(account) => match accounts.add(account) {
                Ok(masked) => (200, json!({"success": true, "account": masked})),
                Err(AccountError::Exists) => (400, detail("Account already exists")),
                Err(e) => (500, detail(&e.to_string())),
            },
            None => (400, detail("Invalid account payload")),
        },
        ("PUT", ["api", "config", "account"]) => match parse_account(&request.body) {
            Some(account) => match accounts.update(account) {
                Ok(()) => (200, json!({"success": true})),
                Err(AccountError::NotFound) => (404, detail("Account not found")),
                Err(e) => (500, detail(&e.to_string())),
            },
            None => (400, detail("Invalid account payload")),
        },
        ("DELETE", ["api", "config", "account"]) => {
            match query_param(request.query.as_deref(), "email") {
                Some(email) => match accounts.remove(&email) {
                    Ok(()) => (200, json!({"success": true})),
                    Err(e) => (500, detail(&e.to_string())),
                },
                None => (400, detail("Missing email parameter")),
            }
        }

        _ => (404, detail("Not found")),
    }
}

fn resolve(store: &QuarantineStore, id: &str, disposition: Disposition) -> (u16, Value) {
    match store.set_disposition(id, disposition) {
        Ok(message) => (200, json!(message)),
        Err(StoreError::NotFound) => not_found(),
        Err(StoreError::AlreadyResolved) => (409, detail("Message already resolved")),
    }
}

fn not_found() -> (u16, Value) {
    (404, detail("Held message not found"))
}

fn detail(message: &str) -> Value {
    json!({ "detail": message })
}

fn parse_account(body: &[u8]) -> Option<Account> {
    serde_json::from_slice(body).ok()
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

fn http_response(status: u16, body: &Value) -> Vec<u8> {
    let body = body.to_string();
    format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        reason(status),
        body.len(),
    )
    .into_bytes()
}

const fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "",
    }
}
