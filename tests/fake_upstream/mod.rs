#![allow(dead_code)]

//! In-process fake upstream IMAP server for integration testing
//!
//! The proxy under test treats the upstream as an opaque IMAP4rev1
//! peer, so the fake only needs to be a generic tag-echoing server:
//! it greets, grants `+` continuations for announced literals, absorbs
//! the literal octets, and completes every command with a tagged OK.
//!
//! Every byte the proxy writes to it is recorded, which is what the
//! transparency assertions are built on: a held APPEND must leave the
//! recording empty, a delivered one must reproduce the client's bytes
//! exactly.

use imap_quarantine_proxy::command::{CommandLine, trailing_literal};
use imap_quarantine_proxy::line::LineReader;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// A fake upstream IMAP server on localhost with an OS-assigned port.
pub struct FakeUpstream {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<u8>>>,
    /// Handle to the accept loop so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeUpstream {
    /// Start a well-behaved upstream.
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Start an upstream that closes right after its greeting, for
    /// testing clean session termination on upstream EOF.
    pub async fn start_with(drop_after_greeting: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&received);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move {
                    handle_connection(stream, &recorder, drop_after_greeting).await;
                });
            }
        });

        Self {
            addr,
            received,
            _handle: handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Everything the proxy has written to this upstream so far,
    /// across all connections.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

async fn handle_connection(
    stream: TcpStream,
    received: &Mutex<Vec<u8>>,
    drop_after_greeting: bool,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = LineReader::new(read);

    if write
        .write_all(b"* OK IMAP4rev1 Fake upstream ready\r\n")
        .await
        .is_err()
    {
        return;
    }
    if drop_after_greeting {
        write.shutdown().await.ok();
        return;
    }

    loop {
        let Ok(line) = reader.read_line().await else {
            break;
        };
        if line.is_empty() {
            break;
        }
        received.lock().unwrap().extend_from_slice(&line);

        let cmd = CommandLine::parse(&String::from_utf8_lossy(&line));

        // Absorb announced literals, granting a continuation for each
        // synchronizing one. Continuation lines may chain literals.
        let mut literal = trailing_literal(&cmd.rest);
        while let Some(lit) = literal.take() {
            if lit.sync && write.write_all(b"+ go ahead\r\n").await.is_err() {
                return;
            }
            let Ok(body) = reader.read_exact(lit.len).await else {
                return;
            };
            received.lock().unwrap().extend_from_slice(&body);
            let Ok(rest) = reader.read_line().await else {
                return;
            };
            if rest.is_empty() {
                return;
            }
            received.lock().unwrap().extend_from_slice(&rest);
            literal = trailing_literal(&String::from_utf8_lossy(&rest));
        }

        let tag = &cmd.tag;
        let response = match cmd.verb.as_str() {
            "AUTHENTICATE" => {
                // One challenge/response round, then success.
                if write.write_all(b"+ \r\n").await.is_err() {
                    return;
                }
                let Ok(reply) = reader.read_line().await else {
                    return;
                };
                if reply.is_empty() {
                    return;
                }
                received.lock().unwrap().extend_from_slice(&reply);
                format!("{tag} OK AUTHENTICATE completed\r\n")
            }
            "SELECT" => format!("* 3 EXISTS\r\n{tag} OK [READ-WRITE] SELECT completed\r\n"),
            "LOGOUT" => format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n"),
            verb => format!("{tag} OK {verb} completed\r\n"),
        };
        if write.write_all(response.as_bytes()).await.is_err() {
            break;
        }
        if cmd.verb == "LOGOUT" {
            break;
        }
    }
    write.shutdown().await.ok();
}
