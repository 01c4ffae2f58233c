//! Per-connection proxy session
//!
//! One task per accepted client, no intra-session concurrency: IMAP is
//! strictly tag-interleaved and the proxy is a linear relay except
//! while it reassembles an APPEND literal. The session owns both
//! sockets exclusively and closes them on every exit path.

use crate::command::{self, CommandLine};
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::inspect;
use crate::line::LineReader;
use crate::policy::{self, Verdict};
use crate::store::QuarantineStore;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// Socket abstraction so cleartext and TLS sessions share one engine.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxStream = Box<dyn Stream>;

/// Coarse protocol state, tracked from forwarded verbs for logging
/// only; the proxy never enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtoState {
    NonAuth,
    Auth,
    Selected,
    Logout,
}

/// Run a session end to end: connect upstream, then relay until either
/// side is done.
pub async fn run(client: BoxStream, config: Arc<ProxyConfig>, store: QuarantineStore) -> Result<()> {
    let upstream = connect_upstream(&config).await?;
    relay(client, upstream, config, store).await
}

/// Drive one session over already-established streams.
pub async fn relay(
    client: BoxStream,
    upstream: BoxStream,
    config: Arc<ProxyConfig>,
    store: QuarantineStore,
) -> Result<()> {
    let (ups_r, ups_w) = tokio::io::split(upstream);
    let (client_r, client_w) = tokio::io::split(client);

    let mut session = Session {
        client_r: LineReader::new(client_r),
        client_w,
        ups_r: LineReader::new(ups_r),
        ups_w,
        config,
        store,
        state: ProtoState::NonAuth,
    };

    let result = session.serve().await;
    session.close().await;
    result
}

/// Open the upstream connection, with implicit TLS and server-name
/// verification against the configured host when required.
pub async fn connect_upstream(config: &ProxyConfig) -> Result<BoxStream> {
    let addr = format!("{}:{}", config.upstream_host, config.upstream_port);
    debug!("Connecting upstream at {addr}");

    let tcp = TcpStream::connect(&addr).await.map_err(Error::UpstreamIo)?;
    if !config.upstream_tls {
        return Ok(Box::new(tcp));
    }

    let mut roots = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| Error::Tls(format!("System trust store: {e}")))?;
    for cert in certs {
        // Platform stores routinely carry a few unparseable entries.
        roots.add(cert).ok();
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.upstream_host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(Box::new(stream))
}

struct Session {
    client_r: LineReader<ReadHalf<BoxStream>>,
    client_w: WriteHalf<BoxStream>,
    ups_r: LineReader<ReadHalf<BoxStream>>,
    ups_w: WriteHalf<BoxStream>,
    config: Arc<ProxyConfig>,
    store: QuarantineStore,
    state: ProtoState,
}

impl Session {
    async fn serve(&mut self) -> Result<()> {
        // Relay the server greeting verbatim before anything else.
        let greeting = self.read_upstream_line().await?;
        self.write_client(&greeting).await?;

        loop {
            let line = self.client_r.read_line().await.map_err(Error::ClientIo)?;
            if line.is_empty() {
                debug!("client closed the connection");
                break;
            }

            let cmd = CommandLine::parse(&String::from_utf8_lossy(&line));
            self.track_state(&cmd.verb);

            match cmd.verb.as_str() {
                "APPEND" => self.handle_append(&line, &cmd).await?,
                "LOGOUT" => {
                    self.forward_and_relay(&line, &cmd).await?;
                    debug!("logout completed");
                    break;
                }
                _ => self.forward_and_relay(&line, &cmd).await?,
            }
        }
        Ok(())
    }

    /// Forward a raw client line upstream, stream any announced
    /// literals transparently, then relay responses until the tagged
    /// completion.
    async fn forward_and_relay(&mut self, raw: &[u8], cmd: &CommandLine) -> Result<()> {
        self.write_upstream(raw).await?;

        if let Some(literal) = command::trailing_literal(&cmd.rest) {
            if self.relay_command_literals(literal, &cmd.tag).await? {
                return Ok(());
            }
        }
        self.relay_until_tagged(&cmd.tag).await
    }

    /// Byte-transparent literal passthrough for commands the proxy does
    /// not inspect (LOGIN with a literal password, SELECT with a
    /// literal mailbox, ...).
    ///
    /// Returns `true` when the upstream rejected the command with its
    /// tagged completion instead of granting a continuation, in which
    /// case the command is already over.
    async fn relay_command_literals(
        &mut self,
        first: command::Literal,
        tag: &str,
    ) -> Result<bool> {
        let mut literal = Some(first);
        while let Some(lit) = literal.take() {
            if lit.sync {
                loop {
                    let line = self.read_upstream_line().await?;
                    self.write_client(&line).await?;
                    if line.starts_with(b"+") {
                        break;
                    }
                    if is_tagged_completion(&line, tag) {
                        return Ok(true);
                    }
                }
            }

            let body = self
                .client_r
                .read_exact(lit.len)
                .await
                .map_err(Error::ClientIo)?;
            self.write_upstream(&body).await?;

            let rest = self.client_r.read_line().await.map_err(Error::ClientIo)?;
            if rest.is_empty() {
                return Err(Error::ClientIo(eof("client closed inside a literal")));
            }
            self.write_upstream(&rest).await?;

            // A continuation line may itself end in another literal;
            // LOGIN commonly sends username and password as two.
            literal = command::trailing_literal(&String::from_utf8_lossy(&rest));
        }
        Ok(false)
    }

    /// APPEND interception: reassemble the message, decide, and either
    /// hold it locally or deliver it upstream byte-for-byte.
    async fn handle_append(&mut self, raw: &[u8], cmd: &CommandLine) -> Result<()> {
        let Some(lit) = command::trailing_literal(&cmd.rest) else {
            // Legacy quoted-string form, or a length we cannot parse:
            // stay transparent and let the upstream answer.
            return self.forward_and_relay(raw, cmd).await;
        };

        if lit.sync {
            self.write_client(b"+ Ready for literal data\r\n").await?;
        }

        let body = self
            .client_r
            .read_exact(lit.len)
            .await
            .map_err(Error::ClientIo)?;
        let tail = self.client_r.read_line().await.map_err(Error::ClientIo)?;
        if tail.is_empty() {
            return Err(Error::ClientIo(eof("client closed inside APPEND")));
        }

        let meta = inspect::inspect(&body);
        match policy::decide(&meta, &self.config) {
            Verdict::Hold => {
                let id = self.store.insert(body, meta.clone());
                info!(
                    id,
                    amount = meta.amount,
                    sender = %meta.sender,
                    subject = %meta.subject,
                    "APPEND held by quarantine"
                );
                let ok = format!("{} OK APPEND completed (held by proxy)\r\n", cmd.tag);
                self.write_client(ok.as_bytes()).await
            }
            Verdict::Deliver => {
                debug!(amount = meta.amount, "APPEND delivered upstream");
                self.write_upstream(raw).await?;
                if lit.sync {
                    // Consume the upstream continuation; the client
                    // already received the one we synthesized.
                    loop {
                        let line = self.read_upstream_line().await?;
                        if line.starts_with(b"+") {
                            break;
                        }
                        self.write_client(&line).await?;
                        if is_tagged_completion(&line, &cmd.tag) {
                            return Ok(());
                        }
                    }
                }
                self.write_upstream(&body).await?;
                self.write_upstream(&tail).await?;
                self.relay_until_tagged(&cmd.tag).await
            }
        }
    }

    /// Relay upstream lines to the client until the tagged completion
    /// for `tag`. Untagged `*` lines pass through; a `+` continuation
    /// requests client data (a SASL exchange round), so the client's
    /// reply line is relayed back before resuming.
    async fn relay_until_tagged(&mut self, tag: &str) -> Result<()> {
        loop {
            let line = self.read_upstream_line().await?;
            self.write_client(&line).await?;
            if is_tagged_completion(&line, tag) {
                return Ok(());
            }
            if line.starts_with(b"+") {
                let reply = self.client_r.read_line().await.map_err(Error::ClientIo)?;
                if reply.is_empty() {
                    return Err(Error::ClientIo(eof("client closed during continuation")));
                }
                self.write_upstream(&reply).await?;
            }
        }
    }

    async fn read_upstream_line(&mut self) -> Result<Vec<u8>> {
        let line = self.ups_r.read_line().await.map_err(Error::UpstreamIo)?;
        if line.is_empty() {
            return Err(Error::UpstreamIo(eof("upstream closed the connection")));
        }
        Ok(line)
    }

    async fn write_client(&mut self, bytes: &[u8]) -> Result<()> {
        self.client_w
            .write_all(bytes)
            .await
            .map_err(Error::ClientIo)?;
        self.client_w.flush().await.map_err(Error::ClientIo)
    }

    async fn write_upstream(&mut self, bytes: &[u8]) -> Result<()> {
        self.ups_w
            .write_all(bytes)
            .await
            .map_err(Error::UpstreamIo)?;
        self.ups_w.flush().await.map_err(Error::UpstreamIo)
    }

    fn track_state(&mut self, verb: &str) {
        let next = match verb {
            "LOGIN" | "AUTHENTICATE" if self.state == ProtoState::NonAuth => ProtoState::Auth,
            "SELECT" | "EXAMINE" if self.state != ProtoState::NonAuth => ProtoState::Selected,
            "LOGOUT" => ProtoState::Logout,
            _ => return,
        };
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Close both sides, tolerating errors in either order.
    async fn close(&mut self) {
        self.client_w.shutdown().await.ok();
        self.ups_w.shutdown().await.ok();
    }
}

fn is_tagged_completion(line: &[u8], tag: &str) -> bool {
    let tag = tag.as_bytes();
    line.len() > tag.len() && line.starts_with(tag) && line[tag.len()] == b' '
}

fn eof(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, message.to_string())
}
