//! Cleartext and implicit-TLS accept loops
//!
//! Each accepted socket becomes one session task. The TLS listener is
//! only bound when certificate and key paths are configured; a failed
//! TLS handshake terminates that session alone.

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::session::{self, BoxStream};
use crate::store::QuarantineStore;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Both proxy listeners plus their shutdown handle.
pub struct Proxy {
    plain_addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl Proxy {
    /// Bind the cleartext listener and, when certificate and key paths
    /// are configured, the implicit-TLS listener, then start accepting.
    pub async fn bind(config: Arc<ProxyConfig>, store: QuarantineStore) -> Result<Self> {
        let (shutdown, signal) = watch::channel(false);
        let mut loops = Vec::new();

        let plain =
            TcpListener::bind((config.listen_host.as_str(), config.unsecure_port)).await?;
        let plain_addr = plain.local_addr()?;
        info!("IMAP proxy listening on {plain_addr}");
        loops.push(tokio::spawn(accept_loop(
            plain,
            None,
            Arc::clone(&config),
            store.clone(),
            signal.clone(),
        )));

        let tls_addr = match (&config.tls_cert_file, &config.tls_key_file) {
            (Some(cert), Some(key)) => {
                let acceptor = tls_acceptor(cert, key)?;
                let tls =
                    TcpListener::bind((config.listen_host.as_str(), config.secure_port)).await?;
                let addr = tls.local_addr()?;
                info!("IMAP proxy listening on {addr} (TLS)");
                loops.push(tokio::spawn(accept_loop(
                    tls,
                    Some(acceptor),
                    Arc::clone(&config),
                    store,
                    signal,
                )));
                Some(addr)
            }
            _ => None,
        };

        Ok(Self {
            plain_addr,
            tls_addr,
            shutdown,
            loops,
        })
    }

    /// Address of the cleartext listener (useful with an OS-assigned
    /// port).
    #[must_use]
    pub const fn plain_addr(&self) -> SocketAddr {
        self.plain_addr
    }

    #[must_use]
    pub const fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    /// Stop accepting and let in-flight sessions drain, bounded by
    /// `grace`.
    pub async fn shutdown(self, grace: Duration) {
        self.shutdown.send(true).ok();
        let drain = async {
            for handle in self.loops {
                handle.await.ok();
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("shutdown grace period expired with sessions still active");
        }
    }
}

/// Build a TLS acceptor from PEM certificate chain and private key
/// files.
fn tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<std::io::Result<Vec<_>>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| Error::Tls(format!("No private key found in {}", key_path.display())))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    config: Arc<ProxyConfig>,
    store: QuarantineStore,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else {
                    break;
                };
                debug!(%peer, "accepted connection");

                let acceptor = acceptor.clone();
                let config = Arc::clone(&config);
                let store = store.clone();
                sessions.spawn(async move {
                    let client: BoxStream = match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls) => Box::new(tls),
                            Err(e) => {
                                warn!(%peer, "TLS accept failed: {e}");
                                return;
                            }
                        },
                        None => Box::new(stream),
                    };
                    match session::run(client, config, store).await {
                        Ok(()) => debug!(%peer, "session finished"),
                        Err(e) => info!(%peer, "session ended: {e}"),
                    }
                });
            }
            _ = shutdown.changed() => break,
        }

        // Reap sessions that finished on their own.
        while sessions.try_join_next().is_some() {}
    }

    drop(listener);
    while sessions.join_next().await.is_some() {}
}
