#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! IMAP quarantine proxy daemon

use clap::Parser;
use imap_quarantine_proxy::{AccountStore, ApiServer, Proxy, ProxyConfig, QuarantineStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "quarantine-proxy")]
#[command(about = "Transparent IMAP proxy that quarantines messages advertising large amounts")]
struct Args {
    /// Load environment variables from this file instead of `.env`
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Some(path) = &args.env_file {
        dotenvy::from_path(path)?;
    }

    let config = Arc::new(ProxyConfig::from_env()?);
    info!(
        upstream = %format!("{}:{}", config.upstream_host, config.upstream_port),
        tls = config.upstream_tls,
        quarantine = config.quarantine_enabled,
        threshold = config.min_amount,
        "starting"
    );

    let store = QuarantineStore::new();
    let accounts = Arc::new(AccountStore::open(config.accounts_file.clone())?);

    let api = ApiServer::bind(
        &config.api_host,
        config.api_port,
        store.clone(),
        accounts,
    )
    .await?;
    let proxy = Proxy::bind(Arc::clone(&config), store).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    proxy.shutdown(SHUTDOWN_GRACE).await;
    api.shutdown().await;
    Ok(())
}
