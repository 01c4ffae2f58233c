//! Proxy configuration

use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Runtime configuration for the proxy, the quarantine policy, and the
/// REST surface.
///
/// Read-only after startup; each session binds one `Arc` snapshot.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream IMAP server host, also used for TLS server-name
    /// verification.
    pub upstream_host: String,
    pub upstream_port: u16,
    /// Use implicit TLS for the upstream connection.
    pub upstream_tls: bool,

    pub listen_host: String,
    /// Cleartext listener port.
    pub unsecure_port: u16,
    /// Implicit-TLS listener port.
    pub secure_port: u16,
    /// PEM certificate chain for the TLS listener. The listener is only
    /// started when both this and `tls_key_file` are set.
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,

    pub quarantine_enabled: bool,
    /// Messages advertising an amount at or above this are held.
    pub min_amount: f64,

    pub api_host: String,
    pub api_port: u16,
    pub accounts_file: PathBuf,
}

impl ProxyConfig {
    /// Load configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `UPSTREAM_IMAP_HOST` (default: `mail.privateemail.com`)
    /// - `UPSTREAM_IMAP_PORT` (default: `993`)
    /// - `UPSTREAM_IMAP_SSL` (default: `true`)
    /// - `LISTEN_HOST` (default: `0.0.0.0`)
    /// - `UNSECURE_PORT` (default: `1143`)
    /// - `SECURE_PORT` (default: `1993`)
    /// - `TLS_CERT_FILE`, `TLS_KEY_FILE` (default: unset, TLS listener off)
    /// - `QUARANTINE_ENABLED` (default: `true`)
    /// - `FILTER_MIN_AMOUNT` (default: `10000.00`)
    /// - `API_HOST` (default: `0.0.0.0`)
    /// - `API_PORT` (default: `8000`)
    /// - `ACCOUNTS_FILE` (default: `accounts.json`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            upstream_host: env_or("UPSTREAM_IMAP_HOST", "mail.privateemail.com"),
            upstream_port: parse_env("UPSTREAM_IMAP_PORT", 993)?,
            upstream_tls: bool_env("UPSTREAM_IMAP_SSL", true),
            listen_host: env_or("LISTEN_HOST", "0.0.0.0"),
            unsecure_port: parse_env("UNSECURE_PORT", 1143)?,
            secure_port: parse_env("SECURE_PORT", 1993)?,
            tls_cert_file: env::var("TLS_CERT_FILE").ok().map(PathBuf::from),
            tls_key_file: env::var("TLS_KEY_FILE").ok().map(PathBuf::from),
            quarantine_enabled: bool_env("QUARANTINE_ENABLED", true),
            min_amount: parse_env("FILTER_MIN_AMOUNT", 10_000.00)?,
            api_host: env_or("API_HOST", "0.0.0.0"),
            api_port: parse_env("API_PORT", 8000)?,
            accounts_file: PathBuf::from(env_or("ACCOUNTS_FILE", "accounts.json")),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn bool_env(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| parse_bool(&v))
}

fn parse_bool(v: &str) -> bool {
    let v = v.trim();
    v.eq_ignore_ascii_case("true") || v == "1"
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
