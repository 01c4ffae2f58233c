//! Error types for imap-quarantine-proxy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Client I/O error: {0}")]
    ClientIo(std::io::Error),

    #[error("Upstream I/O error: {0}")]
    UpstreamIo(std::io::Error),

    #[error("Message parsing error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
