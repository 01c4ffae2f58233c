//! Account configuration store
//!
//! A keyed record store over a JSON file, managed through the REST
//! surface. The proxy itself only ever performs the `upstream_for`
//! fingerprint lookup; it never switches upstreams mid-session.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

const MASKED_PASSWORD: &str = "****";

/// One configured mail account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub password: String,
    pub imap_host: String,
    pub imap_port: u16,
    #[serde(default = "default_ssl")]
    pub ssl: bool,
}

const fn default_ssl() -> bool {
    true
}

impl Account {
    /// Copy with the password replaced, for listing.
    #[must_use]
    pub fn masked(&self) -> Self {
        Self {
            password: MASKED_PASSWORD.to_string(),
            ..self.clone()
        }
    }
}

/// Upstream coordinates resolved from an account record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpstream {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Account already exists")]
    Exists,
    #[error("Account not found")]
    NotFound,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON-file-backed account records; the file is rewritten on every
/// mutation.
pub struct AccountStore {
    path: PathBuf,
    accounts: Mutex<Vec<Account>>,
}

impl AccountStore {
    /// Load the store, starting empty when the file does not exist.
    pub fn open(path: PathBuf) -> Result<Self, AccountError> {
        let accounts = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            accounts: Mutex::new(accounts),
        })
    }

    /// All accounts with passwords masked.
    #[must_use]
    pub fn list_masked(&self) -> Vec<Account> {
        self.accounts
            .lock()
            .expect("account store lock")
            .iter()
            .map(Account::masked)
            .collect()
    }

    pub fn add(&self, account: Account) -> Result<Account, AccountError> {
        let mut accounts = self.accounts.lock().expect("account store lock");
        if accounts.iter().any(|a| a.email == account.email) {
            return Err(AccountError::Exists);
        }
        let masked = account.masked();
        accounts.push(account);
        Self::save(&self.path, &accounts)?;
        Ok(masked)
    }

    pub fn update(&self, account: Account) -> Result<(), AccountError> {
        let mut accounts = self.accounts.lock().expect("account store lock");
        let slot = accounts
            .iter_mut()
            .find(|a| a.email == account.email)
            .ok_or(AccountError::NotFound)?;
        *slot = account;
        Self::save(&self.path, &accounts)
    }

    /// Remove by email; removing an unknown email is not an error.
    pub fn remove(&self, email: &str) -> Result<(), AccountError> {
        let mut accounts = self.accounts.lock().expect("account store lock");
        accounts.retain(|a| a.email != email);
        Self::save(&self.path, &accounts)
    }

    /// Fingerprint lookup: the upstream triple configured for `email`.
    #[must_use]
    pub fn upstream_for(&self, email: &str) -> Option<AccountUpstream> {
        self.accounts
            .lock()
            .expect("account store lock")
            .iter()
            .find(|a| a.email == email)
            .map(|a| AccountUpstream {
                host: a.imap_host.clone(),
                port: a.imap_port,
                tls: a.ssl,
            })
    }

    fn save(path: &std::path::Path, accounts: &[Account]) -> Result<(), AccountError> {
        fs::write(path, serde_json::to_string_pretty(accounts)?)?;
        Ok(())
    }
}
