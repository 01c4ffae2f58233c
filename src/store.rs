//! In-memory quarantine store
//!
//! Held messages live for the process lifetime only. The store is the
//! single object shared between proxy sessions and the REST surface,
//! guarded by one mutex; payload bytes are immutable after insert and
//! shared without copying.

use crate::inspect::MessageMeta;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of a held message. Transitions are one-way out of `Held`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Held,
    Approved,
    Discarded,
}

/// One intercepted APPEND, exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeldMessage {
    pub id: String,
    pub meta: MessageMeta,
    #[serde(rename = "content", serialize_with = "as_base64")]
    pub raw: Arc<[u8]>,
    pub status: Disposition,
    pub held_at: DateTime<Utc>,
}

fn as_base64<S: Serializer>(raw: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(raw))
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("no held message with that id")]
    NotFound,
    #[error("message already resolved")]
    AlreadyResolved,
}

/// Concurrent map from opaque identifier to held message.
#[derive(Clone, Default)]
pub struct QuarantineStore {
    inner: Arc<Mutex<HashMap<String, HeldMessage>>>,
}

impl QuarantineStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly intercepted message and return its identifier.
    pub fn insert(&self, raw: Vec<u8>, meta: MessageMeta) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let message = HeldMessage {
            id: id.clone(),
            meta,
            raw: raw.into(),
            status: Disposition::Held,
            held_at: Utc::now(),
        };
        self.inner
            .lock()
            .expect("quarantine store lock")
            .insert(id.clone(), message);
        id
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<HeldMessage> {
        self.inner
            .lock()
            .expect("quarantine store lock")
            .get(id)
            .cloned()
    }

    /// Snapshot of every record, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<HeldMessage> {
        self.inner
            .lock()
            .expect("quarantine store lock")
            .values()
            .cloned()
            .collect()
    }

    /// Resolve a held message. Only `Held` records may transition; a
    /// second resolution is a conflict.
    pub fn set_disposition(
        &self,
        id: &str,
        disposition: Disposition,
    ) -> Result<HeldMessage, StoreError> {
        let mut map = self.inner.lock().expect("quarantine store lock");
        let message = map.get_mut(id).ok_or(StoreError::NotFound)?;
        if message.status != Disposition::Held {
            return Err(StoreError::AlreadyResolved);
        }
        message.status = disposition;
        Ok(message.clone())
    }

    pub fn remove(&self, id: &str) -> Option<HeldMessage> {
        self.inner
            .lock()
            .expect("quarantine store lock")
            .remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("quarantine store lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
