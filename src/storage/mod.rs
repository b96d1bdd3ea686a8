//! Persistence of session identity.
//!
//! The client keeps two entries per client id:
//!
//! - `ltp_thread_id:{client_id}`
//! - `ltp_session_id:{client_id}`
//!
//! Any key-value backend works through the [`Storage`] trait; the default
//! is the process-local [`MemoryStorage`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{LtpError, Result};

/// Minimal key-value contract
pub trait Storage: Send + Sync + fmt::Debug {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; missing keys are not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| LtpError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| LtpError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| LtpError::Storage(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Persisted `(thread_id, session_id)` for one client
#[derive(Debug, Clone)]
pub struct IdentityStore {
    storage: Arc<dyn Storage>,
    thread_key: String,
    session_key: String,
}

impl IdentityStore {
    /// Identity entries for `client_id` in `storage`
    pub fn new(storage: Arc<dyn Storage>, client_id: &str) -> Self {
        Self {
            storage,
            thread_key: format!("ltp_thread_id:{client_id}"),
            session_key: format!("ltp_session_id:{client_id}"),
        }
    }

    /// Persisted thread id
    pub fn thread_id(&self) -> Result<Option<String>> {
        self.storage.get(&self.thread_key)
    }

    /// Persisted session id
    pub fn session_id(&self) -> Result<Option<String>> {
        self.storage.get(&self.session_key)
    }

    /// Persist both ids
    pub fn save(&self, thread_id: &str, session_id: &str) -> Result<()> {
        self.storage.set(&self.thread_key, thread_id)?;
        self.storage.set(&self.session_key, session_id)
    }

    /// Forget both ids
    pub fn clear(&self) -> Result<()> {
        self.storage.remove(&self.thread_key)?;
        self.storage.remove(&self.session_key)
    }
}
