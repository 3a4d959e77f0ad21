//! Session key-value storage consumed by the token cache.
//!
//! The cache never assumes a storage technology. It only needs string keys
//! and string values with session lifetime, plus a key listing so sign-out
//! can sweep everything under its prefix. One `SessionStore` instance is one
//! user session.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

/// Host-provided session storage.
///
/// Every method may fail with `TokenCacheError::Store`; callers propagate
/// that error rather than guessing at the session's contents.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Lists every key currently held by the session.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-process session store backed by a `HashMap`.
///
/// Suitable for single-process hosts and for tests. The map sits behind an
/// async mutex that is held only for the duration of a single operation.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored, regardless of prefix.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns `true` when the session holds no keys at all.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}
