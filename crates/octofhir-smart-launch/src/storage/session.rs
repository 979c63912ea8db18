//! Session store trait.
//!
//! A narrow key/value view of the host framework's browser session. The
//! launch session keeps all of its state under fixed string keys so any
//! session mechanism (signed cookies, Redis, a database row) can back it.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::SmartResult;

/// Key/value storage scoped to one browser session.
///
/// # Atomicity
///
/// `compare_and_set` must be atomic with respect to concurrent requests on
/// the same session. Two duplicated callbacks racing to advance the launch
/// status rely on it so that exactly one of them wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get(&self, key: &str) -> SmartResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn set(&self, key: &str, value: String) -> SmartResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn remove(&self, key: &str) -> SmartResult<()>;

    /// Atomically replace the value under `key` with `new` if it currently
    /// equals `expected`.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the value was swapped
    /// - `Ok(false)` if the current value differs or is absent
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn compare_and_set(&self, key: &str, expected: &str, new: String) -> SmartResult<bool>;
}

/// Session store held in process memory.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored entry.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> SmartResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> SmartResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SmartResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn compare_and_set(&self, key: &str, expected: &str, new: String) -> SmartResult<bool> {
        let mut values = self.values.write().await;
        match values.get_mut(key) {
            Some(current) if current == expected => {
                *current = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
