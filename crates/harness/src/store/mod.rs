//! Shared key-value store.
//!
//! The store is the only state shared between the driver and the mock worker.
//! Values are JSON documents serialised as UTF-8 text, so everything written
//! reads back exactly. The list operations back the ledger: `append` is a single
//! atomic store command, never a read-modify-write.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store command failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("key '{key}' holds a value of the wrong kind")]
    WrongType { key: String },

    #[error("invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl StoreError {
    /// Create a wrong type error.
    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType { key: key.into() }
    }
}

/// Escape `text` so that it matches itself literally inside a key pattern.
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        if matches!(character, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

/// Operations the harness needs from the shared store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a JSON value; `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a JSON value, replacing whatever the key held.
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// List keys matching a glob pattern (`*` and `?` wildcards).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<usize, StoreError>;

    /// Atomically append to the list at `key`, returning the list length after the append.
    async fn append(&self, key: &str, value: &Value) -> Result<usize, StoreError>;

    /// Read the list at `key`: its first `limit` entries, or all of them.
    async fn range(&self, key: &str, limit: Option<usize>) -> Result<Vec<Value>, StoreError>;

    /// Check that the store answers.
    async fn ping(&self) -> Result<(), StoreError>;
}
