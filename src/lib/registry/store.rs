use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("store unreachable: {0}")]
    Transport(String),

    #[error("store returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid record: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Hierarchical key-value store with optional per-key expiration.
///
/// Keys are slash-separated paths. Writes are last-writer-wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Creates a directory node. Fails with `AlreadyExists` if it is there.
    async fn create_dir(&self, key: &str) -> StoreResult<()>;

    /// Creates or overwrites `key`. With a ttl the key expires on its own.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Overwrites an existing key. Fails with `NotFound` otherwise.
    async fn update(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<String>;

    /// Values of the direct children of `dir`, ordered by key.
    async fn list(&self, dir: &str) -> StoreResult<Vec<String>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Joins path segments with exactly one slash between them.
pub fn join_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for part in parts {
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        key.push('/');
        key.push_str(part);
    }
    if key.is_empty() {
        key.push('/');
    }
    key
}
