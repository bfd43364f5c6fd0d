//! Key-value persistence behind the metadata cache and installed-release records.
//!
//! The cache only needs string and integer values keyed by `(app, field)`
//! strings. `put_many` writes a batch atomically so concurrent stores for the
//! same app are last-writer-wins and never interleave field by field.

mod memory;
mod sqlite;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A value stored under one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    Text(String),
    Long(i64),
}

impl KvValue {
    fn type_name(&self) -> &'static str {
        match self {
            KvValue::Text(_) => "text",
            KvValue::Long(_) => "integer",
        }
    }

    /// The text held under `key`, or `WrongType`.
    pub fn into_text(self, key: &str) -> Result<String, KvError> {
        match self {
            KvValue::Text(s) => Ok(s),
            other => Err(KvError::WrongType {
                key: key.to_string(),
                expected: "text",
                found: other.type_name(),
            }),
        }
    }

    /// The integer held under `key`, or `WrongType`.
    pub fn into_long(self, key: &str) -> Result<i64, KvError> {
        match self {
            KvValue::Long(n) => Ok(n),
            other => Err(KvError::WrongType {
                key: key.to_string(),
                expected: "integer",
                found: other.type_name(),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key '{key}' holds a {found} value, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("malformed store reply: {0}")]
    Malformed(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KvValue>, KvError>;

    /// Read several keys as one snapshot; results are in `keys` order. A
    /// concurrent `put_many` is seen entirely or not at all.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<KvValue>>, KvError>;

    /// Write all entries or none of them.
    async fn put_many(&self, entries: Vec<(String, KvValue)>) -> Result<(), KvError>;

    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
        self.get(key).await?.map(|v| v.into_text(key)).transpose()
    }

    async fn get_long(&self, key: &str) -> Result<Option<i64>, KvError> {
        self.get(key).await?.map(|v| v.into_long(key)).transpose()
    }

    async fn put_string(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.put_many(vec![(key.to_string(), KvValue::Text(value.to_string()))])
            .await
    }

    async fn put_long(&self, key: &str, value: i64) -> Result<(), KvError> {
        self.put_many(vec![(key.to_string(), KvValue::Long(value))])
            .await
    }
}
