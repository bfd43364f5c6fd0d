//! In-memory store for tests and one-shot runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{KeyValueStore, KvError, KvValue};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, KvValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KvValue>, KvError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<KvValue>>, KvError> {
        let map = self.entries.read().await;
        Ok(keys.iter().map(|k| map.get(k).cloned()).collect())
    }

    async fn put_many(&self, entries: Vec<(String, KvValue)>) -> Result<(), KvError> {
        let mut map = self.entries.write().await;
        map.extend(entries);
        Ok(())
    }
}
