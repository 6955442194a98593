use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::KeyValueStore;

/// Process-local key-value store. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("key-value store lock poisoned"))
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    async fn test_set_get_delete() {
        let store = MemoryKeyValueStore::new();

        assert!(store.get("k").await.expect("get failed").is_none());

        store.set("k", "v1").await.expect("set failed");
        store.set("k", "v2").await.expect("overwrite failed");
        assert_eq!(store.get("k").await.expect("get failed").as_deref(), Some("v2"));
        assert_eq!(store.keys(), vec!["k".to_string()]);

        store.delete("k").await.expect("delete failed");
        store.delete("k").await.expect("second delete failed");
        assert!(store.get("k").await.expect("get failed").is_none());
    }
}
