use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Error;

use super::Store;

/// In-memory store with the same contract as the Redis one. Used by the
/// test suites; TTLs are accepted but not enforced.
#[derive(Clone, Default)]
pub struct MemoryStore {
  entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    MemoryStore::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, Error> {
    self
      .entries
      .lock()
      .map_err(|e| Error::DbError(format!("memory store poisoned: {}", e)))
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, Error> {
    Ok(self.lock()?.get(key).cloned())
  }

  async fn put(&self, key: &str, value: &str) -> Result<(), Error> {
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  async fn put_with_ttl(
    &self,
    key: &str,
    value: &str,
    _ttl_seconds: u64,
  ) -> Result<(), Error> {
    self.put(key, value).await
  }

  async fn delete(&self, key: &str) -> Result<bool, Error> {
    Ok(self.lock()?.remove(key).is_some())
  }

  async fn get_and_delete(&self, key: &str) -> Result<Option<String>, Error> {
    Ok(self.lock()?.remove(key))
  }

  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, Error> {
    let entries = self.lock()?;
    Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
  }

  async fn mput(&self, new_entries: Vec<(String, String)>) -> Result<(), Error> {
    let mut entries = self.lock()?;
    for (key, value) in new_entries {
      entries.insert(key, value);
    }
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>, Error> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  async fn exists(&self, key: &str) -> Result<bool, Error> {
    Ok(self.lock()?.contains_key(key))
  }
}
