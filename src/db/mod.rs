pub mod boot_artifacts;
pub mod components;
pub mod memory;
pub mod options;
pub mod redis;
pub mod session_status;
pub mod sessions;
pub mod templates;
pub mod tenant;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

/// One logical database per entity family. The integer value is the
/// database id on the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Database {
  Options = 0,
  Components = 1,
  SessionTemplates = 2,
  Sessions = 3,
  BssTokensBootArtifacts = 4,
  SessionStatus = 5,
}

impl Database {
  pub fn name(&self) -> &'static str {
    match self {
      Database::Options => "options",
      Database::Components => "components",
      Database::SessionTemplates => "session_templates",
      Database::Sessions => "sessions",
      Database::BssTokensBootArtifacts => "bss_tokens_boot_artifacts",
      Database::SessionStatus => "session_status",
    }
  }
}

// For methods that work on multiple entries, the maximum number of keys
// fetched from the store at once.
const DB_ITER_BATCH_SIZE: usize = 500;

/// Key/value store with per-key atomic operations. Values are opaque
/// JSON-encoded strings; the typed wrappers own the encoding.
#[async_trait]
pub trait Store: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, Error>;
  async fn put(&self, key: &str, value: &str) -> Result<(), Error>;
  async fn put_with_ttl(
    &self,
    key: &str,
    value: &str,
    ttl_seconds: u64,
  ) -> Result<(), Error>;
  /// Returns true when the key existed.
  async fn delete(&self, key: &str) -> Result<bool, Error>;
  async fn get_and_delete(&self, key: &str) -> Result<Option<String>, Error>;
  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, Error>;
  async fn mput(&self, entries: Vec<(String, String)>) -> Result<(), Error>;
  /// All current keys, lexically sorted.
  async fn keys(&self) -> Result<Vec<String>, Error>;
  async fn exists(&self, key: &str) -> Result<bool, Error>;
}

/// Serde-aware access to one database. Shared by every entity store.
#[derive(Clone)]
pub struct DbWrapper {
  store: Arc<dyn Store>,
  database: Database,
}

impl DbWrapper {
  pub fn new(store: Arc<dyn Store>, database: Database) -> Self {
    DbWrapper { store, database }
  }

  fn decode<T: DeserializeOwned>(&self, key: &str, data: &str) -> Result<T, Error> {
    serde_json::from_str(data).map_err(|e| {
      Error::DbError(format!(
        "Invalid entry in database {} under key '{}': {}",
        self.database.name(),
        key,
        e
      ))
    })
  }

  pub async fn get_entry<T: DeserializeOwned>(
    &self,
    key: &str,
  ) -> Result<Option<T>, Error> {
    match self.store.get(key).await? {
      Some(data) => Ok(Some(self.decode(key, &data)?)),
      None => Ok(None),
    }
  }

  pub async fn put_entry<T: Serialize>(
    &self,
    key: &str,
    entry: &T,
  ) -> Result<(), Error> {
    self.store.put(key, &serde_json::to_string(entry)?).await
  }

  pub async fn put_entry_with_ttl<T: Serialize>(
    &self,
    key: &str,
    entry: &T,
    ttl_seconds: u64,
  ) -> Result<(), Error> {
    self
      .store
      .put_with_ttl(key, &serde_json::to_string(entry)?, ttl_seconds)
      .await
  }

  pub async fn delete_entry(&self, key: &str) -> Result<bool, Error> {
    self.store.delete(key).await
  }

  pub async fn get_and_delete_entry<T: DeserializeOwned>(
    &self,
    key: &str,
  ) -> Result<Option<T>, Error> {
    match self.store.get_and_delete(key).await? {
      Some(data) => Ok(Some(self.decode(key, &data)?)),
      None => Ok(None),
    }
  }

  pub async fn exists(&self, key: &str) -> Result<bool, Error> {
    self.store.exists(key).await
  }

  pub async fn mput_entries<T: Serialize>(
    &self,
    entries: &[(String, T)],
  ) -> Result<(), Error> {
    if entries.is_empty() {
      return Ok(());
    }
    let mut encoded = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
      encoded.push((key.clone(), serde_json::to_string(entry)?));
    }
    self.store.mput(encoded).await
  }

  /// Omits keys which do not exist in the database.
  pub async fn mget_skip_bad_keys<T: DeserializeOwned>(
    &self,
    keys: &[String],
  ) -> Result<Vec<(String, T)>, Error> {
    let mut items = Vec::new();
    for chunk in keys.chunks(DB_ITER_BATCH_SIZE) {
      let data_list = self.store.mget(chunk).await?;
      for (key, data) in chunk.iter().zip(data_list) {
        if let Some(data) = data {
          items.push((key.clone(), self.decode(key, &data)?));
        }
      }
    }
    Ok(items)
  }

  /// Every item in the database in lexical key order. Keys lexically <=
  /// `start_after_key` are skipped; `specific_keys` restricts the scan to
  /// the given keys.
  pub async fn iter_items<T: DeserializeOwned>(
    &self,
    start_after_key: Option<&str>,
    specific_keys: Option<&[String]>,
  ) -> Result<Vec<(String, T)>, Error> {
    let mut keys = self.store.keys().await?;
    if let Some(specific) = specific_keys {
      keys.retain(|key| specific.contains(key));
    }
    if let Some(start_after) = start_after_key {
      keys.retain(|key| key.as_str() > start_after);
    }
    self.mget_skip_bad_keys(&keys).await
  }

  pub async fn get_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, Error> {
    Ok(
      self
        .iter_items(None, None)
        .await?
        .into_iter()
        .map(|(_, entry)| entry)
        .collect(),
    )
  }

  /// Get all entries after passing them through the specified filter
  /// (discarding any for which the filter returns None). If `page_size` is
  /// non-zero the returned list is truncated to at most that many items.
  pub async fn get_all_filtered<T, Out>(
    &self,
    filter_func: impl Fn(T) -> Option<Out>,
    start_after_key: Option<&str>,
    page_size: usize,
  ) -> Result<Vec<Out>, Error>
  where
    T: DeserializeOwned,
  {
    let mut filtered = Vec::new();
    for (_, entry) in self.iter_items::<T>(start_after_key, None).await? {
      if let Some(out) = filter_func(entry) {
        filtered.push(out);
        if page_size > 0 && filtered.len() >= page_size {
          break;
        }
      }
    }
    Ok(filtered)
  }

  /// Raw iteration for the migration job: only JSON decoding, no further
  /// data processing.
  pub async fn iter_items_raw(
    &self,
  ) -> Result<Vec<(String, serde_json::Value)>, Error> {
    self.iter_items(None, None).await
  }
}

/// The full set of entity stores, one per logical database.
#[derive(Clone)]
pub struct Stores {
  pub options: options::OptionsStore,
  pub components: components::ComponentStore,
  pub session_templates: templates::TemplateStore,
  pub sessions: sessions::SessionStore,
  pub boot_artifacts: boot_artifacts::BootArtifactsStore,
  pub session_status: session_status::SessionStatusStore,
}

impl Stores {
  pub async fn redis(host: &str, port: u16) -> Result<Self, Error> {
    let open = |database: Database| redis::RedisStore::new(host, port, database);
    Ok(Stores {
      options: options::OptionsStore::new(Arc::new(
        open(Database::Options).await?,
      )),
      components: components::ComponentStore::new(Arc::new(
        open(Database::Components).await?,
      )),
      session_templates: templates::TemplateStore::new(Arc::new(
        open(Database::SessionTemplates).await?,
      )),
      sessions: sessions::SessionStore::new(Arc::new(
        open(Database::Sessions).await?,
      )),
      boot_artifacts: boot_artifacts::BootArtifactsStore::new(Arc::new(
        open(Database::BssTokensBootArtifacts).await?,
      )),
      session_status: session_status::SessionStatusStore::new(Arc::new(
        open(Database::SessionStatus).await?,
      )),
    })
  }

  /// Every store backed by its own in-memory map. Test fixture.
  pub fn memory() -> Self {
    Stores {
      options: options::OptionsStore::new(Arc::new(memory::MemoryStore::new())),
      components: components::ComponentStore::new(Arc::new(
        memory::MemoryStore::new(),
      )),
      session_templates: templates::TemplateStore::new(Arc::new(
        memory::MemoryStore::new(),
      )),
      sessions: sessions::SessionStore::new(Arc::new(
        memory::MemoryStore::new(),
      )),
      boot_artifacts: boot_artifacts::BootArtifactsStore::new(Arc::new(
        memory::MemoryStore::new(),
      )),
      session_status: session_status::SessionStatusStore::new(Arc::new(
        memory::MemoryStore::new(),
      )),
    }
  }
}
