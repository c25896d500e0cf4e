use std::sync::Arc;

use crate::{error::Error, options::OptionsUpdate};

use super::{Database, DbWrapper, Store};

const OPTIONS_KEY: &str = "options";

/// The options database holds a single entry with the sparse overrides of
/// the code-level defaults.
#[derive(Clone)]
pub struct OptionsStore {
  db: DbWrapper,
}

impl OptionsStore {
  pub fn new(store: Arc<dyn Store>) -> Self {
    OptionsStore {
      db: DbWrapper::new(store, Database::Options),
    }
  }

  pub fn wrapper(&self) -> &DbWrapper {
    &self.db
  }

  pub async fn get(&self) -> Result<Option<OptionsUpdate>, Error> {
    self.db.get_entry(OPTIONS_KEY).await
  }

  pub async fn put(&self, update: &OptionsUpdate) -> Result<(), Error> {
    self.db.put_entry(OPTIONS_KEY, update).await
  }

  /// Merge the patch into the stored overrides.
  pub async fn patch(
    &self,
    patch: &OptionsUpdate,
  ) -> Result<OptionsUpdate, Error> {
    let mut update = self.get().await?.unwrap_or_default();
    update.merge(patch);
    self.put(&update).await?;
    Ok(update)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use crate::db::memory::MemoryStore;

  use super::*;

  #[tokio::test]
  async fn test_patch_preserves_other_overrides() {
    let options = OptionsStore::new(Arc::new(MemoryStore::new()));
    options
      .put(&OptionsUpdate {
        polling_frequency: Some(60),
        ..Default::default()
      })
      .await
      .unwrap();
    let merged = options
      .patch(&OptionsUpdate {
        reject_nids: Some(true),
        ..Default::default()
      })
      .await
      .unwrap();
    assert_eq!(merged.polling_frequency, Some(60));
    assert_eq!(merged.reject_nids, Some(true));
  }
}
