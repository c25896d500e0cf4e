use std::sync::Arc;

use crate::{
  common::utils::get_current_timestamp,
  component::{BootArtifacts, TimestampedBootArtifacts},
  error::Error,
};

use super::{Database, DbWrapper, Store};

/// Cache mapping BSS referral tokens to the boot artifacts the token was
/// issued for. Entries expire with the component actual-state TTL, since a
/// token older than that can no longer be trusted to describe the node.
#[derive(Clone)]
pub struct BootArtifactsStore {
  db: DbWrapper,
}

impl BootArtifactsStore {
  pub fn new(store: Arc<dyn Store>) -> Self {
    BootArtifactsStore {
      db: DbWrapper::new(store, Database::BssTokensBootArtifacts),
    }
  }

  pub fn wrapper(&self) -> &DbWrapper {
    &self.db
  }

  pub async fn record(
    &self,
    token: &str,
    boot_artifacts: &BootArtifacts,
    ttl_seconds: u64,
  ) -> Result<(), Error> {
    let entry = TimestampedBootArtifacts {
      boot_artifacts: boot_artifacts.clone(),
      timestamp: get_current_timestamp(),
    };
    self.db.put_entry_with_ttl(token, &entry, ttl_seconds).await
  }

  /// Translate an observed bss_token back into boot artifacts.
  pub async fn get(&self, token: &str) -> Result<BootArtifacts, Error> {
    let entry: Option<TimestampedBootArtifacts> =
      self.db.get_entry(token).await?;
    entry
      .map(|entry| entry.boot_artifacts)
      .ok_or_else(|| Error::BssTokenUnknown(token.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use crate::db::memory::MemoryStore;

  use super::*;

  #[tokio::test]
  async fn test_record_and_translate() {
    let cache = BootArtifactsStore::new(Arc::new(MemoryStore::new()));
    let artifacts = BootArtifacts {
      kernel: "s3://bi/img1/kernel".to_string(),
      kernel_parameters: "console=ttyS0".to_string(),
      initrd: "s3://bi/img1/initrd".to_string(),
    };
    cache.record("token-1", &artifacts, 14400).await.unwrap();
    assert_eq!(cache.get("token-1").await.unwrap(), artifacts);
    assert!(matches!(
      cache.get("token-2").await,
      Err(Error::BssTokenUnknown(_))
    ));
  }
}
