use std::sync::Arc;

use crate::{error::Error, session::status::SessionExtendedStatus};

use super::{tenant::get_tenant_aware_key, Database, DbWrapper, Store};

/// Extended-status snapshots saved when a session completes, keyed like the
/// session itself.
#[derive(Clone)]
pub struct SessionStatusStore {
  db: DbWrapper,
}

impl SessionStatusStore {
  pub fn new(store: Arc<dyn Store>) -> Self {
    SessionStatusStore {
      db: DbWrapper::new(store, Database::SessionStatus),
    }
  }

  pub fn wrapper(&self) -> &DbWrapper {
    &self.db
  }

  pub async fn get(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<Option<SessionExtendedStatus>, Error> {
    self.db.get_entry(&get_tenant_aware_key(name, tenant)).await
  }

  pub async fn put(
    &self,
    name: &str,
    tenant: Option<&str>,
    status: &SessionExtendedStatus,
  ) -> Result<(), Error> {
    self
      .db
      .put_entry(&get_tenant_aware_key(name, tenant), status)
      .await
  }

  pub async fn delete(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<bool, Error> {
    self
      .db
      .delete_entry(&get_tenant_aware_key(name, tenant))
      .await
  }
}
