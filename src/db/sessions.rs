use std::sync::Arc;

use crate::{
  error::Error,
  session::{update_session_record, Session, SessionPatch},
};

use super::{tenant::get_tenant_aware_key, Database, DbWrapper, Store};

/// Sessions are keyed tenant-aware by name.
#[derive(Clone)]
pub struct SessionStore {
  db: DbWrapper,
}

impl SessionStore {
  pub fn new(store: Arc<dyn Store>) -> Self {
    SessionStore {
      db: DbWrapper::new(store, Database::Sessions),
    }
  }

  pub fn wrapper(&self) -> &DbWrapper {
    &self.db
  }

  pub async fn get(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<Option<Session>, Error> {
    self.db.get_entry(&get_tenant_aware_key(name, tenant)).await
  }

  pub async fn get_or_err(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<Session, Error> {
    self
      .get(name, tenant)
      .await?
      .ok_or_else(|| Error::SessionNotFound(name.to_string()))
  }

  pub async fn exists(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<bool, Error> {
    self.db.exists(&get_tenant_aware_key(name, tenant)).await
  }

  pub async fn put(&self, session: &Session) -> Result<(), Error> {
    let key =
      get_tenant_aware_key(&session.name, session.tenant.as_deref());
    self.db.put_entry(&key, session).await
  }

  pub async fn delete(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<(), Error> {
    if !self
      .db
      .delete_entry(&get_tenant_aware_key(name, tenant))
      .await?
    {
      return Err(Error::SessionNotFound(name.to_string()));
    }
    Ok(())
  }

  pub async fn update(
    &self,
    name: &str,
    tenant: Option<&str>,
    patch: &SessionPatch,
  ) -> Result<Session, Error> {
    let mut session = self.get_or_err(name, tenant).await?;
    update_session_record(&mut session, patch);
    self.put(&session).await?;
    Ok(session)
  }

  pub async fn get_all(&self) -> Result<Vec<Session>, Error> {
    self.db.get_all().await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use crate::db::memory::MemoryStore;
  use crate::session::{Operation, SessionStatusLabel, SessionStatusPatch};

  use super::*;

  fn store() -> SessionStore {
    SessionStore::new(Arc::new(MemoryStore::new()))
  }

  #[tokio::test]
  async fn test_tenant_partitioning() {
    let sessions = store();
    let session = Session::new("uuid-1", Some("tenant-a"), Operation::Boot, "t1");
    sessions.put(&session).await.unwrap();

    assert!(sessions.get("uuid-1", Some("tenant-a")).await.unwrap().is_some());
    assert!(sessions.get("uuid-1", None).await.unwrap().is_none());
    assert!(sessions.get("uuid-1", Some("tenant-b")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_update_flips_status() {
    let sessions = store();
    sessions
      .put(&Session::new("uuid-2", None, Operation::Boot, "t1"))
      .await
      .unwrap();
    let updated = sessions
      .update(
        "uuid-2",
        None,
        &SessionPatch {
          status: Some(SessionStatusPatch {
            status: Some(SessionStatusLabel::Running),
            ..Default::default()
          }),
          ..Default::default()
        },
      )
      .await
      .unwrap();
    assert_eq!(updated.status.status, SessionStatusLabel::Running);
  }

  #[tokio::test]
  async fn test_delete_missing_session() {
    let sessions = store();
    assert!(matches!(
      sessions.delete("nope", None).await,
      Err(Error::SessionNotFound(_))
    ));
  }
}
