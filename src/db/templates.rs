use std::sync::Arc;

use crate::{error::Error, template::SessionTemplate};

use super::{tenant::get_tenant_aware_key, Database, DbWrapper, Store};

/// Session templates are keyed tenant-aware by name.
#[derive(Clone)]
pub struct TemplateStore {
  db: DbWrapper,
}

impl TemplateStore {
  pub fn new(store: Arc<dyn Store>) -> Self {
    TemplateStore {
      db: DbWrapper::new(store, Database::SessionTemplates),
    }
  }

  pub fn wrapper(&self) -> &DbWrapper {
    &self.db
  }

  pub async fn get(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<Option<SessionTemplate>, Error> {
    self.db.get_entry(&get_tenant_aware_key(name, tenant)).await
  }

  pub async fn get_or_err(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<SessionTemplate, Error> {
    self
      .get(name, tenant)
      .await?
      .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
  }

  pub async fn exists(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<bool, Error> {
    self.db.exists(&get_tenant_aware_key(name, tenant)).await
  }

  pub async fn put(&self, template: &SessionTemplate) -> Result<(), Error> {
    let key =
      get_tenant_aware_key(&template.name, template.tenant.as_deref());
    self.db.put_entry(&key, template).await
  }

  /// Delete and return the stored template in one atomic step.
  pub async fn delete(
    &self,
    name: &str,
    tenant: Option<&str>,
  ) -> Result<SessionTemplate, Error> {
    self
      .db
      .get_and_delete_entry(&get_tenant_aware_key(name, tenant))
      .await?
      .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
  }

  pub async fn get_all(&self) -> Result<Vec<SessionTemplate>, Error> {
    self.db.get_all().await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use crate::db::memory::MemoryStore;

  use super::*;

  #[tokio::test]
  async fn test_put_get_delete() {
    let templates = TemplateStore::new(Arc::new(MemoryStore::new()));
    let template = SessionTemplate {
      name: "t1".to_string(),
      ..Default::default()
    };
    templates.put(&template).await.unwrap();
    assert!(templates.get("t1", None).await.unwrap().is_some());
    templates.delete("t1", None).await.unwrap();
    assert!(templates.get("t1", None).await.unwrap().is_none());
    assert!(matches!(
      templates.get_or_err("t1", None).await,
      Err(Error::TemplateNotFound(_))
    ));
  }
}
