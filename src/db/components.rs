use std::sync::Arc;

use crate::{
  component::{set_last_updated, update_component_record, Component},
  error::Error,
};

use super::{Database, DbWrapper, Store};

/// Component records are keyed by xname; they are global, not
/// tenant-scoped.
#[derive(Clone)]
pub struct ComponentStore {
  db: DbWrapper,
}

impl ComponentStore {
  pub fn new(store: Arc<dyn Store>) -> Self {
    ComponentStore {
      db: DbWrapper::new(store, Database::Components),
    }
  }

  pub fn wrapper(&self) -> &DbWrapper {
    &self.db
  }

  pub async fn get(&self, id: &str) -> Result<Option<Component>, Error> {
    self.db.get_entry(id).await
  }

  pub async fn get_or_err(&self, id: &str) -> Result<Component, Error> {
    self
      .get(id)
      .await?
      .ok_or_else(|| Error::ComponentNotFound(id.to_string()))
  }

  pub async fn exists(&self, id: &str) -> Result<bool, Error> {
    self.db.exists(id).await
  }

  /// Full replace. Timestamps the state sections present in the record.
  pub async fn put(&self, component: &Component) -> Result<Component, Error> {
    let mut record = component.clone();
    set_last_updated(&mut record);
    self.db.put_entry(&record.id.clone(), &record).await?;
    Ok(record)
  }

  pub async fn mput(&self, components: &[Component]) -> Result<(), Error> {
    let mut entries = Vec::with_capacity(components.len());
    for component in components {
      let mut record = component.clone();
      set_last_updated(&mut record);
      entries.push((record.id.clone(), record));
    }
    self.db.mput_entries(&entries).await
  }

  pub async fn delete(&self, id: &str) -> Result<(), Error> {
    if !self.db.delete_entry(id).await? {
      return Err(Error::ComponentNotFound(id.to_string()));
    }
    Ok(())
  }

  /// Merge a patch into the stored record and write it back.
  pub async fn update(&self, patch: &Component) -> Result<Component, Error> {
    let mut record = self.get_or_err(&patch.id).await?;
    let mut patch = patch.clone();
    set_last_updated(&mut patch);
    update_component_record(&mut record, &patch);
    self.db.put_entry(&record.id.clone(), &record).await?;
    Ok(record)
  }

  /// Batched update helper used by the operators: merge each patch into its
  /// record. Patches for unknown components are skipped with a warning so a
  /// single deleted node cannot wedge a whole pass.
  pub async fn update_all(
    &self,
    patches: &[Component],
  ) -> Result<Vec<Component>, Error> {
    let mut updated = Vec::with_capacity(patches.len());
    for patch in patches {
      match self.update(patch).await {
        Ok(component) => updated.push(component),
        Err(Error::ComponentNotFound(id)) => {
          log::warn!("Skipping update for unknown component {}", id);
        }
        Err(e) => return Err(e),
      }
    }
    Ok(updated)
  }

  pub async fn get_all(&self) -> Result<Vec<Component>, Error> {
    self.db.get_all().await
  }

  pub async fn mget_skip_bad_keys(
    &self,
    ids: &[String],
  ) -> Result<Vec<Component>, Error> {
    Ok(
      self
        .db
        .mget_skip_bad_keys(ids)
        .await?
        .into_iter()
        .map(|(_, component)| component)
        .collect(),
    )
  }

  /// Filtered listing in lexical id order, with optional paging.
  pub async fn get_all_filtered(
    &self,
    filter_func: impl Fn(Component) -> Option<Component>,
    start_after_id: Option<&str>,
    page_size: usize,
  ) -> Result<Vec<Component>, Error> {
    self
      .db
      .get_all_filtered(filter_func, start_after_id, page_size)
      .await
  }
}
