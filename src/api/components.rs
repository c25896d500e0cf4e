use std::collections::HashSet;

use crate::component::{Component, Phase};
use crate::db::Stores;
use crate::error::Error;
use crate::operators::apply_staged::{apply_staged, ApplyStagedResult};

use super::is_valid_tenant_component;

/// Filters accepted by the component listing operation.
#[derive(Debug, Clone, Default)]
pub struct ComponentFilter {
  pub ids: Option<String>,
  pub enabled: Option<bool>,
  pub session: Option<String>,
  pub staged_session: Option<String>,
  pub phase: Option<Phase>,
  pub status: Option<String>,
}

fn matches_filter(component: &Component, filter: &ComponentFilter) -> bool {
  if let Some(enabled) = filter.enabled {
    if component.enabled() != enabled {
      return false;
    }
  }
  if let Some(session) = &filter.session {
    if component.session.as_deref().unwrap_or_default() != session {
      return false;
    }
  }
  if let Some(staged_session) = &filter.staged_session {
    let staged_for = component
      .staged_state
      .as_ref()
      .and_then(|staged| staged.session.as_deref())
      .unwrap_or_default();
    if staged_for != staged_session {
      return false;
    }
  }
  if let Some(phase) = filter.phase {
    if component.phase() != phase {
      return false;
    }
  }
  if let Some(status) = &filter.status {
    if &component.effective_status() != status {
      return false;
    }
  }
  true
}

/// Fill the derived status field so callers see the effective status
/// without having to re-derive it.
fn with_reported_status(mut component: Component) -> Component {
  let effective = component.effective_status();
  let status = component.status.get_or_insert_with(Default::default);
  status.status = Some(effective);
  component
}

pub async fn get_components(
  stores: &Stores,
  filter: &ComponentFilter,
  claims: Option<&HashSet<String>>,
) -> Result<Vec<Component>, Error> {
  let components = match &filter.ids {
    Some(ids) => {
      let id_list: Vec<String> =
        ids.split(',').map(str::to_string).collect();
      stores
        .components
        .mget_skip_bad_keys(&id_list)
        .await?
        .into_iter()
        .filter(|component| matches_filter(component, filter))
        .collect()
    }
    None => {
      stores
        .components
        .get_all_filtered(
          |component| matches_filter(&component, filter).then_some(component),
          None,
          0,
        )
        .await?
    }
  };

  Ok(
    components
      .into_iter()
      .filter(|component| is_valid_tenant_component(&component.id, claims))
      .map(with_reported_status)
      .collect(),
  )
}

pub async fn get_component(
  stores: &Stores,
  component_id: &str,
  claims: Option<&HashSet<String>>,
) -> Result<Component, Error> {
  if !is_valid_tenant_component(component_id, claims) {
    return Err(Error::ComponentNotFound(component_id.to_string()));
  }
  stores
    .components
    .get(component_id)
    .await?
    .map(with_reported_status)
    .ok_or_else(|| Error::ComponentNotFound(component_id.to_string()))
}

/// If there is a BSS token present in the actual state, look up the boot
/// artifacts it stands for and add them to the actual state data.
async fn populate_boot_artifacts(
  stores: &Stores,
  component: &mut Component,
) {
  let token = component
    .actual_state
    .as_ref()
    .and_then(|actual_state| actual_state.bss_token.clone())
    .unwrap_or_default();
  if token.is_empty() {
    return;
  }
  match stores.boot_artifacts.get(&token).await {
    Ok(boot_artifacts) => {
      if let Some(actual_state) = &mut component.actual_state {
        actual_state.boot_artifacts = Some(boot_artifacts);
      }
    }
    Err(Error::BssTokenUnknown(token)) => {
      log::error!("Reported BSS Token: {} is unknown.", token);
    }
    Err(error) => {
      log::error!("Unable to look up BSS token {}: {}", token, error);
    }
  }
}

pub async fn put_component(
  stores: &Stores,
  component_id: &str,
  mut component: Component,
) -> Result<Component, Error> {
  component.id = component_id.to_string();
  populate_boot_artifacts(stores, &mut component).await;
  stores.components.put(&component).await
}

pub async fn put_components(
  stores: &Stores,
  components: Vec<Component>,
) -> Result<Vec<Component>, Error> {
  let mut response = Vec::with_capacity(components.len());
  for mut component in components {
    populate_boot_artifacts(stores, &mut component).await;
    response.push(stores.components.put(&component).await?);
  }
  Ok(response)
}

pub async fn patch_component(
  stores: &Stores,
  component_id: &str,
  mut patch: Component,
) -> Result<Component, Error> {
  patch.id = component_id.to_string();
  if !stores.components.exists(component_id).await? {
    return Err(Error::ComponentNotFound(component_id.to_string()));
  }
  populate_boot_artifacts(stores, &mut patch).await;
  stores.components.update(&patch).await.map(with_reported_status)
}

/// Bulk patch: every target must exist before any patch is applied.
pub async fn patch_components(
  stores: &Stores,
  patches: Vec<Component>,
) -> Result<Vec<Component>, Error> {
  for patch in &patches {
    if !stores.components.exists(&patch.id).await? {
      return Err(Error::ComponentNotFound(patch.id.clone()));
    }
  }
  let mut response = Vec::with_capacity(patches.len());
  for mut patch in patches {
    populate_boot_artifacts(stores, &mut patch).await;
    response.push(stores.components.update(&patch).await?);
  }
  Ok(response)
}

pub async fn delete_component(
  stores: &Stores,
  component_id: &str,
) -> Result<(), Error> {
  stores.components.delete(component_id).await
}

pub async fn post_apply_staged(
  stores: &Stores,
  tenant: Option<&str>,
  xnames: &[String],
) -> Result<ApplyStagedResult, Error> {
  apply_staged(stores, tenant, xnames).await
}

#[cfg(test)]
mod tests {
  use crate::component::{
    BootArtifacts, ComponentActualState, ComponentStatus, STATUS_FAILED,
  };

  use super::*;

  fn artifacts() -> BootArtifacts {
    BootArtifacts {
      kernel: "s3://bi/img1/kernel".to_string(),
      kernel_parameters: "console=ttyS0".to_string(),
      initrd: "s3://bi/img1/initrd".to_string(),
    }
  }

  #[tokio::test]
  async fn test_put_then_get_round_trip() {
    let stores = Stores::memory();
    let component = Component {
      id: "x1".to_string(),
      enabled: Some(true),
      session: Some("s1".to_string()),
      ..Default::default()
    };
    put_component(&stores, "x1", component.clone()).await.unwrap();
    let loaded = get_component(&stores, "x1", None).await.unwrap();
    assert_eq!(loaded.id, component.id);
    assert_eq!(loaded.session, component.session);
    assert_eq!(loaded.enabled, component.enabled);
  }

  #[tokio::test]
  async fn test_get_components_filters() {
    let stores = Stores::memory();
    for (id, enabled, session) in
      [("x1", true, "s1"), ("x2", false, "s1"), ("x3", true, "s2")]
    {
      put_component(
        &stores,
        id,
        Component {
          id: id.to_string(),
          enabled: Some(enabled),
          session: Some(session.to_string()),
          ..Default::default()
        },
      )
      .await
      .unwrap();
    }

    let filter = ComponentFilter {
      enabled: Some(true),
      session: Some("s1".to_string()),
      ..Default::default()
    };
    let components =
      get_components(&stores, &filter, None).await.unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].id, "x1");
  }

  #[tokio::test]
  async fn test_status_filter_uses_effective_status() {
    let stores = Stores::memory();
    put_component(
      &stores,
      "x1",
      Component {
        id: "x1".to_string(),
        status: Some(ComponentStatus {
          status_override: Some(STATUS_FAILED.to_string()),
          ..Default::default()
        }),
        ..Default::default()
      },
    )
    .await
    .unwrap();

    let filter = ComponentFilter {
      status: Some(STATUS_FAILED.to_string()),
      ..Default::default()
    };
    let components =
      get_components(&stores, &filter, None).await.unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(
      components[0].status.as_ref().unwrap().status.as_deref(),
      Some(STATUS_FAILED)
    );
  }

  #[tokio::test]
  async fn test_tenant_claims_restrict_visibility() {
    let stores = Stores::memory();
    put_component(&stores, "x1", Component::new("x1")).await.unwrap();
    let claims = HashSet::from(["x2".to_string()]);
    assert!(matches!(
      get_component(&stores, "x1", Some(&claims)).await,
      Err(Error::ComponentNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_patch_missing_component_is_not_found() {
    let stores = Stores::memory();
    assert!(matches!(
      patch_component(&stores, "x1", Component::new("x1")).await,
      Err(Error::ComponentNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_actual_state_bss_token_resolves_artifacts() {
    let stores = Stores::memory();
    stores
      .boot_artifacts
      .record("token-1", &artifacts(), 14400)
      .await
      .unwrap();
    put_component(&stores, "x1", Component::new("x1")).await.unwrap();

    let patch = Component {
      id: "x1".to_string(),
      actual_state: Some(ComponentActualState {
        bss_token: Some("token-1".to_string()),
        ..Default::default()
      }),
      ..Default::default()
    };
    let updated = patch_component(&stores, "x1", patch).await.unwrap();
    assert_eq!(updated.actual_boot_artifacts(), artifacts());
  }

  #[tokio::test]
  async fn test_unknown_bss_token_leaves_artifacts_alone() {
    let stores = Stores::memory();
    put_component(&stores, "x1", Component::new("x1")).await.unwrap();
    let patch = Component {
      id: "x1".to_string(),
      actual_state: Some(ComponentActualState {
        bss_token: Some("mystery".to_string()),
        ..Default::default()
      }),
      ..Default::default()
    };
    let updated = patch_component(&stores, "x1", patch).await.unwrap();
    assert!(updated.actual_boot_artifacts().is_empty());
    assert_eq!(
      updated.actual_state.unwrap().bss_token.as_deref(),
      Some("mystery")
    );
  }
}
