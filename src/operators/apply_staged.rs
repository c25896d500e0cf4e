use serde::{Deserialize, Serialize};

use crate::component::{
  Component, ComponentActualState, ComponentDesiredState,
  ComponentLastAction, ComponentStagedState, ACTION_APPLY_STAGED,
};
use crate::db::Stores;
use crate::error::Error;
use crate::session::Operation;

/// Per-xname partition of an applystaged request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplyStagedResult {
  pub succeeded: Vec<String>,
  pub failed: Vec<String>,
  pub ignored: Vec<String>,
}

/// Promote the staged state of the given components to their desired
/// state. Runs on request rather than on a timer.
///
/// Components without a staged session are ignored. Whatever the outcome,
/// the staged session takes ownership of the component and the staged
/// state is cleared.
pub async fn apply_staged(
  stores: &Stores,
  tenant: Option<&str>,
  xnames: &[String],
) -> Result<ApplyStagedResult, Error> {
  let mut result = ApplyStagedResult::default();

  for xname in xnames {
    match apply_staged_component(stores, tenant, xname).await {
      Ok(true) => result.succeeded.push(xname.clone()),
      Ok(false) => result.ignored.push(xname.clone()),
      Err(error) => {
        log::warn!("Unable to apply staged state for {}: {}", xname, error);
        result.failed.push(xname.clone());
      }
    }
  }

  Ok(result)
}

async fn apply_staged_component(
  stores: &Stores,
  tenant: Option<&str>,
  xname: &str,
) -> Result<bool, Error> {
  let component = match stores.components.get(xname).await? {
    Some(component) => component,
    None => return Ok(false),
  };

  let staged_state = component.staged_state.clone().unwrap_or_default();
  let staged_session_id = staged_state.session.clone().unwrap_or_default();
  if staged_session_id.is_empty() {
    return Ok(false);
  }

  let outcome =
    set_state_from_staged(stores, tenant, &staged_state, &staged_session_id)
      .await;

  // For both the successful and failed cases the staged session takes
  // ownership of the component and the staged state is consumed.
  let mut patch = Component {
    id: xname.to_string(),
    session: Some(staged_session_id),
    staged_state: Some(ComponentStagedState::empty()),
    last_action: Some(ComponentLastAction {
      action: Some(ACTION_APPLY_STAGED.to_string()),
      failed: Some(outcome.is_err()),
      last_updated: None,
    }),
    ..Default::default()
  };

  match outcome {
    Ok(state_patch) => {
      patch.desired_state = state_patch.desired_state;
      patch.actual_state = state_patch.actual_state;
      patch.enabled = Some(true);
      stores.components.update(&patch).await?;
      Ok(true)
    }
    Err(error) => {
      patch.error = Some(error.to_string());
      patch.enabled = Some(false);
      stores.components.update(&patch).await?;
      Err(error)
    }
  }
}

/// Validate the staged operation against the staged artifacts and build
/// the desired/actual state portion of the patch.
async fn set_state_from_staged(
  stores: &Stores,
  tenant: Option<&str>,
  staged_state: &ComponentStagedState,
  staged_session_id: &str,
) -> Result<Component, Error> {
  let session = stores
    .sessions
    .get(staged_session_id, tenant)
    .await?
    .ok_or_else(|| {
      Error::Message("Staged session no longer exists".to_string())
    })?;

  let boot_artifacts =
    staged_state.boot_artifacts.clone().unwrap_or_default();

  let mut patch = Component::default();
  match session.operation {
    Operation::Shutdown => {
      if !boot_artifacts.is_empty() {
        return Err(Error::Message(
          "Staged operation is shutdown but boot artifacts have been specified"
            .to_string(),
        ));
      }
    }
    Operation::Boot => {
      if !boot_artifacts.is_complete() {
        return Err(Error::Message(
          "Staged operation is boot but some boot artifacts have not been specified"
            .to_string(),
        ));
      }
    }
    Operation::Reboot => {
      if !boot_artifacts.is_complete() {
        return Err(Error::Message(
          "Staged operation is reboot but some boot artifacts have not been specified"
            .to_string(),
        ));
      }
      patch.actual_state = Some(ComponentActualState::empty());
    }
  }

  patch.desired_state = Some(ComponentDesiredState {
    boot_artifacts: Some(boot_artifacts),
    configuration: Some(
      staged_state.configuration.clone().unwrap_or_default(),
    ),
    ..Default::default()
  });

  Ok(patch)
}

#[cfg(test)]
mod tests {
  use crate::component::BootArtifacts;
  use crate::session::Session;

  use super::*;

  fn artifacts() -> BootArtifacts {
    BootArtifacts {
      kernel: "s3://bi/img1/kernel".to_string(),
      kernel_parameters: "console=ttyS0".to_string(),
      initrd: "s3://bi/img1/initrd".to_string(),
    }
  }

  async fn staged_fixture(operation: Operation) -> Stores {
    let stores = Stores::memory();
    stores
      .sessions
      .put(&Session::new("session-1", None, operation, "t1"))
      .await
      .unwrap();

    let staged_artifacts = match operation {
      Operation::Shutdown => BootArtifacts::default(),
      _ => artifacts(),
    };
    let component = Component {
      id: "x1".to_string(),
      staged_state: Some(ComponentStagedState {
        boot_artifacts: Some(staged_artifacts),
        configuration: Some("cfg1".to_string()),
        session: Some("session-1".to_string()),
        last_updated: None,
      }),
      ..Default::default()
    };
    stores.components.put(&component).await.unwrap();
    stores
  }

  #[tokio::test]
  async fn test_apply_staged_boot() {
    let stores = staged_fixture(Operation::Boot).await;
    let result = apply_staged(&stores, None, &["x1".to_string()])
      .await
      .unwrap();
    assert_eq!(result.succeeded, vec!["x1".to_string()]);
    assert!(result.failed.is_empty());
    assert!(result.ignored.is_empty());

    let component = stores.components.get("x1").await.unwrap().unwrap();
    assert_eq!(component.desired_boot_artifacts(), artifacts());
    assert_eq!(component.desired_configuration(), "cfg1");
    assert_eq!(component.session.as_deref(), Some("session-1"));
    assert_eq!(component.enabled, Some(true));
    let staged = component.staged_state.unwrap();
    assert_eq!(staged.session.as_deref(), Some(""));
    assert!(staged.boot_artifacts.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_apply_staged_reboot_clears_actual_state() {
    let stores = staged_fixture(Operation::Reboot).await;
    let result = apply_staged(&stores, None, &["x1".to_string()])
      .await
      .unwrap();
    assert_eq!(result.succeeded, vec!["x1".to_string()]);

    let component = stores.components.get("x1").await.unwrap().unwrap();
    let actual = component.actual_state.unwrap();
    assert_eq!(actual.bss_token.as_deref(), Some(""));
    assert!(actual.boot_artifacts.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_apply_staged_shutdown_with_artifacts_is_refused() {
    let stores = staged_fixture(Operation::Shutdown).await;
    // Sneak artifacts into the staged state
    let mut component =
      stores.components.get("x1").await.unwrap().unwrap();
    component.staged_state.as_mut().unwrap().boot_artifacts =
      Some(artifacts());
    stores.components.put(&component).await.unwrap();

    let result = apply_staged(&stores, None, &["x1".to_string()])
      .await
      .unwrap();
    assert_eq!(result.failed, vec!["x1".to_string()]);

    let component = stores.components.get("x1").await.unwrap().unwrap();
    assert_eq!(component.enabled, Some(false));
    assert!(component.error.unwrap().contains("shutdown"));
    // Ownership still moves to the staged session
    assert_eq!(component.session.as_deref(), Some("session-1"));
  }

  #[tokio::test]
  async fn test_apply_staged_without_staged_session_is_ignored() {
    let stores = Stores::memory();
    stores
      .components
      .put(&Component::new("x1"))
      .await
      .unwrap();
    let result = apply_staged(
      &stores,
      None,
      &["x1".to_string(), "x-missing".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(
      result.ignored,
      vec!["x1".to_string(), "x-missing".to_string()]
    );
  }

  #[tokio::test]
  async fn test_apply_staged_missing_session_fails() {
    let stores = staged_fixture(Operation::Boot).await;
    stores.sessions.delete("session-1", None).await.unwrap();
    let result = apply_staged(&stores, None, &["x1".to_string()])
      .await
      .unwrap();
    assert_eq!(result.failed, vec!["x1".to_string()]);
    let component = stores.components.get("x1").await.unwrap().unwrap();
    assert!(component
      .error
      .unwrap()
      .contains("Staged session no longer exists"));
  }
}
