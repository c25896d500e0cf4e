use std::collections::HashMap;

use async_trait::async_trait;

use crate::component::{Component, ACTION_CONFIGURE};
use crate::error::Error;
use crate::options::OptionsData;

use super::{base_patch, Operator, OperatorContext};

/// Tells CFS to configure components that booted with the right artifacts
/// but whose desired configuration has not been handed to CFS yet.
pub struct ConfiguringOperator {
  context: OperatorContext,
}

impl ConfiguringOperator {
  pub fn new(context: OperatorContext) -> Self {
    ConfiguringOperator { context }
  }
}

#[async_trait]
impl Operator for ConfiguringOperator {
  fn name(&self) -> &'static str {
    ACTION_CONFIGURE
  }

  async fn run_pass(&mut self, _options: &OptionsData) -> Result<(), Error> {
    let candidates = self
      .context
      .select_enabled(|component| {
        !component.desired_configuration_is_none()
          && !component.desired_boot_state_is_off()
          && component.boot_artifact_states_match()
      })
      .await?;

    if candidates.is_empty() {
      log::debug!("Found 0 components that require action");
      return Ok(());
    }

    // Only components whose desired configuration is not yet set in CFS
    let ids: Vec<String> =
      candidates.iter().map(|component| component.id.clone()).collect();
    let cfs_components = self
      .context
      .clients
      .cfs
      .get_components_from_id_list(&ids)
      .await?;
    let cfs_by_id: HashMap<String, String> = cfs_components
      .into_iter()
      .filter_map(|cfs_component| {
        cfs_component
          .id
          .map(|id| (id, cfs_component.desired_config.unwrap_or_default()))
      })
      .collect();

    let components: Vec<Component> = candidates
      .into_iter()
      .filter(|component| {
        cfs_by_id.get(&component.id).map(String::as_str)
          != Some(component.desired_configuration().as_str())
      })
      .collect();

    if components.is_empty() {
      log::debug!("Found 0 components that require action");
      return Ok(());
    }
    log::info!("Found {} components that require action", components.len());

    self.context.clients.cfs.set_cfs(&components, true).await?;

    let patches: Vec<Component> = components
      .iter()
      .map(|component| base_patch(component, ACTION_CONFIGURE, false))
      .collect();
    self.context.stores.components.update_all(&patches).await?;
    Ok(())
  }
}
