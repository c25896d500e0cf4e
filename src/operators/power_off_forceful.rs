use async_trait::async_trait;

use crate::component::{
  Component, ComponentEventStats, ComponentStatus, Phase,
  ACTION_POWER_OFF_FORCEFULLY, STATUS_FAILED,
};
use crate::error::Error;
use crate::options::OptionsData;

use super::power::{filter_locked_components, power_components, PowerTransition};
use super::{
  backoff_elapsed, base_patch, retry_policy, Operator, OperatorContext,
};

/// Forcefully powers off components that graceful power-off could not
/// bring down within the allowed window.
pub struct PowerOffForcefulOperator {
  context: OperatorContext,
}

impl PowerOffForcefulOperator {
  pub fn new(context: OperatorContext) -> Self {
    PowerOffForcefulOperator { context }
  }
}

#[async_trait]
impl Operator for PowerOffForcefulOperator {
  fn name(&self) -> &'static str {
    ACTION_POWER_OFF_FORCEFULLY
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let candidates = self
      .context
      .select_enabled(|component| {
        component.phase() == Phase::PoweringOff
          && component.power_off_graceful_attempts()
            >= retry_policy(component, options)
          && component.seconds_since_last_action()
            >= options.max_power_off_wait_time as i64
      })
      .await?;

    let mut exhausted_patches = Vec::new();
    let mut eligible = Vec::new();
    for component in candidates {
      let policy = retry_policy(&component, options);
      if component.power_off_forceful_attempts() >= policy {
        exhausted_patches.push(Component {
          id: component.id.clone(),
          enabled: Some(false),
          error: Some(format!(
            "Component has been forcefully powered off the maximum number of times ({})",
            policy
          )),
          status: Some(ComponentStatus {
            status_override: Some(STATUS_FAILED.to_string()),
            ..Default::default()
          }),
          ..Default::default()
        });
      } else if backoff_elapsed(
        component.seconds_since_last_action(),
        component.power_off_forceful_attempts(),
        options,
        options.max_power_off_wait_time,
      ) {
        eligible.push(component);
      }
    }

    if !exhausted_patches.is_empty() {
      log::warn!(
        "{} components exceeded their forceful power-off retry policy",
        exhausted_patches.len()
      );
      self
        .context
        .stores
        .components
        .update_all(&exhausted_patches)
        .await?;
    }

    if eligible.is_empty() {
      log::debug!("Found 0 components that require action");
      return Ok(());
    }

    let xnames: Vec<String> =
      eligible.iter().map(|component| component.id.clone()).collect();
    let power_states =
      self.context.clients.pcs.node_to_power_state(&xnames).await?;
    eligible.retain(|component| {
      power_states.get(&component.id).map(String::as_str) != Some("off")
    });

    let eligible =
      filter_locked_components(&self.context, eligible).await?;
    if eligible.is_empty() {
      log::debug!("Found 0 components that require action");
      return Ok(());
    }
    log::info!("Found {} components that require action", eligible.len());

    let mut patches: Vec<Component> = eligible
      .iter()
      .map(|component| {
        let mut patch =
          base_patch(component, ACTION_POWER_OFF_FORCEFULLY, false);
        patch.event_stats = Some(ComponentEventStats {
          power_off_forceful_attempts: Some(
            component.power_off_forceful_attempts() + 1,
          ),
          ..Default::default()
        });
        patch
      })
      .collect();

    let xnames: Vec<String> =
      eligible.iter().map(|component| component.id.clone()).collect();
    power_components(
      &self.context,
      PowerTransition::ForceOff,
      &xnames,
      &mut patches,
    )
    .await?;

    self.context.stores.components.update_all(&patches).await?;
    Ok(())
  }
}
