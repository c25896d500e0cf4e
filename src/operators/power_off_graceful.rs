use async_trait::async_trait;

use crate::component::{
  Component, ComponentEventStats, Phase, ACTION_POWER_OFF_GRACEFULLY,
};
use crate::error::Error;
use crate::options::OptionsData;

use super::power::{filter_locked_components, power_components, PowerTransition};
use super::{
  backoff_elapsed, base_patch, retry_policy, Operator, OperatorContext,
};

/// Gracefully powers off components in the powering_off phase, whether the
/// desired state is off or a reboot needs the node cycled. Once the retry
/// policy is exhausted the forceful operator takes over.
pub struct PowerOffGracefulOperator {
  context: OperatorContext,
}

impl PowerOffGracefulOperator {
  pub fn new(context: OperatorContext) -> Self {
    PowerOffGracefulOperator { context }
  }
}

#[async_trait]
impl Operator for PowerOffGracefulOperator {
  fn name(&self) -> &'static str {
    ACTION_POWER_OFF_GRACEFULLY
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let mut eligible = self
      .context
      .select_enabled(|component| {
        component.phase() == Phase::PoweringOff
          && (component.desired_boot_state_is_off()
            || !component.boot_artifact_states_match())
          && component.power_off_graceful_attempts()
            < retry_policy(component, options)
          && backoff_elapsed(
            component.seconds_since_last_action(),
            component.power_off_graceful_attempts(),
            options,
            options.max_power_off_wait_time,
          )
      })
      .await?;

    if eligible.is_empty() {
      log::debug!("Found 0 components that require action");
      return Ok(());
    }

    // Anything not already off is a candidate, 'undefined' included.
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
          base_patch(component, ACTION_POWER_OFF_GRACEFULLY, false);
        patch.event_stats = Some(ComponentEventStats {
          power_off_graceful_attempts: Some(
            component.power_off_graceful_attempts() + 1,
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
      PowerTransition::SoftOff,
      &xnames,
      &mut patches,
    )
    .await?;

    self.context.stores.components.update_all(&patches).await?;
    Ok(())
  }
}
