use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::clients::bss::BootParameters;
use crate::common::utils::age_to_duration;
use crate::component::{
  BootArtifacts, Component, ComponentDesiredState, ComponentEventStats,
  ComponentStatus, Phase, ACTION_POWER_ON, STATUS_FAILED,
};
use crate::error::Error;
use crate::options::OptionsData;

use super::power::{filter_locked_components, power_components, PowerTransition};
use super::{
  backoff_elapsed, base_patch, retry_policy, Operator, OperatorContext,
};

/// Powers on components whose phase is powering_on and whose node is
/// actually off. Before the power call, the component's boot artifacts are
/// handed to BSS under a fresh referral token.
pub struct PowerOnOperator {
  context: OperatorContext,
}

impl PowerOnOperator {
  pub fn new(context: OperatorContext) -> Self {
    PowerOnOperator { context }
  }
}

#[async_trait]
impl Operator for PowerOnOperator {
  fn name(&self) -> &'static str {
    ACTION_POWER_ON
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let candidates = self
      .context
      .select_enabled(|component| {
        component.phase() == Phase::PoweringOn
          && !component.desired_boot_state_is_off()
          && !component.boot_artifact_states_match()
      })
      .await?;

    let mut exhausted_patches = Vec::new();
    let mut eligible = Vec::new();
    for component in candidates {
      let policy = retry_policy(&component, options);
      if component.power_on_attempts() >= policy {
        exhausted_patches.push(Component {
          id: component.id.clone(),
          enabled: Some(false),
          error: Some(format!(
            "Component has been powered on the maximum number of times ({})",
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
        component.power_on_attempts(),
        options,
        options.max_power_on_wait_time,
      ) {
        eligible.push(component);
      }
    }

    if !exhausted_patches.is_empty() {
      log::warn!(
        "{} components exceeded their power-on retry policy",
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

    // Nodes must still be enabled in HSM to be powered on
    let xnames: Vec<String> =
      eligible.iter().map(|component| component.id.clone()).collect();
    let hsm_enabled: std::collections::HashSet<String> = self
      .context
      .clients
      .hsm
      .query_components(&xnames, Some(true))
      .await?
      .into_iter()
      .map(|component| component.id)
      .collect();
    eligible.retain(|component| hsm_enabled.contains(&component.id));

    // Only nodes PCS reports as off are acted on; the rest converge through
    // the status operator.
    let xnames: Vec<String> =
      eligible.iter().map(|component| component.id.clone()).collect();
    let power_states =
      self.context.clients.pcs.node_to_power_state(&xnames).await?;
    eligible.retain(|component| {
      power_states.get(&component.id).map(String::as_str) == Some("off")
    });

    let eligible =
      filter_locked_components(&self.context, eligible).await?;
    if eligible.is_empty() {
      log::debug!("Found 0 components that require action");
      return Ok(());
    }
    log::info!("Found {} components that require action", eligible.len());

    let tokens = self.set_bss(&eligible, options).await?;

    let mut patches: Vec<Component> = eligible
      .iter()
      .map(|component| {
        let mut patch = base_patch(component, ACTION_POWER_ON, false);
        patch.event_stats = Some(ComponentEventStats {
          power_on_attempts: Some(component.power_on_attempts() + 1),
          ..Default::default()
        });
        if let Some(token) = tokens.get(&component.id) {
          patch.desired_state = Some(ComponentDesiredState {
            bss_token: Some(token.clone()),
            ..Default::default()
          });
        }
        patch
      })
      .collect();

    let xnames: Vec<String> =
      eligible.iter().map(|component| component.id.clone()).collect();
    power_components(
      &self.context,
      PowerTransition::On,
      &xnames,
      &mut patches,
    )
    .await?;

    self.context.stores.components.update_all(&patches).await?;
    Ok(())
  }
}

impl PowerOnOperator {
  /// Hand each distinct boot artifact triple to BSS under a fresh referral
  /// token, remember the token in the boot-artifact cache, and return the
  /// per-xname token mapping.
  async fn set_bss(
    &self,
    components: &[Component],
    options: &OptionsData,
  ) -> Result<HashMap<String, String>, Error> {
    let mut groups: HashMap<(String, String, String), Vec<String>> =
      HashMap::new();
    for component in components {
      let artifacts = component.desired_boot_artifacts();
      groups
        .entry((
          artifacts.kernel,
          artifacts.kernel_parameters,
          artifacts.initrd,
        ))
        .or_default()
        .push(component.id.clone());
    }

    let ttl_seconds = age_to_duration(&options.component_actual_state_ttl)?
      .num_seconds()
      .max(0) as u64;

    let mut tokens = HashMap::new();
    for ((kernel, kernel_parameters, initrd), hosts) in groups {
      let token = Uuid::new_v4().to_string();
      let boot_parameters = BootParameters {
        hosts: hosts.clone(),
        kernel: kernel.clone(),
        initrd: initrd.clone(),
        params: kernel_parameters.clone(),
      };
      self
        .context
        .clients
        .bss
        .put_boot_params(&boot_parameters, &token)
        .await?;
      self
        .context
        .stores
        .boot_artifacts
        .record(
          &token,
          &BootArtifacts {
            kernel,
            kernel_parameters,
            initrd,
          },
          ttl_seconds,
        )
        .await?;
      for host in hosts {
        tokens.insert(host, token.clone());
      }
    }

    Ok(tokens)
  }
}
