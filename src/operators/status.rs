use std::collections::HashMap;

use async_trait::async_trait;

use crate::clients::cfs::{
  CfsComponent, CONFIGURATION_STATUS_CONFIGURED, CONFIGURATION_STATUS_FAILED,
  CONFIGURATION_STATUS_PENDING,
};
use crate::component::{
  Component, ComponentLastAction, ComponentStatus, Phase, ACTION_POWER_ON,
  STATUS_FAILED, STATUS_ON_HOLD,
};
use crate::error::Error;
use crate::options::OptionsData;

use super::{Operator, OperatorContext};

/// The Status Operator monitors and sets the phase for all components.
/// Also disables stable components if necessary and sets some status
/// overrides.
pub struct StatusOperator {
  context: OperatorContext,
}

impl StatusOperator {
  pub fn new(context: OperatorContext) -> Self {
    StatusOperator { context }
  }
}

/// To simplify passing status data around inside the status operator.
#[derive(Debug, Default, PartialEq)]
struct StatusData {
  phase: Phase,
  status_override: String,
  disable: bool,
  error: String,
  action_failed: bool,
}

#[async_trait]
impl Operator for StatusOperator {
  fn name(&self) -> &'static str {
    "status"
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let components = self
      .context
      .stores
      .components
      .get_all_filtered(
        |component| component.enabled().then_some(component),
        None,
        0,
      )
      .await?;
    if components.is_empty() {
      log::debug!("No enabled components found");
      return Ok(());
    }

    // One query returns all CFS components; the request would not fit the
    // ids otherwise on large systems.
    let cfs_states: HashMap<String, CfsComponent> = self
      .context
      .clients
      .cfs
      .get_components(None)
      .await?
      .into_iter()
      .filter_map(|cfs_component| {
        cfs_component
          .id
          .clone()
          .map(|id| (id, cfs_component))
      })
      .collect();

    for chunk in components.chunks(options.max_component_batch_size.max(1)) {
      self.run_on_chunk(chunk, &cfs_states, options).await?;
    }

    Ok(())
  }
}

impl StatusOperator {
  async fn run_on_chunk(
    &self,
    components: &[Component],
    cfs_states: &HashMap<String, CfsComponent>,
    options: &OptionsData,
  ) -> Result<(), Error> {
    log::debug!("Processing {} components", components.len());

    let component_ids: Vec<String> =
      components.iter().map(|component| component.id.clone()).collect();
    let power_states = self
      .context
      .clients
      .pcs
      .node_to_power_state(&component_ids)
      .await?;

    let updated_components: Vec<Component> = components
      .iter()
      .filter_map(|component| {
        check_status(
          component,
          power_states.get(&component.id).map(String::as_str),
          cfs_states.get(&component.id),
          options,
        )
      })
      .collect();

    if updated_components.is_empty() {
      log::debug!("No components require status updates");
      return Ok(());
    }
    log::info!(
      "Found {} components that require status updates",
      updated_components.len()
    );
    log::debug!("Updated components: {:?}", updated_components);
    self
      .context
      .stores
      .components
      .update_all(&updated_components)
      .await?;
    Ok(())
  }
}

/// Calculate the component's current status based upon its power state and
/// CFS configuration state. If its status differs from the status in the
/// database, return the patch to apply.
fn check_status(
  component: &Component,
  power_state: Option<&str>,
  cfs_component: Option<&CfsComponent>,
  options: &OptionsData,
) -> Option<Component> {
  let pcs_usable =
    power_state.map(|state| state != "undefined").unwrap_or(false);

  let new_status = match (pcs_usable, cfs_component) {
    (true, Some(cfs_component)) => calculate_status(
      component,
      power_state.unwrap_or_default(),
      cfs_component,
      options,
    ),
    _ => {
      // The component cannot be found in pcs or cfs
      let error = if !pcs_usable {
        "Component information was not returned by pcs"
      } else {
        "Component information was not returned by cfs"
      };
      StatusData {
        status_override: STATUS_ON_HOLD.to_string(),
        disable: true,
        error: error.to_string(),
        ..Default::default()
      }
    }
  };

  updated_component(component, new_status)
}

/// Calculate a component's status based on its current state, power state
/// and CFS state.
///
/// Disabling for successful completion returns an empty phase; disabling
/// for a failure returns the phase that failed. The override carries status
/// information that cannot be determined from internal state alone, such as
/// a failed configuration state.
fn calculate_status(
  component: &Component,
  power_state: &str,
  cfs_component: &CfsComponent,
  options: &OptionsData,
) -> StatusData {
  let mut calculated_status = StatusData::default();

  if component.effective_status() == STATUS_FAILED {
    // Failed state - the aggregated status is "failed"
    calculated_status.disable = true;
    calculated_status.status_override = STATUS_FAILED.to_string();
  }

  if power_state == "off" {
    if component.desired_boot_state_is_off() {
      // Successful state - desired and actual state are off
      calculated_status.phase = Phase::None;
      calculated_status.disable = true;
      return calculated_status;
    }
    if component.last_action_is(ACTION_POWER_ON)
      && component.seconds_since_last_action()
        > options.max_power_on_wait_time as i64
    {
      calculated_status.action_failed = true;
    }
    calculated_status.phase = Phase::PoweringOn;
    return calculated_status;
  }

  if component.desired_boot_state_is_off() {
    calculated_status.phase = Phase::PoweringOff;
    return calculated_status;
  }

  if component.boot_artifact_states_match() {
    calculate_status_booted(component, cfs_component, &mut calculated_status);
    return calculated_status;
  }

  if component.last_action_is(ACTION_POWER_ON)
    && component.seconds_since_last_action()
      <= options.max_boot_wait_time as i64
  {
    calculated_status.phase = Phase::PoweringOn;
    return calculated_status;
  }

  // Includes both power-off for restarts and ready-recovery scenario
  calculated_status.phase = Phase::PoweringOff;
  calculated_status
}

/// Helper for calculate_status, called when the node is up with the desired
/// boot artifacts.
fn calculate_status_booted(
  component: &Component,
  cfs_component: &CfsComponent,
  calculated_status: &mut StatusData,
) {
  let desired_configuration = component.desired_configuration();
  let set_configuration = cfs_component
    .desired_config
    .clone()
    .unwrap_or_default();

  if desired_configuration != set_configuration {
    calculated_status.phase = Phase::Configuring;
    return;
  }

  if component.desired_configuration_is_none() {
    // Successful state - booted with the correct artifacts, no
    // configuration necessary
    calculated_status.phase = Phase::None;
    calculated_status.disable = true;
    return;
  }

  let cfs_status = cfs_component
    .configuration_status
    .clone()
    .unwrap_or_default()
    .to_lowercase();
  match cfs_status.as_str() {
    CONFIGURATION_STATUS_CONFIGURED => {
      // Successful state - booted with the correct artifacts and configured
      calculated_status.phase = Phase::None;
      calculated_status.disable = true;
    }
    CONFIGURATION_STATUS_FAILED => {
      // Failed state - configuration failed
      calculated_status.phase = Phase::Configuring;
      calculated_status.disable = true;
      calculated_status.status_override = STATUS_FAILED.to_string();
      calculated_status.error = "cfs configuration failed".to_string();
    }
    CONFIGURATION_STATUS_PENDING => {
      calculated_status.phase = Phase::Configuring;
    }
    _ => {
      // Failed state - configuration is no longer set
      calculated_status.phase = Phase::Configuring;
      calculated_status.disable = true;
      calculated_status.status_override = STATUS_FAILED.to_string();
      calculated_status.error = format!(
        "cfs is not reporting a valid configuration status for this component: {}",
        cfs_status
      );
    }
  }
}

/// Build the patch for a component whose calculated status differs from
/// what is stored. The event-stats reset and actual-state clearing on phase
/// transitions are applied by the store merge rules.
fn updated_component(
  component: &Component,
  new_status: StatusData,
) -> Option<Component> {
  let mut updated = Component {
    id: component.id.clone(),
    status: Some(ComponentStatus {
      status_override: Some(new_status.status_override.clone()),
      ..Default::default()
    }),
    ..Default::default()
  };
  let mut update = false;

  if new_status.phase != component.phase() {
    if let Some(status) = &mut updated.status {
      status.phase = Some(new_status.phase);
    }
    update = true;
  }

  let previous_override = component
    .status
    .as_ref()
    .and_then(|status| status.status_override.clone())
    .unwrap_or_default();
  if new_status.status_override != previous_override {
    update = true;
  }

  if new_status.disable {
    updated.enabled = Some(false);
    update = true;
  }

  if !new_status.error.is_empty()
    && component.error.as_deref() != Some(new_status.error.as_str())
  {
    updated.error = Some(new_status.error.clone());
    update = true;
  }

  if new_status.action_failed && !component.last_action_failed() {
    updated.last_action = Some(ComponentLastAction {
      failed: Some(true),
      ..Default::default()
    });
    update = true;
  }

  update.then_some(updated)
}

#[cfg(test)]
mod tests {
  use crate::component::{
    BootArtifacts, ComponentActualState, ComponentDesiredState,
    ComponentEventStats,
  };

  use super::*;

  fn artifacts() -> BootArtifacts {
    BootArtifacts {
      kernel: "s3://bi/img1/kernel".to_string(),
      kernel_parameters: "console=ttyS0 bos_session_id=abc".to_string(),
      initrd: "s3://bi/img1/initrd".to_string(),
    }
  }

  fn booted_component(configuration: &str) -> Component {
    Component {
      id: "x3000c0s19b1n0".to_string(),
      enabled: Some(true),
      desired_state: Some(ComponentDesiredState {
        boot_artifacts: Some(artifacts()),
        configuration: Some(configuration.to_string()),
        ..Default::default()
      }),
      actual_state: Some(ComponentActualState {
        boot_artifacts: Some(artifacts()),
        ..Default::default()
      }),
      status: Some(ComponentStatus {
        phase: Some(Phase::PoweringOn),
        ..Default::default()
      }),
      ..Default::default()
    }
  }

  fn cfs(desired_config: &str, status: &str) -> CfsComponent {
    CfsComponent {
      id: Some("x3000c0s19b1n0".to_string()),
      desired_config: Some(desired_config.to_string()),
      configuration_status: Some(status.to_string()),
      ..Default::default()
    }
  }

  #[test]
  fn test_missing_pcs_entry_holds_component() {
    let component = booted_component("cfg1");
    let patch =
      check_status(&component, None, Some(&cfs("cfg1", "pending")), &OptionsData::default())
        .unwrap();
    assert_eq!(
      patch.status.unwrap().status_override.as_deref(),
      Some(STATUS_ON_HOLD)
    );
    assert_eq!(patch.enabled, Some(false));
    assert_eq!(
      patch.error.as_deref(),
      Some("Component information was not returned by pcs")
    );
  }

  #[test]
  fn test_missing_cfs_entry_holds_component() {
    let component = booted_component("cfg1");
    let patch =
      check_status(&component, Some("on"), None, &OptionsData::default())
        .unwrap();
    assert_eq!(
      patch.error.as_deref(),
      Some("Component information was not returned by cfs")
    );
  }

  #[test]
  fn test_off_with_desired_off_is_terminal_success() {
    let mut component = booted_component("");
    component.desired_state = Some(ComponentDesiredState::default());
    let status = calculate_status(
      &component,
      "off",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::None);
    assert!(status.disable);
    assert!(status.status_override.is_empty());
  }

  #[test]
  fn test_off_with_desired_on_powers_on() {
    let mut component = booted_component("cfg1");
    component.actual_state = Some(ComponentActualState::empty());
    let status = calculate_status(
      &component,
      "off",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::PoweringOn);
    assert!(!status.disable);
  }

  #[test]
  fn test_power_on_timeout_marks_action_failed() {
    let mut component = booted_component("cfg1");
    component.actual_state = Some(ComponentActualState::empty());
    component.last_action = Some(ComponentLastAction {
      action: Some(ACTION_POWER_ON.to_string()),
      failed: Some(false),
      last_updated: Some("2020-01-01T00:00:00Z".to_string()),
    });
    let status = calculate_status(
      &component,
      "off",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert!(status.action_failed);
    assert_eq!(status.phase, Phase::PoweringOn);
  }

  #[test]
  fn test_on_with_desired_off_powers_off() {
    let mut component = booted_component("");
    component.desired_state = Some(ComponentDesiredState::default());
    let status = calculate_status(
      &component,
      "on",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::PoweringOff);
  }

  #[test]
  fn test_booted_with_config_not_in_cfs_is_configuring() {
    let component = booted_component("cfg1");
    let status = calculate_status(
      &component,
      "on",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::Configuring);
    assert!(!status.disable);
  }

  #[test]
  fn test_booted_no_config_needed_is_stable() {
    let component = booted_component("");
    let status = calculate_status(
      &component,
      "on",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::None);
    assert!(status.disable);
  }

  #[test]
  fn test_booted_configured_is_stable() {
    let component = booted_component("cfg1");
    let status = calculate_status(
      &component,
      "on",
      &cfs("cfg1", "configured"),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::None);
    assert!(status.disable);
  }

  #[test]
  fn test_booted_cfs_failed_is_failed() {
    let component = booted_component("cfg1");
    let status = calculate_status(
      &component,
      "on",
      &cfs("cfg1", "failed"),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::Configuring);
    assert!(status.disable);
    assert_eq!(status.status_override, STATUS_FAILED);
    assert_eq!(status.error, "cfs configuration failed");
  }

  #[test]
  fn test_booted_cfs_pending_keeps_configuring() {
    let component = booted_component("cfg1");
    let status = calculate_status(
      &component,
      "on",
      &cfs("cfg1", "pending"),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::Configuring);
    assert!(!status.disable);
  }

  #[test]
  fn test_booted_cfs_invalid_status_is_failed() {
    let component = booted_component("cfg1");
    let status = calculate_status(
      &component,
      "on",
      &cfs("cfg1", "garbage"),
      &OptionsData::default(),
    );
    assert_eq!(status.status_override, STATUS_FAILED);
    assert!(status.error.contains("garbage"));
  }

  #[test]
  fn test_on_mid_boot_stays_powering_on() {
    let mut component = booted_component("cfg1");
    component.actual_state = Some(ComponentActualState::empty());
    component.last_action = Some(ComponentLastAction {
      action: Some(ACTION_POWER_ON.to_string()),
      failed: Some(false),
      last_updated: Some(crate::common::utils::get_current_timestamp()),
    });
    let status = calculate_status(
      &component,
      "on",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::PoweringOn);
  }

  #[test]
  fn test_on_with_stale_artifacts_powers_off() {
    let mut component = booted_component("cfg1");
    component.actual_state = Some(ComponentActualState {
      boot_artifacts: Some(BootArtifacts {
        kernel: "s3://bi/old/kernel".to_string(),
        kernel_parameters: "old".to_string(),
        initrd: "s3://bi/old/initrd".to_string(),
      }),
      ..Default::default()
    });
    let status = calculate_status(
      &component,
      "on",
      &cfs("", ""),
      &OptionsData::default(),
    );
    assert_eq!(status.phase, Phase::PoweringOff);
  }

  #[test]
  fn test_no_patch_when_nothing_changes() {
    let mut component = booted_component("cfg1");
    component.status = Some(ComponentStatus {
      phase: Some(Phase::Configuring),
      status: None,
      status_override: Some(String::new()),
    });
    let patch = check_status(
      &component,
      Some("on"),
      Some(&cfs("cfg1", "pending")),
      &OptionsData::default(),
    );
    assert!(patch.is_none());
  }

  #[test]
  fn test_patch_resets_event_stats_via_store_rules() {
    // The patch itself carries only the phase; the store merge zeroes the
    // stats when it applies the phase change.
    let mut component = booted_component("cfg1");
    component.event_stats = Some(ComponentEventStats {
      power_on_attempts: Some(2),
      ..Default::default()
    });
    let patch = check_status(
      &component,
      Some("on"),
      Some(&cfs("cfg1", "configured")),
      &OptionsData::default(),
    )
    .unwrap();
    assert_eq!(patch.status.as_ref().unwrap().phase, Some(Phase::None));
    let mut record = component.clone();
    crate::component::update_component_record(&mut record, &patch);
    assert_eq!(record.power_on_attempts(), 0);
  }
}
