use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::common::utils::{get_current_timestamp, seconds_since};

pub const STATUS_STABLE: &str = "stable";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_ON_HOLD: &str = "on_hold";

pub const ACTION_POWER_ON: &str = "power_on";
pub const ACTION_POWER_OFF_GRACEFULLY: &str = "power_off_gracefully";
pub const ACTION_POWER_OFF_FORCEFULLY: &str = "power_off_forcefully";
pub const ACTION_APPLY_STAGED: &str = "apply_staged";
pub const ACTION_SESSION_SETUP: &str = "session_setup";
pub const ACTION_CONFIGURE: &str = "configure";

/// The single active transition a component is undergoing. An empty string
/// on the wire means the component is at steady state.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display,
)]
pub enum Phase {
  #[default]
  #[serde(rename = "")]
  #[strum(serialize = "")]
  None,
  #[serde(rename = "powering_on")]
  #[strum(serialize = "powering_on")]
  PoweringOn,
  #[serde(rename = "powering_off")]
  #[strum(serialize = "powering_off")]
  PoweringOff,
  #[serde(rename = "configuring")]
  #[strum(serialize = "configuring")]
  Configuring,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BootArtifacts {
  #[serde(default)]
  pub kernel: String,
  #[serde(default)]
  pub kernel_parameters: String,
  #[serde(default)]
  pub initrd: String,
}

impl BootArtifacts {
  /// Empty artifacts mean the desired state is 'off'.
  pub fn is_empty(&self) -> bool {
    self.kernel.is_empty()
      && self.kernel_parameters.is_empty()
      && self.initrd.is_empty()
  }

  pub fn is_complete(&self) -> bool {
    !self.kernel.is_empty()
      && !self.kernel_parameters.is_empty()
      && !self.initrd.is_empty()
  }
}

/// Boot artifacts as stored in the BSS token cache, with the timestamp the
/// token was handed to BSS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimestampedBootArtifacts {
  #[serde(flatten)]
  pub boot_artifacts: BootArtifacts,
  pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentActualState {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub boot_artifacts: Option<BootArtifacts>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bss_token: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<String>,
}

impl ComponentActualState {
  pub fn empty() -> Self {
    ComponentActualState {
      boot_artifacts: Some(BootArtifacts::default()),
      bss_token: Some(String::new()),
      last_updated: None,
    }
  }

  fn merge(&mut self, patch: &ComponentActualState) {
    if let Some(boot_artifacts) = &patch.boot_artifacts {
      self.boot_artifacts = Some(boot_artifacts.clone());
    }
    if let Some(bss_token) = &patch.bss_token {
      self.bss_token = Some(bss_token.clone());
    }
    if let Some(last_updated) = &patch.last_updated {
      self.last_updated = Some(last_updated.clone());
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentDesiredState {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub boot_artifacts: Option<BootArtifacts>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub configuration: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bss_token: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<String>,
}

impl ComponentDesiredState {
  fn merge(&mut self, patch: &ComponentDesiredState) {
    if let Some(boot_artifacts) = &patch.boot_artifacts {
      self.boot_artifacts = Some(boot_artifacts.clone());
    }
    if let Some(configuration) = &patch.configuration {
      self.configuration = Some(configuration.clone());
    }
    if let Some(bss_token) = &patch.bss_token {
      self.bss_token = Some(bss_token.clone());
    }
    if let Some(last_updated) = &patch.last_updated {
      self.last_updated = Some(last_updated.clone());
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentStagedState {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub boot_artifacts: Option<BootArtifacts>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub configuration: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub session: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<String>,
}

impl ComponentStagedState {
  pub fn empty() -> Self {
    ComponentStagedState {
      boot_artifacts: Some(BootArtifacts::default()),
      configuration: Some(String::new()),
      session: Some(String::new()),
      last_updated: None,
    }
  }

  fn merge(&mut self, patch: &ComponentStagedState) {
    if let Some(boot_artifacts) = &patch.boot_artifacts {
      self.boot_artifacts = Some(boot_artifacts.clone());
    }
    if let Some(configuration) = &patch.configuration {
      self.configuration = Some(configuration.clone());
    }
    if let Some(session) = &patch.session {
      self.session = Some(session.clone());
    }
    if let Some(last_updated) = &patch.last_updated {
      self.last_updated = Some(last_updated.clone());
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentLastAction {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub action: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failed: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<String>,
}

impl ComponentLastAction {
  fn merge(&mut self, patch: &ComponentLastAction) {
    if let Some(action) = &patch.action {
      self.action = Some(action.clone());
    }
    if let Some(failed) = patch.failed {
      self.failed = Some(failed);
    }
    if let Some(last_updated) = &patch.last_updated {
      self.last_updated = Some(last_updated.clone());
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentEventStats {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub power_on_attempts: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub power_off_graceful_attempts: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub power_off_forceful_attempts: Option<u32>,
}

impl ComponentEventStats {
  pub fn zeroed() -> Self {
    ComponentEventStats {
      power_on_attempts: Some(0),
      power_off_graceful_attempts: Some(0),
      power_off_forceful_attempts: Some(0),
    }
  }

  fn merge(&mut self, patch: &ComponentEventStats) {
    if let Some(value) = patch.power_on_attempts {
      self.power_on_attempts = Some(value);
    }
    if let Some(value) = patch.power_off_graceful_attempts {
      self.power_off_graceful_attempts = Some(value);
    }
    if let Some(value) = patch.power_off_forceful_attempts {
      self.power_off_forceful_attempts = Some(value);
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentStatus {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phase: Option<Phase>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status_override: Option<String>,
}

impl ComponentStatus {
  fn merge(&mut self, patch: &ComponentStatus) {
    if let Some(phase) = patch.phase {
      self.phase = Some(phase);
    }
    if let Some(status) = &patch.status {
      self.status = Some(status.clone());
    }
    if let Some(status_override) = &patch.status_override {
      self.status_override = Some(status_override.clone());
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Component {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub actual_state: Option<ComponentActualState>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub desired_state: Option<ComponentDesiredState>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub staged_state: Option<ComponentStagedState>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_action: Option<ComponentLastAction>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub event_stats: Option<ComponentEventStats>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<ComponentStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub session: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_policy: Option<u32>,
}

impl Component {
  pub fn new(id: &str) -> Self {
    Component {
      id: id.to_string(),
      ..Default::default()
    }
  }

  pub fn enabled(&self) -> bool {
    self.enabled.unwrap_or(false)
  }

  pub fn phase(&self) -> Phase {
    self
      .status
      .as_ref()
      .and_then(|status| status.phase)
      .unwrap_or_default()
  }

  /// The status reported for the component: the override if one is set,
  /// otherwise the phase, or 'stable' at steady state.
  pub fn effective_status(&self) -> String {
    let status = self.status.clone().unwrap_or_default();
    if let Some(status_override) = &status.status_override {
      if !status_override.is_empty() {
        return status_override.clone();
      }
    }
    match status.phase.unwrap_or_default() {
      Phase::None => STATUS_STABLE.to_string(),
      phase => phase.to_string(),
    }
  }

  pub fn desired_boot_artifacts(&self) -> BootArtifacts {
    self
      .desired_state
      .as_ref()
      .and_then(|state| state.boot_artifacts.clone())
      .unwrap_or_default()
  }

  pub fn actual_boot_artifacts(&self) -> BootArtifacts {
    self
      .actual_state
      .as_ref()
      .and_then(|state| state.boot_artifacts.clone())
      .unwrap_or_default()
  }

  pub fn desired_configuration(&self) -> String {
    self
      .desired_state
      .as_ref()
      .and_then(|state| state.configuration.clone())
      .unwrap_or_default()
  }

  /// The desired state is 'off' when the boot artifacts are missing or not
  /// fully populated.
  pub fn desired_boot_state_is_off(&self) -> bool {
    !self.desired_boot_artifacts().is_complete()
  }

  /// Current and desired kernel, initrd and kernel parameters all match.
  pub fn boot_artifact_states_match(&self) -> bool {
    self.desired_boot_artifacts() == self.actual_boot_artifacts()
  }

  pub fn desired_configuration_is_none(&self) -> bool {
    self.desired_configuration().is_empty()
  }

  pub fn last_action_is(&self, action: &str) -> bool {
    self
      .last_action
      .as_ref()
      .and_then(|last_action| last_action.action.as_deref())
      == Some(action)
  }

  pub fn last_action_failed(&self) -> bool {
    self
      .last_action
      .as_ref()
      .and_then(|last_action| last_action.failed)
      .unwrap_or(false)
  }

  pub fn seconds_since_last_action(&self) -> i64 {
    seconds_since(
      self
        .last_action
        .as_ref()
        .and_then(|last_action| last_action.last_updated.as_deref()),
    )
  }

  pub fn power_on_attempts(&self) -> u32 {
    self
      .event_stats
      .as_ref()
      .and_then(|stats| stats.power_on_attempts)
      .unwrap_or(0)
  }

  pub fn power_off_graceful_attempts(&self) -> u32 {
    self
      .event_stats
      .as_ref()
      .and_then(|stats| stats.power_off_graceful_attempts)
      .unwrap_or(0)
  }

  pub fn power_off_forceful_attempts(&self) -> u32 {
    self
      .event_stats
      .as_ref()
      .and_then(|stats| stats.power_off_forceful_attempts)
      .unwrap_or(0)
  }
}

/// Stamp `last_updated` on every state section the patch touches.
/// A state patch carrying only a bss_token is left alone; the token says
/// nothing about when the rest of the section was observed.
pub fn set_last_updated(patch: &mut Component) {
  let timestamp = get_current_timestamp();
  if let Some(actual_state) = &mut patch.actual_state {
    if actual_state.boot_artifacts.is_some() || actual_state.bss_token.is_none()
    {
      actual_state.last_updated = Some(timestamp.clone());
    }
  }
  if let Some(desired_state) = &mut patch.desired_state {
    if desired_state.boot_artifacts.is_some()
      || desired_state.configuration.is_some()
      || desired_state.bss_token.is_none()
    {
      desired_state.last_updated = Some(timestamp.clone());
    }
  }
  if let Some(staged_state) = &mut patch.staged_state {
    staged_state.last_updated = Some(timestamp.clone());
  }
  if let Some(last_action) = &mut patch.last_action {
    last_action.last_updated = Some(timestamp);
  }
}

/// Perform an in-place update of the component record using data from the
/// patch. State sub-records merge field-wise; plain fields are replaced.
///
/// Two transitions carry side effects:
/// - a phase change resets the event stats,
/// - leaving the powering_off phase clears the actual state.
pub fn update_component_record(record: &mut Component, patch: &Component) {
  let previous_phase = record.phase();
  let patched_phase = patch.status.as_ref().and_then(|status| status.phase);

  if let Some(new_phase) = patched_phase {
    if new_phase != previous_phase {
      if new_phase == Phase::None {
        // The current event has completed. Reset the event stats
        record.event_stats = Some(ComponentEventStats::zeroed());
      }
      if previous_phase == Phase::PoweringOff {
        // Powering off has been completed. The actual state can be cleared
        record.actual_state = Some(ComponentActualState {
          last_updated: Some(get_current_timestamp()),
          ..ComponentActualState::empty()
        });
      }
    }
  }

  if let Some(actual_state) = &patch.actual_state {
    match &mut record.actual_state {
      Some(existing) => existing.merge(actual_state),
      None => record.actual_state = Some(actual_state.clone()),
    }
  }
  if let Some(desired_state) = &patch.desired_state {
    match &mut record.desired_state {
      Some(existing) => existing.merge(desired_state),
      None => record.desired_state = Some(desired_state.clone()),
    }
  }
  if let Some(staged_state) = &patch.staged_state {
    match &mut record.staged_state {
      Some(existing) => existing.merge(staged_state),
      None => record.staged_state = Some(staged_state.clone()),
    }
  }
  if let Some(last_action) = &patch.last_action {
    match &mut record.last_action {
      Some(existing) => existing.merge(last_action),
      None => record.last_action = Some(last_action.clone()),
    }
  }
  if let Some(event_stats) = &patch.event_stats {
    match &mut record.event_stats {
      Some(existing) => existing.merge(event_stats),
      None => record.event_stats = Some(event_stats.clone()),
    }
  }
  if let Some(status) = &patch.status {
    match &mut record.status {
      Some(existing) => existing.merge(status),
      None => record.status = Some(status.clone()),
    }
  }

  if let Some(enabled) = patch.enabled {
    record.enabled = Some(enabled);
  }
  if let Some(error) = &patch.error {
    record.error = Some(error.clone());
  }
  if let Some(session) = &patch.session {
    record.session = Some(session.clone());
  }
  if let Some(retry_policy) = patch.retry_policy {
    record.retry_policy = Some(retry_policy);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn full_artifacts() -> BootArtifacts {
    BootArtifacts {
      kernel: "s3://bi/img1/kernel".to_string(),
      kernel_parameters: "console=ttyS0".to_string(),
      initrd: "s3://bi/img1/initrd".to_string(),
    }
  }

  fn component_in_phase(phase: Phase) -> Component {
    Component {
      id: "x3000c0s19b1n0".to_string(),
      status: Some(ComponentStatus {
        phase: Some(phase),
        ..Default::default()
      }),
      event_stats: Some(ComponentEventStats {
        power_on_attempts: Some(2),
        power_off_graceful_attempts: Some(1),
        power_off_forceful_attempts: Some(0),
      }),
      actual_state: Some(ComponentActualState {
        boot_artifacts: Some(full_artifacts()),
        bss_token: Some("token-1".to_string()),
        last_updated: Some("2024-01-01T00:00:00Z".to_string()),
      }),
      ..Default::default()
    }
  }

  #[test]
  fn test_phase_serde_round_trip() {
    let status = ComponentStatus {
      phase: Some(Phase::None),
      status: None,
      status_override: Some(String::new()),
    };
    let encoded = serde_json::to_string(&status).unwrap();
    assert!(encoded.contains("\"phase\":\"\""));
    let decoded: ComponentStatus = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.phase, Some(Phase::None));
  }

  #[test]
  fn test_phase_change_resets_event_stats() {
    let mut record = component_in_phase(Phase::PoweringOn);
    let patch = Component {
      id: record.id.clone(),
      status: Some(ComponentStatus {
        phase: Some(Phase::None),
        ..Default::default()
      }),
      ..Default::default()
    };
    update_component_record(&mut record, &patch);
    assert_eq!(record.power_on_attempts(), 0);
    assert_eq!(record.power_off_graceful_attempts(), 0);
    assert_eq!(record.phase(), Phase::None);
  }

  #[test]
  fn test_leaving_powering_off_clears_actual_state() {
    let mut record = component_in_phase(Phase::PoweringOff);
    let patch = Component {
      id: record.id.clone(),
      status: Some(ComponentStatus {
        phase: Some(Phase::None),
        ..Default::default()
      }),
      ..Default::default()
    };
    update_component_record(&mut record, &patch);
    let actual = record.actual_state.unwrap();
    assert!(actual.boot_artifacts.unwrap().is_empty());
    assert_eq!(actual.bss_token.as_deref(), Some(""));
    assert!(actual.last_updated.is_some());
  }

  #[test]
  fn test_same_phase_keeps_event_stats() {
    let mut record = component_in_phase(Phase::PoweringOn);
    let patch = Component {
      id: record.id.clone(),
      status: Some(ComponentStatus {
        phase: Some(Phase::PoweringOn),
        ..Default::default()
      }),
      error: Some("".to_string()),
      ..Default::default()
    };
    update_component_record(&mut record, &patch);
    assert_eq!(record.power_on_attempts(), 2);
  }

  #[test]
  fn test_patch_is_idempotent() {
    let mut record = component_in_phase(Phase::PoweringOn);
    let patch = Component {
      id: record.id.clone(),
      desired_state: Some(ComponentDesiredState {
        boot_artifacts: Some(full_artifacts()),
        configuration: Some("cfg1".to_string()),
        ..Default::default()
      }),
      enabled: Some(true),
      ..Default::default()
    };
    update_component_record(&mut record, &patch);
    let once = record.clone();
    update_component_record(&mut record, &patch);
    assert_eq!(once, record);
  }

  #[test]
  fn test_merge_does_not_drop_sibling_fields() {
    let mut record = Component::new("x3000c0s19b1n0");
    record.desired_state = Some(ComponentDesiredState {
      boot_artifacts: Some(full_artifacts()),
      configuration: Some("cfg1".to_string()),
      ..Default::default()
    });
    let patch = Component {
      id: record.id.clone(),
      desired_state: Some(ComponentDesiredState {
        bss_token: Some("token-2".to_string()),
        ..Default::default()
      }),
      ..Default::default()
    };
    update_component_record(&mut record, &patch);
    let desired = record.desired_state.unwrap();
    assert_eq!(desired.configuration.as_deref(), Some("cfg1"));
    assert_eq!(desired.bss_token.as_deref(), Some("token-2"));
  }

  #[test]
  fn test_set_last_updated_skips_bare_bss_token() {
    let mut patch = Component {
      id: "x1".to_string(),
      actual_state: Some(ComponentActualState {
        bss_token: Some(String::new()),
        ..Default::default()
      }),
      desired_state: Some(ComponentDesiredState::default()),
      ..Default::default()
    };
    set_last_updated(&mut patch);
    assert!(patch.actual_state.unwrap().last_updated.is_none());
    assert!(patch.desired_state.unwrap().last_updated.is_some());
  }

  #[test]
  fn test_effective_status() {
    let mut component = component_in_phase(Phase::Configuring);
    assert_eq!(component.effective_status(), "configuring");
    component.status.as_mut().unwrap().status_override =
      Some(STATUS_FAILED.to_string());
    assert_eq!(component.effective_status(), STATUS_FAILED);
    let stable = Component::new("x1");
    assert_eq!(stable.effective_status(), STATUS_STABLE);
  }

  #[test]
  fn test_boot_artifacts_empty_or_complete() {
    assert!(BootArtifacts::default().is_empty());
    assert!(full_artifacts().is_complete());
    let partial = BootArtifacts {
      kernel: "s3://bi/img1/kernel".to_string(),
      ..Default::default()
    };
    assert!(!partial.is_empty());
    assert!(!partial.is_complete());
  }
}
