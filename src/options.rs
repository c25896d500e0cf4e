use serde::{Deserialize, Serialize};

use crate::{db::options::OptionsStore, error::Error};

/// Tunables for the whole service. Defaults live here; the options database
/// entry overrides fields selectively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionsData {
  pub bss_read_timeout: u64,
  pub cfs_read_timeout: u64,
  pub cleanup_completed_session_ttl: String,
  pub clear_stage: bool,
  pub component_actual_state_ttl: String,
  pub default_retry_policy: u32,
  pub disable_components_on_completion: bool,
  pub discovery_frequency: u64,
  pub hsm_read_timeout: u64,
  pub ims_errors_fatal: bool,
  pub ims_images_must_exist: bool,
  pub ims_read_timeout: u64,
  pub logging_level: String,
  pub max_boot_wait_time: u64,
  pub max_component_batch_size: usize,
  pub max_power_off_wait_time: u64,
  pub max_power_on_wait_time: u64,
  pub pcs_read_timeout: u64,
  pub polling_frequency: u64,
  pub reject_nids: bool,
  pub session_limit_required: bool,
}

impl Default for OptionsData {
  fn default() -> Self {
    OptionsData {
      bss_read_timeout: 20,
      cfs_read_timeout: 20,
      cleanup_completed_session_ttl: "7d".to_string(),
      clear_stage: false,
      component_actual_state_ttl: "4h".to_string(),
      default_retry_policy: 3,
      disable_components_on_completion: false,
      discovery_frequency: 300,
      hsm_read_timeout: 20,
      ims_errors_fatal: false,
      ims_images_must_exist: false,
      ims_read_timeout: 20,
      logging_level: "INFO".to_string(),
      max_boot_wait_time: 1200,
      max_component_batch_size: 2800,
      max_power_off_wait_time: 300,
      max_power_on_wait_time: 120,
      pcs_read_timeout: 20,
      polling_frequency: 15,
      reject_nids: false,
      session_limit_required: false,
    }
  }
}

/// The database entry: a sparse override of `OptionsData`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OptionsUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bss_read_timeout: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cfs_read_timeout: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cleanup_completed_session_ttl: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub clear_stage: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub component_actual_state_ttl: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default_retry_policy: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub disable_components_on_completion: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub discovery_frequency: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hsm_read_timeout: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ims_errors_fatal: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ims_images_must_exist: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ims_read_timeout: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub logging_level: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_boot_wait_time: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_component_batch_size: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_power_off_wait_time: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_power_on_wait_time: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pcs_read_timeout: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub polling_frequency: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reject_nids: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_limit_required: Option<bool>,
}

impl OptionsUpdate {
  pub fn merge(&mut self, other: &OptionsUpdate) {
    macro_rules! take {
      ($field:ident) => {
        if other.$field.is_some() {
          self.$field = other.$field.clone();
        }
      };
    }
    take!(bss_read_timeout);
    take!(cfs_read_timeout);
    take!(cleanup_completed_session_ttl);
    take!(clear_stage);
    take!(component_actual_state_ttl);
    take!(default_retry_policy);
    take!(disable_components_on_completion);
    take!(discovery_frequency);
    take!(hsm_read_timeout);
    take!(ims_errors_fatal);
    take!(ims_images_must_exist);
    take!(ims_read_timeout);
    take!(logging_level);
    take!(max_boot_wait_time);
    take!(max_component_batch_size);
    take!(max_power_off_wait_time);
    take!(max_power_on_wait_time);
    take!(pcs_read_timeout);
    take!(polling_frequency);
    take!(reject_nids);
    take!(session_limit_required);
  }
}

impl OptionsData {
  pub fn apply(&mut self, update: &OptionsUpdate) {
    macro_rules! set {
      ($field:ident) => {
        if let Some(value) = &update.$field {
          self.$field = value.clone();
        }
      };
    }
    set!(bss_read_timeout);
    set!(cfs_read_timeout);
    set!(cleanup_completed_session_ttl);
    set!(clear_stage);
    set!(component_actual_state_ttl);
    set!(default_retry_policy);
    set!(disable_components_on_completion);
    set!(discovery_frequency);
    set!(hsm_read_timeout);
    set!(ims_errors_fatal);
    set!(ims_images_must_exist);
    set!(ims_read_timeout);
    set!(logging_level);
    set!(max_boot_wait_time);
    set!(max_component_batch_size);
    set!(max_power_off_wait_time);
    set!(max_power_on_wait_time);
    set!(pcs_read_timeout);
    set!(polling_frequency);
    set!(reject_nids);
    set!(session_limit_required);
  }

  pub fn with_update(update: &OptionsUpdate) -> OptionsData {
    let mut options = OptionsData::default();
    options.apply(update);
    options
  }
}

/// Options handler backed by the options database. The cached data is only
/// refreshed by an explicit `update` call, which the operators issue at the
/// top of every pass.
#[derive(Clone)]
pub struct OptionsCache {
  store: OptionsStore,
  data: OptionsData,
}

impl OptionsCache {
  pub fn new(store: OptionsStore) -> Self {
    OptionsCache {
      store,
      data: OptionsData::default(),
    }
  }

  /// Refreshes the cached options data
  pub async fn update(&mut self) -> Result<(), Error> {
    let update = self.store.get().await?.unwrap_or_default();
    let mut data = OptionsData::default();
    data.apply(&update);
    self.data = data;
    Ok(())
  }

  pub fn data(&self) -> &OptionsData {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let options = OptionsData::default();
    assert_eq!(options.polling_frequency, 15);
    assert_eq!(options.default_retry_policy, 3);
    assert_eq!(options.cleanup_completed_session_ttl, "7d");
    assert!(!options.disable_components_on_completion);
  }

  #[test]
  fn test_apply_selective_override() {
    let update = OptionsUpdate {
      polling_frequency: Some(60),
      ims_images_must_exist: Some(true),
      ..Default::default()
    };
    let options = OptionsData::with_update(&update);
    assert_eq!(options.polling_frequency, 60);
    assert!(options.ims_images_must_exist);
    // Untouched fields keep their defaults
    assert_eq!(options.max_boot_wait_time, 1200);
  }

  #[test]
  fn test_update_merge() {
    let mut base = OptionsUpdate {
      polling_frequency: Some(30),
      ..Default::default()
    };
    let patch = OptionsUpdate {
      reject_nids: Some(true),
      ..Default::default()
    };
    base.merge(&patch);
    assert_eq!(base.polling_frequency, Some(30));
    assert_eq!(base.reject_nids, Some(true));
  }
}
