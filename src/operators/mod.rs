pub mod apply_staged;
pub mod cleanup;
pub mod configuration;
pub mod power;
pub mod power_off_forceful;
pub mod power_off_graceful;
pub mod power_on;
pub mod session_completion;
pub mod session_setup;
pub mod status;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::LevelFilter;
use tokio_util::sync::CancellationToken;

use crate::clients::Clients;
use crate::component::{Component, ComponentLastAction};
use crate::db::Stores;
use crate::error::Error;
use crate::options::{OptionsCache, OptionsData};

// Minimum sleep after a failed pass, so a persistent error cannot spin the
// loop.
const ERROR_SLEEP_SECS: u64 = 5;

/// A single-purpose reconciliation pass. Implementations select the
/// components their predicate matches, act on them, and write back patches;
/// the loop harness owns scheduling, options refresh and error containment.
#[async_trait]
pub trait Operator: Send {
  /// How the operator/action is logged in the components database.
  fn name(&self) -> &'static str;

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error>;
}

/// Everything an operator needs to do its work.
#[derive(Clone)]
pub struct OperatorContext {
  pub stores: Stores,
  pub clients: Clients,
}

impl OperatorContext {
  pub fn new(stores: Stores, clients: Clients) -> Self {
    OperatorContext { stores, clients }
  }

  /// All enabled components matching the given predicate, with their error
  /// field cleared so stale errors do not outlive the conditions that
  /// caused them.
  pub async fn select_enabled(
    &self,
    predicate: impl Fn(&Component) -> bool,
  ) -> Result<Vec<Component>, Error> {
    let mut components = self
      .stores
      .components
      .get_all_filtered(
        |component| {
          (component.enabled() && predicate(&component)).then_some(component)
        },
        None,
        0,
      )
      .await?;
    for component in &mut components {
      component.error = Some(String::new());
    }
    Ok(components)
  }
}

/// The starting patch every operator records against a component it acted
/// on: the action name, failure flag and the (possibly cleared) error.
pub fn base_patch(component: &Component, action: &str, failed: bool) -> Component {
  Component {
    id: component.id.clone(),
    error: component.error.clone(),
    last_action: Some(ComponentLastAction {
      action: Some(action.to_string()),
      failed: Some(failed),
      last_updated: None,
    }),
    ..Default::default()
  }
}

/// Exponential per-component backoff: an operator only acts when the time
/// since the last action exceeds the delay for the current attempt count.
pub fn backoff_elapsed(
  seconds_since_last_action: i64,
  attempts: u32,
  options: &OptionsData,
  max_wait: u64,
) -> bool {
  let delay = options
    .polling_frequency
    .saturating_mul(1u64 << attempts.min(16))
    .min(max_wait);
  seconds_since_last_action >= delay as i64
}

pub fn retry_policy(component: &Component, options: &OptionsData) -> u32 {
  component
    .retry_policy
    .unwrap_or(options.default_retry_policy)
}

/// The core loop shared by every operator: refresh options and the logging
/// level, run a pass, and sleep out the rest of the polling interval.
/// Exceptions never escape; the loop logs them and keeps going.
pub async fn run_operator_loop(
  mut operator: Box<dyn Operator>,
  mut options: OptionsCache,
  shutdown: CancellationToken,
) {
  log::info!("Starting operator {}", operator.name());

  loop {
    let start = Instant::now();
    let mut pass_failed = false;

    if let Err(error) = options.update().await {
      log::error!(
        "{}: unable to refresh options: {}",
        operator.name(),
        error
      );
      pass_failed = true;
    } else {
      update_log_level(&options.data().logging_level);
      if let Err(error) = operator.run_pass(options.data()).await {
        log::error!(
          "{}: unhandled error detected: {}",
          operator.name(),
          error
        );
        pass_failed = true;
      }
    }

    let polling_frequency =
      Duration::from_secs(options.data().polling_frequency);
    let mut sleep_time = polling_frequency.saturating_sub(start.elapsed());
    if pass_failed {
      sleep_time = sleep_time.max(Duration::from_secs(ERROR_SLEEP_SECS));
    }

    tokio::select! {
      _ = shutdown.cancelled() => {
        log::info!("Stopping operator {}", operator.name());
        return;
      }
      _ = tokio::time::sleep(sleep_time) => {}
    }
  }
}

/// Updates the current logging level based on the value in the options
/// database.
fn update_log_level(level: &str) {
  let new_level = match level.to_uppercase().as_str() {
    "TRACE" => LevelFilter::Trace,
    "DEBUG" => LevelFilter::Debug,
    "INFO" => LevelFilter::Info,
    "WARN" | "WARNING" => LevelFilter::Warn,
    "ERROR" => LevelFilter::Error,
    _ => return,
  };
  if log::max_level() != new_level {
    log::info!(
      "Changing logging level from {} to {}",
      log::max_level(),
      new_level
    );
    log::set_max_level(new_level);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_elapsed_growth() {
    let options = OptionsData::default(); // polling_frequency 15
    // First attempt: 15s delay
    assert!(backoff_elapsed(15, 0, &options, 300));
    assert!(!backoff_elapsed(10, 0, &options, 300));
    // Second attempt: 30s delay
    assert!(!backoff_elapsed(20, 1, &options, 300));
    assert!(backoff_elapsed(31, 1, &options, 300));
    // Delay is capped at the max wait
    assert!(backoff_elapsed(300, 10, &options, 300));
    assert!(!backoff_elapsed(299, 10, &options, 300));
  }

  #[test]
  fn test_retry_policy_fallback() {
    let options = OptionsData::default();
    let mut component = Component::new("x1");
    assert_eq!(retry_policy(&component, &options), 3);
    component.retry_policy = Some(7);
    assert_eq!(retry_policy(&component, &options), 7);
  }

  #[test]
  fn test_base_patch_shape() {
    let mut component = Component::new("x1");
    component.error = Some(String::new());
    let patch = base_patch(&component, "power_on", false);
    assert_eq!(patch.id, "x1");
    assert_eq!(patch.error.as_deref(), Some(""));
    let last_action = patch.last_action.unwrap();
    assert_eq!(last_action.action.as_deref(), Some("power_on"));
    assert_eq!(last_action.failed, Some(false));
  }
}
