use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::common::utils::{
  duration_to_string, get_current_time, load_timestamp, round2,
};
use crate::component::{Component, Phase, STATUS_FAILED, STATUS_ON_HOLD, STATUS_STABLE};

use super::{Session, SessionStatusLabel};

const MAX_COMPONENTS_IN_ERROR_DETAILS: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionExtendedStatusPhases {
  pub percent_complete: f64,
  pub percent_powering_on: f64,
  pub percent_powering_off: f64,
  pub percent_configuring: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionExtendedStatusErrorComponents {
  pub count: usize,
  /// Comma-joined xname prefix, truncated at ten entries with a trailing
  /// ellipsis.
  pub list: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionExtendedStatusTiming {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_time: Option<String>,
  pub end_time: Option<String>,
  pub duration: String,
}

/// Session-level progress derived from the per-component phase data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionExtendedStatus {
  pub status: SessionStatusLabel,
  pub managed_components_count: usize,
  pub phases: SessionExtendedStatusPhases,
  pub percent_staged: f64,
  pub percent_successful: f64,
  pub percent_failed: f64,
  pub error_summary: BTreeMap<String, SessionExtendedStatusErrorComponents>,
  pub timing: SessionExtendedStatusTiming,
}

/// Derive the extended status for a session from the components it owns and
/// the components staged for it.
pub fn session_extended_status(
  session: &Session,
  components: &[Component],
  staged_components: &[Component],
) -> SessionExtendedStatus {
  let managed_components_count = components.len() + staged_components.len();

  let mut successful_count = 0usize;
  let mut failed_count = 0usize;
  let mut powering_on_count = 0usize;
  let mut powering_off_count = 0usize;
  let mut configuring_count = 0usize;

  for component in components {
    match component.effective_status().as_str() {
      STATUS_STABLE => successful_count += 1,
      STATUS_FAILED => failed_count += 1,
      _ => {}
    }
    if !component.enabled() {
      continue;
    }
    let on_hold = component
      .status
      .as_ref()
      .and_then(|status| status.status_override.as_deref())
      == Some(STATUS_ON_HOLD);
    if on_hold {
      continue;
    }
    match component.phase() {
      Phase::PoweringOn => powering_on_count += 1,
      Phase::PoweringOff => powering_off_count += 1,
      Phase::Configuring => configuring_count += 1,
      Phase::None => {}
    }
  }

  let percent = |count: usize| {
    if managed_components_count == 0 {
      0.0
    } else {
      round2(count as f64 * 100.0 / managed_components_count as f64)
    }
  };

  SessionExtendedStatus {
    status: session.status.status,
    managed_components_count,
    phases: SessionExtendedStatusPhases {
      percent_complete: percent(successful_count + failed_count),
      percent_powering_on: percent(powering_on_count),
      percent_powering_off: percent(powering_off_count),
      percent_configuring: percent(configuring_count),
    },
    percent_staged: percent(staged_components.len()),
    percent_successful: percent(successful_count),
    percent_failed: percent(failed_count),
    error_summary: component_errors(components),
    timing: session_timing(session),
  }
}

fn component_errors(
  components: &[Component],
) -> BTreeMap<String, SessionExtendedStatusErrorComponents> {
  let mut errors: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
  for component in components {
    if let Some(error) = component.error.as_deref() {
      if !error.is_empty() {
        errors
          .entry(error.to_string())
          .or_default()
          .insert(component.id.clone());
      }
    }
  }

  errors
    .into_iter()
    .map(|(error, ids)| {
      let mut list = ids
        .iter()
        .take(MAX_COMPONENTS_IN_ERROR_DETAILS)
        .cloned()
        .collect::<Vec<String>>()
        .join(",");
      if ids.len() > MAX_COMPONENTS_IN_ERROR_DETAILS {
        list.push_str("...");
      }
      (
        error,
        SessionExtendedStatusErrorComponents {
          count: ids.len(),
          list,
        },
      )
    })
    .collect()
}

fn session_timing(session: &Session) -> SessionExtendedStatusTiming {
  let start_time = session.status.start_time.clone();
  let end_time = session.status.end_time.clone();

  let duration = match &start_time {
    Some(start) => match load_timestamp(start) {
      Ok(start) => {
        let end = end_time
          .as_deref()
          .and_then(|end| load_timestamp(end).ok())
          .unwrap_or_else(get_current_time);
        duration_to_string(end - start)
      }
      Err(_) => String::new(),
    },
    None => String::new(),
  };

  SessionExtendedStatusTiming {
    start_time,
    end_time,
    duration,
  }
}
