use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::Error;

use super::{build_client, send_with_retries};

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Location {
  pub xname: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  #[serde(rename = "deputyKey")]
  pub deputy_key: Option<String>,
}

#[derive(Display, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  #[serde(rename = "On")]
  #[strum(serialize = "On")]
  On,
  #[serde(rename = "Off")]
  #[strum(serialize = "Off")]
  Off,
  #[serde(rename = "Soft-Off")]
  #[strum(serialize = "Soft-Off")]
  SoftOff,
  #[serde(rename = "Soft-Restart")]
  #[strum(serialize = "Soft-Restart")]
  SoftRestart,
  #[serde(rename = "Hard-Restart")]
  #[strum(serialize = "Hard-Restart")]
  HardRestart,
  #[serde(rename = "Init")]
  #[strum(serialize = "Init")]
  Init,
  #[serde(rename = "Force-Off")]
  #[strum(serialize = "Force-Off")]
  ForceOff,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Transition {
  pub operation: Operation,
  #[serde(skip_serializing_if = "Option::is_none")]
  #[serde(rename = "taskDeadlineMinutes")]
  pub task_deadline_minutes: Option<usize>,
  pub location: Vec<Location>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionCreated {
  #[serde(rename = "transitionID")]
  pub transition_id: String,
  #[serde(default)]
  pub operation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerStatus {
  #[serde(default)]
  pub xname: String,
  #[serde(rename = "powerState", default)]
  pub power_state: String,
  #[serde(rename = "managementState", default)]
  pub management_state: String,
  #[serde(default)]
  pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerStatusAll {
  #[serde(default)]
  pub status: Vec<PowerStatus>,
}

#[derive(Clone)]
pub struct PcsClient {
  client: reqwest::Client,
  base_url: String,
}

impl PcsClient {
  pub fn new(base_url: &str, read_timeout: Duration) -> Result<Self, Error> {
    Ok(PcsClient {
      client: build_client(read_timeout)?,
      base_url: base_url.to_string(),
    })
  }

  /// One to one implementation of the underlying power-status query.
  pub async fn power_status(
    &self,
    xnames: &[String],
  ) -> Result<PowerStatusAll, Error> {
    let api_url = format!("{}/power-control/v1/power-status", self.base_url);

    let request_payload = serde_json::json!({ "xname": xnames });

    let response =
      send_with_retries(self.client.post(api_url).json(&request_payload))
        .await?;

    if response.status().is_success() {
      response
        .json::<PowerStatusAll>()
        .await
        .map_err(|error| Error::NetError(error))
    } else {
      let error_payload = response
        .json()
        .await
        .map_err(|error| Error::NetError(error))?;

      Err(Error::ApiError(error_payload))
    }
  }

  /// Map each xname to its current power state ('on', 'off' or
  /// 'undefined'). An xname with a per-entry error, or absent from the
  /// response, stays out of the returned map.
  pub async fn node_to_power_state(
    &self,
    xnames: &[String],
  ) -> Result<HashMap<String, String>, Error> {
    let mut power_states = HashMap::new();
    if xnames.is_empty() {
      log::warn!("node_to_power_state called without nodes; returning without action.");
      return Ok(power_states);
    }

    let power_status_all = self.power_status(xnames).await?;
    for entry in power_status_all.status {
      if entry.xname.is_empty() {
        continue;
      }
      if let Some(error) = &entry.error {
        if !error.is_empty() {
          log::debug!("PCS error for {}: {}", entry.xname, error);
          continue;
        }
      }
      if entry.power_state.is_empty() {
        continue;
      }
      power_states
        .insert(entry.xname, entry.power_state.to_lowercase());
    }

    Ok(power_states)
  }

  /// Create a PCS transition for the given xnames.
  pub async fn transition_create(
    &self,
    operation: Operation,
    xnames: &[String],
    task_deadline_minutes: Option<usize>,
  ) -> Result<TransitionCreated, Error> {
    if xnames.is_empty() {
      return Err(Error::Message(format!(
        "transition_create called with no xnames! (operation={})",
        operation
      )));
    }

    log::info!("Create PCS transition '{}' on {:?}", operation, xnames);

    let location_vec: Vec<Location> = xnames
      .iter()
      .map(|xname| Location {
        xname: xname.to_string(),
        deputy_key: None,
      })
      .collect();

    let request_payload = Transition {
      operation,
      task_deadline_minutes,
      location: location_vec,
    };

    let api_url = format!("{}/power-control/v1/transitions", self.base_url);

    let response =
      send_with_retries(self.client.post(api_url).json(&request_payload))
        .await?;

    if response.status().is_success() {
      response
        .json::<TransitionCreated>()
        .await
        .map_err(|error| Error::NetError(error))
    } else {
      let error_payload = response
        .json()
        .await
        .map_err(|error| Error::NetError(error))?;

      Err(Error::ApiError(error_payload))
    }
  }

  pub async fn power_on(
    &self,
    xnames: &[String],
  ) -> Result<TransitionCreated, Error> {
    self.transition_create(Operation::On, xnames, Some(1)).await
  }

  pub async fn soft_off(
    &self,
    xnames: &[String],
  ) -> Result<TransitionCreated, Error> {
    self
      .transition_create(Operation::SoftOff, xnames, Some(1))
      .await
  }

  pub async fn force_off(
    &self,
    xnames: &[String],
  ) -> Result<TransitionCreated, Error> {
    self
      .transition_create(Operation::ForceOff, xnames, Some(1))
      .await
  }
}

/// PCS error strings that indicate the hardware cannot complete the
/// transition; components reporting them are disabled rather than retried.
pub fn disable_based_on_error_xname_on_off(error: &str) -> bool {
  const TERMINAL_ERRORS: [&str; 3] = [
    "NodeBMC Communication Error",
    "Node not found",
    "No power control for component",
  ];

  TERMINAL_ERRORS
    .iter()
    .any(|terminal| error.contains(terminal))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_operation_wire_names() {
    assert_eq!(
      serde_json::to_string(&Operation::SoftOff).unwrap(),
      "\"Soft-Off\""
    );
    assert_eq!(
      serde_json::to_string(&Operation::ForceOff).unwrap(),
      "\"Force-Off\""
    );
    assert_eq!(Operation::On.to_string(), "On");
  }

  #[test]
  fn test_power_status_decoding() {
    let payload = serde_json::json!({
      "status": [
        {"xname": "x1", "powerState": "ON", "managementState": "available", "error": null},
        {"xname": "x2", "powerState": "off", "managementState": "available", "error": ""}
      ]
    });
    let decoded: PowerStatusAll =
      serde_json::from_value(payload).unwrap();
    assert_eq!(decoded.status.len(), 2);
    assert_eq!(decoded.status[0].power_state, "ON");
  }

  #[test]
  fn test_disable_based_on_error() {
    assert!(disable_based_on_error_xname_on_off(
      "transition failed: NodeBMC Communication Error"
    ));
    assert!(!disable_based_on_error_xname_on_off("transient timeout"));
  }
}
