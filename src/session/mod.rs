pub mod status;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::common::utils::get_current_timestamp;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
pub enum Operation {
  #[serde(rename = "boot")]
  #[strum(serialize = "boot")]
  Boot,
  #[serde(rename = "reboot")]
  #[strum(serialize = "reboot")]
  Reboot,
  #[serde(rename = "shutdown")]
  #[strum(serialize = "shutdown")]
  Shutdown,
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display,
)]
pub enum SessionStatusLabel {
  #[default]
  #[serde(rename = "pending")]
  #[strum(serialize = "pending")]
  Pending,
  #[serde(rename = "running")]
  #[strum(serialize = "running")]
  Running,
  #[serde(rename = "complete")]
  #[strum(serialize = "complete")]
  Complete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
  #[serde(default)]
  pub status: SessionStatusLabel,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_time: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_time: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// A user-initiated request to move a set of components to the state
/// declared by a session template. Names are UUIDs assigned at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tenant: Option<String>,
  pub operation: Operation,
  pub template_name: String,
  #[serde(default)]
  pub limit: String,
  #[serde(default)]
  pub stage: bool,
  #[serde(default)]
  pub include_disabled: bool,
  #[serde(default)]
  pub components: String,
  #[serde(default)]
  pub status: SessionStatus,
}

impl Session {
  pub fn new(
    name: &str,
    tenant: Option<&str>,
    operation: Operation,
    template_name: &str,
  ) -> Self {
    Session {
      name: name.to_string(),
      tenant: tenant.map(str::to_string),
      operation,
      template_name: template_name.to_string(),
      limit: String::new(),
      stage: false,
      include_disabled: false,
      components: String::new(),
      status: SessionStatus {
        status: SessionStatusLabel::Pending,
        start_time: Some(get_current_timestamp()),
        end_time: None,
        error: None,
      },
    }
  }

  pub fn tenant_or_empty(&self) -> &str {
    self.tenant.as_deref().unwrap_or("")
  }
}

/// Sparse update applied to a stored session. Status fields merge into the
/// existing status sub-record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub components: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<SessionStatusPatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatusPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<SessionStatusLabel>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_time: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_time: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

pub fn update_session_record(record: &mut Session, patch: &SessionPatch) {
  if let Some(components) = &patch.components {
    record.components = components.clone();
  }
  if let Some(status) = &patch.status {
    if let Some(label) = status.status {
      record.status.status = label;
    }
    if let Some(start_time) = &status.start_time {
      record.status.start_time = Some(start_time.clone());
    }
    if let Some(end_time) = &status.end_time {
      record.status.end_time = Some(end_time.clone());
    }
    if let Some(error) = &status.error {
      record.status.error = Some(error.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_session_is_pending() {
    let session = Session::new(
      "0d1b0d25-brand-new",
      None,
      Operation::Boot,
      "template-1",
    );
    assert_eq!(session.status.status, SessionStatusLabel::Pending);
    assert!(session.status.start_time.is_some());
    assert!(session.components.is_empty());
  }

  #[test]
  fn test_update_session_record_merges_status() {
    let mut session =
      Session::new("abc", Some("vcluster1"), Operation::Shutdown, "t1");
    let patch = SessionPatch {
      components: Some("x1,x2".to_string()),
      status: Some(SessionStatusPatch {
        status: Some(SessionStatusLabel::Running),
        ..Default::default()
      }),
    };
    update_session_record(&mut session, &patch);
    assert_eq!(session.components, "x1,x2");
    assert_eq!(session.status.status, SessionStatusLabel::Running);
    // The original start time survives a status merge
    assert!(session.status.start_time.is_some());
  }

  #[test]
  fn test_operation_serde() {
    let session =
      Session::new("abc", None, Operation::Reboot, "t1");
    let encoded = serde_json::to_string(&session).unwrap();
    assert!(encoded.contains("\"operation\":\"reboot\""));
    let decoded: Session = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.operation, Operation::Reboot);
  }
}
