use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::clients::Clients;
use crate::common::utils::age_to_timestamp;
use crate::component::Component;
use crate::db::Stores;
use crate::error::Error;
use crate::options::OptionsData;
use crate::session::status::{session_extended_status, SessionExtendedStatus};
use crate::session::{
  Operation, Session, SessionPatch, SessionStatusLabel,
};
use crate::template::validate::{validate_boot_sets, BootSetStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreateRequest {
  pub template_name: String,
  pub operation: Operation,
  #[serde(default)]
  pub limit: Option<String>,
  #[serde(default)]
  pub stage: Option<bool>,
  #[serde(default)]
  pub include_disabled: Option<bool>,
  #[serde(default)]
  pub name: Option<String>,
}

/// Create a new session from a template. The template is validated here so
/// a doomed session never reaches the setup operator.
pub async fn post_session(
  stores: &Stores,
  clients: &Clients,
  options: &OptionsData,
  tenant: Option<&str>,
  request: SessionCreateRequest,
) -> Result<Session, Error> {
  let tenant = tenant.filter(|tenant| !tenant.is_empty());
  if let Some(tenant) = tenant {
    if !clients.tapms.validate_tenant_exists(tenant).await? {
      return Err(Error::TenantNotFound(tenant.to_string()));
    }
  }

  let limit = request.limit.clone().unwrap_or_default();
  if options.session_limit_required && limit.is_empty() {
    return Err(Error::Message(
      "Session creation requires a limit but none was provided".to_string(),
    ));
  }

  let template = stores
    .session_templates
    .get_or_err(&request.template_name, tenant)
    .await?;

  if template.boot_sets.is_empty() {
    return Err(Error::Message(format!(
      "Session template '{}' must have one or more defined boot sets for the creation of a session.",
      request.template_name
    )));
  }
  for (bs_name, bs) in &template.boot_sets {
    if !bs.has_hardware_specifier() {
      return Err(Error::Message(format!(
        "Session template '{}' boot set '{}' must have at least one hardware specifier field provided; None defined.",
        request.template_name, bs_name
      )));
    }
  }

  let (status, msg) = validate_boot_sets(
    &template,
    request.operation,
    &request.template_name,
    options,
    &clients.ims,
  )
  .await;
  if status == BootSetStatus::Error {
    return Err(Error::Message(msg));
  }

  let name = match &request.name {
    Some(name) if !name.is_empty() => name.clone(),
    _ => Uuid::new_v4().to_string(),
  };
  if stores.sessions.exists(&name, tenant).await? {
    return Err(Error::Message(format!(
      "A session with the name {} already exists",
      name
    )));
  }

  let mut session =
    Session::new(&name, tenant, request.operation, &request.template_name);
  session.limit = limit;
  session.stage = request.stage.unwrap_or(false);
  session.include_disabled = request.include_disabled.unwrap_or(false);

  stores.sessions.put(&session).await?;
  Ok(session)
}

/// Age/status filters for session listing and bulk deletion. Ages are
/// duration strings such as '3d4h5m'.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
  pub min_age: Option<String>,
  pub max_age: Option<String>,
  pub status: Option<SessionStatusLabel>,
}

fn matches_filter(
  session: &Session,
  min_start: Option<DateTime<Utc>>,
  max_start: Option<DateTime<Utc>>,
  status: Option<SessionStatusLabel>,
) -> bool {
  if let Some(status) = status {
    if session.status.status != status {
      return false;
    }
  }
  let session_start = session
    .status
    .start_time
    .as_deref()
    .and_then(|start| crate::common::utils::load_timestamp(start).ok());
  if let Some(min_start) = min_start {
    match session_start {
      Some(session_start) if session_start >= min_start => {}
      _ => return false,
    }
  }
  if let Some(max_start) = max_start {
    match session_start {
      Some(session_start) if session_start <= max_start => {}
      _ => return false,
    }
  }
  true
}

async fn get_filtered_sessions(
  stores: &Stores,
  tenant: Option<&str>,
  filter: &SessionFilter,
) -> Result<Vec<Session>, Error> {
  // min_age bounds the newest acceptable start; max_age the oldest
  let max_start = match &filter.min_age {
    Some(age) => Some(age_to_timestamp(age)?),
    None => None,
  };
  let min_start = match &filter.max_age {
    Some(age) => Some(age_to_timestamp(age)?),
    None => None,
  };

  Ok(
    stores
      .sessions
      .get_all()
      .await?
      .into_iter()
      .filter(|session| {
        tenant.is_none() || session.tenant.as_deref() == tenant
      })
      .filter(|session| {
        matches_filter(session, min_start, max_start, filter.status)
      })
      .collect(),
  )
}

pub async fn get_sessions(
  stores: &Stores,
  tenant: Option<&str>,
  filter: &SessionFilter,
) -> Result<Vec<Session>, Error> {
  log::debug!("Listing sessions with filter {:?}", filter);
  get_filtered_sessions(stores, tenant, filter).await
}

pub async fn get_session(
  stores: &Stores,
  tenant: Option<&str>,
  session_id: &str,
) -> Result<Session, Error> {
  stores.sessions.get_or_err(session_id, tenant).await
}

pub async fn patch_session(
  stores: &Stores,
  tenant: Option<&str>,
  session_id: &str,
  patch: &SessionPatch,
) -> Result<Session, Error> {
  stores.sessions.update(session_id, tenant, patch).await
}

pub async fn delete_session(
  stores: &Stores,
  tenant: Option<&str>,
  session_id: &str,
) -> Result<(), Error> {
  stores.session_status.delete(session_id, tenant).await?;
  stores.sessions.delete(session_id, tenant).await
}

pub async fn delete_sessions(
  stores: &Stores,
  tenant: Option<&str>,
  filter: &SessionFilter,
) -> Result<usize, Error> {
  let sessions = get_filtered_sessions(stores, tenant, filter).await?;
  let mut deleted = 0;
  for session in sessions {
    delete_session(stores, session.tenant.as_deref(), &session.name)
      .await?;
    deleted += 1;
  }
  Ok(deleted)
}

/// Extended status for a session: the snapshot saved at completion when one
/// exists, otherwise computed live from the component records.
pub async fn get_session_status(
  stores: &Stores,
  tenant: Option<&str>,
  session_id: &str,
) -> Result<SessionExtendedStatus, Error> {
  let session = stores.sessions.get_or_err(session_id, tenant).await?;

  if session.status.status == SessionStatusLabel::Complete {
    if let Some(saved) =
      stores.session_status.get(session_id, tenant).await?
    {
      return Ok(saved);
    }
  }

  let owned = stores
    .components
    .get_all_filtered(
      |component: Component| {
        (component.session.as_deref() == Some(session_id))
          .then_some(component)
      },
      None,
      0,
    )
    .await?;
  let staged = stores
    .components
    .get_all_filtered(
      |component: Component| {
        let staged_for = component
          .staged_state
          .as_ref()
          .and_then(|staged| staged.session.as_deref());
        (staged_for == Some(session_id)).then_some(component)
      },
      None,
      0,
    )
    .await?;

  Ok(session_extended_status(&session, &owned, &staged))
}

#[cfg(test)]
mod tests {
  use crate::common::utils::get_current_timestamp;

  use super::*;

  fn session_with_start(name: &str, start: &str) -> Session {
    let mut session = Session::new(name, None, Operation::Boot, "t1");
    session.status.start_time = Some(start.to_string());
    session
  }

  #[tokio::test]
  async fn test_filter_by_status() {
    let stores = Stores::memory();
    let mut running = Session::new("s1", None, Operation::Boot, "t1");
    running.status.status = SessionStatusLabel::Running;
    stores.sessions.put(&running).await.unwrap();
    stores
      .sessions
      .put(&Session::new("s2", None, Operation::Boot, "t1"))
      .await
      .unwrap();

    let filter = SessionFilter {
      status: Some(SessionStatusLabel::Running),
      ..Default::default()
    };
    let sessions = get_sessions(&stores, None, &filter).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "s1");
  }

  #[tokio::test]
  async fn test_filter_by_age() {
    let stores = Stores::memory();
    stores
      .sessions
      .put(&session_with_start("old", "2020-01-01T00:00:00Z"))
      .await
      .unwrap();
    stores
      .sessions
      .put(&session_with_start("new", &get_current_timestamp()))
      .await
      .unwrap();

    // Sessions older than a day
    let filter = SessionFilter {
      min_age: Some("1d".to_string()),
      ..Default::default()
    };
    let sessions = get_sessions(&stores, None, &filter).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "old");

    // Sessions younger than a day
    let filter = SessionFilter {
      max_age: Some("1d".to_string()),
      ..Default::default()
    };
    let sessions = get_sessions(&stores, None, &filter).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "new");
  }

  #[tokio::test]
  async fn test_bad_age_is_an_error() {
    let stores = Stores::memory();
    let filter = SessionFilter {
      min_age: Some("soon".to_string()),
      ..Default::default()
    };
    assert!(get_sessions(&stores, None, &filter).await.is_err());
  }

  #[tokio::test]
  async fn test_delete_sessions_with_filter() {
    let stores = Stores::memory();
    let mut done = session_with_start("done", "2020-01-01T00:00:00Z");
    done.status.status = SessionStatusLabel::Complete;
    stores.sessions.put(&done).await.unwrap();
    stores
      .sessions
      .put(&session_with_start("fresh", &get_current_timestamp()))
      .await
      .unwrap();

    let filter = SessionFilter {
      status: Some(SessionStatusLabel::Complete),
      ..Default::default()
    };
    let deleted = delete_sessions(&stores, None, &filter).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(stores.sessions.get("done", None).await.unwrap().is_none());
    assert!(stores.sessions.get("fresh", None).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_tenant_scoped_listing() {
    let stores = Stores::memory();
    stores
      .sessions
      .put(&Session::new("s1", Some("tenant-a"), Operation::Boot, "t1"))
      .await
      .unwrap();
    stores
      .sessions
      .put(&Session::new("s2", None, Operation::Boot, "t1"))
      .await
      .unwrap();

    let sessions = get_sessions(
      &stores,
      Some("tenant-a"),
      &SessionFilter::default(),
    )
    .await
    .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "s1");

    let all = get_sessions(&stores, None, &SessionFilter::default())
      .await
      .unwrap();
    assert_eq!(all.len(), 2);
  }

  #[tokio::test]
  async fn test_live_session_status() {
    let stores = Stores::memory();
    let mut session = Session::new("s1", None, Operation::Boot, "t1");
    session.status.status = SessionStatusLabel::Running;
    stores.sessions.put(&session).await.unwrap();

    let component = Component {
      id: "x1".to_string(),
      session: Some("s1".to_string()),
      enabled: Some(false),
      ..Default::default()
    };
    stores.components.put(&component).await.unwrap();

    let status = get_session_status(&stores, None, "s1").await.unwrap();
    assert_eq!(status.managed_components_count, 1);
    assert_eq!(status.percent_successful, 100.0);
  }
}
