use async_trait::async_trait;

use crate::common::utils::{age_to_duration, seconds_since};
use crate::component::{Component, ComponentActualState};
use crate::error::Error;
use crate::options::OptionsData;
use crate::session::{Session, SessionStatusLabel};

use super::{Operator, OperatorContext};

/// Clears the actual state of components whose observation is older than
/// the actual-state TTL, forcing re-observation.
pub struct ActualStateCleanupOperator {
  context: OperatorContext,
}

impl ActualStateCleanupOperator {
  pub fn new(context: OperatorContext) -> Self {
    ActualStateCleanupOperator { context }
  }
}

#[async_trait]
impl Operator for ActualStateCleanupOperator {
  fn name(&self) -> &'static str {
    "actual_state_cleanup"
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let ttl_seconds =
      age_to_duration(&options.component_actual_state_ttl)?.num_seconds();
    if ttl_seconds <= 0 {
      return Ok(());
    }

    let stale = self
      .context
      .select_enabled(|component| {
        let actual_state = match &component.actual_state {
          Some(actual_state) => actual_state,
          None => return false,
        };
        if actual_state
          .boot_artifacts
          .as_ref()
          .map(|artifacts| artifacts.is_empty())
          .unwrap_or(true)
        {
          return false;
        }
        actual_state.last_updated.is_some()
          && seconds_since(actual_state.last_updated.as_deref())
            > ttl_seconds
      })
      .await?;

    if stale.is_empty() {
      log::debug!("Found 0 components that require action");
      return Ok(());
    }
    log::info!("Found {} components that require action", stale.len());

    let patches: Vec<Component> = stale
      .iter()
      .map(|component| Component {
        id: component.id.clone(),
        actual_state: Some(ComponentActualState::empty()),
        ..Default::default()
      })
      .collect();
    self.context.stores.components.update_all(&patches).await?;
    Ok(())
  }
}

/// Deletes completed sessions (and their status snapshots) once they have
/// been finished for longer than the cleanup TTL.
pub struct SessionCleanupOperator {
  context: OperatorContext,
}

impl SessionCleanupOperator {
  pub fn new(context: OperatorContext) -> Self {
    SessionCleanupOperator { context }
  }
}

#[async_trait]
impl Operator for SessionCleanupOperator {
  fn name(&self) -> &'static str {
    "session_cleanup"
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let ttl_seconds =
      age_to_duration(&options.cleanup_completed_session_ttl)?.num_seconds();
    if ttl_seconds <= 0 {
      // A zero TTL disables session cleanup
      return Ok(());
    }

    let expired: Vec<Session> = self
      .context
      .stores
      .sessions
      .get_all()
      .await?
      .into_iter()
      .filter(|session| {
        session.status.status == SessionStatusLabel::Complete
          && session.status.end_time.is_some()
          && seconds_since(session.status.end_time.as_deref()) > ttl_seconds
      })
      .collect();

    for session in expired {
      let tenant = session.tenant.as_deref();
      log::info!("Deleting expired session {}", session.name);
      self
        .context
        .stores
        .session_status
        .delete(&session.name, tenant)
        .await?;
      match self
        .context
        .stores
        .sessions
        .delete(&session.name, tenant)
        .await
      {
        Ok(()) => {}
        // Deleted underneath us, nothing to do
        Err(Error::SessionNotFound(_)) => {}
        Err(error) => return Err(error),
      }
    }

    Ok(())
  }
}
