use async_trait::async_trait;

use crate::common::utils::get_current_timestamp;
use crate::component::Component;
use crate::error::Error;
use crate::options::OptionsData;
use crate::session::status::session_extended_status;
use crate::session::{
  Session, SessionPatch, SessionStatusLabel, SessionStatusPatch,
};

use super::{Operator, OperatorContext};

/// Completes sessions whose owned components have all reached a terminal
/// phase, saving an extended-status snapshot for later retrieval.
pub struct SessionCompletionOperator {
  context: OperatorContext,
}

impl SessionCompletionOperator {
  pub fn new(context: OperatorContext) -> Self {
    SessionCompletionOperator { context }
  }
}

#[async_trait]
impl Operator for SessionCompletionOperator {
  fn name(&self) -> &'static str {
    "session_completion"
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let running: Vec<Session> = self
      .context
      .stores
      .sessions
      .get_all()
      .await?
      .into_iter()
      .filter(|session| session.status.status == SessionStatusLabel::Running)
      .collect();

    for session in running {
      let session_name = session.name.clone();
      let owned = self.owned_components(&session_name).await?;

      if owned.iter().any(|component| component.enabled()) {
        // Still converging
        continue;
      }

      log::info!("Session {} is complete", session_name);
      self.complete(&session, owned, options).await?;
    }

    Ok(())
  }
}

impl SessionCompletionOperator {
  async fn owned_components(
    &self,
    session_name: &str,
  ) -> Result<Vec<Component>, Error> {
    self
      .context
      .stores
      .components
      .get_all_filtered(
        |component| {
          (component.session.as_deref() == Some(session_name))
            .then_some(component)
        },
        None,
        0,
      )
      .await
  }

  async fn complete(
    &self,
    session: &Session,
    owned: Vec<Component>,
    options: &OptionsData,
  ) -> Result<(), Error> {
    let tenant = session.tenant.as_deref();

    let completed = self
      .context
      .stores
      .sessions
      .update(
        &session.name,
        tenant,
        &SessionPatch {
          status: Some(SessionStatusPatch {
            status: Some(SessionStatusLabel::Complete),
            end_time: Some(get_current_timestamp()),
            ..Default::default()
          }),
          ..Default::default()
        },
      )
      .await?;

    let staged = self
      .context
      .stores
      .components
      .get_all_filtered(
        |component| {
          let staged_for = component
            .staged_state
            .as_ref()
            .and_then(|staged| staged.session.as_deref());
          (staged_for == Some(session.name.as_str())).then_some(component)
        },
        None,
        0,
      )
      .await?;

    let status = session_extended_status(&completed, &owned, &staged);
    self
      .context
      .stores
      .session_status
      .put(&session.name, tenant, &status)
      .await?;

    if options.disable_components_on_completion {
      let patches: Vec<Component> = owned
        .iter()
        .filter(|component| component.enabled())
        .map(|component| Component {
          id: component.id.clone(),
          enabled: Some(false),
          ..Default::default()
        })
        .collect();
      if !patches.is_empty() {
        self.context.stores.components.update_all(&patches).await?;
      }
    }

    Ok(())
  }
}
