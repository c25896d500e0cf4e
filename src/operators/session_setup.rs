use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;

use crate::clients::hsm::Inventory;
use crate::clients::s3::BootImageMetadata;
use crate::common::utils::get_current_timestamp;
use crate::component::{
  BootArtifacts, Component, ComponentActualState, ComponentDesiredState,
  ComponentLastAction, ComponentStagedState, ACTION_SESSION_SETUP,
};
use crate::error::Error;
use crate::options::OptionsData;
use crate::rootfs::{get_provider, RootfsProvider};
use crate::session::{
  Operation, Session, SessionPatch, SessionStatusLabel, SessionStatusPatch,
};
use crate::template::{BootSet, SessionTemplate};

use super::{Operator, OperatorContext};

/// The Session Setup Operator sets the desired state of components based
/// on existing sessions.
pub struct SessionSetupOperator {
  context: OperatorContext,
}

impl SessionSetupOperator {
  pub fn new(context: OperatorContext) -> Self {
    SessionSetupOperator { context }
  }
}

#[async_trait]
impl Operator for SessionSetupOperator {
  fn name(&self) -> &'static str {
    ACTION_SESSION_SETUP
  }

  async fn run_pass(&mut self, options: &OptionsData) -> Result<(), Error> {
    let pending: Vec<Session> = self
      .context
      .stores
      .sessions
      .get_all()
      .await?
      .into_iter()
      .filter(|session| session.status.status == SessionStatusLabel::Pending)
      .collect();
    if pending.is_empty() {
      return Ok(());
    }

    // The inventory cache is shared by every session in the pass
    let mut inventory =
      Inventory::new(self.context.clients.hsm.clone(), None);

    for session in pending {
      if let Err(error) =
        self.setup(&session, &mut inventory, options).await
      {
        log::error!("Session {}: setup failed: {}", session.name, error);
        self.fail_session(&session, &error.to_string()).await?;
      }
    }

    Ok(())
  }
}

impl SessionSetupOperator {
  async fn setup(
    &self,
    session: &Session,
    inventory: &mut Inventory,
    _options: &OptionsData,
  ) -> Result<(), Error> {
    let tenant = session.tenant.as_deref().filter(|t| !t.is_empty());
    let template = self
      .context
      .stores
      .session_templates
      .get_or_err(&session.template_name, tenant)
      .await?;

    let tenant_components = match tenant {
      Some(tenant) => Some(
        self
          .context
          .clients
          .tapms
          .get_tenant_component_set(tenant)
          .await?,
      ),
      None => None,
    };

    let mut patches: Vec<Component> = Vec::new();

    for (bs_name, boot_set) in &template.boot_sets {
      let mut nodes = self
        .boot_set_node_list(session, bs_name, boot_set, inventory)
        .await?;

      if let Some(tenant_components) = &tenant_components {
        nodes.retain(|node| tenant_components.contains(node));
      }

      if !session.include_disabled {
        let node_ids: Vec<String> = nodes.iter().cloned().collect();
        let records = self
          .context
          .stores
          .components
          .mget_skip_bad_keys(&node_ids)
          .await?;
        let enabled_ids: HashSet<String> = records
          .into_iter()
          .filter(Component::enabled)
          .map(|component| component.id)
          .collect();
        nodes.retain(|node| enabled_ids.contains(node));
      }

      if nodes.is_empty() {
        log::warn!(
          "Session {}: No nodes were found to act on.",
          session.name
        );
        continue;
      }

      let (boot_artifacts, configuration) = match session.operation {
        Operation::Shutdown => (BootArtifacts::default(), String::new()),
        Operation::Boot | Operation::Reboot => {
          self.boot_set_state(session, &template, boot_set).await?
        }
      };

      let mut sorted_nodes: Vec<&String> = nodes.iter().collect();
      sorted_nodes.sort();
      for node in sorted_nodes {
        patches.push(operation_patch(
          session,
          node,
          &boot_artifacts,
          &configuration,
        ));
      }
    }

    let updated =
      self.context.stores.components.update_all(&patches).await?;
    let component_ids: BTreeSet<String> =
      updated.into_iter().map(|component| component.id).collect();

    self
      .context
      .stores
      .sessions
      .update(
        &session.name,
        tenant,
        &SessionPatch {
          components: Some(
            component_ids.into_iter().collect::<Vec<String>>().join(","),
          ),
          status: Some(SessionStatusPatch {
            status: Some(SessionStatusLabel::Running),
            start_time: Some(get_current_timestamp()),
            ..Default::default()
          }),
        },
      )
      .await?;
    log::info!("Session {}: Session is running", session.name);
    Ok(())
  }

  /// Expand one boot set into its node set: explicit node list, HSM group
  /// members and HSM role members, then the session's limit expression.
  async fn boot_set_node_list(
    &self,
    session: &Session,
    _bs_name: &str,
    boot_set: &BootSet,
    inventory: &mut Inventory,
  ) -> Result<HashSet<String>, Error> {
    let mut nodes: HashSet<String> = HashSet::new();

    if let Some(node_list) = &boot_set.node_list {
      nodes.extend(node_list.iter().cloned());
    }

    if let Some(node_groups) = &boot_set.node_groups {
      let groups = inventory.groups().await?;
      for group_name in node_groups {
        match groups.get(group_name) {
          Some(members) => nodes.extend(members.iter().cloned()),
          None => log::warn!(
            "Session {}: No hardware matching label {}",
            session.name,
            group_name
          ),
        }
      }
    }

    if let Some(node_roles_groups) = &boot_set.node_roles_groups {
      let roles = inventory.roles().await?;
      for role_name in node_roles_groups {
        match roles.get(role_name) {
          Some(members) => nodes.extend(members.iter().cloned()),
          None => log::warn!(
            "Session {}: No hardware matching role {}",
            session.name,
            role_name
          ),
        }
      }
    }

    if !session.limit.is_empty() {
      log::info!(
        "Session {}: Applying limit to session: {}",
        session.name,
        session.limit
      );
      let mut combined: HashMap<String, HashSet<String>> = HashMap::new();
      combined.extend(
        inventory
          .groups()
          .await?
          .iter()
          .map(|(label, members)| (label.clone(), members.clone())),
      );
      combined.extend(
        inventory
          .partitions()
          .await?
          .iter()
          .map(|(label, members)| (label.clone(), members.clone())),
      );
      combined.extend(
        inventory
          .roles()
          .await?
          .iter()
          .map(|(label, members)| (label.clone(), members.clone())),
      );
      nodes = apply_limit(&nodes, &session.limit, &combined);
    }

    Ok(nodes)
  }

  /// Resolve the image referenced by a boot set into boot artifacts and the
  /// CFS configuration the boot set calls for.
  async fn boot_set_state(
    &self,
    session: &Session,
    template: &SessionTemplate,
    boot_set: &BootSet,
  ) -> Result<(BootArtifacts, String), Error> {
    let image_metadata = BootImageMetadata::fetch(boot_set).await?;
    let provider = get_provider(boot_set, &image_metadata.artifact_summary)?;
    let image_kernel_parameters =
      image_metadata.image_kernel_parameters().await;

    let kernel_parameters = assemble_kernel_boot_parameters(
      &session.name,
      boot_set,
      image_kernel_parameters.as_deref(),
      provider.as_ref(),
    );

    let configuration = if template.enable_cfs {
      template
        .boot_set_configuration(boot_set)
        .unwrap_or_default()
        .to_string()
    } else {
      String::new()
    };

    Ok((image_metadata.boot_artifacts(kernel_parameters), configuration))
  }

  async fn fail_session(
    &self,
    session: &Session,
    error: &str,
  ) -> Result<(), Error> {
    self
      .context
      .stores
      .sessions
      .update(
        &session.name,
        session.tenant.as_deref(),
        &SessionPatch {
          status: Some(SessionStatusPatch {
            status: Some(SessionStatusLabel::Complete),
            end_time: Some(get_current_timestamp()),
            error: Some(error.to_string()),
            ..Default::default()
          }),
          ..Default::default()
        },
      )
      .await?;
    Ok(())
  }
}

/// Build the component patch for one node of a session, per the session's
/// operation and staging flag.
pub fn operation_patch(
  session: &Session,
  node: &str,
  boot_artifacts: &BootArtifacts,
  configuration: &str,
) -> Component {
  if session.stage {
    return Component {
      id: node.to_string(),
      staged_state: Some(ComponentStagedState {
        boot_artifacts: Some(boot_artifacts.clone()),
        configuration: Some(configuration.to_string()),
        session: Some(session.name.clone()),
        last_updated: None,
      }),
      ..Default::default()
    };
  }

  let mut patch = Component {
    id: node.to_string(),
    desired_state: Some(ComponentDesiredState {
      boot_artifacts: Some(boot_artifacts.clone()),
      configuration: Some(configuration.to_string()),
      ..Default::default()
    }),
    session: Some(session.name.clone()),
    enabled: Some(true),
    error: Some(String::new()),
    last_action: Some(ComponentLastAction {
      action: Some(ACTION_SESSION_SETUP.to_string()),
      failed: Some(false),
      last_updated: None,
    }),
    ..Default::default()
  };

  if session.operation == Operation::Reboot {
    // Forces the reconciler to treat the boot as new
    patch.actual_state = Some(ComponentActualState {
      bss_token: Some(String::new()),
      ..Default::default()
    });
  }

  patch
}

/// Apply a session limit expression to an expanded node set. Terms are
/// processed left to right: bare terms union, '&' intersects, '!'
/// subtracts; 'all' and '*' name the unrestricted expanded set; a term
/// matching an inventory label resolves to its members, anything else is a
/// literal xname.
pub fn apply_limit(
  nodes: &HashSet<String>,
  session_limit: &str,
  inventory: &HashMap<String, HashSet<String>>,
) -> HashSet<String> {
  if session_limit.is_empty() {
    // No limit is defined, so all nodes are allowed
    return nodes.clone();
  }

  let mut limit_node_set: HashSet<String> = HashSet::new();
  for term in session_limit.split(',') {
    if term.is_empty() {
      continue;
    }

    let (term, operation) = match term.split_at(1) {
      ("&", rest) => (rest, '&'),
      ("!", rest) => (rest, '!'),
      _ => (term, '+'),
    };

    let limit_nodes: HashSet<String> = if term == "all" || term == "*" {
      nodes.clone()
    } else if let Some(members) = inventory.get(term) {
      members.clone()
    } else {
      HashSet::from([term.to_string()])
    };

    limit_node_set = match operation {
      '&' => limit_node_set
        .intersection(&limit_nodes)
        .cloned()
        .collect(),
      '!' => limit_node_set
        .difference(&limit_nodes)
        .cloned()
        .collect(),
      _ => limit_node_set.union(&limit_nodes).cloned().collect(),
    };
  }

  nodes.intersection(&limit_node_set).cloned().collect()
}

/// Assemble the kernel boot parameters that BSS will hand the node.
///
/// The kernel boot parameters are appended together in this order:
/// 1. Parameters from the image itself.
/// 2. Parameters from the session template boot set.
/// 3. rootfs parameters.
/// 4. Node Memory Dump (NMD) parameters.
/// The session id always goes last. Empty pieces are simply not used.
pub fn assemble_kernel_boot_parameters(
  session_name: &str,
  boot_set: &BootSet,
  image_kernel_parameters: Option<&str>,
  provider: &dyn RootfsProvider,
) -> String {
  let mut boot_param_pieces: Vec<String> = Vec::new();

  if let Some(image_kernel_parameters) = image_kernel_parameters {
    boot_param_pieces.extend(
      image_kernel_parameters
        .split_whitespace()
        .map(str::to_string),
    );
  }

  if let Some(kernel_parameters) = &boot_set.kernel_parameters {
    if !kernel_parameters.is_empty() {
      boot_param_pieces.push(kernel_parameters.clone());
    }
  }

  let rootfs_parameters = provider.root_parameter(boot_set);
  if !rootfs_parameters.is_empty() {
    boot_param_pieces.push(rootfs_parameters);
  }
  if let Some(nmd_parameters) = provider.nmd_field() {
    if !nmd_parameters.is_empty() {
      boot_param_pieces.push(nmd_parameters);
    }
  }

  boot_param_pieces.push(format!("bos_session_id={}", session_name));

  boot_param_pieces.join(" ")
}

#[cfg(test)]
mod tests {
  use crate::rootfs::DefaultProvider;

  use super::*;

  fn inventory() -> HashMap<String, HashSet<String>> {
    let mut inventory = HashMap::new();
    inventory.insert(
      "gA".to_string(),
      HashSet::from([
        "x1".to_string(),
        "x2".to_string(),
        "x3".to_string(),
      ]),
    );
    inventory.insert(
      "gB".to_string(),
      HashSet::from(["x2".to_string(), "x4".to_string()]),
    );
    inventory
  }

  fn artifacts() -> BootArtifacts {
    BootArtifacts {
      kernel: "s3://bi/img1/kernel".to_string(),
      kernel_parameters: "console=ttyS0".to_string(),
      initrd: "s3://bi/img1/initrd".to_string(),
    }
  }

  #[test]
  fn test_limit_intersection() {
    let nodes: HashSet<String> =
      HashSet::from(["x1".to_string(), "x2".to_string(), "x3".to_string()]);
    let selected = apply_limit(&nodes, "gA,&gB", &inventory());
    assert_eq!(selected, HashSet::from(["x2".to_string()]));
  }

  #[test]
  fn test_limit_all_with_subtract() {
    let nodes: HashSet<String> = inventory()["gA"]
      .union(&inventory()["gB"])
      .cloned()
      .collect();
    let selected = apply_limit(&nodes, "all,&gA,!x1", &inventory());
    assert_eq!(
      selected,
      HashSet::from(["x2".to_string(), "x3".to_string()])
    );
  }

  #[test]
  fn test_limit_literal_xname() {
    let nodes: HashSet<String> =
      HashSet::from(["x1".to_string(), "x2".to_string()]);
    let selected = apply_limit(&nodes, "x2", &inventory());
    assert_eq!(selected, HashSet::from(["x2".to_string()]));
  }

  #[test]
  fn test_empty_limit_is_unrestricted() {
    let nodes: HashSet<String> = HashSet::from(["x1".to_string()]);
    assert_eq!(apply_limit(&nodes, "", &inventory()), nodes);
  }

  #[test]
  fn test_assemble_kernel_boot_parameters_order() {
    let boot_set = BootSet {
      kernel_parameters: Some("console=ttyS0,115200".to_string()),
      ..Default::default()
    };
    let assembled = assemble_kernel_boot_parameters(
      "session-uuid",
      &boot_set,
      Some("quiet splash"),
      &DefaultProvider,
    );
    assert_eq!(
      assembled,
      "quiet splash console=ttyS0,115200 bos_session_id=session-uuid"
    );
  }

  #[test]
  fn test_assemble_kernel_boot_parameters_always_has_session_id() {
    let boot_set = BootSet::default();
    let assembled = assemble_kernel_boot_parameters(
      "abc",
      &boot_set,
      None,
      &DefaultProvider,
    );
    assert_eq!(assembled, "bos_session_id=abc");
  }

  #[test]
  fn test_boot_patch_shape() {
    let session = Session::new("uuid-1", None, Operation::Boot, "t1");
    let patch = operation_patch(&session, "x1", &artifacts(), "cfg1");
    let desired = patch.desired_state.unwrap();
    assert_eq!(desired.boot_artifacts.unwrap(), artifacts());
    assert_eq!(desired.configuration.as_deref(), Some("cfg1"));
    assert_eq!(patch.session.as_deref(), Some("uuid-1"));
    assert_eq!(patch.enabled, Some(true));
    assert_eq!(patch.error.as_deref(), Some(""));
    assert!(patch.actual_state.is_none());
    assert!(patch.staged_state.is_none());
  }

  #[test]
  fn test_reboot_patch_clears_bss_token() {
    let session = Session::new("uuid-1", None, Operation::Reboot, "t1");
    let patch = operation_patch(&session, "x1", &artifacts(), "");
    let actual = patch.actual_state.unwrap();
    assert_eq!(actual.bss_token.as_deref(), Some(""));
    assert!(actual.boot_artifacts.is_none());
  }

  #[test]
  fn test_shutdown_patch_has_empty_artifacts() {
    let session = Session::new("uuid-1", None, Operation::Shutdown, "t1");
    let patch =
      operation_patch(&session, "x1", &BootArtifacts::default(), "");
    let desired = patch.desired_state.unwrap();
    assert!(desired.boot_artifacts.unwrap().is_empty());
    assert_eq!(desired.configuration.as_deref(), Some(""));
  }

  #[test]
  fn test_stage_patch_leaves_desired_state_alone() {
    let mut session = Session::new("uuid-1", None, Operation::Boot, "t1");
    session.stage = true;
    let patch = operation_patch(&session, "x1", &artifacts(), "cfg1");
    assert!(patch.desired_state.is_none());
    assert!(patch.session.is_none());
    assert!(patch.enabled.is_none());
    let staged = patch.staged_state.unwrap();
    assert_eq!(staged.session.as_deref(), Some("uuid-1"));
    assert_eq!(staged.boot_artifacts.unwrap(), artifacts());
  }
}
