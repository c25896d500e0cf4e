use std::collections::HashMap;

use crate::clients::pcs::{disable_based_on_error_xname_on_off, PcsClient};
use crate::component::Component;
use crate::error::Error;

use super::OperatorContext;

/// Which PCS transition a power operator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTransition {
  On,
  SoftOff,
  ForceOff,
}

impl PowerTransition {
  async fn issue(
    &self,
    pcs: &PcsClient,
    xnames: &[String],
  ) -> Result<(), Error> {
    match self {
      PowerTransition::On => pcs.power_on(xnames).await.map(|_| ()),
      PowerTransition::SoftOff => pcs.soft_off(xnames).await.map(|_| ()),
      PowerTransition::ForceOff => pcs.force_off(xnames).await.map(|_| ()),
    }
  }
}

/// Apply the power operation to the components, handling errors.
///
/// If the batch call fails without a per-xname breakdown, each xname is
/// retried singly so errors can be attributed to individual nodes. Errors
/// matching the terminal hardware list disable the component.
///
/// The patches are updated in place with the per-component outcome.
pub async fn power_components(
  context: &OperatorContext,
  transition: PowerTransition,
  xnames: &[String],
  patches: &mut [Component],
) -> Result<(), Error> {
  if xnames.is_empty() {
    return Ok(());
  }

  let mut index_by_id: HashMap<String, usize> = HashMap::new();
  for (index, patch) in patches.iter().enumerate() {
    index_by_id.insert(patch.id.clone(), index);
  }

  match transition.issue(&context.clients.pcs, xnames).await {
    Ok(()) => Ok(()),
    Err(batch_error) => {
      // Errors could not be associated with a specific node. Ask PCS to
      // act on them one at a time to identify the nodes in error.
      log::warn!(
        "Batch power call failed ({}); retrying xnames individually",
        batch_error
      );

      for xname in xnames {
        log::debug!("Acting on component {}", xname);
        let single = std::slice::from_ref(xname);
        if let Err(error) =
          transition.issue(&context.clients.pcs, single).await
        {
          let error_message = error.to_string();
          log::debug!("Component {} error: {}", xname, error_message);
          if let Some(&index) = index_by_id.get(xname.as_str()) {
            patches[index].error = Some(error_message.clone());
            if disable_based_on_error_xname_on_off(&error_message) {
              patches[index].enabled = Some(false);
            }
            if let Some(last_action) = &mut patches[index].last_action {
              last_action.failed = Some(true);
            }
          }
        }
      }
      Ok(())
    }
  }
}

/// Drop HSM-locked nodes from a pass; they are held and retried once the
/// lock is released.
pub async fn filter_locked_components(
  context: &OperatorContext,
  components: Vec<Component>,
) -> Result<Vec<Component>, Error> {
  let xnames: Vec<String> =
    components.iter().map(|component| component.id.clone()).collect();
  let locked = context.clients.hsm.get_locked_components(&xnames).await?;
  if locked.is_empty() {
    return Ok(components);
  }
  log::info!(
    "Holding {} components this pass; locked in HSM: {:?}",
    locked.len(),
    locked
  );
  Ok(
    components
      .into_iter()
      .filter(|component| !locked.contains(&component.id))
      .collect(),
  )
}
