pub mod components;
pub mod options;
pub mod sessions;
pub mod templates;

use std::collections::HashSet;

use crate::clients::tapms::TapmsClient;
use crate::error::Error;

/// Resolve the claim set for a request tenant. The empty tenant claims
/// everything and resolves to None; an unknown tenant is an error.
pub async fn tenant_claims(
  tapms: &TapmsClient,
  tenant: Option<&str>,
) -> Result<Option<HashSet<String>>, Error> {
  match tenant.filter(|tenant| !tenant.is_empty()) {
    Some(tenant) => {
      Ok(Some(tapms.get_tenant_component_set(tenant).await?))
    }
    None => Ok(None),
  }
}

/// True when the component is visible to the tenant owning the claims.
pub fn is_valid_tenant_component(
  component_id: &str,
  claims: Option<&HashSet<String>>,
) -> bool {
  match claims {
    Some(claims) => claims.contains(component_id),
    // For an empty tenant, all components are valid
    None => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_is_valid_tenant_component() {
    assert!(is_valid_tenant_component("x1", None));
    let claims = HashSet::from(["x1".to_string()]);
    assert!(is_valid_tenant_component("x1", Some(&claims)));
    assert!(!is_valid_tenant_component("x2", Some(&claims)));
  }
}
