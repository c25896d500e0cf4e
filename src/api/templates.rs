use crate::clients::Clients;
use crate::db::Stores;
use crate::error::Error;
use crate::options::OptionsData;
use crate::session::Operation;
use crate::template::validate::{
  validate_boot_sets, validate_sanitize_session_template,
};
use crate::template::SessionTemplate;

async fn reject_invalid_tenant(
  clients: &Clients,
  tenant: Option<&str>,
) -> Result<(), Error> {
  if let Some(tenant) = tenant.filter(|tenant| !tenant.is_empty()) {
    if !clients.tapms.validate_tenant_exists(tenant).await? {
      return Err(Error::TenantNotFound(tenant.to_string()));
    }
  }
  Ok(())
}

/// Create or replace a session template.
pub async fn put_template(
  stores: &Stores,
  clients: &Clients,
  tenant: Option<&str>,
  template_name: &str,
  mut template: SessionTemplate,
) -> Result<SessionTemplate, Error> {
  reject_invalid_tenant(clients, tenant).await?;
  validate_sanitize_session_template(template_name, &mut template)?;

  let tenant = tenant.filter(|tenant| !tenant.is_empty());
  template.tenant = tenant.map(str::to_string);
  stores.session_templates.put(&template).await?;
  Ok(template)
}

pub async fn get_template(
  stores: &Stores,
  tenant: Option<&str>,
  template_name: &str,
) -> Result<SessionTemplate, Error> {
  stores
    .session_templates
    .get_or_err(template_name, tenant)
    .await
}

pub async fn get_templates(
  stores: &Stores,
  tenant: Option<&str>,
) -> Result<Vec<SessionTemplate>, Error> {
  let templates = stores.session_templates.get_all().await?;
  Ok(match tenant.filter(|tenant| !tenant.is_empty()) {
    Some(tenant) => templates
      .into_iter()
      .filter(|template| template.tenant.as_deref() == Some(tenant))
      .collect(),
    None => templates,
  })
}

/// Patch merges the provided top-level fields over the stored template and
/// re-validates the result.
pub async fn patch_template(
  stores: &Stores,
  clients: &Clients,
  tenant: Option<&str>,
  template_name: &str,
  patch: serde_json::Value,
) -> Result<SessionTemplate, Error> {
  reject_invalid_tenant(clients, tenant).await?;

  let existing = stores
    .session_templates
    .get_or_err(template_name, tenant)
    .await?;

  let mut merged_value = serde_json::to_value(&existing)?;
  match (merged_value.as_object_mut(), patch.as_object()) {
    (Some(merged), Some(patch)) => {
      for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
      }
    }
    _ => {
      return Err(Error::Message(
        "Session template patch must be a JSON object".to_string(),
      ));
    }
  }

  let mut merged: SessionTemplate = serde_json::from_value(merged_value)?;
  validate_sanitize_session_template(template_name, &mut merged)?;
  merged.tenant = existing.tenant.clone();
  stores.session_templates.put(&merged).await?;
  Ok(merged)
}

pub async fn delete_template(
  stores: &Stores,
  tenant: Option<&str>,
  template_name: &str,
) -> Result<(), Error> {
  stores
    .session_templates
    .delete(template_name, tenant)
    .await?;
  Ok(())
}

/// Look for missing elements or errors that would prevent a session from
/// being launched using this template. The boot operation is assumed
/// because it and reboot are the most demanding from a validation
/// standpoint.
pub async fn validate_template(
  stores: &Stores,
  clients: &Clients,
  options: &OptionsData,
  tenant: Option<&str>,
  template_name: &str,
) -> Result<String, Error> {
  let template = stores
    .session_templates
    .get_or_err(template_name, tenant)
    .await?;

  let (_status, msg) = validate_boot_sets(
    &template,
    Operation::Boot,
    template_name,
    options,
    &clients.ims,
  )
  .await;
  Ok(msg)
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use crate::template::{BootSet, Cfs};

  use super::*;

  fn template() -> SessionTemplate {
    let mut boot_sets = HashMap::new();
    boot_sets.insert(
      "compute".to_string(),
      BootSet {
        path: Some("s3://bi/img1/manifest.json".to_string()),
        r#type: Some("s3".to_string()),
        node_list: Some(vec!["x1".to_string()]),
        ..Default::default()
      },
    );
    SessionTemplate {
      name: "t1".to_string(),
      enable_cfs: true,
      cfs: Some(Cfs {
        configuration: Some("cfg1".to_string()),
      }),
      boot_sets,
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn test_store_level_round_trip() {
    let stores = Stores::memory();
    stores.session_templates.put(&template()).await.unwrap();
    let loaded = get_template(&stores, None, "t1").await.unwrap();
    assert_eq!(loaded, template());
  }

  #[tokio::test]
  async fn test_tenant_scoped_listing() {
    let stores = Stores::memory();
    let mut tenanted = template();
    tenanted.tenant = Some("tenant-a".to_string());
    stores.session_templates.put(&tenanted).await.unwrap();
    stores.session_templates.put(&template()).await.unwrap();

    let all = get_templates(&stores, None).await.unwrap();
    assert_eq!(all.len(), 2);
    let scoped = get_templates(&stores, Some("tenant-a")).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].tenant.as_deref(), Some("tenant-a"));
  }
}
