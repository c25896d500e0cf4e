use serde_json::Value;

use crate::component::Component;
use crate::db::tenant::get_tenant_aware_key;
use crate::db::Stores;
use crate::error::Error;
use crate::options::OptionsUpdate;
use crate::session::Session;
use crate::template::validate::{
  is_valid_template_name, DESCRIPTION_MAX_LENGTH, TEMPLATE_NAME_MAX_LENGTH,
};
use crate::template::SessionTemplate;

/// One-shot sanitization of the stored entities, run before the operators
/// start. Records are repaired where possible and deleted only as a last
/// resort.
pub async fn migrate(stores: &Stores) -> Result<(), Error> {
  sanitize_components(stores).await?;
  sanitize_sessions(stores).await?;
  sanitize_session_templates(stores).await?;
  sanitize_options(stores).await?;
  Ok(())
}

/// If the id field is missing, invalid, or disagrees with the key, delete
/// the component.
async fn sanitize_components(stores: &Stores) -> Result<(), Error> {
  let db = stores.components.wrapper().clone();
  for (key, data) in db.iter_items_raw().await? {
    let id = data.get("id").and_then(Value::as_str).unwrap_or_default();
    if id.is_empty() || id != key {
      log::warn!(
        "Deleting component under key '{}': missing or mismatched id",
        key
      );
      db.delete_entry(&key).await?;
      continue;
    }
    if serde_json::from_value::<Component>(data.clone()).is_err() {
      log::warn!("Deleting component '{}': does not follow the schema", key);
      db.delete_entry(&key).await?;
    }
  }
  Ok(())
}

/// If the name field is missing, or if the name or tenant fields are
/// invalid, delete the session.
async fn sanitize_sessions(stores: &Stores) -> Result<(), Error> {
  let db = stores.sessions.wrapper().clone();
  for (key, data) in db.iter_items_raw().await? {
    let name =
      data.get("name").and_then(Value::as_str).unwrap_or_default();
    if name.is_empty() {
      log::warn!("Deleting session under key '{}': missing name", key);
      db.delete_entry(&key).await?;
      continue;
    }
    let tenant = match data.get("tenant") {
      None | Some(Value::Null) => None,
      Some(Value::String(tenant)) if tenant.is_empty() => None,
      Some(Value::String(tenant)) => Some(tenant.as_str()),
      Some(_) => {
        log::warn!("Deleting session '{}': non-string tenant", name);
        db.delete_entry(&key).await?;
        continue;
      }
    };
    if get_tenant_aware_key(name, tenant) != key {
      log::warn!(
        "Deleting session '{}': key does not match name/tenant",
        name
      );
      db.delete_entry(&key).await?;
      continue;
    }
    if serde_json::from_value::<Session>(data.clone()).is_err() {
      log::warn!("Deleting session '{}': does not follow the schema", name);
      db.delete_entry(&key).await?;
    }
  }
  Ok(())
}

/// Session templates are the things most likely to run afoul of the API
/// schema. This attempts to automatically fix them if at all possible,
/// only deleting them as a last resort.
async fn sanitize_session_templates(stores: &Stores) -> Result<(), Error> {
  let db = stores.session_templates.wrapper().clone();
  let existing_keys: Vec<String> = db
    .iter_items_raw()
    .await?
    .into_iter()
    .map(|(key, _)| key)
    .collect();

  for (key, data) in db.iter_items_raw().await? {
    let mut template: SessionTemplate =
      match serde_json::from_value(data.clone()) {
        Ok(template) => template,
        Err(error) => {
          log::warn!(
            "Deleting session template under key '{}': {}",
            key,
            error
          );
          db.delete_entry(&key).await?;
          continue;
        }
      };

    if template.name.is_empty() || template.boot_sets.is_empty() {
      log::warn!(
        "Deleting session template under key '{}': missing name or boot sets",
        key
      );
      db.delete_entry(&key).await?;
      continue;
    }

    let mut new_template = template.clone();

    if let Some(description) = &template.description {
      if description.is_empty() {
        new_template.description = None;
      } else if description.len() > DESCRIPTION_MAX_LENGTH {
        new_template.description =
          Some(description[..DESCRIPTION_MAX_LENGTH].to_string());
      }
    }

    for boot_set in new_template.boot_sets.values_mut() {
      boot_set.name = None;
    }
    new_template.remove_empty_cfs_field();

    let tenant = new_template.tenant.clone();
    let new_name = legal_template_name(
      &new_template.name,
      tenant.as_deref(),
      &existing_keys,
    );

    if new_name == template.name {
      if get_tenant_aware_key(&new_template.name, tenant.as_deref()) != key
      {
        log::warn!(
          "Deleting session template '{}': key does not match name/tenant",
          new_template.name
        );
        db.delete_entry(&key).await?;
        continue;
      }
      if new_template != template {
        log::warn!(
          "Updating session template '{}' to comply with the API schema",
          new_template.name
        );
        db.put_entry(&key, &new_template).await?;
      }
      continue;
    }

    // Name changed
    log::warn!(
      "Renaming session template '{}' (tenant: {:?}) to new name '{}'",
      template.name,
      tenant,
      new_name
    );
    db.delete_entry(&key).await?;

    let rename_note =
      format!("Renamed from '{}' by migration", template.name);
    new_template.description = match new_template.description.take() {
      Some(description) => Some(format!("{}; {}", description, rename_note)),
      None => Some(rename_note),
    };
    new_template.name = new_name.clone();

    let new_key = get_tenant_aware_key(&new_name, tenant.as_deref());
    log::info!("Old DB key = '{}', new DB key = '{}'", key, new_key);
    db.put_entry(&new_key, &new_template).await?;
  }
  Ok(())
}

/// Produce a legal template name, appending a counter if the sanitized
/// name collides with an existing entry.
fn legal_template_name(
  name: &str,
  tenant: Option<&str>,
  existing_keys: &[String],
) -> String {
  if is_valid_template_name(name) {
    return name.to_string();
  }

  let mut sanitized: String = name
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
        c
      } else {
        '-'
      }
    })
    .collect();
  sanitized.truncate(TEMPLATE_NAME_MAX_LENGTH);
  if sanitized.is_empty() {
    sanitized = "migrated-template".to_string();
  }

  if !existing_keys
    .contains(&get_tenant_aware_key(&sanitized, tenant))
  {
    return sanitized;
  }
  for counter in 0.. {
    let mut candidate = sanitized.clone();
    candidate.truncate(TEMPLATE_NAME_MAX_LENGTH - 4);
    let candidate = format!("{}-{}", candidate, counter);
    if !existing_keys
      .contains(&get_tenant_aware_key(&candidate, tenant))
    {
      return candidate;
    }
  }
  sanitized
}

/// Drop unknown option keys by re-encoding through the schema.
async fn sanitize_options(stores: &Stores) -> Result<(), Error> {
  let db = stores.options.wrapper().clone();
  for (key, data) in db.iter_items_raw().await? {
    match serde_json::from_value::<OptionsUpdate>(data.clone()) {
      Ok(update) => {
        let clean = serde_json::to_value(&update)?;
        if clean != data {
          log::warn!("Rewriting options entry to drop unknown fields");
          db.put_entry(&key, &update).await?;
        }
      }
      Err(error) => {
        log::warn!("Deleting unparseable options entry: {}", error);
        db.delete_entry(&key).await?;
      }
    }
  }
  Ok(())
}
