use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::error::Error;

use super::{build_client, send_with_retries};

const GET_BATCH_SIZE: usize = 200;
const PATCH_BATCH_SIZE: usize = 1000;

pub const CONFIGURATION_STATUS_CONFIGURED: &str = "configured";
pub const CONFIGURATION_STATUS_PENDING: &str = "pending";
pub const CONFIGURATION_STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CfsComponent {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub desired_config: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub configuration_status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_count: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tags: Option<HashMap<String, String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct CfsComponentsPage {
  #[serde(default)]
  components: Vec<CfsComponent>,
  #[serde(default)]
  next: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct CfsComponentsUpdate<'a> {
  patch: &'a CfsComponent,
  filters: HashMap<&'static str, String>,
}

#[derive(Clone)]
pub struct CfsClient {
  client: reqwest::Client,
  base_url: String,
}

impl CfsClient {
  pub fn new(base_url: &str, read_timeout: Duration) -> Result<Self, Error> {
    Ok(CfsClient {
      client: build_client(read_timeout)?,
      base_url: base_url.to_string(),
    })
  }

  /// If 'ids' is not specified, query CFS for all components. The response
  /// is paged via a 'next' parameter set.
  pub async fn get_components(
    &self,
    ids: Option<&str>,
  ) -> Result<Vec<CfsComponent>, Error> {
    let api_url = format!("{}/v3/components", self.base_url);
    let mut component_list: Vec<CfsComponent> = Vec::new();

    let mut params: Option<Vec<(String, String)>> = Some(match ids {
      Some(ids) => vec![("ids".to_string(), ids.to_string())],
      None => Vec::new(),
    });

    while let Some(current_params) = params.take() {
      let response = send_with_retries(
        self.client.get(&api_url).query(&current_params),
      )
      .await?;

      if !response.status().is_success() {
        let error_payload = response
          .json()
          .await
          .map_err(|error| Error::NetError(error))?;

        return Err(Error::ApiError(error_payload));
      }

      let page = response
        .json::<CfsComponentsPage>()
        .await
        .map_err(|error| Error::NetError(error))?;

      log::debug!("Query returned {} components", page.components.len());
      component_list.extend(page.components);

      params = page.next.map(|next| {
        next
          .into_iter()
          .map(|(key, value)| {
            let value = match value {
              serde_json::Value::String(value) => value,
              other => other.to_string(),
            };
            (key, value)
          })
          .collect()
      });
    }

    log::debug!("Returning {} components from CFS", component_list.len());
    Ok(component_list)
  }

  pub async fn get_components_from_id_list(
    &self,
    id_list: &[String],
  ) -> Result<Vec<CfsComponent>, Error> {
    if id_list.is_empty() {
      log::warn!(
        "get_components_from_id_list called without IDs; returning without action."
      );
      return Ok(Vec::new());
    }

    let mut component_list = Vec::new();
    for chunk in id_list.chunks(GET_BATCH_SIZE) {
      let ids = chunk.join(",");
      component_list
        .extend(self.get_components(Some(&ids)).await?);
    }

    Ok(component_list)
  }

  /// Point the given CFS components at a desired configuration. Patches are
  /// chunked to stay under the CFS request limit.
  pub async fn patch_desired_config(
    &self,
    node_ids: &[String],
    desired_config: &str,
    enabled: bool,
    tags: HashMap<String, String>,
    clear_state: bool,
  ) -> Result<(), Error> {
    if node_ids.is_empty() {
      log::warn!(
        "patch_desired_config called without IDs; returning without action."
      );
      return Ok(());
    }

    log::debug!(
      "patch_desired_config called on {} IDs with desired_config={} enabled={} clear_state={}",
      node_ids.len(),
      desired_config,
      enabled,
      clear_state
    );

    let mut node_patch = CfsComponent {
      desired_config: Some(desired_config.to_string()),
      enabled: Some(enabled),
      tags: Some(tags),
      ..Default::default()
    };
    if clear_state {
      node_patch.state = Some(Vec::new());
    }

    let api_url = format!("{}/v3/components", self.base_url);

    for chunk in node_ids.chunks(PATCH_BATCH_SIZE) {
      let mut filters = HashMap::new();
      filters.insert("ids", chunk.join(","));
      let data = CfsComponentsUpdate {
        patch: &node_patch,
        filters,
      };

      let response =
        send_with_retries(self.client.patch(&api_url).json(&data)).await?;

      if !response.status().is_success() {
        let error_payload = response
          .json()
          .await
          .map_err(|error| Error::NetError(error))?;

        return Err(Error::ApiError(error_payload));
      }
    }

    Ok(())
  }

  /// Tell CFS about the desired configuration of the given BOS components,
  /// grouping them so each distinct (configuration, session) pair becomes
  /// one patch tagged with the owning session.
  pub async fn set_cfs(
    &self,
    components: &[Component],
    enabled: bool,
  ) -> Result<(), Error> {
    if components.is_empty() {
      log::warn!("set_cfs called without components; returning without action.");
      return Ok(());
    }

    log::debug!(
      "set_cfs called on {} components with enabled={}",
      components.len(),
      enabled
    );

    let mut configurations: HashMap<(String, String), Vec<String>> =
      HashMap::new();
    for component in components {
      let config_name = component.desired_configuration();
      let bos_session = component.session.clone().unwrap_or_default();
      configurations
        .entry((config_name, bos_session))
        .or_default()
        .push(component.id.clone());
    }

    for ((config_name, bos_session), ids) in configurations {
      let mut tags = HashMap::new();
      tags.insert("bos_session".to_string(), bos_session);
      self
        .patch_desired_config(&ids, &config_name, enabled, tags, false)
        .await?;
    }

    Ok(())
  }
}
