use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::{build_client, send_with_retries};

// CSM will throw an error if too many xnames are sent in a single request
const QUERY_BATCH_SIZE: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Members {
  #[serde(default)]
  pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
  pub label: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub members: Members,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Partition {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub members: Members,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateComponent {
  #[serde(rename = "ID")]
  pub id: String,
  #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
  pub r#type: Option<String>,
  #[serde(rename = "State", skip_serializing_if = "Option::is_none")]
  pub state: Option<String>,
  #[serde(rename = "Role", skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(rename = "SubRole", skip_serializing_if = "Option::is_none")]
  pub sub_role: Option<String>,
  #[serde(rename = "Enabled", skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,
  #[serde(rename = "NID", skip_serializing_if = "Option::is_none")]
  pub nid: Option<u64>,
  #[serde(rename = "Arch", skip_serializing_if = "Option::is_none")]
  pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateComponentsDataArray {
  #[serde(rename = "Components", default)]
  pub components: Vec<StateComponent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockStatusComponent {
  #[serde(rename = "ID")]
  pub id: String,
  #[serde(rename = "Locked", default)]
  pub locked: bool,
  #[serde(rename = "Reserved", default)]
  pub reserved: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LockStatusResponse {
  #[serde(rename = "Components", default)]
  components: Vec<LockStatusComponent>,
}

#[derive(Clone)]
pub struct HsmClient {
  client: reqwest::Client,
  base_url: String,
}

impl HsmClient {
  pub fn new(base_url: &str, read_timeout: Duration) -> Result<Self, Error> {
    Ok(HsmClient {
      client: build_client(read_timeout)?,
      base_url: base_url.to_string(),
    })
  }

  pub async fn get_groups(&self) -> Result<Vec<Group>, Error> {
    let api_url = format!("{}/hsm/v2/groups", self.base_url);

    let response = send_with_retries(self.client.get(api_url)).await?;

    if response.status().is_success() {
      response
        .json::<Vec<Group>>()
        .await
        .map_err(|error| Error::NetError(error))
    } else {
      let error_payload = response
        .json()
        .await
        .map_err(|error| Error::NetError(error))?;

      Err(Error::ApiError(error_payload))
    }
  }

  pub async fn get_partitions(&self) -> Result<Vec<Partition>, Error> {
    let api_url = format!("{}/hsm/v2/partitions", self.base_url);

    let response = send_with_retries(self.client.get(api_url)).await?;

    if response.status().is_success() {
      response
        .json::<Vec<Partition>>()
        .await
        .map_err(|error| Error::NetError(error))
    } else {
      let error_payload = response
        .json()
        .await
        .map_err(|error| Error::NetError(error))?;

      Err(Error::ApiError(error_payload))
    }
  }

  /// List State/Components, optionally restricted to one partition. Only
  /// Node components are of interest to BOS.
  pub async fn get_state_components(
    &self,
    partition: Option<&str>,
  ) -> Result<StateComponentsDataArray, Error> {
    let api_url = format!("{}/hsm/v2/State/Components", self.base_url);

    let mut request = self.client.get(api_url).query(&[("type", "Node")]);
    if let Some(partition) = partition {
      request = request.query(&[("partition", partition)]);
    }

    let response = send_with_retries(request).await?;

    if response.status().is_success() {
      response
        .json::<StateComponentsDataArray>()
        .await
        .map_err(|error| Error::NetError(error))
    } else {
      let error_payload = response
        .json()
        .await
        .map_err(|error| Error::NetError(error))?;

      Err(Error::ApiError(error_payload))
    }
  }

  /// Query State/Components for a specific xname list, chunked to keep each
  /// request below the HSM limit.
  pub async fn query_components(
    &self,
    xnames: &[String],
    enabled: Option<bool>,
  ) -> Result<Vec<StateComponent>, Error> {
    if xnames.is_empty() {
      log::warn!("hsm query_components called with empty node list");
      return Ok(Vec::new());
    }

    let api_url = format!("{}/hsm/v2/State/Components/Query", self.base_url);
    let mut components = Vec::new();

    for chunk in xnames.chunks(QUERY_BATCH_SIZE) {
      let mut payload = serde_json::json!({ "ComponentIDs": chunk });
      if let Some(enabled) = enabled {
        payload["enabled"] = serde_json::json!([enabled.to_string()]);
      }

      let response =
        send_with_retries(self.client.post(&api_url).json(&payload)).await?;

      if response.status().is_success() {
        let data = response
          .json::<StateComponentsDataArray>()
          .await
          .map_err(|error| Error::NetError(error))?;
        components.extend(data.components);
      } else {
        let error_payload = response
          .json()
          .await
          .map_err(|error| Error::NetError(error))?;

        return Err(Error::ApiError(error_payload));
      }
    }

    Ok(components)
  }

  /// The subset of the given xnames currently locked in HSM.
  pub async fn get_locked_components(
    &self,
    xnames: &[String],
  ) -> Result<HashSet<String>, Error> {
    if xnames.is_empty() {
      return Ok(HashSet::new());
    }

    let api_url = format!("{}/hsm/v2/locks/status", self.base_url);
    let mut locked = HashSet::new();

    for chunk in xnames.chunks(QUERY_BATCH_SIZE) {
      let payload = serde_json::json!({ "ComponentIDs": chunk });

      let response =
        send_with_retries(self.client.post(&api_url).json(&payload)).await?;

      if response.status().is_success() {
        let data = response
          .json::<LockStatusResponse>()
          .await
          .map_err(|error| Error::NetError(error))?;
        locked.extend(
          data
            .components
            .into_iter()
            .filter(|component| component.locked)
            .map(|component| component.id),
        );
      } else {
        let error_payload = response
          .json()
          .await
          .map_err(|error| Error::NetError(error))?;

        return Err(Error::ApiError(error_payload));
      }
    }

    Ok(locked)
  }
}

/// Hardware inventory built from HSM groups, partitions and roles. Lazily
/// populated and cached so repeated lookups within one operator pass do not
/// hit HSM again.
pub struct Inventory {
  hsm_client: HsmClient,
  partition: Option<String>,
  groups: Option<HashMap<String, HashSet<String>>>,
  partitions: Option<HashMap<String, HashSet<String>>>,
  roles: Option<HashMap<String, HashSet<String>>>,
}

impl Inventory {
  pub fn new(hsm_client: HsmClient, partition: Option<String>) -> Self {
    Inventory {
      hsm_client,
      partition,
      groups: None,
      partitions: None,
      roles: None,
    }
  }

  pub async fn groups(
    &mut self,
  ) -> Result<&HashMap<String, HashSet<String>>, Error> {
    if self.groups.is_none() {
      let mut groups = HashMap::new();
      for group in self.hsm_client.get_groups().await? {
        groups
          .insert(group.label, group.members.ids.into_iter().collect());
      }
      self.groups = Some(groups);
    }
    Ok(self.groups.get_or_insert_with(HashMap::new))
  }

  pub async fn partitions(
    &mut self,
  ) -> Result<&HashMap<String, HashSet<String>>, Error> {
    if self.partitions.is_none() {
      let mut partitions = HashMap::new();
      for partition in self.hsm_client.get_partitions().await? {
        partitions
          .insert(partition.name, partition.members.ids.into_iter().collect());
      }
      self.partitions = Some(partitions);
    }
    Ok(self.partitions.get_or_insert_with(HashMap::new))
  }

  /// Role and Role_SubRole composites from State/Components.
  pub async fn roles(
    &mut self,
  ) -> Result<&HashMap<String, HashSet<String>>, Error> {
    if self.roles.is_none() {
      let data = self
        .hsm_client
        .get_state_components(self.partition.as_deref())
        .await?;
      let mut roles: HashMap<String, HashSet<String>> = HashMap::new();
      for component in data.components {
        if let Some(role) = &component.role {
          roles
            .entry(role.clone())
            .or_default()
            .insert(component.id.clone());
          if let Some(sub_role) = &component.sub_role {
            roles
              .entry(format!("{}_{}", role, sub_role))
              .or_default()
              .insert(component.id.clone());
          }
        }
      }
      self.roles = Some(roles);
    }
    Ok(self.roles.get_or_insert_with(HashMap::new))
  }

  /// Look a label up across groups, partitions and roles, in that order.
  pub async fn get(
    &mut self,
    label: &str,
  ) -> Result<Option<HashSet<String>>, Error> {
    if let Some(members) = self.groups().await?.get(label) {
      return Ok(Some(members.clone()));
    }
    if let Some(members) = self.partitions().await?.get(label) {
      return Ok(Some(members.clone()));
    }
    Ok(self.roles().await?.get(label).cloned())
  }
}
