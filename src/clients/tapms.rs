use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

use super::{build_client, send_with_retries};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantResource {
  #[serde(default)]
  pub r#type: String,
  #[serde(default)]
  pub xnames: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantStatus {
  #[serde(default)]
  pub tenantresources: Vec<TenantResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tenant {
  #[serde(default)]
  pub status: TenantStatus,
}

/// Client for the tenant authority (TAPMS). Sessions and templates are
/// partitioned by tenant; components are restricted to the tenant claim
/// set this service reports.
#[derive(Clone)]
pub struct TapmsClient {
  client: reqwest::Client,
  base_url: String,
}

impl TapmsClient {
  pub fn new(base_url: &str, read_timeout: Duration) -> Result<Self, Error> {
    Ok(TapmsClient {
      client: build_client(read_timeout)?,
      base_url: base_url.to_string(),
    })
  }

  pub async fn get_tenant(&self, tenant: &str) -> Result<Tenant, Error> {
    let api_url = format!("{}/tenants/{}", self.base_url, tenant);

    let response = send_with_retries(self.client.get(api_url)).await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Err(Error::TenantNotFound(tenant.to_string()));
    }

    if response.status().is_success() {
      response
        .json::<Tenant>()
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

  /// The set of component IDs assigned to the specified tenant. The empty
  /// tenant owns everything, represented by an empty claim set.
  pub async fn get_tenant_component_set(
    &self,
    tenant: &str,
  ) -> Result<HashSet<String>, Error> {
    let mut components = HashSet::new();
    if tenant.is_empty() {
      return Ok(components);
    }
    let data = self.get_tenant(tenant).await?;
    for resource in data.status.tenantresources {
      components.extend(resource.xnames);
    }
    Ok(components)
  }

  pub async fn validate_tenant_exists(
    &self,
    tenant: &str,
  ) -> Result<bool, Error> {
    match self.get_tenant(tenant).await {
      Ok(_) => Ok(true),
      Err(Error::TenantNotFound(_)) => Ok(false),
      Err(e) => Err(e),
    }
  }
}
