use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::{build_client, send_with_retries};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootParameters {
  #[serde(default)]
  pub hosts: Vec<String>,
  #[serde(default)]
  pub kernel: String,
  #[serde(default)]
  pub initrd: String,
  #[serde(default)]
  pub params: String,
}

impl BootParameters {
  /// The manifest path of the image a node was told to boot, derived from
  /// the kernel path.
  pub fn manifest_path(&self) -> String {
    self.kernel.replace("/kernel", "/manifest.json")
  }
}

#[derive(Clone)]
pub struct BssClient {
  client: reqwest::Client,
  base_url: String,
}

impl BssClient {
  pub fn new(base_url: &str, read_timeout: Duration) -> Result<Self, Error> {
    Ok(BssClient {
      client: build_client(read_timeout)?,
      base_url: base_url.to_string(),
    })
  }

  pub async fn get_boot_params(
    &self,
    xnames: &[String],
  ) -> Result<Vec<BootParameters>, Error> {
    let api_url = format!("{}/boot/v1/bootparameters", self.base_url);

    let params: Vec<(&str, &str)> =
      xnames.iter().map(|xname| ("name", xname.as_str())).collect();

    let response =
      send_with_retries(self.client.get(api_url).query(&params)).await?;

    if response.status().is_success() {
      response
        .json::<Vec<BootParameters>>()
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

  /// Hand a set of boot artifacts to BSS for the given hosts. The referral
  /// token travels in a header and comes back from nodes as their reported
  /// bss_token.
  pub async fn put_boot_params(
    &self,
    boot_parameters: &BootParameters,
    referral_token: &str,
  ) -> Result<(), Error> {
    log::info!(
      "Setting BSS boot parameters for {:?} (token {})",
      boot_parameters.hosts,
      referral_token
    );

    let api_url = format!("{}/boot/v1/bootparameters", self.base_url);

    let response = send_with_retries(
      self
        .client
        .put(api_url)
        .header("BOS-Referral-Token", referral_token)
        .json(boot_parameters),
    )
    .await?;

    if response.status().is_success() {
      Ok(())
    } else {
      let error_payload = response
        .json()
        .await
        .map_err(|error| Error::NetError(error))?;

      Err(Error::ApiError(error_payload))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manifest_path_from_kernel() {
    let boot_parameters = BootParameters {
      kernel: "s3://boot-images/img1/kernel".to_string(),
      ..Default::default()
    };
    assert_eq!(
      boot_parameters.manifest_path(),
      "s3://boot-images/img1/manifest.json"
    );
  }
}
