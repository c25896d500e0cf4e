use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::{build_client, s3::S3Url, send_with_retries};

// IMS reports no arch for images created before it learned about arches
pub const DEFAULT_IMS_IMAGE_ARCH: &str = "x86_64";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Image {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub arch: Option<String>,
}

impl Image {
  pub fn arch(&self) -> &str {
    self.arch.as_deref().unwrap_or(DEFAULT_IMS_IMAGE_ARCH)
  }
}

#[derive(Clone)]
pub struct ImsClient {
  client: reqwest::Client,
  base_url: String,
}

impl ImsClient {
  pub fn new(base_url: &str, read_timeout: Duration) -> Result<Self, Error> {
    Ok(ImsClient {
      client: build_client(read_timeout)?,
      base_url: base_url.to_string(),
    })
  }

  pub async fn get_image(&self, image_id: &str) -> Result<Image, Error> {
    let api_url = format!("{}/v3/images/{}", self.base_url, image_id);

    let response = send_with_retries(self.client.get(api_url)).await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Err(Error::ImageNotFound(image_id.to_string()));
    }

    if response.status().is_success() {
      response
        .json::<Image>()
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
}

/// IMS image ids are the first path segment of the manifest key, by the
/// boot-images bucket convention. Returns None for non-IMS paths.
pub fn get_ims_id_from_s3_url(s3_url: &S3Url) -> Option<String> {
  let re = Regex::new(r"^([^/]+)/.+").ok()?;
  re.captures(&s3_url.key())
    .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_ims_id_from_s3_url() {
    let url = S3Url::new("s3://boot-images/1fb58f4e-ad23-489b-89b7-95868fca7ee6/manifest.json");
    assert_eq!(
      get_ims_id_from_s3_url(&url).as_deref(),
      Some("1fb58f4e-ad23-489b-89b7-95868fca7ee6")
    );

    let flat = S3Url::new("s3://boot-images/manifest.json");
    assert_eq!(get_ims_id_from_s3_url(&flat), None);
  }

  #[test]
  fn test_image_arch_default() {
    let image = Image {
      id: "abc".to_string(),
      ..Default::default()
    };
    assert_eq!(image.arch(), "x86_64");
  }
}
