use std::time::Duration;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_smithy_types::timeout::TimeoutConfig;
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};

use crate::component::BootArtifacts;
use crate::error::Error;
use crate::template::BootSet;

// Image manifests are tiny; anything bigger than this is not a manifest.
const MANIFEST_SIZE_CAP: usize = 1024 * 1024;

pub const KERNEL_MIME_TYPE: &str = "application/vnd.cray.image.kernel";
pub const INITRD_MIME_TYPE: &str = "application/vnd.cray.image.initrd";
pub const ROOTFS_MIME_TYPE: &str = "application/vnd.cray.image.rootfs.squashfs";
pub const BOOT_PARAMETERS_MIME_TYPE: &str =
  "application/vnd.cray.image.parameters.boot";

static S3_CLIENT: OnceCell<aws_sdk_s3::Client> = OnceCell::const_new();
// Client construction is not reentrancy-safe with some credential
// providers, so it is serialized; the built client is reused afterwards.
static S3_CLIENT_LOCK: Mutex<()> = Mutex::const_new(());

/// Simple holder for an s3://bucket/key URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Url {
  url: String,
}

impl S3Url {
  pub fn new(url: &str) -> Self {
    S3Url {
      url: url.to_string(),
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn bucket(&self) -> String {
    self
      .url
      .strip_prefix("s3://")
      .and_then(|rest| rest.split_once('/'))
      .map(|(bucket, _)| bucket.to_string())
      .unwrap_or_default()
  }

  pub fn key(&self) -> String {
    self
      .url
      .strip_prefix("s3://")
      .and_then(|rest| rest.split_once('/'))
      .map(|(_, key)| key.to_string())
      .unwrap_or_default()
  }

  pub fn is_well_formed(&self) -> bool {
    self.url.starts_with("s3://")
      && !self.bucket().is_empty()
      && !self.key().is_empty()
  }
}

async fn s3_client() -> Result<&'static aws_sdk_s3::Client, Error> {
  S3_CLIENT
    .get_or_try_init(|| async {
      let _guard = S3_CLIENT_LOCK.lock().await;

      let access_key = require_env("S3_ACCESS_KEY")?;
      let secret_key = require_env("S3_SECRET_KEY")?;
      let protocol = require_env("S3_PROTOCOL")?;
      let gateway = require_env("S3_GATEWAY")?;

      let credentials =
        Credentials::new(access_key, secret_key, None, None, "bos");
      let timeouts = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(60))
        .read_timeout(Duration::from_secs(60))
        .build();

      let shared_config = aws_config::defaults(BehaviorVersion::latest())
        .endpoint_url(format!("{}://{}", protocol, gateway))
        .credentials_provider(credentials)
        .region(Region::new("us-east-1"))
        .timeout_config(timeouts)
        .load()
        .await;
      let config = aws_sdk_s3::config::Builder::from(&shared_config)
        .force_path_style(true)
        .build();

      Ok(aws_sdk_s3::Client::from_conf(config))
    })
    .await
}

fn require_env(var: &str) -> Result<String, Error> {
  std::env::var(var).map_err(|_| {
    log::error!("Missing needed S3 configuration: {}", var);
    Error::S3Error(format!("Missing needed S3 configuration: {}", var))
  })
}

/// Download an object, optionally pinned to an etag, enforcing the size
/// cap.
pub async fn get_object(
  s3_url: &S3Url,
  etag: Option<&str>,
) -> Result<Vec<u8>, Error> {
  let client = s3_client().await?;

  let mut request = client
    .get_object()
    .bucket(s3_url.bucket())
    .key(s3_url.key());
  if let Some(etag) = etag {
    if !etag.is_empty() {
      request = request.if_match(etag);
    }
  }

  let object = request.send().await.map_err(|error| {
    Error::S3Error(format!("Unable to read {}: {}", s3_url.url(), error))
  })?;

  if let Some(content_length) = object.content_length() {
    if content_length as usize > MANIFEST_SIZE_CAP {
      return Err(Error::S3Error(format!(
        "Object {} is {} bytes, larger than the {} byte cap",
        s3_url.url(),
        content_length,
        MANIFEST_SIZE_CAP
      )));
    }
  }

  let data = object.body.collect().await.map_err(|error| {
    Error::S3Error(format!("Unable to read {}: {}", s3_url.url(), error))
  })?;
  let bytes = data.into_bytes();

  if bytes.len() > MANIFEST_SIZE_CAP {
    return Err(Error::S3Error(format!(
      "Object {} is larger than the {} byte cap",
      s3_url.url(),
      MANIFEST_SIZE_CAP
    )));
  }

  Ok(bytes.to_vec())
}

/// HEAD an object to validate it exists (and matches the etag if given).
pub async fn head_object(
  s3_url: &S3Url,
  etag: Option<&str>,
) -> Result<(), Error> {
  let client = s3_client().await?;

  let mut request = client
    .head_object()
    .bucket(s3_url.bucket())
    .key(s3_url.key());
  if let Some(etag) = etag {
    if !etag.is_empty() {
      request = request.if_match(etag);
    }
  }

  request.send().await.map_err(|error| {
    Error::S3Error(format!("Unable to HEAD {}: {}", s3_url.url(), error))
  })?;

  Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactLink {
  #[serde(default)]
  pub path: String,
  #[serde(default)]
  pub etag: Option<String>,
  #[serde(rename = "type", default)]
  pub r#type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageArtifact {
  #[serde(rename = "type", default)]
  pub r#type: String,
  #[serde(default)]
  pub link: Option<ArtifactLink>,
  #[serde(default)]
  pub md5: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageManifest {
  #[serde(default)]
  pub artifacts: Vec<ImageArtifact>,
}

/// The S3 paths (and etags where needed) of the boot artifacts one image
/// manifest resolves to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootImageArtifactSummary {
  pub kernel: String,
  pub initrd: String,
  pub rootfs: Option<String>,
  pub rootfs_etag: Option<String>,
  pub boot_parameters: Option<String>,
  pub boot_parameters_etag: Option<String>,
}

/// Select the single artifact of the given MIME type from the manifest.
/// More than one match is an error; absence is an error for the caller to
/// raise, hence the Option.
pub fn select_unique_artifact(
  manifest: &ImageManifest,
  mime_type: &str,
) -> Result<Option<ArtifactLink>, Error> {
  let matches: Vec<&ImageArtifact> = manifest
    .artifacts
    .iter()
    .filter(|artifact| artifact.r#type == mime_type)
    .collect();

  match matches.len() {
    0 => Ok(None),
    1 => Ok(matches[0].link.clone()),
    n => Err(Error::S3Error(format!(
      "Expected 1 artifact of type {}; found {}",
      mime_type, n
    ))),
  }
}

/// Boot image metadata resolved from an S3-hosted manifest.
#[derive(Debug, Clone)]
pub struct BootImageMetadata {
  pub manifest_url: S3Url,
  pub artifact_summary: BootImageArtifactSummary,
}

impl BootImageMetadata {
  /// Fetch and resolve the manifest referenced by a boot set.
  pub async fn fetch(boot_set: &BootSet) -> Result<Self, Error> {
    let path_type = boot_set.r#type.as_deref().unwrap_or_default();
    if path_type != "s3" {
      return Err(Error::S3Error(format!(
        "No boot image metadata class for type {}",
        path_type
      )));
    }

    let path = boot_set.path.as_deref().ok_or_else(|| {
      Error::Message("Boot set is missing required 'path' field".to_string())
    })?;
    let manifest_url = S3Url::new(path);
    if !manifest_url.is_well_formed() {
      return Err(Error::S3Error(format!(
        "Boot set path '{}' is not a valid S3 URL",
        path
      )));
    }

    let raw_manifest =
      get_object(&manifest_url, boot_set.etag.as_deref()).await?;
    let manifest: ImageManifest = serde_json::from_slice(&raw_manifest)?;

    Ok(BootImageMetadata {
      manifest_url,
      artifact_summary: summarize_artifacts(&manifest)?,
    })
  }

  /// Fetch the optional S3-hosted boot parameters file for this image.
  /// Read errors are logged and swallowed; the image can boot without it.
  pub async fn image_kernel_parameters(&self) -> Option<String> {
    let path = self.artifact_summary.boot_parameters.as_deref()?;
    let etag = self.artifact_summary.boot_parameters_etag.as_deref();

    log::info!(
      "++ _get_s3_download_url {} with etag {}.",
      path,
      etag.unwrap_or("")
    );

    match get_object(&S3Url::new(path), etag).await {
      Ok(raw) => Some(String::from_utf8_lossy(&raw).trim().to_string()),
      Err(error) => {
        log::error!(
          "Unable to read file {}. Thus, no kernel boot parameters obtained from image",
          path
        );
        log::debug!("{}", error);
        None
      }
    }
  }

  pub fn boot_artifacts(
    &self,
    kernel_parameters: String,
  ) -> BootArtifacts {
    BootArtifacts {
      kernel: self.artifact_summary.kernel.clone(),
      kernel_parameters,
      initrd: self.artifact_summary.initrd.clone(),
    }
  }
}

pub fn summarize_artifacts(
  manifest: &ImageManifest,
) -> Result<BootImageArtifactSummary, Error> {
  let kernel = select_unique_artifact(manifest, KERNEL_MIME_TYPE)?
    .ok_or_else(|| {
      Error::S3Error(format!("No artifact of type {}", KERNEL_MIME_TYPE))
    })?;
  let initrd = select_unique_artifact(manifest, INITRD_MIME_TYPE)?
    .ok_or_else(|| {
      Error::S3Error(format!("No artifact of type {}", INITRD_MIME_TYPE))
    })?;
  let rootfs = select_unique_artifact(manifest, ROOTFS_MIME_TYPE)?;
  let boot_parameters =
    select_unique_artifact(manifest, BOOT_PARAMETERS_MIME_TYPE)?;

  Ok(BootImageArtifactSummary {
    kernel: kernel.path,
    initrd: initrd.path,
    rootfs_etag: rootfs.as_ref().and_then(|link| link.etag.clone()),
    rootfs: rootfs.map(|link| link.path),
    boot_parameters_etag: boot_parameters
      .as_ref()
      .and_then(|link| link.etag.clone()),
    boot_parameters: boot_parameters.map(|link| link.path),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn manifest_json() -> serde_json::Value {
    serde_json::json!({
      "artifacts": [
        {
          "type": KERNEL_MIME_TYPE,
          "link": {"path": "s3://bi/img1/kernel", "etag": "e1", "type": "s3"},
          "md5": "aa"
        },
        {
          "type": INITRD_MIME_TYPE,
          "link": {"path": "s3://bi/img1/initrd", "etag": "e2", "type": "s3"},
          "md5": "bb"
        },
        {
          "type": ROOTFS_MIME_TYPE,
          "link": {"path": "s3://bi/img1/rootfs", "etag": "e3", "type": "s3"},
          "md5": "cc"
        }
      ]
    })
  }

  #[test]
  fn test_s3_url_parsing() {
    let url = S3Url::new("s3://boot-images/img1/manifest.json");
    assert_eq!(url.bucket(), "boot-images");
    assert_eq!(url.key(), "img1/manifest.json");
    assert!(url.is_well_formed());

    assert!(!S3Url::new("http://somewhere/else").is_well_formed());
    assert!(!S3Url::new("s3://bucket-only").is_well_formed());
  }

  #[test]
  fn test_summarize_artifacts() {
    let manifest: ImageManifest =
      serde_json::from_value(manifest_json()).unwrap();
    let summary = summarize_artifacts(&manifest).unwrap();
    assert_eq!(summary.kernel, "s3://bi/img1/kernel");
    assert_eq!(summary.initrd, "s3://bi/img1/initrd");
    assert_eq!(summary.rootfs.as_deref(), Some("s3://bi/img1/rootfs"));
    assert_eq!(summary.rootfs_etag.as_deref(), Some("e3"));
    assert!(summary.boot_parameters.is_none());
  }

  #[test]
  fn test_missing_required_artifact() {
    let mut manifest: ImageManifest =
      serde_json::from_value(manifest_json()).unwrap();
    manifest
      .artifacts
      .retain(|artifact| artifact.r#type != KERNEL_MIME_TYPE);
    assert!(summarize_artifacts(&manifest).is_err());
  }

  #[test]
  fn test_duplicate_artifact_is_an_error() {
    let mut manifest: ImageManifest =
      serde_json::from_value(manifest_json()).unwrap();
    let duplicate = manifest.artifacts[0].clone();
    manifest.artifacts.push(duplicate);
    assert!(summarize_artifacts(&manifest).is_err());
  }
}
