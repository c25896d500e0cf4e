use crate::clients::s3::BootImageArtifactSummary;

use super::RootfsProvider;

/// Scalable Boot Provisioning Service provider. The rootfs is projected
/// over the fabric, so the root clause carries the image rootfs path and
/// etag for the node to mount.
pub struct SbpsProvider {
  artifact_info: BootImageArtifactSummary,
}

impl SbpsProvider {
  pub fn new(artifact_info: BootImageArtifactSummary) -> Self {
    SbpsProvider { artifact_info }
  }
}

impl RootfsProvider for SbpsProvider {
  fn protocol(&self) -> Option<&str> {
    Some("sbps")
  }

  fn provider_field(&self) -> Option<String> {
    self.artifact_info.rootfs.clone()
  }

  fn provider_field_id(&self) -> Option<String> {
    self.artifact_info.rootfs_etag.clone()
  }

  fn nmd_field(&self) -> Option<String> {
    let mut fields = Vec::new();
    if let Some(rootfs) = &self.artifact_info.rootfs {
      fields.push(format!("url={}", rootfs));
    }
    if let Some(etag) = &self.artifact_info.rootfs_etag {
      fields.push(format!("etag={}", etag));
    }
    if fields.is_empty() {
      None
    } else {
      Some(format!("nmd_data={}", fields.join(",")))
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::template::BootSet;

  use super::*;

  fn artifact_info() -> BootImageArtifactSummary {
    BootImageArtifactSummary {
      kernel: "s3://bi/img1/kernel".to_string(),
      initrd: "s3://bi/img1/initrd".to_string(),
      rootfs: Some("s3://bi/img1/rootfs".to_string()),
      rootfs_etag: Some("etag-1".to_string()),
      boot_parameters: None,
      boot_parameters_etag: None,
    }
  }

  #[test]
  fn test_root_parameter_with_passthrough() {
    let provider = SbpsProvider::new(artifact_info());
    let boot_set = BootSet {
      rootfs_provider: Some("sbps".to_string()),
      rootfs_provider_passthrough: Some("dvs:api-gw:300:nmn0".to_string()),
      ..Default::default()
    };
    assert_eq!(
      provider.root_parameter(&boot_set),
      "root=sbps:s3://bi/img1/rootfs:etag-1:dvs:api-gw:300:nmn0"
    );
  }

  #[test]
  fn test_root_parameter_without_passthrough() {
    let provider = SbpsProvider::new(artifact_info());
    let boot_set = BootSet::default();
    assert_eq!(
      provider.root_parameter(&boot_set),
      "root=sbps:s3://bi/img1/rootfs:etag-1"
    );
  }

  #[test]
  fn test_nmd_field() {
    let provider = SbpsProvider::new(artifact_info());
    assert_eq!(
      provider.nmd_field().as_deref(),
      Some("nmd_data=url=s3://bi/img1/rootfs,etag=etag-1")
    );
  }
}
