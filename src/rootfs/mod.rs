pub mod sbps;

use crate::clients::s3::BootImageArtifactSummary;
use crate::error::Error;
use crate::template::BootSet;

use sbps::SbpsProvider;

/// A rootfs provider contributes the `root=` kernel parameter (and an
/// optional node-memory-dump parameter) for a boot set.
pub trait RootfsProvider {
  fn protocol(&self) -> Option<&str> {
    None
  }

  fn provider_field(&self) -> Option<String> {
    None
  }

  fn provider_field_id(&self) -> Option<String> {
    None
  }

  /// The value to add to the kernel boot parameters for the Node Memory
  /// Dump (NMD) parameter.
  fn nmd_field(&self) -> Option<String> {
    None
  }

  /// The `root=` clause, or an empty string when the provider contributes
  /// nothing.
  fn root_parameter(&self, boot_set: &BootSet) -> String {
    const DELIMITER: char = ':';

    let mut fields: Vec<String> = Vec::new();
    if let Some(protocol) = self.protocol() {
      fields.push(protocol.to_string());
    }
    fields.push(self.provider_field().unwrap_or_default());
    fields.push(self.provider_field_id().unwrap_or_default());
    if let Some(passthrough) = &boot_set.rootfs_provider_passthrough {
      if !passthrough.is_empty() {
        fields.push(passthrough.clone());
      }
    }

    if fields.iter().any(|field| !field.is_empty()) {
      format!(
        "root={}",
        fields
          .iter()
          .map(String::as_str)
          .collect::<Vec<&str>>()
          .join(&DELIMITER.to_string())
      )
    } else {
      String::new()
    }
  }
}

/// Provider used when a boot set does not configure one; contributes no
/// parameters at all.
pub struct DefaultProvider;

impl RootfsProvider for DefaultProvider {}

/// Return the rootfs provider instance for the given boot set.
pub fn get_provider(
  boot_set: &BootSet,
  artifact_info: &BootImageArtifactSummary,
) -> Result<Box<dyn RootfsProvider + Send>, Error> {
  match boot_set.rootfs_provider.as_deref() {
    None | Some("") => Ok(Box::new(DefaultProvider)),
    Some("sbps") => Ok(Box::new(SbpsProvider::new(artifact_info.clone()))),
    Some(provider_name) => Err(Error::Message(format!(
      "Unsupported rootfs_provider ('{}') specified in boot set",
      provider_name
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_provider_is_silent() {
    let boot_set = BootSet::default();
    assert_eq!(DefaultProvider.root_parameter(&boot_set), "");
    assert!(DefaultProvider.nmd_field().is_none());
  }

  #[test]
  fn test_unknown_provider_is_an_error() {
    let boot_set = BootSet {
      rootfs_provider: Some("cpss3".to_string()),
      ..Default::default()
    };
    assert!(
      get_provider(&boot_set, &BootImageArtifactSummary::default()).is_err()
    );
  }

  #[test]
  fn test_empty_provider_name_gets_default() {
    let boot_set = BootSet {
      rootfs_provider: Some(String::new()),
      ..Default::default()
    };
    let provider =
      get_provider(&boot_set, &BootImageArtifactSummary::default()).unwrap();
    assert_eq!(provider.root_parameter(&boot_set), "");
  }
}
