pub mod validate;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub const HARDWARE_SPECIFIER_FIELDS: [&str; 3] =
  ["node_list", "node_groups", "node_roles_groups"];

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display,
)]
pub enum Arch {
  #[default]
  X86,
  ARM,
  Other,
  Unknown,
}

impl Arch {
  /// The IMS image arch value this boot set arch expects. `Other` opts out
  /// of arch validation entirely.
  pub fn expected_ims_arch(&self) -> Option<&'static str> {
    match self {
      Arch::X86 | Arch::Unknown => Some("x86_64"),
      Arch::ARM => Some("aarch64"),
      Arch::Other => None,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Cfs {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub configuration: Option<String>,
}

/// A sub-unit of a template: one image, one set of kernel parameters, one
/// node selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BootSet {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub r#type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub etag: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kernel_parameters: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cfs: Option<Cfs>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub node_list: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub node_groups: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub node_roles_groups: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub arch: Option<Arch>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rootfs_provider: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rootfs_provider_passthrough: Option<String>,
}

impl BootSet {
  pub fn arch(&self) -> Arch {
    self.arch.unwrap_or_default()
  }

  pub fn has_hardware_specifier(&self) -> bool {
    self.node_list.as_ref().is_some_and(|list| !list.is_empty())
      || self
        .node_groups
        .as_ref()
        .is_some_and(|groups| !groups.is_empty())
      || self
        .node_roles_groups
        .as_ref()
        .is_some_and(|roles| !roles.is_empty())
  }
}

/// A reusable declaration of boot sets, configuration reference and node
/// selection rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionTemplate {
  #[serde(default)]
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tenant: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub enable_cfs: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cfs: Option<Cfs>,
  #[serde(default)]
  pub boot_sets: HashMap<String, BootSet>,
}

impl SessionTemplate {
  pub fn configuration(&self) -> Option<&str> {
    self
      .cfs
      .as_ref()
      .and_then(|cfs| cfs.configuration.as_deref())
  }

  /// The CFS configuration a boot set resolves to: the boot set override
  /// wins over the template-wide value.
  pub fn boot_set_configuration<'a>(&'a self, boot_set: &'a BootSet) -> Option<&'a str> {
    boot_set
      .cfs
      .as_ref()
      .and_then(|cfs| cfs.configuration.as_deref())
      .filter(|configuration| !configuration.is_empty())
      .or_else(|| self.configuration())
  }

  /// Drop an empty cfs block so stored templates stay in their canonical
  /// shape.
  pub fn remove_empty_cfs_field(&mut self) {
    if let Some(cfs) = &self.cfs {
      if cfs
        .configuration
        .as_deref()
        .map(str::is_empty)
        .unwrap_or(true)
      {
        self.cfs = None;
      }
    }
    for boot_set in self.boot_sets.values_mut() {
      if let Some(cfs) = &boot_set.cfs {
        if cfs
          .configuration
          .as_deref()
          .map(str::is_empty)
          .unwrap_or(true)
        {
          boot_set.cfs = None;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_boot_set_configuration_override() {
    let template = SessionTemplate {
      cfs: Some(Cfs {
        configuration: Some("template-cfg".to_string()),
      }),
      ..Default::default()
    };
    let plain = BootSet::default();
    assert_eq!(
      template.boot_set_configuration(&plain),
      Some("template-cfg")
    );
    let with_override = BootSet {
      cfs: Some(Cfs {
        configuration: Some("bootset-cfg".to_string()),
      }),
      ..Default::default()
    };
    assert_eq!(
      template.boot_set_configuration(&with_override),
      Some("bootset-cfg")
    );
  }

  #[test]
  fn test_arch_defaults_to_x86() {
    let boot_set = BootSet::default();
    assert_eq!(boot_set.arch(), Arch::X86);
    assert_eq!(boot_set.arch().expected_ims_arch(), Some("x86_64"));
    assert_eq!(Arch::Unknown.expected_ims_arch(), Some("x86_64"));
    assert_eq!(Arch::ARM.expected_ims_arch(), Some("aarch64"));
    assert_eq!(Arch::Other.expected_ims_arch(), None);
  }

  #[test]
  fn test_has_hardware_specifier() {
    let mut boot_set = BootSet::default();
    assert!(!boot_set.has_hardware_specifier());
    boot_set.node_list = Some(vec![]);
    assert!(!boot_set.has_hardware_specifier());
    boot_set.node_groups = Some(vec!["gA".to_string()]);
    assert!(boot_set.has_hardware_specifier());
  }

  #[test]
  fn test_remove_empty_cfs_field() {
    let mut template = SessionTemplate {
      cfs: Some(Cfs {
        configuration: Some(String::new()),
      }),
      ..Default::default()
    };
    template.remove_empty_cfs_field();
    assert!(template.cfs.is_none());
  }
}
