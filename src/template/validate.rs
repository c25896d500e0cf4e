use crate::clients::ims::{get_ims_id_from_s3_url, ImsClient};
use crate::clients::s3::{self, BootImageMetadata, S3Url};
use crate::common::utils::validate_nid_format;
use crate::error::Error;
use crate::options::OptionsData;
use crate::session::Operation;

use super::{BootSet, SessionTemplate, HARDWARE_SPECIFIER_FIELDS};

pub const TEMPLATE_NAME_MAX_LENGTH: usize = 127;
pub const DESCRIPTION_MAX_LENGTH: usize = 1023;

/// Outcome of validating the boot sets of one session template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSetStatus {
  Success,
  Warning,
  Error,
}

/// Fatal problems abort validation; warnings are collected and reported.
enum BootSetIssue {
  Fatal(String),
  Warning(String),
}

/// Validates the boot sets listed in a session template.
/// This is called when creating a session or when using the
/// sessiontemplatesvalid endpoint.
///
/// It ensures that there are boot sets.
/// It checks that each boot set specifies nodes via at least one of the
/// specifier fields.
/// Ensures that the boot artifacts exist.
pub async fn validate_boot_sets(
  session_template: &SessionTemplate,
  operation: Operation,
  template_name: &str,
  options: &OptionsData,
  ims_client: &ImsClient,
) -> (BootSetStatus, String) {
  if session_template.boot_sets.is_empty() {
    return (
      BootSetStatus::Error,
      format!(
        "Session template '{}' requires at least 1 boot set.",
        template_name
      ),
    );
  }

  let mut warning_msgs: Vec<String> = Vec::new();
  for (bs_name, bs) in &session_template.boot_sets {
    let bs_msg = |msg: &str| {
      format!(
        "Session template: '{}' boot set: '{}': {}",
        template_name, bs_name, msg
      )
    };
    match validate_boot_set(bs, operation, options, ims_client).await {
      Ok(bs_warning_msgs) => {
        for msg in bs_warning_msgs {
          let msg = bs_msg(&msg);
          log::warn!("{}", msg);
          warning_msgs.push(msg);
        }
      }
      Err(msg) => {
        let msg = bs_msg(&msg);
        log::error!("{}", msg);
        return (BootSetStatus::Error, msg);
      }
    }
  }

  if !warning_msgs.is_empty() {
    return (BootSetStatus::Warning, warning_msgs.join("; "));
  }

  (BootSetStatus::Success, "Valid".to_string())
}

/// Validation on a single boot set. Returns the warning messages (if any);
/// the Err carries the first fatal problem found.
pub async fn validate_boot_set(
  bs: &BootSet,
  operation: Operation,
  options: &OptionsData,
  ims_client: &ImsClient,
) -> Result<Vec<String>, String> {
  let mut warning_msgs = Vec::new();

  verify_nonempty_hw_specifier_field(bs)?;

  if let Some(msg) = check_node_list_for_nids(bs, options) {
    match msg {
      BootSetIssue::Fatal(msg) => return Err(msg),
      BootSetIssue::Warning(msg) => warning_msgs.push(msg),
    }
  }

  if matches!(operation, Operation::Boot | Operation::Reboot) {
    if let Some(issue) = validate_boot_artifacts(bs).await {
      match issue {
        BootSetIssue::Fatal(msg) => return Err(msg),
        BootSetIssue::Warning(msg) => warning_msgs.push(msg),
      }
    }

    if let Some(issue) = validate_ims_boot_image(bs, options, ims_client).await
    {
      match issue {
        BootSetIssue::Fatal(msg) => return Err(msg),
        BootSetIssue::Warning(msg) => warning_msgs.push(msg),
      }
    }
  }

  Ok(warning_msgs)
}

fn verify_nonempty_hw_specifier_field(bs: &BootSet) -> Result<(), String> {
  if bs.node_list.is_none()
    && bs.node_groups.is_none()
    && bs.node_roles_groups.is_none()
  {
    return Err(format!(
      "No hardware specifier fields ({:?})",
      HARDWARE_SPECIFIER_FIELDS
    ));
  }
  if !bs.has_hardware_specifier() {
    return Err(format!(
      "No non-empty hardware specifier fields ({:?})",
      HARDWARE_SPECIFIER_FIELDS
    ));
  }
  Ok(())
}

fn check_node_list_for_nids(
  bs: &BootSet,
  options: &OptionsData,
) -> Option<BootSetIssue> {
  let node_list = bs.node_list.as_ref()?;
  if node_list.iter().any(|node| validate_nid_format(node)) {
    let msg = "Has NID in 'node_list'".to_string();
    return Some(if options.reject_nids {
      BootSetIssue::Fatal(msg)
    } else {
      BootSetIssue::Warning(msg)
    });
  }
  None
}

/// Verify that the boot artifacts referenced by the manifest exist in S3.
/// A missing kernel is fatal; a missing initrd only warns, and plenty of
/// images lack boot_parameters.
async fn validate_boot_artifacts(bs: &BootSet) -> Option<BootSetIssue> {
  let image_metadata = match BootImageMetadata::fetch(bs).await {
    Ok(image_metadata) => image_metadata,
    Err(error) => {
      return Some(BootSetIssue::Fatal(format!(
        "Can't find boot artifacts. Error: {}",
        error
      )));
    }
  };

  let summary = &image_metadata.artifact_summary;

  if let Err(error) =
    s3::head_object(&S3Url::new(&summary.kernel), None).await
  {
    return Some(BootSetIssue::Fatal(format!(
      "Can't find kernel in {}. Error: {}",
      image_metadata.manifest_url.url(),
      error
    )));
  }

  if let Err(error) =
    s3::head_object(&S3Url::new(&summary.initrd), None).await
  {
    return Some(BootSetIssue::Warning(format!(
      "Unable to check initrd in {}. Warning: {}",
      image_metadata.manifest_url.url(),
      error
    )));
  }

  if summary.boot_parameters.is_none() {
    log::info!(
      "{} doesn't contain a boot_parameters",
      image_metadata.manifest_url.url()
    );
  }

  None
}

/// If the boot set architecture is not set to Other, check that the IMS
/// image architecture matches the boot set architecture (treating a boot
/// set architecture of Unknown as X86).
///
/// Otherwise, at least validate whether the boot image is in IMS, if we
/// expect it to be.
async fn validate_ims_boot_image(
  bs: &BootSet,
  options: &OptionsData,
  ims_client: &ImsClient,
) -> Option<BootSetIssue> {
  let bs_path = match bs.path.as_deref() {
    Some(path) => path,
    None => {
      return Some(BootSetIssue::Fatal(
        "Missing required 'path' field".to_string(),
      ));
    }
  };

  let bs_arch = bs.arch();

  let s3_url = S3Url::new(bs_path);
  let ims_id = match get_ims_id_from_s3_url(&s3_url) {
    Some(ims_id) => ims_id,
    None => {
      return Some(BootSetIssue::Warning(format!(
        "Boot artifact S3 URL '{}' doesn't follow convention for IMS images",
        s3_url.url()
      )));
    }
  };

  let image_data = match ims_client.get_image(&ims_id).await {
    Ok(image_data) => image_data,
    Err(Error::ImageNotFound(id)) => {
      let msg = format!("BOS > Image '{}' not found", id);
      return Some(if options.ims_images_must_exist {
        BootSetIssue::Fatal(msg)
      } else {
        BootSetIssue::Warning(msg)
      });
    }
    Err(error) => {
      log::debug!("{}", error);
      if options.ims_errors_fatal {
        return Some(BootSetIssue::Fatal(error.to_string()));
      }
      if bs_arch.expected_ims_arch().is_some() {
        // This means that this error is preventing us from validating the
        // boot set architecture
        return Some(BootSetIssue::Warning(format!(
          "Can't validate boot image arch: {}",
          error
        )));
      }
      return Some(BootSetIssue::Warning(error.to_string()));
    }
  };

  let expected_ims_arch = match bs_arch.expected_ims_arch() {
    Some(expected) => expected,
    None => {
      return Some(BootSetIssue::Warning(
        "Can't validate boot image arch: Boot set arch set to 'Other'"
          .to_string(),
      ));
    }
  };

  if expected_ims_arch != image_data.arch() {
    return Some(BootSetIssue::Fatal(format!(
      "Boot set arch '{}' means IMS image arch should be '{}', but actual IMS image arch is '{}'",
      bs_arch,
      expected_ims_arch,
      image_data.arch()
    )));
  }

  None
}

/// Template names follow the same rules the API schema enforces.
pub fn is_valid_template_name(name: &str) -> bool {
  !name.is_empty()
    && name.len() <= TEMPLATE_NAME_MAX_LENGTH
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

/// Used when creating or patching session templates: structural checks and
/// canonicalization that need no external services.
pub fn validate_sanitize_session_template(
  template_name: &str,
  template: &mut SessionTemplate,
) -> Result<(), Error> {
  if !is_valid_template_name(template_name) {
    return Err(Error::Message(format!(
      "Invalid session template name '{}'",
      template_name
    )));
  }

  if template.boot_sets.is_empty() {
    return Err(Error::Message(
      "Session template must have one or more defined boot sets".to_string(),
    ));
  }

  for (bs_name, bs) in &template.boot_sets {
    if let Some(name) = &bs.name {
      if name != bs_name {
        return Err(Error::Message(format!(
          "Boot set key '{}' does not match its name field '{}'",
          bs_name, name
        )));
      }
    }
    if let Some(path) = &bs.path {
      if !S3Url::new(path).is_well_formed() {
        return Err(Error::Message(format!(
          "Boot set '{}' path '{}' is not a valid S3 URL",
          bs_name, path
        )));
      }
    }
  }

  if let Some(description) = &template.description {
    if description.len() > DESCRIPTION_MAX_LENGTH {
      return Err(Error::Message(format!(
        "Description exceeds {} characters",
        DESCRIPTION_MAX_LENGTH
      )));
    }
  }

  template.name = template_name.to_string();
  template.remove_empty_cfs_field();

  // The boot set names are redundant with the boot set keys, so they are
  // not stored.
  for bs in template.boot_sets.values_mut() {
    bs.name = None;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use crate::template::Cfs;

  use super::*;

  fn template_with_boot_set(bs: BootSet) -> SessionTemplate {
    let mut template = SessionTemplate {
      name: "t1".to_string(),
      enable_cfs: true,
      cfs: Some(Cfs {
        configuration: Some("cfg1".to_string()),
      }),
      ..Default::default()
    };
    template.boot_sets.insert("compute".to_string(), bs);
    template
  }

  #[test]
  fn test_is_valid_template_name() {
    assert!(is_valid_template_name("my-template_1.0"));
    assert!(!is_valid_template_name(""));
    assert!(!is_valid_template_name("bad name"));
    assert!(!is_valid_template_name(&"x".repeat(128)));
  }

  #[test]
  fn test_sanitize_requires_boot_sets() {
    let mut template = SessionTemplate {
      name: "t1".to_string(),
      ..Default::default()
    };
    assert!(
      validate_sanitize_session_template("t1", &mut template).is_err()
    );
  }

  #[test]
  fn test_sanitize_rejects_mismatched_boot_set_name() {
    let mut template = template_with_boot_set(BootSet {
      name: Some("other".to_string()),
      path: Some("s3://bi/img1/manifest.json".to_string()),
      node_list: Some(vec!["x1".to_string()]),
      ..Default::default()
    });
    assert!(
      validate_sanitize_session_template("t1", &mut template).is_err()
    );
  }

  #[test]
  fn test_sanitize_strips_boot_set_names() {
    let mut template = template_with_boot_set(BootSet {
      name: Some("compute".to_string()),
      path: Some("s3://bi/img1/manifest.json".to_string()),
      node_list: Some(vec!["x1".to_string()]),
      ..Default::default()
    });
    validate_sanitize_session_template("t1", &mut template).unwrap();
    assert!(template.boot_sets["compute"].name.is_none());
    assert_eq!(template.name, "t1");
  }

  #[test]
  fn test_sanitize_rejects_bad_s3_path() {
    let mut template = template_with_boot_set(BootSet {
      path: Some("http://not-s3/manifest.json".to_string()),
      node_list: Some(vec!["x1".to_string()]),
      ..Default::default()
    });
    assert!(
      validate_sanitize_session_template("t1", &mut template).is_err()
    );
  }

  #[test]
  fn test_nid_check_respects_reject_nids() {
    let bs = BootSet {
      node_list: Some(vec!["nid000001".to_string()]),
      ..Default::default()
    };
    let mut options = OptionsData::default();
    assert!(matches!(
      check_node_list_for_nids(&bs, &options),
      Some(BootSetIssue::Warning(_))
    ));
    options.reject_nids = true;
    assert!(matches!(
      check_node_list_for_nids(&bs, &options),
      Some(BootSetIssue::Fatal(_))
    ));
  }

  #[test]
  fn test_hw_specifier_required() {
    let bs = BootSet {
      path: Some("s3://bi/img1/manifest.json".to_string()),
      ..Default::default()
    };
    assert!(verify_nonempty_hw_specifier_field(&bs).is_err());
  }
}
