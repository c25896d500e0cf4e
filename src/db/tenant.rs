use sha1::{Digest, Sha1};

/// Databases partitioned by tenant key their entries by
/// `sha1(tenant)-sha1(name)`. The empty tenant is the default tenant.
pub fn get_tenant_aware_key(name: &str, tenant: Option<&str>) -> String {
  let tenant = tenant.unwrap_or("");
  format!("{}-{}", sha1_hex(tenant), sha1_hex(name))
}

fn sha1_hex(value: &str) -> String {
  let mut hasher = Sha1::new();
  hasher.update(value.as_bytes());
  format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_shape() {
    let key = get_tenant_aware_key("template-1", Some("vcluster1"));
    let parts: Vec<&str> = key.split('-').collect();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].len(), 40);
    assert_eq!(parts[1].len(), 40);
  }

  #[test]
  fn test_empty_tenant_is_default() {
    assert_eq!(
      get_tenant_aware_key("t1", None),
      get_tenant_aware_key("t1", Some(""))
    );
    assert_ne!(
      get_tenant_aware_key("t1", None),
      get_tenant_aware_key("t1", Some("vcluster1"))
    );
  }

  #[test]
  fn test_distinct_names_distinct_keys() {
    assert_ne!(
      get_tenant_aware_key("t1", Some("a")),
      get_tenant_aware_key("t2", Some("a"))
    );
  }
}
