use chrono::{DateTime, Duration, SecondsFormat, Utc};
use regex::Regex;

use crate::error::Error;

/// Timestamp format shared by every record section (`last_updated` fields,
/// session start/end times).
pub fn get_current_timestamp() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn get_current_time() -> DateTime<Utc> {
  Utc::now()
}

pub fn load_timestamp(timestamp: &str) -> Result<DateTime<Utc>, Error> {
  DateTime::parse_from_rfc3339(timestamp)
    .map(|ts| ts.with_timezone(&Utc))
    .map_err(|e| {
      Error::Message(format!("Invalid timestamp '{}': {}", timestamp, e))
    })
}

/// Seconds elapsed since the given timestamp. An unset or unparseable
/// timestamp counts as infinitely old.
pub fn seconds_since(timestamp: Option<&str>) -> i64 {
  match timestamp.and_then(|ts| load_timestamp(ts).ok()) {
    Some(ts) => (Utc::now() - ts).num_seconds(),
    None => i64::MAX,
  }
}

/// Parse an age string such as '3d4h5m' or '7d' or '1w2d'.
/// Each segment is a number followed by a unit word starting with
/// w(eeks), d(ays), h(ours) or m(inutes).
pub fn age_to_duration(age: &str) -> Result<Duration, Error> {
  let re = Regex::new(r"(?i)(\d+)\s*([a-z]+)")
    .map_err(|e| Error::Message(e.to_string()))?;

  let mut duration = Duration::zero();
  let mut matched = false;

  for captures in re.captures_iter(age) {
    let value: i64 = captures[1]
      .parse()
      .map_err(|_| Error::Message(format!("Unable to parse age: {}", age)))?;
    let seconds = match captures[2].to_lowercase().chars().next() {
      Some('w') => 604800,
      Some('d') => 86400,
      Some('h') => 3600,
      Some('m') => 60,
      _ => {
        return Err(Error::Message(format!("Unable to parse age: {}", age)))
      }
    };
    duration = duration + Duration::seconds(value * seconds);
    matched = true;
  }

  if !matched {
    return Err(Error::Message(format!("Unable to parse age: {}", age)));
  }

  Ok(duration)
}

pub fn age_to_timestamp(age: &str) -> Result<DateTime<Utc>, Error> {
  Ok(Utc::now() - age_to_duration(age)?)
}

pub fn duration_to_string(duration: Duration) -> String {
  let total = duration.num_seconds().max(0);
  format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Check if input is a NID
pub fn validate_nid_format(nid: &str) -> bool {
  nid.to_lowercase().starts_with("nid")
    && nid.len() == 9
    && nid
      .strip_prefix("nid")
      .is_some_and(|nid_number| nid_number.chars().all(char::is_numeric))
}

/// Validate xname is correct (it uses regex taken from HPE Cray CSM docs)
pub fn validate_xname_format(xname: &str) -> bool {
  let xname_re =
    Regex::new(r"^x\d{1,4}c[0-7]s([0-9]|[1-5][0-9]|6[0-4])b[0-1]n[0-7]$");

  match xname_re {
    Ok(re) => re.is_match(xname),
    Err(_) => false,
  }
}

pub fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_age_to_duration() {
    assert_eq!(
      age_to_duration("3d4h5m").unwrap().num_seconds(),
      3 * 86400 + 4 * 3600 + 5 * 60
    );
    assert_eq!(age_to_duration("7d").unwrap().num_seconds(), 7 * 86400);
    assert_eq!(age_to_duration("4h").unwrap().num_seconds(), 4 * 3600);
    assert_eq!(
      age_to_duration("1weeks").unwrap().num_seconds(),
      7 * 86400
    );
    assert!(age_to_duration("forever").is_err());
    assert!(age_to_duration("").is_err());
  }

  #[test]
  fn test_timestamp_round_trip() {
    let ts = get_current_timestamp();
    let loaded = load_timestamp(&ts).unwrap();
    assert!((Utc::now() - loaded).num_seconds() < 5);
  }

  #[test]
  fn test_seconds_since_unset() {
    assert_eq!(seconds_since(None), i64::MAX);
    assert_eq!(seconds_since(Some("not a timestamp")), i64::MAX);
  }

  #[test]
  fn test_validate_nid_format() {
    assert!(validate_nid_format("nid000001"));
    assert!(!validate_nid_format("nid1"));
    assert!(!validate_nid_format("x3000c0s19b1n0"));
  }

  #[test]
  fn test_validate_xname_format() {
    assert!(validate_xname_format("x3000c0s19b1n0"));
    assert!(!validate_xname_format("nid000001"));
    assert!(!validate_xname_format("x3000"));
  }

  #[test]
  fn test_round2() {
    assert_eq!(round2(1.0 / 3.0 * 100.0), 33.33);
    assert_eq!(round2(50.0), 50.0);
  }
}
