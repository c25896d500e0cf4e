pub mod bss;
pub mod cfs;
pub mod hsm;
pub mod ims;
pub mod pcs;
pub mod s3;
pub mod tapms;

use std::time::Duration;

use crate::error::Error;
use crate::options::OptionsData;

// Bounded in-call retries; anything still failing afterwards surfaces as a
// component/session error and is retried on the next operator pass.
const MAX_REQUEST_RETRIES: u32 = 5;
const RETRY_BACKOFF_BASE_MS: u64 = 500;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Base URLs for every external collaborator, from the environment with
/// in-cluster service names as defaults.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
  pub hsm: String,
  pub pcs: String,
  pub cfs: String,
  pub ims: String,
  pub bss: String,
  pub tapms: String,
}

impl ServiceEndpoints {
  pub fn from_env() -> Self {
    let protocol =
      std::env::var("SERVICE_PROTOCOL").unwrap_or_else(|_| "http".to_string());
    let endpoint = |var: &str, service: &str| {
      std::env::var(var)
        .unwrap_or_else(|_| format!("{}://{}", protocol, service))
    };

    ServiceEndpoints {
      hsm: endpoint("HSM_ENDPOINT", "cray-smd"),
      pcs: endpoint("PCS_ENDPOINT", "cray-power-control"),
      cfs: endpoint("CFS_ENDPOINT", "cray-cfs-api"),
      ims: endpoint("IMS_ENDPOINT", "cray-ims"),
      bss: endpoint("BSS_ENDPOINT", "cray-bss"),
      tapms: endpoint("TAPMS_ENDPOINT", "cray-tapms/v1alpha3"),
    }
  }
}

pub fn build_client(read_timeout: Duration) -> Result<reqwest::Client, Error> {
  reqwest::Client::builder()
    .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
    .timeout(read_timeout)
    .build()
    .map_err(Error::NetError)
}

/// Send a request, retrying on connection errors and 5xx responses with
/// exponential backoff. 4xx responses are returned to the caller untouched.
pub async fn send_with_retries(
  request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, Error> {
  let mut attempt: u32 = 0;

  loop {
    let cloned = request.try_clone().ok_or_else(|| {
      Error::Message("Request body cannot be cloned for retry".to_string())
    })?;

    let retriable = match cloned.send().await {
      Ok(response) => {
        if !response.status().is_server_error() {
          return Ok(response);
        }
        log::warn!(
          "Request attempt {} returned {}",
          attempt + 1,
          response.status()
        );
        if attempt >= MAX_REQUEST_RETRIES {
          return Ok(response);
        }
        true
      }
      Err(error) => {
        if !(error.is_connect() || error.is_timeout() || error.is_request()) {
          return Err(Error::NetError(error));
        }
        log::warn!("Request attempt {} failed: {}", attempt + 1, error);
        if attempt >= MAX_REQUEST_RETRIES {
          return Err(Error::NetError(error));
        }
        true
      }
    };

    if retriable {
      let backoff =
        Duration::from_millis(RETRY_BACKOFF_BASE_MS * 2u64.pow(attempt));
      tokio::time::sleep(backoff).await;
      attempt += 1;
    }
  }
}

/// Typed clients for all external collaborators, constructed once at
/// startup with the per-service read timeouts from the options data.
#[derive(Clone)]
pub struct Clients {
  pub hsm: hsm::HsmClient,
  pub pcs: pcs::PcsClient,
  pub cfs: cfs::CfsClient,
  pub ims: ims::ImsClient,
  pub bss: bss::BssClient,
  pub tapms: tapms::TapmsClient,
}

impl Clients {
  pub fn new(
    endpoints: &ServiceEndpoints,
    options: &OptionsData,
  ) -> Result<Self, Error> {
    Ok(Clients {
      hsm: hsm::HsmClient::new(
        &endpoints.hsm,
        Duration::from_secs(options.hsm_read_timeout),
      )?,
      pcs: pcs::PcsClient::new(
        &endpoints.pcs,
        Duration::from_secs(options.pcs_read_timeout),
      )?,
      cfs: cfs::CfsClient::new(
        &endpoints.cfs,
        Duration::from_secs(options.cfs_read_timeout),
      )?,
      ims: ims::ImsClient::new(
        &endpoints.ims,
        Duration::from_secs(options.ims_read_timeout),
      )?,
      bss: bss::BssClient::new(
        &endpoints.bss,
        Duration::from_secs(options.bss_read_timeout),
      )?,
      tapms: tapms::TapmsClient::new(
        &endpoints.tapms,
        Duration::from_secs(options.hsm_read_timeout),
      )?,
    })
  }
}
