use std::io;

use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("BOS: {0}")]
  Message(String),
  #[error("BOS > IO: {0}")]
  IoError(#[from] io::Error),
  #[error("BOS > Serde: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("BOS > Net: {0}")]
  NetError(#[from] reqwest::Error),
  #[error("http request:\nresponse: {response}\npayload: {payload}")]
  RequestError {
    response: reqwest::Error,
    payload: String, // NOTE: upstream APIs either return plain text or a json therefore, we
                     // will just return a String
  },
  #[error("BOS > API: {0}")]
  ApiError(Value),
  #[error("BOS > DB: {0}")]
  DbError(String),
  #[error("BOS > S3: {0}")]
  S3Error(String),
  #[error("BOS > Image '{0}' not found")]
  ImageNotFound(String),
  #[error("BOS > Component '{0}' not found")]
  ComponentNotFound(String),
  #[error("BOS > Session '{0}' not found")]
  SessionNotFound(String),
  #[error("BOS > Session template '{0}' not found")]
  TemplateNotFound(String),
  #[error("BOS > Tenant '{0}' not found")]
  TenantNotFound(String),
  #[error("BOS > BSS token '{0}' unknown")]
  BssTokenUnknown(String),
}

impl From<redis::RedisError> for Error {
  fn from(error: redis::RedisError) -> Self {
    Error::DbError(error.to_string())
  }
}
