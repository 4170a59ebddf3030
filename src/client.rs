use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("invalid operation id: `{0}`")]
    InvalidId(String),
    #[error("operation \"{0}\" is not found")]
    NotFound(String),
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cannot decode operation: {0}")]
    Decode(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// The `operations` namespace of the host API client.
#[async_trait]
pub trait OperationsClient: Send + Sync {
    async fn get_operation(&self, id: &str) -> ClientResult<Value>;
}

static OPERATION_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-A-Za-z0-9_.:]+$").unwrap());

pub fn validate_operation_id(id: &str) -> ClientResult<()> {
    if OPERATION_ID_REGEX.is_match(id) {
        Ok(())
    } else {
        Err(ClientError::InvalidId(id.to_string()))
    }
}

/// Talks to a running Inspectr instance over its REST API.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn operation_url(&self, id: &str) -> String {
        format!("{}/api/operations/{}", self.base_url, id)
    }
}

#[async_trait]
impl OperationsClient for HttpClient {
    async fn get_operation(&self, id: &str) -> ClientResult<Value> {
        validate_operation_id(id)?;

        let res = self
            .client
            .get(self.operation_url(id))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&body).unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                }),
            });
        }

        let record: Value = res
            .json()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))?;
        if record.is_object() {
            Ok(record)
        } else {
            Err(ClientError::Decode("operation is not a JSON object".to_string()))
        }
    }
}

/// Pulls a message out of `{"error": "..."}` or `{"error": {"message": "..."}}`.
fn error_message(body: &str) -> Option<String> {
    let body: Value = serde_json::from_str(body).ok()?;
    match body.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(error) => error.get("message")?.as_str().map(str::to_string),
        _ => None,
    }
}
