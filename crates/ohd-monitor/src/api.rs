use ohd_core::{TaskSnapshot, CURRENT_TASK_FILES_PATH, CURRENT_TASK_PATH, FILE_CONTENT_PATH};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out after {}ms", .0.as_millis())]
    RequestTimeout(Duration),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response decode failed: {0}")]
    Decode(String),
}

/// REST client for the task/file API. Cheap to clone; clones share the
/// connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base: &str) -> Self {
        Self::with_timeout(base, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base: &str, timeout: Duration) -> Self {
        Self {
            http: ClientBuilder::new()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base: normalize_base(base),
            timeout,
        }
    }

    pub fn set_base(&mut self, base: &str) {
        self.base = normalize_base(base);
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        debug!(event = "api_get", path = %path);
        self.send(self.http.get(self.url(path))).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        debug!(event = "api_post", path = %path);
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, FetchError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| self.classify(err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await.map_err(|err| self.classify(err))?;
        serde_json::from_slice(&bytes).map_err(|err| FetchError::Decode(err.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::RequestTimeout(self.timeout)
        } else {
            FetchError::Transport(err.to_string())
        }
    }

    pub async fn current_task(&self) -> Result<TaskSnapshot, FetchError> {
        let value: Value = self.get(CURRENT_TASK_PATH).await?;
        Ok(TaskSnapshot::from_value(value))
    }

    /// Workspace file listing. A body that is not an array counts as empty.
    pub async fn task_files(&self) -> Result<Vec<String>, FetchError> {
        let value: Value = self.get(CURRENT_TASK_FILES_PATH).await?;
        Ok(match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(path) => Some(path),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    pub async fn file_content(&self, path: &str) -> Result<String, FetchError> {
        let encoded: String = url::form_urlencoded::byte_serialize(path.as_bytes()).collect();
        let value: Value = self
            .get(&format!("{FILE_CONTENT_PATH}?path={encoded}"))
            .await?;
        Ok(value
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

fn normalize_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}
