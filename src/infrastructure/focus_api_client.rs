use crate::domain::models::RemoteFocusStatus;
use crate::infrastructure::config::parse_base_url;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

const FOCUS_START_PATH: &str = "api/focus/start";
const FOCUS_END_PATH: &str = "api/focus/end";
const FOCUS_CURRENT_PATH: &str = "api/focus/current";

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct FocusEndResponse {
    pub duration_minutes: i64,
}

#[async_trait]
pub trait FocusApiClient: Send + Sync {
    async fn start_session(&self, subject: &str) -> Result<(), InfraError>;

    async fn end_session(&self) -> Result<FocusEndResponse, InfraError>;

    async fn current_session(&self) -> Result<RemoteFocusStatus, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFocusApiClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, serde::Serialize)]
struct StartFocusRequest<'a> {
    subject: &'a str,
}

impl ReqwestFocusApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, InfraError> {
        let mut base_url = parse_base_url(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| InfraError::Http(format!("failed to build http client: {error}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, InfraError> {
        self.base_url
            .join(path)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid focus endpoint {path}: {error}")))
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("focus api error: http {}", status.as_u16())
        } else {
            format!("focus api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Http(message)
    }

    fn network_error(action: &str, error: reqwest::Error) -> InfraError {
        if error.is_timeout() {
            InfraError::Http(format!("request timed out while {action}: {error}"))
        } else {
            InfraError::Http(format!("network error while {action}: {error}"))
        }
    }

    async fn read_body(response: reqwest::Response, action: &str) -> Result<String, InfraError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| Self::network_error(action, error))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl FocusApiClient for ReqwestFocusApiClient {
    async fn start_session(&self, subject: &str) -> Result<(), InfraError> {
        let response = self
            .client
            .post(self.endpoint(FOCUS_START_PATH)?)
            .json(&StartFocusRequest { subject })
            .send()
            .await
            .map_err(|error| Self::network_error("starting focus session", error))?;

        // body content is not part of the contract
        Self::read_body(response, "starting focus session").await?;
        Ok(())
    }

    async fn end_session(&self) -> Result<FocusEndResponse, InfraError> {
        let response = self
            .client
            .post(self.endpoint(FOCUS_END_PATH)?)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|error| Self::network_error("ending focus session", error))?;

        let body = Self::read_body(response, "ending focus session").await?;
        serde_json::from_str(&body).map_err(|error| {
            InfraError::Http(format!("invalid focus end payload: {error}; body={body}"))
        })
    }

    async fn current_session(&self) -> Result<RemoteFocusStatus, InfraError> {
        let response = self
            .client
            .get(self.endpoint(FOCUS_CURRENT_PATH)?)
            .send()
            .await
            .map_err(|error| Self::network_error("checking focus session", error))?;

        let body = Self::read_body(response, "checking focus session").await?;
        serde_json::from_str(&body).map_err(|error| {
            InfraError::Http(format!("invalid focus status payload: {error}; body={body}"))
        })
    }
}
