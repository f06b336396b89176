use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    error::ApiError,
    protocol::{Board, MoveCandidateRequest, MoveCandidateResponse, WorkflowMetrics},
};
use tracing::debug;
use url::Url;

use crate::error::ClientError;

pub const KANBAN_PATH: &str = "/api/workflow/kanban";
pub const MOVE_CANDIDATE_PATH: &str = "/api/workflow/move-candidate";
pub const EVENTS_PATH: &str = "/api/workflow/events";
pub const METRICS_PATH: &str = "/api/workflow/metrics";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn fetch_board(&self) -> Result<Board, ClientError>;
    async fn move_candidate(&self, request: &MoveCandidateRequest) -> Result<(), ClientError>;
    async fn fetch_metrics(&self) -> Result<WorkflowMetrics, ClientError>;
}

pub struct HttpWorkflowApi {
    http: Client,
    base_url: Url,
}

impl HttpWorkflowApi {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::with_client(http, server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(server_url).map_err(|source| ClientError::InvalidUrl {
            url: server_url.to_string(),
            source,
        })?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|source| ClientError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                source,
            })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.json::<ApiError>().await.ok();
        Err(ClientError::from_api_error(status, body))
    }
}

#[async_trait]
impl WorkflowApi for HttpWorkflowApi {
    async fn fetch_board(&self) -> Result<Board, ClientError> {
        let url = self.endpoint(KANBAN_PATH)?;
        debug!(%url, "fetching board snapshot");
        let response = self.http.get(url).send().await?;
        Self::decode(response).await
    }

    async fn move_candidate(&self, request: &MoveCandidateRequest) -> Result<(), ClientError> {
        let url = self.endpoint(MOVE_CANDIDATE_PATH)?;
        let response = self.http.post(url).json(request).send().await?;
        let response = Self::check_status(response).await?;
        // Only the status is contractual; a body that says otherwise still wins.
        if let Ok(MoveCandidateResponse {
            success: false,
            message,
        }) = response.json::<MoveCandidateResponse>().await
        {
            return Err(ClientError::Rejected(
                message.unwrap_or_else(|| "move rejected".to_string()),
            ));
        }
        Ok(())
    }

    async fn fetch_metrics(&self) -> Result<WorkflowMetrics, ClientError> {
        let url = self.endpoint(METRICS_PATH)?;
        let response = self.http.get(url).send().await?;
        Self::decode(response).await
    }
}
