//! Workspace service REST client.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use wsboot_core::{
    ControlError, StatusChange, Workspace, WorkspaceControl, WorkspaceId, WorkspaceStartResult,
    WorkspaceStatus,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`WorkspaceControl`] backed by the workspace service HTTP API.
///
/// Status watches poll `GET /api/workspace/<id>` until the target status is
/// seen; a transport error ends the watch.
pub struct HttpWorkspaceControl {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpWorkspaceControl {
    pub fn new(base_url: &str, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(concat!("wsboot/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            poll_interval,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ControlError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ControlError::from_status(status.as_u16(), &body))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ControlError> {
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ControlError::Decode(e.to_string()))
    }
}

fn http_error(e: reqwest::Error) -> ControlError {
    ControlError::Http(e.to_string())
}

#[async_trait]
impl WorkspaceControl for HttpWorkspaceControl {
    async fn request_start(
        &self,
        id: &WorkspaceId,
        env_name: &str,
    ) -> Result<WorkspaceStartResult, ControlError> {
        let mut request = self.client.post(self.endpoint(&format!("/workspace/{id}/runtime")));
        if !env_name.is_empty() {
            request = request.query(&[("environment", env_name)]);
        }
        tracing::debug!(workspace_id = %id, environment = env_name, "requesting workspace start");
        let response = request.send().await.map_err(http_error)?;
        Self::decode(response).await
    }

    async fn watch_status(
        &self,
        id: &WorkspaceId,
        target: WorkspaceStatus,
    ) -> Result<StatusChange, ControlError> {
        loop {
            let workspace = self.fetch_details(id).await?;
            if workspace.status == target {
                return Ok(StatusChange::new(workspace.id, workspace.status));
            }
            tracing::trace!(workspace_id = %id, status = %workspace.status, %target, "waiting for status");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_details(&self, id: &WorkspaceId) -> Result<Workspace, ControlError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/workspace/{id}")))
            .send()
            .await
            .map_err(http_error)?;
        Self::decode(response).await
    }

    async fn fetch_workspaces(&self) -> Result<Vec<Workspace>, ControlError> {
        let response = self
            .client
            .get(self.endpoint("/workspace"))
            .send()
            .await
            .map_err(http_error)?;
        Self::decode(response).await
    }

    async fn record_activity(&self, id: &WorkspaceId) -> Result<(), ControlError> {
        let response = self
            .client
            .put(self.endpoint(&format!("/activity/{id}")))
            .body("")
            .send()
            .await
            .map_err(http_error)?;
        Self::check(response).await.map(|_| ())
    }
}
