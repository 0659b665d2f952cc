use async_trait::async_trait;

use crate::errors::ControlError;
use crate::ids::WorkspaceId;
use crate::workspace::{StatusChange, Workspace, WorkspaceStartResult, WorkspaceStatus};

/// Remote workspace service. The service owns the lifecycle; callers only
/// request transitions and observe them.
#[async_trait]
pub trait WorkspaceControl: Send + Sync {
    /// Ask the service to start `id` in environment `env_name`.
    async fn request_start(
        &self,
        id: &WorkspaceId,
        env_name: &str,
    ) -> Result<WorkspaceStartResult, ControlError>;

    /// Resolve once the workspace reaches `target`.
    async fn watch_status(
        &self,
        id: &WorkspaceId,
        target: WorkspaceStatus,
    ) -> Result<StatusChange, ControlError>;

    /// Single authoritative read of the workspace.
    async fn fetch_details(&self, id: &WorkspaceId) -> Result<Workspace, ControlError>;

    async fn fetch_workspaces(&self) -> Result<Vec<Workspace>, ControlError>;

    /// Record user activity so the service does not idle-stop the workspace.
    async fn record_activity(&self, id: &WorkspaceId) -> Result<(), ControlError>;
}
