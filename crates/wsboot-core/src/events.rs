use serde::{Deserialize, Serialize};

use crate::errors::ErrorPhase;
use crate::ids::WorkspaceId;

/// Notifications broadcast by the orchestrator to presentation collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrchestrationEvent {
    /// Move the workspace to the top of the recent list.
    #[serde(rename = "recent_workspace_updated")]
    RecentWorkspaceUpdated { workspace_id: WorkspaceId },

    #[serde(rename = "workspace_list_refresh")]
    WorkspaceListRefresh { workspace_id: WorkspaceId },

    #[serde(rename = "step_advanced")]
    StepAdvanced { workspace_id: WorkspaceId, step: usize },

    #[serde(rename = "step_log")]
    StepLog {
        workspace_id: WorkspaceId,
        step: usize,
        line: String,
    },

    #[serde(rename = "step_error")]
    StepError { workspace_id: WorkspaceId, step: usize },

    #[serde(rename = "agent_connect_attempt")]
    AgentConnectAttempt {
        workspace_id: WorkspaceId,
        attempt: u32,
        remaining: u32,
    },

    #[serde(rename = "agent_connected")]
    AgentConnected { workspace_id: WorkspaceId, url: String },

    #[serde(rename = "start_succeeded")]
    StartSucceeded { workspace_id: WorkspaceId },

    #[serde(rename = "start_failed")]
    StartFailed {
        workspace_id: WorkspaceId,
        phase: ErrorPhase,
        message: String,
    },

    #[serde(rename = "attempt_superseded")]
    AttemptSuperseded {
        workspace_id: WorkspaceId,
        generation: u64,
    },
}

impl OrchestrationEvent {
    pub fn workspace_id(&self) -> &WorkspaceId {
        match self {
            Self::RecentWorkspaceUpdated { workspace_id }
            | Self::WorkspaceListRefresh { workspace_id }
            | Self::StepAdvanced { workspace_id, .. }
            | Self::StepLog { workspace_id, .. }
            | Self::StepError { workspace_id, .. }
            | Self::AgentConnectAttempt { workspace_id, .. }
            | Self::AgentConnected { workspace_id, .. }
            | Self::StartSucceeded { workspace_id }
            | Self::StartFailed { workspace_id, .. }
            | Self::AttemptSuperseded { workspace_id, .. } => workspace_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RecentWorkspaceUpdated { .. } => "recent_workspace_updated",
            Self::WorkspaceListRefresh { .. } => "workspace_list_refresh",
            Self::StepAdvanced { .. } => "step_advanced",
            Self::StepLog { .. } => "step_log",
            Self::StepError { .. } => "step_error",
            Self::AgentConnectAttempt { .. } => "agent_connect_attempt",
            Self::AgentConnected { .. } => "agent_connected",
            Self::StartSucceeded { .. } => "start_succeeded",
            Self::StartFailed { .. } => "start_failed",
            Self::AttemptSuperseded { .. } => "attempt_superseded",
        }
    }
}
