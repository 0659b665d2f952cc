use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors surfaced by a [`WorkspaceControl`](crate::control::WorkspaceControl) implementation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ControlError {
    #[error("http error: {0}")]
    Http(String),
    #[error("workspace service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("cancelled")]
    Cancelled,
}

impl ControlError {
    /// Build a status error from a response body, preferring the service's
    /// JSON `message` field over the raw text.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
            .unwrap_or_else(|| body.trim().to_owned());
        Self::Status { status, message }
    }
}

/// Failure to open the agent link.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("channel name is empty")]
    EmptyChannel,
    #[error("channel {0} is already subscribed")]
    AlreadySubscribed(String),
}

/// Outcome of a failed agent connection run.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: LinkError },
    #[error("superseded by a newer start request")]
    Cancelled,
}

/// Where in the startup sequence a fatal condition occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    WorkspaceStart,
    AgentStart,
    AgentConnection,
}

impl ErrorPhase {
    pub fn title(&self) -> &'static str {
        match self {
            Self::WorkspaceStart => "Error when starting workspace",
            Self::AgentStart => "Error when starting agent",
            Self::AgentConnection => "Unable to connect to workspace agent",
        }
    }
}

/// Terminal failure of one `start_workspace` call.
#[derive(Clone, Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("start request rejected: {0}")]
    StartRequestFailed(ControlError),
    #[error("workspace failed to start: {message}")]
    RemoteError { message: String },
    #[error("failed to fetch workspace details: {0}")]
    DetailsFetchFailed(ControlError),
    #[error("status watch failed: {0}")]
    StatusWatchFailed(ControlError),
    #[error("workspace runtime exposes no agent endpoint")]
    AgentEndpointUnavailable,
    #[error("unable to connect to the workspace agent after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: LinkError },
    #[error("superseded by a newer start request")]
    Superseded,
}

impl OrchestrationError {
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    pub fn phase(&self) -> ErrorPhase {
        match self {
            Self::AgentEndpointUnavailable | Self::ConnectionExhausted { .. } => {
                ErrorPhase::AgentConnection
            }
            _ => ErrorPhase::WorkspaceStart,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::StartRequestFailed(_) => "start_request_failed",
            Self::RemoteError { .. } => "remote_error",
            Self::DetailsFetchFailed(_) => "details_fetch_failed",
            Self::StatusWatchFailed(_) => "status_watch_failed",
            Self::AgentEndpointUnavailable => "agent_endpoint_unavailable",
            Self::ConnectionExhausted { .. } => "connection_exhausted",
            Self::Superseded => "superseded",
        }
    }
}

impl From<ConnectError> for OrchestrationError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::Exhausted {
                attempts,
                last_error,
            } => Self::ConnectionExhausted {
                attempts,
                last_error,
            },
            ConnectError::Cancelled => Self::Superseded,
        }
    }
}
