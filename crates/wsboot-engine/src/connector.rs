//! Bounded-retry connection to the in-workspace agent.
//!
//! Driven by an explicit state machine rather than self-rescheduling, so the
//! budget and the cancellation points are visible:
//!
//! ```text
//! Attempting ──ok──▶ Connected
//!     │ err, budget left          ▲
//!     ▼                           │
//!  Waiting ──delay──▶ Attempting ─┘
//!     │ err, budget spent ──▶ Exhausted
//!     └ generation changed ──▶ Cancelled
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use wsboot_core::{
    AgentConnection, AgentLink, ConnectError, LinkError, OrchestrationEvent, WorkspaceId,
};

use crate::attempt::OrchestrationAttempt;

pub const DEFAULT_RECONNECT_BUDGET: u32 = 50;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Target and remaining budget of one connection run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectState {
    pub target_url: String,
    pub workspace_id: WorkspaceId,
    pub remaining_attempts: u32,
}

impl ReconnectState {
    pub fn new(target_url: impl Into<String>, workspace_id: WorkspaceId, budget: u32) -> Self {
        Self {
            target_url: target_url.into(),
            workspace_id,
            remaining_attempts: budget.max(1),
        }
    }
}

/// Observable phase of the connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectState {
    Attempting,
    Waiting,
    Connected,
    Exhausted,
    Cancelled,
}

enum Step {
    Attempting,
    Waiting,
    Connected(Box<dyn AgentConnection>),
    Exhausted(LinkError),
    Cancelled,
}

impl Step {
    fn state(&self) -> ConnectState {
        match self {
            Self::Attempting => ConnectState::Attempting,
            Self::Waiting => ConnectState::Waiting,
            Self::Connected(_) => ConnectState::Connected,
            Self::Exhausted(_) => ConnectState::Exhausted,
            Self::Cancelled => ConnectState::Cancelled,
        }
    }
}

pub struct ReconnectingConnector {
    link: Arc<dyn AgentLink>,
    retry_delay: Duration,
    event_tx: broadcast::Sender<OrchestrationEvent>,
}

impl ReconnectingConnector {
    pub fn new(
        link: Arc<dyn AgentLink>,
        retry_delay: Duration,
        event_tx: broadcast::Sender<OrchestrationEvent>,
    ) -> Self {
        Self {
            link,
            retry_delay,
            event_tx,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    fn emit(&self, event: OrchestrationEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("no event receivers");
        }
    }

    /// Connect to `state.target_url` on behalf of `attempt`.
    ///
    /// The attempt's startup channels are torn down on both `Connected` and
    /// `Exhausted`. A superseded attempt stops at the next check and returns
    /// [`ConnectError::Cancelled`] without touching its channels.
    pub async fn connect(
        &self,
        mut state: ReconnectState,
        attempt: &OrchestrationAttempt,
    ) -> Result<Box<dyn AgentConnection>, ConnectError> {
        let mut made = 0u32;
        let mut step = Step::Attempting;

        loop {
            step = match step {
                Step::Attempting => {
                    if !attempt.is_current() {
                        Step::Cancelled
                    } else {
                        made += 1;
                        self.emit(OrchestrationEvent::AgentConnectAttempt {
                            workspace_id: state.workspace_id.clone(),
                            attempt: made,
                            remaining: state.remaining_attempts,
                        });
                        match self.link.open(&state.target_url).await {
                            Ok(conn) => Step::Connected(conn),
                            Err(e) => {
                                state.remaining_attempts = state.remaining_attempts.saturating_sub(1);
                                tracing::debug!(
                                    workspace_id = %state.workspace_id,
                                    attempt = made,
                                    remaining = state.remaining_attempts,
                                    error = %e,
                                    "agent connection failed"
                                );
                                if state.remaining_attempts > 0 {
                                    Step::Waiting
                                } else {
                                    Step::Exhausted(e)
                                }
                            }
                        }
                    }
                }
                Step::Waiting => {
                    tokio::select! {
                        _ = attempt.cancelled() => Step::Cancelled,
                        _ = tokio::time::sleep(self.retry_delay) => Step::Attempting,
                    }
                }
                Step::Connected(conn) => {
                    attempt.teardown();
                    tracing::info!(
                        workspace_id = %state.workspace_id,
                        url = %state.target_url,
                        attempts = made,
                        "agent connected"
                    );
                    return Ok(conn);
                }
                Step::Exhausted(last_error) => {
                    attempt.teardown();
                    tracing::error!(
                        workspace_id = %state.workspace_id,
                        url = %state.target_url,
                        attempts = made,
                        error = %last_error,
                        "giving up on agent connection"
                    );
                    return Err(ConnectError::Exhausted {
                        attempts: made,
                        last_error,
                    });
                }
                Step::Cancelled => {
                    tracing::debug!(
                        workspace_id = %state.workspace_id,
                        generation = attempt.generation(),
                        "agent connection abandoned"
                    );
                    return Err(ConnectError::Cancelled);
                }
            };
            tracing::trace!(state = ?step.state(), "connector transition");
        }
    }
}
