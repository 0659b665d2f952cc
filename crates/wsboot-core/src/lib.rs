//! # wsboot-core
//!
//! Shared vocabulary for the workspace startup orchestrator:
//!
//! - **Model**: `Workspace`, its links and runtime, `WorkspaceStatus`
//! - **Channels**: `ChannelMessage`, the typed form of bus frames
//! - **Collaborators**: `WorkspaceControl`, `Bus`, `AgentLink`, `ErrorSink`
//! - **Errors**: `OrchestrationError` and the per-collaborator error enums
//! - **Events**: `OrchestrationEvent` broadcast to presentation layers

pub mod agent;
pub mod bus;
pub mod channel;
pub mod control;
pub mod errors;
pub mod events;
pub mod ids;
pub mod sink;
pub mod workspace;

pub use agent::{AgentConnection, AgentLink};
pub use bus::{Bus, ChannelHandler};
pub use channel::{ChannelKind, ChannelMessage, ChannelPayload, EventType};
pub use control::WorkspaceControl;
pub use errors::{
    ConnectError, ControlError, ErrorPhase, LinkError, OrchestrationError, SubscriptionError,
};
pub use events::OrchestrationEvent;
pub use ids::WorkspaceId;
pub use sink::{ErrorReport, ErrorSink, LogErrorSink};
pub use workspace::{
    Link, LinkParameter, Machine, Server, StatusChange, Workspace, WorkspaceConfig,
    WorkspaceRuntime, WorkspaceStartResult, WorkspaceStatus,
};
