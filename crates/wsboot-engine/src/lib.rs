//! # wsboot-engine
//!
//! Workspace startup orchestration:
//!
//! - [`StartupOrchestrator`]: start request, status channels, status watch,
//!   agent connection, with supersession of stale attempts
//! - [`ReconnectingConnector`]: bounded-retry agent connection state machine
//! - [`ProgressStepTracker`]: the three user-visible startup steps
//! - [`AgentEndpointStrategy`], [`IdeLaunch`], [`ActivityReporter`]
//!
//! [`mock`] holds in-process collaborators for tests and embedders.

#![deny(unsafe_code)]

pub mod activity;
pub mod attempt;
pub mod connector;
pub mod endpoint;
pub mod launch;
pub mod mock;
pub mod orchestrator;
pub mod progress;
pub mod subscriptions;

pub use activity::ActivityReporter;
pub use attempt::OrchestrationAttempt;
pub use connector::{ConnectState, ReconnectState, ReconnectingConnector};
pub use endpoint::AgentEndpointStrategy;
pub use launch::IdeLaunch;
pub use orchestrator::{OrchestratorConfig, StartupOrchestrator};
pub use progress::{ProgressStep, ProgressStepTracker};
pub use subscriptions::ChannelSubscriptionManager;
