//! # wsboot-client
//!
//! Network adapters for the collaborator traits in `wsboot-core`:
//!
//! - [`HttpWorkspaceControl`]: workspace service REST API over `reqwest`
//! - [`MessageBusClient`]: everrest websocket message bus
//! - [`WebSocketAgentLink`]: agent reachability check over websocket

#![deny(unsafe_code)]

pub mod agent;
pub mod bus;
pub mod http;

pub use agent::WebSocketAgentLink;
pub use bus::MessageBusClient;
pub use http::HttpWorkspaceControl;
