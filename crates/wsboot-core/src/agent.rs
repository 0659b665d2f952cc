use async_trait::async_trait;

use crate::errors::LinkError;

/// An open connection to the in-workspace agent.
pub trait AgentConnection: Send {
    fn url(&self) -> &str;
    fn close(&mut self);
}

/// Opens connections to the in-workspace agent. `open` resolves when the
/// connection is established or has failed.
#[async_trait]
pub trait AgentLink: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn AgentConnection>, LinkError>;
}
