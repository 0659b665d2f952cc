//! Workspace data model as reported by the workspace service.
//!
//! Only the fields the orchestration logic interprets are modelled; everything
//! else in the service's payload is ignored on deserialization.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::WorkspaceId;

/// Link rel carrying the workspace status channel name.
pub const STATUS_CHANNEL_REL: &str = "environment.status_channel";
/// Link rel carrying the machine output channel name.
pub const OUTPUT_CHANNEL_REL: &str = "environment.output_channel";
/// Link rel carrying the IDE url.
pub const IDE_URL_REL: &str = "ide url";

/// Lifecycle status of a workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkParameter {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// A named URI attached to a workspace or start result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub rel: String,
    #[serde(default)]
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub parameters: Vec<LinkParameter>,
}

impl Link {
    /// Channel name carried by a channel link: the first parameter's default value.
    pub fn channel(&self) -> Option<&str> {
        self.parameters
            .first()
            .and_then(|p| p.default_value.as_deref())
            .filter(|name| !name.is_empty())
    }
}

pub fn find_link<'a>(links: &'a [Link], rel: &str) -> Option<&'a Link> {
    links.iter().find(|link| link.rel == rel)
}

/// Resolve the channel name advertised under `rel`, if any.
pub fn channel_for(links: &[Link], rel: &str) -> Option<String> {
    find_link(links, rel).and_then(Link::channel).map(str::to_owned)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub default_env: String,
}

/// A server exposed by a machine, keyed by `"<port>/<proto>"` in the runtime.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRuntime {
    #[serde(default)]
    pub env_variables: HashMap<String, String>,
    #[serde(default)]
    pub servers: HashMap<String, Server>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    #[serde(default)]
    pub config: MachineConfig,
    #[serde(default)]
    pub runtime: MachineRuntime,
}

impl Machine {
    pub fn server(&self, key: &str) -> Option<&Server> {
        self.runtime.servers.get(key)
    }

    pub fn server_by_ref(&self, reference: &str) -> Option<&Server> {
        self.runtime
            .servers
            .values()
            .find(|s| s.reference.as_deref() == Some(reference))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRuntime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_machine: Option<Machine>,
    #[serde(default)]
    pub machines: Vec<Machine>,
}

/// A remote workspace. Owned by the caller; the orchestrator only borrows it
/// for the duration of one start attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub status: WorkspaceStatus,
    #[serde(default)]
    pub config: WorkspaceConfig,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<WorkspaceRuntime>,
}

impl Workspace {
    pub fn new(id: impl Into<WorkspaceId>, status: WorkspaceStatus) -> Self {
        Self {
            id: id.into(),
            status,
            config: WorkspaceConfig::default(),
            links: Vec::new(),
            runtime: None,
        }
    }

    /// The href of the link named `rel`, or an empty string.
    pub fn href_link(&self, rel: &str) -> &str {
        find_link(&self.links, rel).map_or("", |l| l.href.as_str())
    }

    pub fn dev_machine(&self) -> Option<&Machine> {
        self.runtime.as_ref().and_then(|r| r.dev_machine.as_ref())
    }
}

/// Acknowledgment of a start request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStartResult {
    pub id: WorkspaceId,
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Observed status transition, with the control-plane error text when the
/// workspace failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub workspace_id: WorkspaceId,
    pub status: WorkspaceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusChange {
    pub fn new(workspace_id: WorkspaceId, status: WorkspaceStatus) -> Self {
        Self {
            workspace_id,
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
