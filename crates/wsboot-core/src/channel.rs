//! Typed view of the frames delivered on workspace bus channels.
//!
//! Bus frames carry free-form bodies: JSON status events, JSON machine log
//! records, or bare text lines. They are parsed once, here, into a
//! [`ChannelMessage`] and never passed around as untyped data.

use serde_json::Value;

use crate::ids::WorkspaceId;

/// Which workspace channel a message arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Status,
    Output,
    Agent,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Output => "output",
            Self::Agent => "agent",
        }
    }
}

/// `eventType` of a channel message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Other(String),
}

impl EventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "STARTING" => Self::Starting,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelPayload {
    Text(String),
    Json(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelMessage {
    pub kind: ChannelKind,
    pub workspace_id: Option<WorkspaceId>,
    pub event_type: Option<EventType>,
    pub error: Option<String>,
    pub payload: ChannelPayload,
}

impl ChannelMessage {
    /// Parse a raw frame body received on a channel of the given kind.
    pub fn parse(kind: ChannelKind, raw: &str) -> Self {
        let value = match serde_json::from_str::<Value>(raw) {
            // Machine logs are sometimes JSON encoded twice.
            Ok(Value::String(inner)) => serde_json::from_str::<Value>(&inner)
                .ok()
                .filter(Value::is_object)
                .unwrap_or(Value::String(inner)),
            Ok(value) => value,
            Err(_) => Value::String(raw.to_owned()),
        };

        match value {
            Value::Object(_) => {
                let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_owned);
                let workspace_id = field("workspaceId").map(WorkspaceId::from_raw);
                let event_type = field("eventType").map(|t| EventType::parse(&t));
                let error = field("error").filter(|e| !e.is_empty());
                Self {
                    kind,
                    workspace_id,
                    event_type,
                    error,
                    payload: ChannelPayload::Json(value),
                }
            }
            Value::String(text) => Self::text(kind, text),
            other => Self::text(kind, other.to_string()),
        }
    }

    pub fn text(kind: ChannelKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            workspace_id: None,
            event_type: None,
            error: None,
            payload: ChannelPayload::Text(text.into()),
        }
    }

    /// True for an `ERROR` event that names `workspace_id`.
    pub fn is_error_for(&self, workspace_id: &WorkspaceId) -> bool {
        self.event_type == Some(EventType::Error) && self.workspace_id.as_ref() == Some(workspace_id)
    }

    /// Human readable line for progress logs.
    pub fn display_line(&self) -> String {
        match &self.payload {
            ChannelPayload::Text(text) => text.clone(),
            ChannelPayload::Json(value) => {
                let field = |name: &str| value.get(name).and_then(Value::as_str);
                match (field("machineName"), field("content")) {
                    (Some(machine), Some(content)) => format!("[{machine}] {content}"),
                    (None, Some(content)) => content.to_owned(),
                    _ => field("text")
                        .map(str::to_owned)
                        .unwrap_or_else(|| value.to_string()),
                }
            }
        }
    }
}
