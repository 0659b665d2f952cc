use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of a remote workspace, as assigned by the workspace service.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Generate a locally unique id in the service's `workspace<hex>` shape.
    pub fn new() -> Self {
        Self(format!("workspace{}", Uuid::now_v7().simple()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for WorkspaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkspaceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_has_prefix() {
        let id = WorkspaceId::new();
        assert!(id.as_str().starts_with("workspace"), "got: {id}");
        assert!(!id.as_str().contains('-'));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(WorkspaceId::new(), WorkspaceId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = WorkspaceId::from_raw("workspace7xl3bq2a");
        assert_eq!(id.as_str(), "workspace7xl3bq2a");
        assert_eq!(id, WorkspaceId::from("workspace7xl3bq2a"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = WorkspaceId::from_raw("w1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"w1\"");
        let parsed: WorkspaceId = "w1".parse().unwrap();
        assert_eq!(parsed, id);
    }
}
