use std::sync::Arc;

use wsboot_core::{ControlError, WorkspaceControl, WorkspaceId};

const ACTIVITY_MARKER: &str = "workspace-activity:";

/// Forwards IDE activity notifications to the workspace service.
pub struct ActivityReporter {
    control: Arc<dyn WorkspaceControl>,
}

impl ActivityReporter {
    pub fn new(control: Arc<dyn WorkspaceControl>) -> Self {
        Self { control }
    }

    /// Extract the workspace id from a `workspace-activity:<id>` message.
    pub fn parse(message: &str) -> Option<WorkspaceId> {
        let (_, id) = message.split_once(ACTIVITY_MARKER)?;
        let id = id.trim();
        (!id.is_empty()).then(|| WorkspaceId::from_raw(id))
    }

    /// Report activity named by `message`. Other messages are ignored.
    pub async fn handle_message(&self, message: &str) -> Option<Result<(), ControlError>> {
        let id = Self::parse(message)?;
        let result = self.control.record_activity(&id).await;
        match &result {
            Ok(()) => tracing::info!(workspace_id = %id, "workspace activity recorded"),
            Err(e) => tracing::error!(workspace_id = %id, error = %e, "failed to record workspace activity"),
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWorkspaceControl;

    #[test]
    fn parses_marker_anywhere_in_message() {
        assert_eq!(
            ActivityReporter::parse("workspace-activity:workspace42"),
            Some(WorkspaceId::from_raw("workspace42"))
        );
        assert_eq!(
            ActivityReporter::parse("ide:workspace-activity:w1"),
            Some(WorkspaceId::from_raw("w1"))
        );
        assert_eq!(ActivityReporter::parse("workspace-activity:"), None);
        assert_eq!(ActivityReporter::parse("show-ide"), None);
    }

    #[tokio::test]
    async fn records_activity_for_matching_messages() {
        let control = Arc::new(MockWorkspaceControl::new());
        let reporter = ActivityReporter::new(control.clone());

        assert!(reporter.handle_message("hide-navbar").await.is_none());
        reporter
            .handle_message("workspace-activity:w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(control.activity(), vec![WorkspaceId::from_raw("w1")]);
    }
}
