//! End-to-end startup scenarios against in-process collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use wsboot_core::{
    ErrorPhase, LinkError, OrchestrationError, OrchestrationEvent, StatusChange, Workspace,
    WorkspaceId, WorkspaceStatus,
};
use wsboot_engine::mock::{
    output_channel, status_channel, InMemoryBus, MockAgentLink, MockWorkspaceControl,
    RecordingErrorSink,
};
use wsboot_engine::orchestrator::agent_channel;
use wsboot_engine::{OrchestratorConfig, StartupOrchestrator};

struct Harness {
    control: Arc<MockWorkspaceControl>,
    bus: Arc<InMemoryBus>,
    link: Arc<MockAgentLink>,
    sink: Arc<RecordingErrorSink>,
    orchestrator: Arc<StartupOrchestrator>,
}

impl Harness {
    fn new(link: MockAgentLink, config: OrchestratorConfig) -> Self {
        let control = Arc::new(MockWorkspaceControl::new());
        let bus = Arc::new(InMemoryBus::new());
        let link = Arc::new(link);
        let sink = Arc::new(RecordingErrorSink::new());
        let orchestrator = Arc::new(StartupOrchestrator::new(
            control.clone(),
            bus.clone(),
            link.clone(),
            sink.clone(),
            config,
        ));
        Self {
            control,
            bus,
            link,
            sink,
            orchestrator,
        }
    }

    fn start(&self, id: &str) -> JoinHandle<Result<(), OrchestrationError>> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let mut workspace = Workspace::new(id, WorkspaceStatus::Stopped);
        workspace.config.default_env = "default".into();
        tokio::spawn(async move { orchestrator.start_workspace(&workspace).await })
    }

    fn set_status(&self, id: &WorkspaceId, status: WorkspaceStatus) {
        self.control.set_status(StatusChange::new(id.clone(), status));
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn channels_of(id: &WorkspaceId) -> Vec<String> {
    let mut names = vec![status_channel(id), agent_channel(id), output_channel(id)];
    names.sort();
    names
}

#[tokio::test]
async fn workspace_starts_and_agent_connects_first_try() {
    let h = Harness::new(MockAgentLink::succeeding(), OrchestratorConfig::default());
    let id = WorkspaceId::from_raw("w1");

    let task = h.start("w1");
    settle().await;
    assert_eq!(h.orchestrator.current_step_index(), 0);

    h.bus.publish(&agent_channel(&id), "[INFO] ws-agent booting");
    assert_eq!(h.orchestrator.current_step_index(), 1);

    h.set_status(&id, WorkspaceStatus::Running);
    task.await.unwrap().unwrap();

    assert_eq!(h.link.attempt_count(), 1);
    assert_eq!(h.control.detail_calls(), 1);
    assert!(h.orchestrator.progress_steps().iter().all(|s| !s.has_error));
    assert_eq!(h.sink.count(), 0);
    assert_eq!(h.bus.subscriber_count(), 0);
}

#[tokio::test]
async fn remote_error_is_reported_once() {
    let h = Harness::new(MockAgentLink::succeeding(), OrchestratorConfig::default());
    let id = WorkspaceId::from_raw("w2");
    let mut events = h.orchestrator.subscribe_events();

    let task = h.start("w2");
    settle().await;
    h.control.set_status(
        StatusChange::new(id.clone(), WorkspaceStatus::Error).with_error("image pull failed"),
    );

    let err = task.await.unwrap().unwrap_err();
    match &err {
        OrchestrationError::RemoteError { message } => assert_eq!(message, "image pull failed"),
        other => panic!("unexpected: {other:?}"),
    }

    let current = h.orchestrator.current_step_index();
    assert!(h.orchestrator.progress_steps()[current].has_error);

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].phase, ErrorPhase::WorkspaceStart);
    assert_eq!(
        reports[0].message,
        "Error when trying to start the workspace: image pull failed"
    );
    assert_eq!(h.link.attempt_count(), 0);
    assert_eq!(h.bus.subscriber_count(), 0);

    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        if let OrchestrationEvent::StartFailed { phase, .. } = event {
            assert_eq!(phase, ErrorPhase::WorkspaceStart);
            failed += 1;
        }
    }
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn status_channel_error_then_remote_error_reports_once() {
    let h = Harness::new(MockAgentLink::succeeding(), OrchestratorConfig::default());
    let id = WorkspaceId::from_raw("w3");
    let mut events = h.orchestrator.subscribe_events();

    let task = h.start("w3");
    settle().await;
    h.bus.publish(
        &status_channel(&id),
        r#"{"eventType":"ERROR","workspaceId":"w3","error":"image pull failed"}"#,
    );
    assert_eq!(h.sink.count(), 1);
    h.control.set_status(
        StatusChange::new(id.clone(), WorkspaceStatus::Error).with_error("image pull failed"),
    );

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, OrchestrationError::RemoteError { .. }));
    assert!(h.orchestrator.progress_steps()[0].has_error);

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].phase, ErrorPhase::WorkspaceStart);

    let failed = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, OrchestrationEvent::StartFailed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn newer_start_supersedes_pending_one() {
    let h = Harness::new(MockAgentLink::succeeding(), OrchestratorConfig::default());
    let a = WorkspaceId::from_raw("a");
    let b = WorkspaceId::from_raw("b");
    let mut events = h.orchestrator.subscribe_events();

    let first = h.start("a");
    settle().await;
    assert_eq!(h.bus.channels(), channels_of(&a));

    let second = h.start("b");
    settle().await;

    let err = first.await.unwrap().unwrap_err();
    assert!(err.is_superseded());
    assert_eq!(h.bus.channels(), channels_of(&b));
    assert_eq!(h.orchestrator.active_workspace(), Some(b.clone()));

    // A late status for the old workspace changes nothing.
    h.set_status(&a, WorkspaceStatus::Running);
    h.bus.publish(&status_channel(&a), r#"{"eventType":"ERROR","workspaceId":"a"}"#);
    settle().await;
    assert_eq!(h.control.detail_calls(), 0);

    h.set_status(&b, WorkspaceStatus::Running);
    second.await.unwrap().unwrap();
    assert_eq!(h.sink.count(), 0);
    assert_eq!(h.link.attempted_urls().len(), 1);

    let superseded: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            OrchestrationEvent::AttemptSuperseded { workspace_id, .. } => Some(workspace_id),
            _ => None,
        })
        .collect();
    assert_eq!(superseded, vec![a]);
}

#[tokio::test]
async fn superseded_start_request_never_subscribes() {
    let h = Harness::new(MockAgentLink::succeeding(), OrchestratorConfig::default());
    let a = WorkspaceId::from_raw("a");
    let b = WorkspaceId::from_raw("b");
    h.control.gate_start(&a);

    let first = h.start("a");
    settle().await;
    assert_eq!(h.bus.subscriber_count(), 0);

    let second = h.start("b");
    settle().await;
    h.control.release_start(&a);
    settle().await;

    assert!(first.await.unwrap().unwrap_err().is_superseded());
    assert_eq!(h.bus.channels(), channels_of(&b));

    h.set_status(&b, WorkspaceStatus::Running);
    second.await.unwrap().unwrap();
    assert_eq!(h.sink.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn agent_connection_gives_up_after_budget() {
    let config = OrchestratorConfig {
        reconnect_budget: 4,
        retry_delay: Duration::from_secs(1),
        ..Default::default()
    };
    let h = Harness::new(MockAgentLink::failing(), config);
    let id = WorkspaceId::from_raw("w3");
    h.set_status(&id, WorkspaceStatus::Running);

    let started = tokio::time::Instant::now();
    let err = h.start("w3").await.unwrap().unwrap_err();

    match err {
        OrchestrationError::ConnectionExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 4);
            assert!(matches!(last_error, LinkError::Refused(_)));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(h.link.attempt_count(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(3));

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].phase, ErrorPhase::AgentConnection);
    assert_eq!(h.bus.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn supersede_during_retries_stops_old_connector() {
    let h = Harness::new(MockAgentLink::failing(), OrchestratorConfig::default());
    let a = WorkspaceId::from_raw("a");
    h.set_status(&a, WorkspaceStatus::Running);

    let first = h.start("a");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(h.link.attempt_count(), 3);

    let second = h.start("b");
    assert!(first.await.unwrap().unwrap_err().is_superseded());
    settle().await;
    assert_eq!(h.link.attempt_count(), 3);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.link.attempt_count(), 3);
    assert_eq!(h.sink.count(), 0);
    second.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_agent_output_never_lands_in_newer_attempt() {
    for _ in 0..200 {
        let h = Harness::new(MockAgentLink::succeeding(), OrchestratorConfig::default());
        let a = WorkspaceId::from_raw("a");
        let b = WorkspaceId::from_raw("b");

        let first = h.start("a");
        while !h.bus.has_subscriber(&agent_channel(&a)) {
            tokio::task::yield_now().await;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let publisher = {
            let bus = Arc::clone(&h.bus);
            let stop = Arc::clone(&stop);
            let channel = agent_channel(&a);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    bus.publish(&channel, "[INFO] ws-agent booting");
                }
            })
        };

        let second = h.start("b");
        while h.orchestrator.active_workspace().as_ref() != Some(&b) {
            tokio::task::yield_now().await;
        }
        assert!(first.await.unwrap().unwrap_err().is_superseded());
        stop.store(true, Ordering::SeqCst);
        publisher.join().unwrap();

        assert_eq!(h.orchestrator.current_step_index(), 0);
        assert!(h.orchestrator.progress_steps()[1].logs.is_empty());
        assert_eq!(h.sink.count(), 0);
        second.abort();
    }
}
