//! In-process stand-ins for the orchestrator's collaborators.
//!
//! Used by this crate's tests and by embedders that want to drive the
//! orchestrator without a workspace service.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use wsboot_core::workspace::{OUTPUT_CHANNEL_REL, STATUS_CHANNEL_REL};
use wsboot_core::{
    AgentConnection, AgentLink, Bus, ChannelHandler, ControlError, ErrorReport, ErrorSink, Link,
    LinkError, LinkParameter, Machine, Server, StatusChange, Workspace, WorkspaceControl,
    WorkspaceId, WorkspaceRuntime, WorkspaceStartResult, WorkspaceStatus,
};

// ─────────────────────────────────────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────────────────────────────────────

/// Bus that dispatches published frames synchronously to the channel handler.
#[derive(Default)]
pub struct InMemoryBus {
    handlers: Mutex<HashMap<String, ChannelHandler>>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `body` to the handler of `channel`. Returns false when nobody listens.
    pub fn publish(&self, channel: &str, body: &str) -> bool {
        let handler = self.handlers.lock().get(channel).cloned();
        match handler {
            Some(handler) => {
                handler(body.to_owned());
                true
            }
            None => false,
        }
    }

    pub fn has_subscriber(&self, channel: &str) -> bool {
        self.handlers.lock().contains_key(channel)
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Subscribed channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

impl Bus for InMemoryBus {
    fn subscribe(&self, channel: &str, handler: ChannelHandler) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().insert(channel.to_owned(), handler);
    }

    fn unsubscribe(&self, channel: &str) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().remove(channel);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace control
// ─────────────────────────────────────────────────────────────────────────────

pub fn status_channel(id: &WorkspaceId) -> String {
    format!("workspace:{id}:statuses")
}

pub fn output_channel(id: &WorkspaceId) -> String {
    format!("workspace:{id}:environment_output")
}

fn channel_link(rel: &str, channel: String) -> Link {
    Link {
        rel: rel.to_owned(),
        href: String::new(),
        method: None,
        parameters: vec![LinkParameter {
            name: "channel".into(),
            default_value: Some(channel),
        }],
    }
}

/// Start acknowledgment advertising the status and output channels.
pub fn start_result(id: &WorkspaceId) -> WorkspaceStartResult {
    WorkspaceStartResult {
        id: id.clone(),
        links: vec![
            channel_link(STATUS_CHANNEL_REL, status_channel(id)),
            channel_link(OUTPUT_CHANNEL_REL, output_channel(id)),
        ],
    }
}

/// A running workspace whose dev machine exposes a ws-agent server.
pub fn running_workspace(id: &WorkspaceId, agent_http_url: &str) -> Workspace {
    let mut dev = Machine::default();
    dev.config.name = "dev-machine".into();
    dev.runtime.servers.insert(
        "4401/tcp".into(),
        Server {
            reference: Some("wsagent".into()),
            address: None,
            url: Some(agent_http_url.to_owned()),
            protocol: Some("http".into()),
        },
    );
    let mut workspace = Workspace::new(id.clone(), WorkspaceStatus::Running);
    workspace.config.default_env = "default".into();
    workspace.runtime = Some(WorkspaceRuntime {
        dev_machine: Some(dev.clone()),
        machines: vec![dev],
    });
    workspace
}

type StatusTx = Arc<watch::Sender<Option<StatusChange>>>;

/// Scriptable [`WorkspaceControl`]. Status watches stay pending until the
/// test calls [`MockWorkspaceControl::set_status`].
#[derive(Default)]
pub struct MockWorkspaceControl {
    start_results: Mutex<HashMap<WorkspaceId, Result<WorkspaceStartResult, ControlError>>>,
    details: Mutex<HashMap<WorkspaceId, Result<Workspace, ControlError>>>,
    statuses: Mutex<HashMap<WorkspaceId, StatusTx>>,
    start_gates: Mutex<HashMap<WorkspaceId, Arc<Notify>>>,
    start_calls: Mutex<Vec<(WorkspaceId, String)>>,
    detail_calls: AtomicUsize,
    list_calls: AtomicUsize,
    activity: Mutex<Vec<WorkspaceId>>,
}

impl MockWorkspaceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(&self, id: &WorkspaceId, error: ControlError) {
        self.start_results.lock().insert(id.clone(), Err(error));
    }

    pub fn set_details(&self, id: &WorkspaceId, details: Result<Workspace, ControlError>) {
        self.details.lock().insert(id.clone(), details);
    }

    /// Hold `request_start` for `id` until [`release_start`](Self::release_start).
    pub fn gate_start(&self, id: &WorkspaceId) {
        self.start_gates
            .lock()
            .insert(id.clone(), Arc::new(Notify::new()));
    }

    pub fn release_start(&self, id: &WorkspaceId) {
        if let Some(gate) = self.start_gates.lock().get(id) {
            gate.notify_one();
        }
    }

    /// Publish a status transition to pending and future watches.
    pub fn set_status(&self, change: StatusChange) {
        let tx = self.status_sender(&change.workspace_id);
        tx.send_replace(Some(change));
    }

    pub fn start_calls(&self) -> Vec<(WorkspaceId, String)> {
        self.start_calls.lock().clone()
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn activity(&self) -> Vec<WorkspaceId> {
        self.activity.lock().clone()
    }

    fn status_sender(&self, id: &WorkspaceId) -> StatusTx {
        self.statuses
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(watch::channel(None).0))
            .clone()
    }
}

#[async_trait]
impl WorkspaceControl for MockWorkspaceControl {
    async fn request_start(
        &self,
        id: &WorkspaceId,
        env_name: &str,
    ) -> Result<WorkspaceStartResult, ControlError> {
        self.start_calls.lock().push((id.clone(), env_name.to_owned()));
        let gate = self.start_gates.lock().get(id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.start_results
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Ok(start_result(id)))
    }

    async fn watch_status(
        &self,
        id: &WorkspaceId,
        target: WorkspaceStatus,
    ) -> Result<StatusChange, ControlError> {
        let mut rx = self.status_sender(id).subscribe();
        let change = rx
            .wait_for(|c| c.as_ref().is_some_and(|c| c.status == target))
            .await
            .map_err(|_| ControlError::Cancelled)?;
        change.clone().ok_or(ControlError::Cancelled)
    }

    async fn fetch_details(&self, id: &WorkspaceId) -> Result<Workspace, ControlError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(|| Ok(running_workspace(id, "http://localhost:4401/api")))
    }

    async fn fetch_workspaces(&self) -> Result<Vec<Workspace>, ControlError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn record_activity(&self, id: &WorkspaceId) -> Result<(), ControlError> {
        self.activity.lock().push(id.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent link
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockConnection {
    url: String,
    closed: Arc<AtomicUsize>,
}

impl AgentConnection for MockConnection {
    fn url(&self) -> &str {
        &self.url
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Agent link replaying scripted outcomes, then a fixed fallback.
pub struct MockAgentLink {
    script: Mutex<VecDeque<Result<(), LinkError>>>,
    fallback: Result<(), LinkError>,
    attempts: Mutex<Vec<(String, Instant)>>,
    closed: Arc<AtomicUsize>,
}

impl MockAgentLink {
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(()))
    }

    pub fn failing() -> Self {
        Self::with_fallback(Err(LinkError::Refused("connection refused".into())))
    }

    /// Fail `failures` times, then succeed.
    pub fn failing_times(failures: usize) -> Self {
        let link = Self::succeeding();
        link.script.lock().extend(
            (0..failures).map(|_| Err(LinkError::Refused("connection refused".into()))),
        );
        link
    }

    fn with_fallback(fallback: Result<(), LinkError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Instants of each `open` call, for checking retry spacing.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn attempted_urls(&self) -> Vec<String> {
        self.attempts.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentLink for MockAgentLink {
    async fn open(&self, url: &str) -> Result<Box<dyn AgentConnection>, LinkError> {
        self.attempts.lock().push((url.to_owned(), Instant::now()));
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        outcome.map(|()| {
            Box::new(MockConnection {
                url: url.to_owned(),
                closed: Arc::clone(&self.closed),
            }) as Box<dyn AgentConnection>
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error sink
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.reports.lock().len()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_publish_reaches_handler() {
        let bus = InMemoryBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe("chan", Arc::new(move |body: String| sink.lock().push(body)));

        assert!(bus.publish("chan", "hello"));
        assert!(!bus.publish("other", "ignored"));
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn status_watch_resolves_on_matching_status() {
        let control = Arc::new(MockWorkspaceControl::new());
        let id = WorkspaceId::from_raw("w1");

        let watcher = {
            let control = Arc::clone(&control);
            let id = id.clone();
            tokio::spawn(async move { control.watch_status(&id, WorkspaceStatus::Running).await })
        };
        tokio::task::yield_now().await;

        control.set_status(StatusChange::new(id.clone(), WorkspaceStatus::Starting));
        control.set_status(StatusChange::new(id.clone(), WorkspaceStatus::Running));

        let change = watcher.await.unwrap().unwrap();
        assert_eq!(change.status, WorkspaceStatus::Running);
    }

    #[tokio::test]
    async fn agent_link_replays_script() {
        let link = MockAgentLink::failing_times(2);
        assert!(link.open("ws://a").await.is_err());
        assert!(link.open("ws://a").await.is_err());
        let mut conn = link.open("ws://a").await.unwrap();
        conn.close();
        assert_eq!(link.attempt_count(), 3);
        assert_eq!(link.closed_count(), 1);
    }
}
