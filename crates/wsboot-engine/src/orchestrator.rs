//! Startup orchestration for a single workspace.
//!
//! `StartupOrchestrator::start_workspace` drives one start attempt from the
//! start request to an open agent connection. A newer call supersedes the
//! previous attempt: its channels are dropped, its pending awaits wake up
//! and it resolves as [`OrchestrationError::Superseded`] without reporting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::Instrument;
use wsboot_core::workspace::{channel_for, OUTPUT_CHANNEL_REL, STATUS_CHANNEL_REL};
use wsboot_core::{
    AgentConnection, AgentLink, Bus, ChannelHandler, ChannelKind, ChannelMessage, ErrorPhase,
    ErrorReport, ErrorSink, OrchestrationError, OrchestrationEvent, Workspace, WorkspaceControl,
    WorkspaceId, WorkspaceStartResult, WorkspaceStatus,
};

use crate::attempt::OrchestrationAttempt;
use crate::connector::{
    ReconnectState, ReconnectingConnector, DEFAULT_RECONNECT_BUDGET, DEFAULT_RETRY_DELAY,
};
use crate::endpoint::AgentEndpointStrategy;
use crate::progress::{ProgressStep, ProgressStepTracker, AGENT_STEP, STARTED_STEP};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Log line added to the current step when the start request is rejected.
pub const START_FAILED_LINE: &str = "Unable to start this workspace.";

/// Error text used when the service reports ERROR without details.
pub const DEFAULT_REMOTE_ERROR: &str = "workspace failed to start";

/// Name of the channel carrying the agent's output for `id`.
pub fn agent_channel(id: &WorkspaceId) -> String {
    format!("workspace:{id}:ext-server:output")
}

/// Sink message for a workspace-level failure reported by the service.
pub fn start_error_message(error: Option<&str>) -> String {
    match error.filter(|e| !e.is_empty()) {
        Some(error) => format!("Error when trying to start the workspace: {error}"),
        None => "Error when trying to start the workspace.".to_owned(),
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub reconnect_budget: u32,
    pub retry_delay: Duration,
    pub endpoint_strategy: AgentEndpointStrategy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reconnect_budget: DEFAULT_RECONNECT_BUDGET,
            retry_delay: DEFAULT_RETRY_DELAY,
            endpoint_strategy: AgentEndpointStrategy::default(),
        }
    }
}

/// Progress of the active attempt, stamped with that attempt's generation.
///
/// `begin` bumps the generation and resets the tracker in one critical
/// section; every write checks the stamp under the same lock.
struct ProgressState {
    generation: u64,
    tracker: ProgressStepTracker,
}

/// What a channel handler of one attempt may touch.
#[derive(Clone)]
struct AttemptScope {
    workspace_id: WorkspaceId,
    generation: u64,
    progress: Arc<Mutex<ProgressState>>,
    error_sink: Arc<dyn ErrorSink>,
    event_tx: broadcast::Sender<OrchestrationEvent>,
    reported: Arc<AtomicBool>,
}

impl AttemptScope {
    /// Run `f` on the tracker if this attempt still owns it. `None` once
    /// a newer attempt has begun.
    fn commit<R>(&self, f: impl FnOnce(&mut ProgressStepTracker) -> R) -> Option<R> {
        let mut progress = self.progress.lock();
        if progress.generation != self.generation {
            return None;
        }
        Some(f(&mut progress.tracker))
    }

    fn emit(&self, event: OrchestrationEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("no event receivers");
        }
    }

    /// Report to the sink, at most once per attempt.
    fn report(&self, phase: ErrorPhase, message: String) {
        if self.reported.swap(true, Ordering::SeqCst) {
            tracing::debug!(workspace_id = %self.workspace_id, %message, "error already reported");
            return;
        }
        self.error_sink.report(ErrorReport::new(phase, message));
    }

    fn log_step(&self, progress: &mut ProgressStepTracker, step: usize, line: &str) {
        if progress.append_log(step, line) {
            self.emit(OrchestrationEvent::StepLog {
                workspace_id: self.workspace_id.clone(),
                step,
                line: line.to_owned(),
            });
        }
    }

    fn mark_error(&self, progress: &mut ProgressStepTracker, step: usize) {
        if progress.mark_error(step) {
            self.emit(OrchestrationEvent::StepError {
                workspace_id: self.workspace_id.clone(),
                step,
            });
        }
    }

    /// Flag the current step and add `line` to it, or make `line` its only
    /// log when `replace` is set.
    fn flag_current(&self, line: &str, replace: bool) -> Option<usize> {
        self.commit(|progress| {
            let step = progress.current_index();
            self.mark_error(progress, step);
            if replace {
                if progress.set_log(step, line) {
                    self.emit(OrchestrationEvent::StepLog {
                        workspace_id: self.workspace_id.clone(),
                        step,
                        line: line.to_owned(),
                    });
                }
            } else {
                self.log_step(progress, step, line);
            }
            step
        })
    }

    fn on_status(&self, raw: &str) {
        let msg = ChannelMessage::parse(ChannelKind::Status, raw);
        if !msg.is_error_for(&self.workspace_id) {
            tracing::debug!(
                workspace_id = %self.workspace_id,
                event_type = ?msg.event_type,
                "status message"
            );
            return;
        }
        let message = start_error_message(msg.error.as_deref());
        if self.flag_current(&message, false).is_some() {
            self.report(ErrorPhase::WorkspaceStart, message);
        }
    }

    fn on_agent(&self, raw: &str) {
        let msg = ChannelMessage::parse(ChannelKind::Agent, raw);
        let line = msg.display_line();
        let failed = msg.is_error_for(&self.workspace_id);

        let committed = self.commit(|progress| {
            if progress.advance(AGENT_STEP) {
                self.emit(OrchestrationEvent::StepAdvanced {
                    workspace_id: self.workspace_id.clone(),
                    step: AGENT_STEP,
                });
            }
            self.log_step(progress, AGENT_STEP, &line);
            if failed {
                self.mark_error(progress, AGENT_STEP);
            }
        });

        if committed.is_some() && failed {
            let detail = msg.error.unwrap_or(line);
            self.report(
                ErrorPhase::AgentStart,
                format!("{}: {detail}", ErrorPhase::AgentStart.title()),
            );
        }
    }

    fn on_output(&self, raw: &str) {
        let line = ChannelMessage::parse(ChannelKind::Output, raw).display_line();
        self.commit(|progress| {
            let step = progress.current_index();
            self.log_step(progress, step, &line);
        });
    }
}

pub struct StartupOrchestrator {
    control: Arc<dyn WorkspaceControl>,
    bus: Arc<dyn Bus>,
    connector: ReconnectingConnector,
    error_sink: Arc<dyn ErrorSink>,
    config: OrchestratorConfig,
    progress: Arc<Mutex<ProgressState>>,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActiveAttempt>>,
    event_tx: broadcast::Sender<OrchestrationEvent>,
}

struct ActiveAttempt {
    attempt: OrchestrationAttempt,
    scope: AttemptScope,
}

impl StartupOrchestrator {
    pub fn new(
        control: Arc<dyn WorkspaceControl>,
        bus: Arc<dyn Bus>,
        link: Arc<dyn AgentLink>,
        error_sink: Arc<dyn ErrorSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connector = ReconnectingConnector::new(link, config.retry_delay, event_tx.clone());
        Self {
            control,
            bus,
            connector,
            error_sink,
            config,
            progress: Arc::new(Mutex::new(ProgressState {
                generation: 0,
                tracker: ProgressStepTracker::new(),
            })),
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
            event_tx,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.event_tx.subscribe()
    }

    pub fn progress_steps(&self) -> Vec<ProgressStep> {
        self.progress.lock().tracker.steps().to_vec()
    }

    pub fn current_step_index(&self) -> usize {
        self.progress.lock().tracker.current_index()
    }

    pub fn label_for(&self, index: usize) -> Option<String> {
        self.progress.lock().tracker.label_for(index).map(str::to_owned)
    }

    /// Workspace of the most recent `start_workspace` call.
    pub fn active_workspace(&self) -> Option<WorkspaceId> {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.attempt.workspace_id().clone())
    }

    /// Channels currently held by the active attempt.
    pub fn active_channels(&self) -> Vec<String> {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.attempt.subscriptions().channels())
            .unwrap_or_default()
    }

    /// Start `workspace` and connect to its agent.
    ///
    /// Resolves exactly once: `Ok` once the agent answered, or the terminal
    /// failure of this attempt.
    pub async fn start_workspace(&self, workspace: &Workspace) -> Result<(), OrchestrationError> {
        let (attempt, scope) = self.begin(&workspace.id);
        let span = tracing::info_span!(
            "start_workspace",
            workspace_id = %workspace.id,
            generation = attempt.generation()
        );
        self.drive(&attempt, &scope, workspace).instrument(span).await
    }

    async fn drive(
        &self,
        attempt: &OrchestrationAttempt,
        scope: &AttemptScope,
        workspace: &Workspace,
    ) -> Result<(), OrchestrationError> {
        scope.emit(OrchestrationEvent::RecentWorkspaceUpdated {
            workspace_id: workspace.id.clone(),
        });
        scope.emit(OrchestrationEvent::WorkspaceListRefresh {
            workspace_id: workspace.id.clone(),
        });

        match self.run(attempt, scope, workspace).await {
            Ok(connection) => self.succeed(attempt, scope, connection),
            Err(error) => self.fail(attempt, scope, error),
        }
    }

    /// Swap in a new attempt, invalidating the previous one.
    fn begin(&self, workspace_id: &WorkspaceId) -> (OrchestrationAttempt, AttemptScope) {
        let mut active = self.active.lock();
        let generation = {
            let mut progress = self.progress.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            progress.generation = generation;
            progress.tracker.reset();
            generation
        };

        if let Some(previous) = active.take() {
            previous.attempt.invalidate();
            tracing::info!(
                workspace_id = %previous.attempt.workspace_id(),
                generation = previous.attempt.generation(),
                "start attempt superseded"
            );
            previous.scope.emit(OrchestrationEvent::AttemptSuperseded {
                workspace_id: previous.attempt.workspace_id().clone(),
                generation: previous.attempt.generation(),
            });
        }

        let attempt = OrchestrationAttempt::new(
            workspace_id.clone(),
            generation,
            Arc::clone(&self.generation),
            Arc::clone(&self.bus),
            self.config.reconnect_budget,
        );
        let scope = AttemptScope {
            workspace_id: workspace_id.clone(),
            generation,
            progress: Arc::clone(&self.progress),
            error_sink: Arc::clone(&self.error_sink),
            event_tx: self.event_tx.clone(),
            reported: Arc::new(AtomicBool::new(false)),
        };
        *active = Some(ActiveAttempt {
            attempt: attempt.clone(),
            scope: scope.clone(),
        });
        (attempt, scope)
    }

    async fn run(
        &self,
        attempt: &OrchestrationAttempt,
        scope: &AttemptScope,
        workspace: &Workspace,
    ) -> Result<Box<dyn AgentConnection>, OrchestrationError> {
        let id = &workspace.id;

        let started = tokio::select! {
            _ = attempt.cancelled() => return Err(OrchestrationError::Superseded),
            result = self.control.request_start(id, &workspace.config.default_env) => {
                result.map_err(OrchestrationError::StartRequestFailed)?
            }
        };
        self.subscribe_channels(attempt, scope, &started)?;

        let change = tokio::select! {
            _ = attempt.cancelled() => return Err(OrchestrationError::Superseded),
            running = self.control.watch_status(id, WorkspaceStatus::Running) => running,
            failed = self.control.watch_status(id, WorkspaceStatus::Error) => failed,
        }
        .map_err(OrchestrationError::StatusWatchFailed)?;

        if change.status == WorkspaceStatus::Error {
            let message = change
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_REMOTE_ERROR.to_owned());
            return Err(OrchestrationError::RemoteError { message });
        }
        tracing::info!("workspace running");

        let details = tokio::select! {
            _ = attempt.cancelled() => return Err(OrchestrationError::Superseded),
            result = self.control.fetch_details(id) => {
                result.map_err(OrchestrationError::DetailsFetchFailed)?
            }
        };
        if !attempt.is_current() {
            return Err(OrchestrationError::Superseded);
        }

        let url = self
            .config
            .endpoint_strategy
            .resolve(&details)
            .ok_or(OrchestrationError::AgentEndpointUnavailable)?;
        tracing::debug!(%url, "resolved agent endpoint");

        let state = ReconnectState::new(url, id.clone(), attempt.reconnect_budget());
        Ok(self.connector.connect(state, attempt).await?)
    }

    /// Subscribe the attempt's channels. Runs under the active lock so a
    /// superseded attempt cannot subscribe after its replacement.
    fn subscribe_channels(
        &self,
        attempt: &OrchestrationAttempt,
        scope: &AttemptScope,
        started: &WorkspaceStartResult,
    ) -> Result<(), OrchestrationError> {
        let _active = self.active.lock();
        if !attempt.is_current() {
            return Err(OrchestrationError::Superseded);
        }

        let mut channels: Vec<(String, ChannelHandler)> = Vec::with_capacity(3);
        if let Some(status) = channel_for(&started.links, STATUS_CHANNEL_REL) {
            let scope = scope.clone();
            channels.push((status, Arc::new(move |raw: String| scope.on_status(&raw))));
        }
        {
            let scope = scope.clone();
            channels.push((
                agent_channel(attempt.workspace_id()),
                Arc::new(move |raw: String| scope.on_agent(&raw)),
            ));
        }
        if let Some(output) = channel_for(&started.links, OUTPUT_CHANNEL_REL) {
            let scope = scope.clone();
            channels.push((output, Arc::new(move |raw: String| scope.on_output(&raw))));
        }

        for (channel, handler) in channels {
            if let Err(e) = attempt.subscriptions().subscribe(&channel, handler) {
                tracing::warn!(%channel, error = %e, "skipping channel");
            }
        }
        Ok(())
    }

    fn succeed(
        &self,
        attempt: &OrchestrationAttempt,
        scope: &AttemptScope,
        mut connection: Box<dyn AgentConnection>,
    ) -> Result<(), OrchestrationError> {
        let url = connection.url().to_owned();
        connection.close();
        let committed = scope.commit(|progress| {
            if progress.advance(STARTED_STEP) {
                scope.emit(OrchestrationEvent::StepAdvanced {
                    workspace_id: scope.workspace_id.clone(),
                    step: STARTED_STEP,
                });
            }
        });
        if committed.is_none() {
            attempt.teardown();
            return Err(OrchestrationError::Superseded);
        }
        tracing::info!(%url, "workspace started");
        scope.emit(OrchestrationEvent::AgentConnected {
            workspace_id: scope.workspace_id.clone(),
            url,
        });
        scope.emit(OrchestrationEvent::StartSucceeded {
            workspace_id: scope.workspace_id.clone(),
        });
        Ok(())
    }

    fn fail(
        &self,
        attempt: &OrchestrationAttempt,
        scope: &AttemptScope,
        error: OrchestrationError,
    ) -> Result<(), OrchestrationError> {
        attempt.teardown();
        if error.is_superseded() {
            tracing::debug!("superseded attempt finished");
            return Err(OrchestrationError::Superseded);
        }

        let message = match &error {
            OrchestrationError::RemoteError { message } => start_error_message(Some(message)),
            other => other.to_string(),
        };
        let flagged = match &error {
            OrchestrationError::StartRequestFailed(_) => {
                scope.flag_current(START_FAILED_LINE, true)
            }
            _ => scope.flag_current(&message, false),
        };
        if flagged.is_none() {
            tracing::debug!(error = %error, "superseded attempt finished");
            return Err(OrchestrationError::Superseded);
        }

        let phase = error.phase();
        tracing::warn!(error_kind = error.error_kind(), error = %error, "workspace start failed");
        scope.report(phase, message.clone());
        scope.emit(OrchestrationEvent::StartFailed {
            workspace_id: scope.workspace_id.clone(),
            phase,
            message,
        });
        Err(error)
    }
}
