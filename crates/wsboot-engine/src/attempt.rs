use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use wsboot_core::{Bus, WorkspaceId};

use crate::subscriptions::ChannelSubscriptionManager;

/// One in-flight `start_workspace` call.
///
/// Clones share state. An attempt stays allowed to commit changes only while
/// its generation is the orchestrator's active one; continuations check
/// [`is_current`](Self::is_current) before mutating anything.
#[derive(Clone)]
pub struct OrchestrationAttempt {
    inner: Arc<AttemptInner>,
}

struct AttemptInner {
    workspace_id: WorkspaceId,
    generation: u64,
    active_generation: Arc<AtomicU64>,
    cancel: CancellationToken,
    subscriptions: ChannelSubscriptionManager,
    reconnect_budget: u32,
}

impl OrchestrationAttempt {
    pub fn new(
        workspace_id: WorkspaceId,
        generation: u64,
        active_generation: Arc<AtomicU64>,
        bus: Arc<dyn Bus>,
        reconnect_budget: u32,
    ) -> Self {
        Self {
            inner: Arc::new(AttemptInner {
                workspace_id,
                generation,
                active_generation,
                cancel: CancellationToken::new(),
                subscriptions: ChannelSubscriptionManager::new(bus),
                reconnect_budget,
            }),
        }
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.inner.workspace_id
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn reconnect_budget(&self) -> u32 {
        self.inner.reconnect_budget
    }

    pub fn subscriptions(&self) -> &ChannelSubscriptionManager {
        &self.inner.subscriptions
    }

    pub fn is_current(&self) -> bool {
        !self.inner.cancel.is_cancelled()
            && self.inner.active_generation.load(Ordering::SeqCst) == self.inner.generation
    }

    /// Resolves once the attempt has been superseded.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    /// Withdraw this attempt: wake its suspended awaits and drop its channels.
    pub fn invalidate(&self) {
        self.inner.cancel.cancel();
        self.teardown();
    }

    pub fn teardown(&self) -> usize {
        self.inner.subscriptions.teardown_all()
    }
}

impl std::fmt::Debug for OrchestrationAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationAttempt")
            .field("workspace_id", &self.inner.workspace_id)
            .field("generation", &self.inner.generation)
            .field("channels", &self.inner.subscriptions.channels())
            .finish()
    }
}
