use std::sync::Arc;

use parking_lot::Mutex;
use wsboot_core::{Bus, ChannelHandler, SubscriptionError};

/// Tracks the bus channels one start attempt listens on, and removes them all
/// at once when the attempt ends.
pub struct ChannelSubscriptionManager {
    bus: Arc<dyn Bus>,
    channels: Mutex<Vec<String>>,
}

impl ChannelSubscriptionManager {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Register `handler` on `channel`. A channel may only be subscribed once
    /// between teardowns.
    pub fn subscribe(&self, channel: &str, handler: ChannelHandler) -> Result<(), SubscriptionError> {
        if channel.is_empty() {
            return Err(SubscriptionError::EmptyChannel);
        }
        let mut channels = self.channels.lock();
        if channels.iter().any(|c| c == channel) {
            return Err(SubscriptionError::AlreadySubscribed(channel.to_owned()));
        }
        self.bus.subscribe(channel, handler);
        channels.push(channel.to_owned());
        tracing::debug!(channel, "subscribed");
        Ok(())
    }

    /// Unsubscribe every tracked channel. Returns how many were removed.
    pub fn teardown_all(&self) -> usize {
        let drained: Vec<String> = std::mem::take(&mut *self.channels.lock());
        for channel in &drained {
            self.bus.unsubscribe(channel);
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "channels torn down");
        }
        drained.len()
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().clone()
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.lock().iter().any(|c| c == channel)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}
