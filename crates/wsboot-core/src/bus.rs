use std::sync::Arc;

/// Callback receiving the raw body of every frame published on a channel.
pub type ChannelHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Shared publish/subscribe message bus.
///
/// A channel has at most one handler; subscribing again replaces it.
pub trait Bus: Send + Sync {
    fn subscribe(&self, channel: &str, handler: ChannelHandler);
    fn unsubscribe(&self, channel: &str);
}
