use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use murmur_types::events::SubscriptionEvent;

/// A live change subscription. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    events: mpsc::Receiver<SubscriptionEvent>,
    _guard: DropGuard,
}

impl Subscription {
    /// `token` is cancelled when the subscription is dropped; the adapter's
    /// forwarding task watches it to tear down its side.
    pub fn new(
        topic: impl Into<String>,
        events: mpsc::Receiver<SubscriptionEvent>,
        token: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            events,
            _guard: token.drop_guard(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event, or `None` once the adapter side has gone away.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic).finish()
    }
}
