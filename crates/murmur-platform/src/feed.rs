use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use murmur_types::events::{ChangeEvent, ChangeFilter, ChannelStatus, SubscriptionEvent};

use crate::subscription::Subscription;

/// In-process fan-out of row changes to filtered subscriptions.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    /// Every change goes to every forwarding task; each task applies its own filters
    broadcast_tx: broadcast::Sender<ChangeEvent>,

    /// Bumped to force every open subscription closed
    generation: watch::Sender<u64>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(FeedInner {
                broadcast_tx,
                generation,
            }),
        }
    }

    /// Publish a change to every matching subscription.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Open a subscription. Events published after this call returns are
    /// delivered if any of `filters` matches.
    pub fn subscribe(&self, topic: &str, filters: Vec<ChangeFilter>) -> Subscription {
        // Subscribe before spawning so nothing published from here on is missed
        let mut broadcast_rx = self.inner.broadcast_tx.subscribe();
        let mut generation_rx = self.inner.generation.subscribe();
        let (tx, rx) = mpsc::channel(256);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let topic_name = topic.to_string();

        tokio::spawn(async move {
            if tx.send(SubscriptionEvent::Status(ChannelStatus::Subscribed)).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = generation_rx.changed() => {
                        if changed.is_ok() {
                            debug!("Feed subscription {} force-closed", topic_name);
                        }
                        let _ = tx.send(SubscriptionEvent::Status(ChannelStatus::Closed)).await;
                        break;
                    }
                    result = broadcast_rx.recv() => {
                        let event = match result {
                            Ok(event) => event,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Feed subscription {} lagged by {} events", topic_name, n);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                let _ = tx.send(SubscriptionEvent::Status(ChannelStatus::Closed)).await;
                                break;
                            }
                        };

                        if !filters.iter().any(|f| f.matches(&event)) {
                            continue;
                        }

                        if tx.send(SubscriptionEvent::Change(event)).await.is_err() {
                            break;
                        }
                    }
                }
            }

            debug!("Feed subscription {} ended", topic_name);
        });

        Subscription::new(topic, rx, token)
    }

    /// Close every open subscription with `Status(Closed)`, the way a dropped
    /// realtime socket would.
    pub fn close_subscriptions(&self) {
        self.inner.generation.send_modify(|g| *g += 1);
    }

    /// Number of forwarding tasks currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::events::{ChangeKind, Table};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn message_insert(room: &str) -> ChangeEvent {
        ChangeEvent::new(Table::Messages, ChangeKind::Insert, json!({ "id": "m-1", "room_id": room }), Value::Null)
    }

    async fn next(sub: &mut Subscription) -> SubscriptionEvent {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out")
            .expect("subscription ended")
    }

    #[tokio::test]
    async fn delivers_only_matching_events() {
        let feed = ChangeFeed::new();
        let filter = ChangeFilter::on(Table::Messages, ChangeKind::Insert).where_eq("room_id", "r-1");
        let mut sub = feed.subscribe("room:r-1", vec![filter]);

        assert_eq!(next(&mut sub).await, SubscriptionEvent::Status(ChannelStatus::Subscribed));

        feed.publish(message_insert("r-2"));
        feed.publish(message_insert("r-1"));

        match next(&mut sub).await {
            SubscriptionEvent::Change(event) => assert_eq!(event.column_str("room_id"), Some("r-1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_subscriptions_reports_closed() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe("t", vec![ChangeFilter::any(Table::Messages)]);
        assert_eq!(next(&mut sub).await, SubscriptionEvent::Status(ChannelStatus::Subscribed));

        feed.close_subscriptions();
        assert_eq!(next(&mut sub).await, SubscriptionEvent::Status(ChannelStatus::Closed));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_detaches_task() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe("t", vec![ChangeFilter::any(Table::Messages)]);
        next(&mut sub).await;
        assert_eq!(feed.subscriber_count(), 1);

        drop(sub);
        for _ in 0..50 {
            if feed.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(feed.subscriber_count(), 0);
    }
}
