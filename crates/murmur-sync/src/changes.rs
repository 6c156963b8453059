use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_platform::{Platform, Subscription};
use murmur_types::events::{ChangeEvent, ChangeFilter, ChannelStatus, SubscriptionEvent};

/// Feed every change on `topic` to `on_change` until cancelled. A closed
/// subscription is reopened after `resubscribe_delay`. `initial` is used
/// as the first subscription when the caller already opened one.
pub(crate) async fn follow<F>(
    platform: Arc<dyn Platform>,
    topic: String,
    filters: Vec<ChangeFilter>,
    initial: Option<Subscription>,
    resubscribe_delay: Duration,
    cancel: CancellationToken,
    mut on_change: F,
) where
    F: FnMut(ChangeEvent) + Send,
{
    let mut next = initial;

    loop {
        let mut subscription = match next.take() {
            Some(subscription) => subscription,
            None => match platform.subscribe(&topic, filters.clone()).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!("Subscribing to {} failed: {}", topic, e);
                    if !pause(&cancel, resubscribe_delay).await {
                        return;
                    }
                    continue;
                }
            },
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = subscription.recv() => match event {
                    Some(SubscriptionEvent::Change(change)) => on_change(change),
                    Some(SubscriptionEvent::Status(ChannelStatus::Subscribed)) => {
                        debug!("Subscribed to {}", topic);
                    }
                    Some(SubscriptionEvent::Status(ChannelStatus::Closed)) | None => {
                        info!("Subscription {} closed, resubscribing in {:?}", topic, resubscribe_delay);
                        break;
                    }
                    Some(SubscriptionEvent::Status(status)) => {
                        warn!("Subscription {} reported {:?}", topic, status);
                    }
                },
            }
        }

        drop(subscription);
        if !pause(&cancel, resubscribe_delay).await {
            return;
        }
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
pub(crate) async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
