use murmur_platform::{Platform, Subscription};
use murmur_types::events::{ChangeFilter, ChangeKind, ChannelStatus, SubscriptionEvent, Table};
use murmur_types::models::{Notification, UserId};
use tracing::warn;

use crate::error::Result;

/// How many unread notifications are loaded at once.
pub const UNREAD_LIMIT: usize = 10;

/// The user's most recent unread notifications, newest first.
pub async fn unread_notifications(platform: &dyn Platform, user_id: UserId) -> Result<Vec<Notification>> {
    Ok(platform.unread_notifications(user_id, UNREAD_LIMIT).await?)
}

pub async fn mark_read(platform: &dyn Platform, notification_id: &str) -> Result<()> {
    Ok(platform.mark_notification_read(notification_id).await?)
}

/// Notifications addressed to one user, as they are created.
pub struct NotificationStream {
    subscription: Subscription,
}

impl NotificationStream {
    pub async fn subscribe(platform: &dyn Platform, user_id: UserId) -> Result<Self> {
        let filter = ChangeFilter::on(Table::Notifications, ChangeKind::Insert).where_eq("user_id", user_id);
        let subscription = platform
            .subscribe(&format!("notifications:{}", user_id), vec![filter])
            .await?;
        Ok(Self { subscription })
    }

    /// Next notification, or `None` once the subscription has closed.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.subscription.recv().await? {
                SubscriptionEvent::Change(event) => match event.row::<Notification>() {
                    Some(notification) => return Some(notification),
                    None => warn!("Skipping undecodable notification: {}", event.record),
                },
                SubscriptionEvent::Status(ChannelStatus::Closed) => return None,
                SubscriptionEvent::Status(_) => {}
            }
        }
    }
}
