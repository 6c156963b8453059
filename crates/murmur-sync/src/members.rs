use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use murmur_platform::Platform;
use murmur_types::events::{ChangeEvent, ChangeFilter, Table};
use murmur_types::models::{RoomId, RoomMember};

use crate::changes::follow;
use crate::config::SyncConfig;
use crate::error::Result;

/// Follows a room's member list and each member's presence status. The list
/// is reloaded whenever a membership of the room changes.
pub struct MemberWatcher {
    members: watch::Receiver<Vec<RoomMember>>,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl MemberWatcher {
    pub async fn start(platform: Arc<dyn Platform>, room_id: RoomId, config: &SyncConfig) -> Result<Self> {
        let topic = format!("room-users:{}", room_id);
        let filters = vec![ChangeFilter::any(Table::RoomMembers).where_eq("room_id", room_id)];
        let subscription = platform.subscribe(&topic, filters.clone()).await?;

        let (tx, members) = watch::channel(Vec::new());
        let tx = Arc::new(tx);
        refresh(platform.as_ref(), room_id, &tx).await;

        let cancel = CancellationToken::new();
        let on_change = {
            let platform = platform.clone();
            move |_: ChangeEvent| {
                let platform = platform.clone();
                let tx = tx.clone();
                tokio::spawn(async move { refresh(platform.as_ref(), room_id, &tx).await });
            }
        };
        let task = tokio::spawn(follow(
            platform,
            topic,
            filters,
            Some(subscription),
            config.resubscribe_delay,
            cancel.clone(),
            on_change,
        ));

        Ok(Self {
            members,
            task,
            _guard: cancel.drop_guard(),
        })
    }

    pub fn members(&self) -> Vec<RoomMember> {
        self.members.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<RoomMember>> {
        self.members.clone()
    }

    pub async fn stop(self) {
        let Self { task, _guard: guard, .. } = self;
        drop(guard);
        if let Err(e) = task.await {
            warn!("Member watcher ended abnormally: {}", e);
        }
    }
}

async fn refresh(platform: &dyn Platform, room_id: RoomId, tx: &watch::Sender<Vec<RoomMember>>) {
    match platform.room_members(room_id).await {
        Ok(members) => {
            tx.send_replace(members);
        }
        Err(e) => warn!("Failed to load members of room {}: {}", room_id, e),
    }
}

/// Header line of a member list: total and online count.
pub fn member_summary(members: &[RoomMember]) -> String {
    let online = members.iter().filter(|m| m.is_online()).count();
    format!("Members ({}), {} online", members.len(), online)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn member(name: &str, status: &str) -> RoomMember {
        RoomMember {
            user_id: Uuid::new_v4(),
            username: name.into(),
            avatar_url: None,
            status: status.into(),
        }
    }

    #[test]
    fn summary_counts_online_members() {
        assert_eq!(member_summary(&[]), "Members (0), 0 online");
        let members = [member("ana", "online"), member("bo", "offline"), member("cy", "online")];
        assert_eq!(member_summary(&members), "Members (3), 2 online");
    }
}
