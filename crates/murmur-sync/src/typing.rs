use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use murmur_platform::Platform;
use murmur_types::events::{ChangeEvent, ChangeFilter, Table};
use murmur_types::models::{RoomId, TypingUser, UserId};

use crate::changes::follow;
use crate::config::SyncConfig;
use crate::error::Result;

/// Follows who else is typing in a room.
pub struct TypingWatcher {
    names: watch::Receiver<Vec<String>>,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl TypingWatcher {
    pub async fn start(
        platform: Arc<dyn Platform>,
        room_id: RoomId,
        viewer: Option<UserId>,
        config: &SyncConfig,
    ) -> Result<Self> {
        let topic = format!("typing:{}", room_id);
        let filters = vec![ChangeFilter::any(Table::TypingIndicators).where_eq("room_id", room_id)];
        let subscription = platform.subscribe(&topic, filters.clone()).await?;

        let (tx, names) = watch::channel(Vec::new());
        let tx = Arc::new(tx);
        refresh(platform.as_ref(), room_id, viewer, &tx).await;

        let cancel = CancellationToken::new();
        let on_change = {
            let platform = platform.clone();
            move |_: ChangeEvent| {
                let platform = platform.clone();
                let tx = tx.clone();
                tokio::spawn(async move { refresh(platform.as_ref(), room_id, viewer, &tx).await });
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
            names,
            task,
            _guard: cancel.drop_guard(),
        })
    }

    /// Names of the other users typing right now.
    pub fn typing(&self) -> Vec<String> {
        self.names.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.names.clone()
    }

    pub async fn stop(self) {
        let Self { task, _guard: guard, .. } = self;
        drop(guard);
        if let Err(e) = task.await {
            warn!("Typing watcher ended abnormally: {}", e);
        }
    }
}

async fn refresh(platform: &dyn Platform, room_id: RoomId, viewer: Option<UserId>, tx: &watch::Sender<Vec<String>>) {
    match platform.typing(room_id).await {
        Ok(records) => {
            let names = records
                .into_iter()
                .map(TypingUser::from)
                .filter(|u| Some(u.user_id) != viewer)
                .map(|u| u.username)
                .collect();
            tx.send_replace(names);
        }
        Err(e) => warn!("Failed to load typing users for room {}: {}", room_id, e),
    }
}

/// `"a is typing"`, `"a, b are typing"`, or nothing when nobody is.
pub fn typing_label(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{} is typing", one)),
        many => Some(format!("{} are typing", many.join(", "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(typing_label(&[]), None);
        assert_eq!(typing_label(&["ana".into()]).as_deref(), Some("ana is typing"));
        assert_eq!(
            typing_label(&["ana".into(), "bo".into()]).as_deref(),
            Some("ana, bo are typing")
        );
    }
}
