//! Live synchronization of one room's messages.
//!
//! Three uncoordinated sources update the same [`MessageView`]: optimistic
//! inserts from the composer, a fixed-interval full refetch, and targeted
//! refetches triggered by row changes pushed from the platform. View updates
//! are short critical sections under a plain mutex, never held across an
//! await, so sources interleave but never overlap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::try_join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use murmur_platform::{Platform, PlatformError};
use murmur_types::api::{MessagePatch, NewReaction};
use murmur_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use murmur_types::models::{Message, RoomId, UserId};
use murmur_types::MessageId;

use crate::changes::{follow, pause};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reactions::group_reactions;
use crate::view::{MessageView, Reconciled};

/// Cloneable access to a room's view and its mutations.
#[derive(Clone)]
pub struct RoomHandle {
    inner: Arc<RoomState>,
}

struct RoomState {
    platform: Arc<dyn Platform>,
    room_id: RoomId,
    viewer: Option<UserId>,
    config: SyncConfig,
    view: Mutex<MessageView>,
    snapshots: watch::Sender<Vec<Message>>,
    /// Cancelled on detach; results arriving afterwards are discarded
    cancel: CancellationToken,
}

impl RoomHandle {
    fn new(platform: Arc<dyn Platform>, room_id: RoomId, viewer: Option<UserId>, config: SyncConfig) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(RoomState {
                platform,
                room_id,
                viewer,
                config,
                view: Mutex::new(MessageView::new()),
                snapshots,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.inner.room_id
    }

    /// The signed-in user this view is rendered for.
    pub fn viewer(&self) -> Option<UserId> {
        self.inner.viewer
    }

    /// False once the room has been detached.
    pub fn is_alive(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// Current contents of the view.
    pub fn messages(&self) -> Vec<Message> {
        self.lock_view().messages().to_vec()
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.lock_view().get(id).cloned()
    }

    /// Receiver of view snapshots, updated after every change.
    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.snapshots.subscribe()
    }

    fn lock_view(&self) -> MutexGuard<'_, MessageView> {
        self.inner.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the view and publish the result. Does nothing on a
    /// detached room.
    fn modify<R>(&self, f: impl FnOnce(&mut MessageView) -> R) -> Option<R> {
        if !self.is_alive() {
            return None;
        }
        let mut view = self.lock_view();
        let outcome = f(&mut view);
        self.inner.snapshots.send_replace(view.messages().to_vec());
        Some(outcome)
    }

    // -- Reconciliation --

    /// Show a locally created record right away. Replaying the same record
    /// is a no-op.
    pub fn apply_optimistic_insert(&self, message: Message) -> bool {
        let id = message.id.clone();
        let inserted = self.modify(|view| view.apply_optimistic(message)).unwrap_or(false);
        if inserted {
            debug!("Optimistic message {} shown in room {}", id, self.inner.room_id);
        }
        inserted
    }

    /// Replace the view with the room's current messages and reactions.
    /// Failures are logged and leave the view as it was.
    pub async fn refetch_all(&self) {
        let platform = &self.inner.platform;
        let records = match platform.list_messages(self.inner.room_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to load messages for room {}: {}", self.inner.room_id, e);
                return;
            }
        };

        let reactions = try_join_all(records.iter().map(|r| platform.reactions(&r.id))).await;
        let reactions = match reactions {
            Ok(reactions) => reactions,
            Err(e) => {
                warn!("Failed to load reactions for room {}: {}", self.inner.room_id, e);
                return;
            }
        };

        let messages: Vec<Message> = records
            .into_iter()
            .zip(reactions)
            .map(|(record, rows)| record.with_reactions(group_reactions(&rows, self.inner.viewer)))
            .collect();

        let count = messages.len();
        if self.modify(|view| view.replace_all(messages)).is_some() {
            debug!("Room {} refetched ({} messages)", self.inner.room_id, count);
        }
    }

    /// Refetch one message with the configured number of retries.
    pub async fn refetch_one(&self, id: &MessageId) {
        self.refetch_one_with_retries(id, self.inner.config.not_found_retries).await;
    }

    /// Fetch one message with its reactions and merge it into the view.
    /// A row that is not visible yet is retried up to `retries` more times;
    /// after that, and on any other failure, the view is left unchanged.
    pub async fn refetch_one_with_retries(&self, id: &MessageId, retries: u32) {
        let mut remaining = retries;
        loop {
            if !self.is_alive() {
                return;
            }
            match self.fetch_message(id).await {
                Ok(message) => {
                    let outcome = self.modify(|view| view.reconcile(self.inner.room_id, message));
                    if let Some(outcome) = outcome {
                        log_reconciled(id, &outcome);
                    }
                    return;
                }
                Err(e) if e.is_not_found() && remaining > 0 => {
                    remaining -= 1;
                    debug!("Message {} not visible yet, {} retries left", id, remaining);
                    if !pause(&self.inner.cancel, self.inner.config.retry_delay).await {
                        return;
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!("Giving up on message {}: {}", id, e);
                    return;
                }
                Err(e) => {
                    warn!("Failed to fetch message {}: {}", id, e);
                    return;
                }
            }
        }
    }

    async fn fetch_message(&self, id: &MessageId) -> std::result::Result<Message, PlatformError> {
        let record = self.inner.platform.get_message(id).await?;
        let rows = self.inner.platform.reactions(id).await?;
        Ok(record.with_reactions(group_reactions(&rows, self.inner.viewer)))
    }

    /// Route one pushed change to a targeted or full refetch.
    pub async fn handle_change(&self, event: ChangeEvent) {
        match event.table {
            Table::Messages => {
                let Some(id) = event.column_str("id") else {
                    debug!("Message change without id in room {}", self.inner.room_id);
                    return;
                };
                self.refetch_one(&MessageId::new(id)).await;
            }
            Table::MessageReactions => {
                let target = event
                    .column_str("message_id")
                    .map(MessageId::new)
                    .filter(|id| !id.is_temporary() && self.lock_view().contains(id));
                match target {
                    Some(id) => self.refetch_one(&id).await,
                    None => self.refetch_all().await,
                }
            }
            other => debug!("Ignoring {} change in room {}", other, self.inner.room_id),
        }
    }

    // -- Mutations --

    /// Change a message's text. The view picks the edit up from the change
    /// feed.
    pub async fn edit_message(&self, id: &MessageId, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        if id.is_temporary() {
            return Err(SyncError::Pending(id.clone()));
        }

        let patch = MessagePatch::edit(content, Utc::now());
        if let Err(e) = self.inner.platform.update_message(id, &patch).await {
            error!("Failed to edit message {}: {}", id, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Delete a message. Unconfirmed messages are only removed locally;
    /// confirmed ones are soft-deleted on the platform.
    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        if id.is_temporary() {
            self.modify(|view| view.remove(id));
            debug!("Discarded unsent message {}", id);
            return Ok(());
        }

        if let Err(e) = self.inner.platform.update_message(id, &MessagePatch::soft_delete()).await {
            error!("Failed to delete message {}: {}", id, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Add the viewer's `emoji` reaction, or remove it if already present.
    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<()> {
        if id.is_temporary() {
            return Err(SyncError::Pending(id.clone()));
        }
        let viewer = self.inner.viewer.ok_or(SyncError::Unauthenticated)?;
        let platform = &self.inner.platform;

        let result = match platform.find_reaction(id, viewer, emoji).await? {
            Some(_) => platform.delete_reaction(id, viewer, emoji).await,
            None => {
                let reaction = NewReaction {
                    message_id: id.clone(),
                    user_id: viewer,
                    emoji: emoji.to_string(),
                };
                platform.insert_reaction(&reaction).await
            }
        };
        if let Err(e) = result {
            error!("Failed to toggle {} on message {}: {}", emoji, id, e);
            return Err(e.into());
        }
        Ok(())
    }
}

fn log_reconciled(id: &MessageId, outcome: &Reconciled) {
    match outcome {
        Reconciled::Promoted { temporary } => debug!("Message {} confirmed {}", id, temporary),
        Reconciled::Ignored => debug!("Message {} not for this view", id),
        other => debug!("Message {} reconciled: {:?}", id, other),
    }
}

/// Change filters of a room: new and edited messages of the room, plus
/// every reaction insert and delete.
pub fn room_filters(room_id: RoomId) -> Vec<ChangeFilter> {
    vec![
        ChangeFilter::on(Table::Messages, ChangeKind::Insert).where_eq("room_id", room_id),
        ChangeFilter::on(Table::Messages, ChangeKind::Update).where_eq("room_id", room_id),
        ChangeFilter::on(Table::MessageReactions, ChangeKind::Insert),
        ChangeFilter::on(Table::MessageReactions, ChangeKind::Delete),
    ]
}

/// An attached room: the view plus the poll and listener tasks feeding it.
/// Dropping it detaches.
pub struct RoomSync {
    handle: RoomHandle,
    tasks: Vec<JoinHandle<()>>,
    _guard: DropGuard,
}

impl RoomSync {
    /// Subscribe to the room's changes, load it, and start polling.
    pub async fn attach(
        platform: Arc<dyn Platform>,
        room_id: RoomId,
        viewer: Option<UserId>,
        config: SyncConfig,
    ) -> Result<Self> {
        let handle = RoomHandle::new(platform.clone(), room_id, viewer, config.clone());
        let cancel = handle.inner.cancel.clone();
        let topic = format!("room:{}", room_id);
        let filters = room_filters(room_id);

        // Subscribe before the first load so no change slips between them
        let initial = match platform.subscribe(&topic, filters.clone()).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!("Subscribing to {} failed, will retry: {}", topic, e);
                None
            }
        };

        handle.refetch_all().await;

        let poller = {
            let handle = handle.clone();
            let cancel = cancel.clone();
            let period = config.poll_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => handle.refetch_all().await,
                    }
                }
                debug!("Poller for room {} stopped", handle.room_id());
            })
        };

        let listener = {
            let handle = handle.clone();
            let on_change = move |event: ChangeEvent| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.handle_change(event).await });
            };
            tokio::spawn(follow(
                platform,
                topic,
                filters,
                initial,
                config.resubscribe_delay,
                cancel.clone(),
                on_change,
            ))
        };

        info!("Attached to room {}", room_id);
        Ok(Self {
            handle,
            tasks: vec![poller, listener],
            _guard: cancel.drop_guard(),
        })
    }

    pub fn handle(&self) -> RoomHandle {
        self.handle.clone()
    }

    /// Stop polling, unsubscribe, and wait for both tasks to finish. Fetches
    /// still in flight complete but no longer touch the view.
    pub async fn detach(mut self) {
        self.handle.inner.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Room task ended abnormally: {}", e);
            }
        }
        info!("Detached from room {}", self.handle.room_id());
    }
}
