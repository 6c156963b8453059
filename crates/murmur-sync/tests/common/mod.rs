#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use murmur_platform::{LocalPlatform, Platform, PlatformError, Result, Subscription};
use murmur_types::api::{
    Credentials, Membership, MessagePatch, NewMessage, NewReaction, NewRoom, SignUp, TypingUpsert,
};
use murmur_types::events::ChangeFilter;
use murmur_types::models::{
    MessageId, MessageRecord, Notification, Profile, ReactionRow, Room, RoomId, RoomMember, Session,
    TypingRecord, UserId,
};
use murmur_sync::SyncConfig;

/// The embedded platform with call counters, the ability to pretend freshly
/// written rows are not visible yet, and a switch that fails listing reads.
pub struct Instrumented {
    pub local: Arc<LocalPlatform>,
    pub lists: AtomicUsize,
    pub gets: AtomicUsize,
    pub mutations: AtomicUsize,
    pub searches: AtomicUsize,
    hidden_gets: AtomicUsize,
    failing_reads: AtomicBool,
}

impl Instrumented {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            local: Arc::new(LocalPlatform::in_memory().unwrap()),
            lists: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            mutations: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            hidden_gets: AtomicUsize::new(0),
            failing_reads: AtomicBool::new(false),
        })
    }

    /// Answer the next `n` single-message reads with not-found.
    pub fn hide_next_gets(&self, n: usize) {
        self.hidden_gets.store(n, Ordering::SeqCst);
    }

    /// Make message listings and reaction reads fail until switched back.
    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                status: 503,
                code: None,
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Platform for Instrumented {
    async fn session(&self) -> Result<Option<Session>> {
        self.local.session().await
    }

    async fn sign_up(&self, request: &SignUp) -> Result<Session> {
        self.local.sign_up(request).await
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        self.local.sign_in(credentials).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.local.sign_out().await
    }

    async fn profile(&self, user_id: UserId) -> Result<Profile> {
        self.local.profile(user_id).await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.local.list_rooms().await
    }

    async fn get_room(&self, id: RoomId) -> Result<Room> {
        self.local.get_room(id).await
    }

    async fn create_room(&self, room: &NewRoom) -> Result<Room> {
        self.mutated();
        self.local.create_room(room).await
    }

    async fn join_room(&self, membership: &Membership) -> Result<()> {
        self.mutated();
        self.local.join_room(membership).await
    }

    async fn room_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>> {
        self.local.room_members(room_id).await
    }

    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<MessageRecord>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        self.local.list_messages(room_id).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<MessageRecord> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let hidden = self
            .hidden_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Err(PlatformError::NotFound(format!("message {}", id)));
        }
        self.local.get_message(id).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        self.mutated();
        self.local.insert_message(message).await
    }

    async fn update_message(&self, id: &MessageId, patch: &MessagePatch) -> Result<()> {
        self.mutated();
        self.local.update_message(id, patch).await
    }

    async fn search_messages(&self, room_id: RoomId, needle: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.local.search_messages(room_id, needle, limit).await
    }

    async fn reactions(&self, message_id: &MessageId) -> Result<Vec<ReactionRow>> {
        self.check_reads()?;
        self.local.reactions(message_id).await
    }

    async fn find_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<Option<ReactionRow>> {
        self.local.find_reaction(message_id, user_id, emoji).await
    }

    async fn insert_reaction(&self, reaction: &NewReaction) -> Result<()> {
        self.mutated();
        self.local.insert_reaction(reaction).await
    }

    async fn delete_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<()> {
        self.mutated();
        self.local.delete_reaction(message_id, user_id, emoji).await
    }

    async fn upsert_typing(&self, typing: &TypingUpsert) -> Result<()> {
        self.local.upsert_typing(typing).await
    }

    async fn delete_typing(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.local.delete_typing(room_id, user_id).await
    }

    async fn typing(&self, room_id: RoomId) -> Result<Vec<TypingRecord>> {
        self.local.typing(room_id).await
    }

    async fn unread_notifications(&self, user_id: UserId, limit: usize) -> Result<Vec<Notification>> {
        self.local.unread_notifications(user_id, limit).await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        self.mutated();
        self.local.mark_notification_read(id).await
    }

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.local.upload(bucket, path, bytes, content_type).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.local.public_url(bucket, path)
    }

    async fn subscribe(&self, topic: &str, filters: Vec<ChangeFilter>) -> Result<Subscription> {
        self.local.subscribe(topic, filters).await
    }
}

/// Timings short enough for tests; polling is effectively off unless a test
/// asks for it.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_secs(600),
        not_found_retries: 5,
        retry_delay: Duration::from_millis(10),
        typing_idle: Duration::from_millis(100),
        resubscribe_delay: Duration::from_millis(50),
    }
}

pub async fn sign_up(platform: &dyn Platform, name: &str) -> Session {
    platform
        .sign_up(&SignUp {
            email: format!("{}@example.com", name),
            password: "correct horse".into(),
            username: name.into(),
        })
        .await
        .unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
