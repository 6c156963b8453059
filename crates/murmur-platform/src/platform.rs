use async_trait::async_trait;

use murmur_types::api::{
    Credentials, Membership, MessagePatch, NewMessage, NewReaction, NewRoom, SignUp, TypingUpsert,
};
use murmur_types::events::ChangeFilter;
use murmur_types::models::{
    MessageId, MessageRecord, Notification, Profile, ReactionRow, Room, RoomId, RoomMember, Session,
    TypingRecord, UserId,
};

use crate::error::Result;
use crate::subscription::Subscription;

/// Everything the chat client needs from its backend platform.
///
/// Reads return rows exactly as stored; grouping, filtering for display and
/// reconciliation happen in the client. `get_message` must report a missing
/// row as [`PlatformError::NotFound`](crate::PlatformError::NotFound) so that
/// callers can tell "not visible yet" apart from real failures.
#[async_trait]
pub trait Platform: Send + Sync {
    // -- Identity --

    /// The currently signed-in session, if any.
    async fn session(&self) -> Result<Option<Session>>;

    async fn sign_up(&self, request: &SignUp) -> Result<Session>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;

    // -- Profiles --

    async fn profile(&self, user_id: UserId) -> Result<Profile>;

    // -- Rooms --

    /// All rooms, newest first.
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    async fn get_room(&self, id: RoomId) -> Result<Room>;

    async fn create_room(&self, room: &NewRoom) -> Result<Room>;

    /// Add a member. Joining twice is not an error.
    async fn join_room(&self, membership: &Membership) -> Result<()>;

    /// Members of a room with their presence status.
    async fn room_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>>;

    // -- Messages --

    /// Non-deleted messages of a room, oldest first, with author profiles.
    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<MessageRecord>>;

    /// One message by id, deleted or not.
    async fn get_message(&self, id: &MessageId) -> Result<MessageRecord>;

    async fn insert_message(&self, message: &NewMessage) -> Result<()>;

    async fn update_message(&self, id: &MessageId, patch: &MessagePatch) -> Result<()>;

    /// Case-insensitive substring match over non-deleted messages of a room.
    async fn search_messages(&self, room_id: RoomId, needle: &str, limit: usize) -> Result<Vec<MessageRecord>>;

    // -- Reactions --

    async fn reactions(&self, message_id: &MessageId) -> Result<Vec<ReactionRow>>;

    async fn find_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<Option<ReactionRow>>;

    async fn insert_reaction(&self, reaction: &NewReaction) -> Result<()>;

    async fn delete_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<()>;

    // -- Typing --

    /// Insert or refresh on the `(room_id, user_id)` conflict key.
    async fn upsert_typing(&self, typing: &TypingUpsert) -> Result<()>;

    async fn delete_typing(&self, room_id: RoomId, user_id: UserId) -> Result<()>;

    async fn typing(&self, room_id: RoomId) -> Result<Vec<TypingRecord>>;

    // -- Notifications --

    /// Unread notifications of a user, newest first.
    async fn unread_notifications(&self, user_id: UserId, limit: usize) -> Result<Vec<Notification>>;

    async fn mark_notification_read(&self, id: &str) -> Result<()>;

    // -- Storage --

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    // -- Realtime --

    /// Open a change subscription. The first event on a healthy channel is
    /// `Status(Subscribed)`; a dropped channel ends with `Status(Closed)`.
    async fn subscribe(&self, topic: &str, filters: Vec<ChangeFilter>) -> Result<Subscription>;
}
