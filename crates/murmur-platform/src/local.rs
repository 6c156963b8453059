//! Embedded platform: the platform tables in SQLite, changes fanned out
//! in-process. Suitable for offline development and tests, not for serving
//! more than one process.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, RwLock};

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::{
    MemberRow, MessageRow, NotificationRow, ProfileRow, ReactionRow as ReactionDbRow, RoomRow, TypingRow,
};
use murmur_db::queries::MessageUpdate;
use murmur_types::api::{
    Credentials, Membership, MessagePatch, NewMessage, NewReaction, NewRoom, SignUp, TypingUpsert,
};
use murmur_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use murmur_types::models::{
    Author, MessageId, MessageRecord, Notification, Profile, ReactionRow, Room, RoomId, RoomMember,
    Session, TypingRecord, UserId,
};

use crate::config::LocalConfig;
use crate::error::{PlatformError, Result};
use crate::feed::ChangeFeed;
use crate::platform::Platform;
use crate::subscription::Subscription;

/// 50 MB upload limit for objects
const MAX_OBJECT_SIZE: usize = 50 * 1024 * 1024;

enum BlobStore {
    Disk(PathBuf),
    Memory(Mutex<HashMap<String, Vec<u8>>>),
}

pub struct LocalPlatform {
    db: Database,
    feed: ChangeFeed,
    session: RwLock<Option<Session>>,
    blobs: BlobStore,
}

impl LocalPlatform {
    /// Open (or create) an on-disk platform.
    pub fn open(db_path: &Path, storage_dir: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        info!("Local platform storage at {}", storage_dir.display());
        Ok(Self::with_parts(db, BlobStore::Disk(storage_dir.to_path_buf())))
    }

    /// A private platform that lives only as long as this value.
    pub fn in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_parts(db, BlobStore::Memory(Mutex::new(HashMap::new()))))
    }

    pub fn from_config(config: &LocalConfig) -> Result<Self> {
        match &config.db_path {
            Some(db_path) => {
                let storage = config
                    .storage_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("./uploads"));
                Self::open(db_path, &storage)
            }
            None => Self::in_memory(),
        }
    }

    fn with_parts(db: Database, blobs: BlobStore) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(),
            session: RwLock::new(None),
            blobs,
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create a room without a session, for seeding a fresh platform.
    pub fn seed_room(&self, name: &str) -> Result<RoomId> {
        let row = self.db.create_room(&Uuid::new_v4().to_string(), name, None, None)?;
        let room = room_from_row(row)?;
        self.publish_room(&room)?;
        Ok(room.id)
    }

    /// Record a notification for a user, as a server-side trigger would.
    pub fn notify(&self, user_id: UserId, kind: &str, message: Option<&str>) -> Result<Notification> {
        let row = self
            .db
            .insert_notification(&Uuid::new_v4().to_string(), &user_id.to_string(), kind, message)?;
        let notification = notification_from_row(row)?;
        self.feed.publish(ChangeEvent::new(
            Table::Notifications,
            ChangeKind::Insert,
            serde_json::to_value(&notification)?,
            Value::Null,
        ));
        Ok(notification)
    }

    fn publish_room(&self, room: &Room) -> Result<()> {
        self.feed.publish(ChangeEvent::new(
            Table::Rooms,
            ChangeKind::Insert,
            serde_json::to_value(room)?,
            Value::Null,
        ));
        Ok(())
    }

    /// Stored object bytes, for inspection.
    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let key = object_key(bucket, path).ok()?;
        match &self.blobs {
            BlobStore::Memory(map) => map.lock().ok()?.get(&key).cloned(),
            BlobStore::Disk(root) => std::fs::read(root.join(&key)).ok(),
        }
    }

    fn current_user(&self) -> Result<UserId> {
        let session = self
            .session
            .read()
            .map_err(|_| PlatformError::Storage("session lock poisoned".into()))?;
        session.as_ref().map(|s| s.user_id).ok_or(PlatformError::Unauthenticated)
    }

    fn set_session(&self, session: Option<Session>) -> Result<()> {
        let mut slot = self
            .session
            .write()
            .map_err(|_| PlatformError::Storage("session lock poisoned".into()))?;
        *slot = session;
        Ok(())
    }
}

#[async_trait]
impl Platform for LocalPlatform {
    async fn session(&self) -> Result<Option<Session>> {
        let session = self
            .session
            .read()
            .map_err(|_| PlatformError::Storage("session lock poisoned".into()))?;
        Ok(session.clone())
    }

    async fn sign_up(&self, request: &SignUp) -> Result<Session> {
        // Validate input
        if request.username.len() < 3 || request.username.len() > 32 {
            return Err(PlatformError::Invalid("username must be 3-32 characters".into()));
        }
        if request.password.len() < 8 {
            return Err(PlatformError::Invalid("password must be at least 8 characters".into()));
        }
        if !request.email.contains('@') {
            return Err(PlatformError::Invalid("email address is malformed".into()));
        }

        if self.db.get_profile_by_email(&request.email)?.is_some() {
            return Err(PlatformError::Conflict("email already registered".into()));
        }
        if self.db.get_profile_by_username(&request.username)?.is_some() {
            return Err(PlatformError::Conflict("username taken".into()));
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(request.password.as_bytes(), &salt)
            .map_err(|e| PlatformError::Auth(format!("password hashing failed: {}", e)))?
            .to_string();

        let user_id = Uuid::new_v4();
        self.db
            .create_profile(&user_id.to_string(), &request.email, &request.username, &password_hash)?;

        info!("Registered {} ({})", request.username, user_id);

        let session = Session {
            user_id,
            email: request.email.clone(),
            access_token: None,
        };
        self.set_session(Some(session.clone()))?;
        Ok(session)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let profile = self
            .db
            .get_profile_by_email(&credentials.email)?
            .ok_or_else(|| PlatformError::Auth("invalid login credentials".into()))?;

        // Verify password
        let parsed_hash = PasswordHash::new(&profile.password)
            .map_err(|e| PlatformError::Storage(format!("corrupt password hash: {}", e)))?;

        Argon2::default()
            .verify_password(credentials.password.as_bytes(), &parsed_hash)
            .map_err(|_| PlatformError::Auth("invalid login credentials".into()))?;

        let session = Session {
            user_id: parse_uuid(&profile.id)?,
            email: profile.email,
            access_token: None,
        };
        self.set_session(Some(session.clone()))?;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.set_session(None)
    }

    async fn profile(&self, user_id: UserId) -> Result<Profile> {
        let row = self
            .db
            .get_profile(&user_id.to_string())?
            .ok_or_else(|| PlatformError::NotFound(format!("profile {}", user_id)))?;
        profile_from_row(row)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.db.get_rooms()?.into_iter().map(room_from_row).collect()
    }

    async fn get_room(&self, id: RoomId) -> Result<Room> {
        let row = self
            .db
            .get_room(&id.to_string())?
            .ok_or_else(|| PlatformError::NotFound(format!("room {}", id)))?;
        room_from_row(row)
    }

    async fn create_room(&self, room: &NewRoom) -> Result<Room> {
        self.current_user()?;
        let name = room.name.trim();
        if name.is_empty() {
            return Err(PlatformError::Invalid("room name is empty".into()));
        }
        let row = self.db.create_room(
            &Uuid::new_v4().to_string(),
            name,
            room.description.as_deref(),
            Some(&room.created_by.to_string()),
        )?;
        let room = room_from_row(row)?;
        info!("Created room {} ({})", room.name, room.id);
        self.publish_room(&room)?;
        Ok(room)
    }

    async fn join_room(&self, membership: &Membership) -> Result<()> {
        self.current_user()?;
        let room_id = membership.room_id.to_string();
        let user_id = membership.user_id.to_string();
        if self.db.get_room(&room_id)?.is_none() {
            return Err(PlatformError::NotFound(format!("room {}", room_id)));
        }
        if self.db.add_room_member(&room_id, &user_id)? {
            debug!("User {} joined room {}", user_id, room_id);
            self.feed.publish(ChangeEvent::new(
                Table::RoomMembers,
                ChangeKind::Insert,
                json!({ "room_id": room_id, "user_id": user_id }),
                Value::Null,
            ));
        }
        Ok(())
    }

    async fn room_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>> {
        self.db
            .get_room_members(&room_id.to_string())?
            .into_iter()
            .map(member_from_row)
            .collect()
    }

    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<MessageRecord>> {
        self.db
            .get_messages(&room_id.to_string())?
            .into_iter()
            .map(message_from_row)
            .collect()
    }

    async fn get_message(&self, id: &MessageId) -> Result<MessageRecord> {
        let row = self
            .db
            .get_message(id.as_str())?
            .ok_or_else(|| PlatformError::NotFound(format!("message {}", id)))?;
        message_from_row(row)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        self.current_user()?;
        let id = Uuid::new_v4().to_string();
        let row = self.db.insert_message(
            &id,
            &message.room_id.to_string(),
            &message.user_id.to_string(),
            &message.content,
            &message.media_urls,
        )?;
        debug!("Inserted message {} into room {}", id, message.room_id);
        self.feed.publish(ChangeEvent::new(
            Table::Messages,
            ChangeKind::Insert,
            message_change_record(&row),
            Value::Null,
        ));
        Ok(())
    }

    async fn update_message(&self, id: &MessageId, patch: &MessagePatch) -> Result<()> {
        self.current_user()?;
        let edited_at = patch.edited_at.map(format_time);
        let update = MessageUpdate {
            content: patch.content.as_deref(),
            edited_at: edited_at.as_deref(),
            is_deleted: patch.is_deleted,
        };
        // Like a filtered UPDATE, touching no rows is not an error
        let Some(row) = self.db.update_message(id.as_str(), &update)? else {
            return Ok(());
        };
        self.feed.publish(ChangeEvent::new(
            Table::Messages,
            ChangeKind::Update,
            message_change_record(&row),
            json!({ "id": row.id }),
        ));
        Ok(())
    }

    async fn search_messages(&self, room_id: RoomId, needle: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        self.db
            .search_messages(&room_id.to_string(), needle, limit)?
            .into_iter()
            .map(message_from_row)
            .collect()
    }

    async fn reactions(&self, message_id: &MessageId) -> Result<Vec<ReactionRow>> {
        self.db
            .get_reactions(message_id.as_str())?
            .into_iter()
            .map(reaction_from_row)
            .collect()
    }

    async fn find_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<Option<ReactionRow>> {
        self.db
            .find_reaction(message_id.as_str(), &user_id.to_string(), emoji)?
            .map(reaction_from_row)
            .transpose()
    }

    async fn insert_reaction(&self, reaction: &NewReaction) -> Result<()> {
        self.current_user()?;
        let row = self
            .db
            .insert_reaction(
                &Uuid::new_v4().to_string(),
                reaction.message_id.as_str(),
                &reaction.user_id.to_string(),
                &reaction.emoji,
            )
            .map_err(|e| PlatformError::Conflict(format!("{:#}", e)))?;
        self.feed.publish(ChangeEvent::new(
            Table::MessageReactions,
            ChangeKind::Insert,
            reaction_change_record(&row),
            Value::Null,
        ));
        Ok(())
    }

    async fn delete_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<()> {
        self.current_user()?;
        let removed = self
            .db
            .delete_reaction(message_id.as_str(), &user_id.to_string(), emoji)?;
        for row in &removed {
            self.feed.publish(ChangeEvent::new(
                Table::MessageReactions,
                ChangeKind::Delete,
                Value::Null,
                reaction_change_record(row),
            ));
        }
        Ok(())
    }

    async fn upsert_typing(&self, typing: &TypingUpsert) -> Result<()> {
        self.current_user()?;
        let room_id = typing.room_id.to_string();
        let user_id = typing.user_id.to_string();
        let inserted = self.db.upsert_typing(&room_id, &user_id)?;
        let kind = if inserted { ChangeKind::Insert } else { ChangeKind::Update };
        self.feed.publish(ChangeEvent::new(
            Table::TypingIndicators,
            kind,
            json!({ "room_id": room_id, "user_id": user_id }),
            Value::Null,
        ));
        Ok(())
    }

    async fn delete_typing(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        if self.db.delete_typing(&room_id.to_string(), &user_id.to_string())? {
            self.feed.publish(ChangeEvent::new(
                Table::TypingIndicators,
                ChangeKind::Delete,
                Value::Null,
                json!({ "room_id": room_id, "user_id": user_id }),
            ));
        }
        Ok(())
    }

    async fn typing(&self, room_id: RoomId) -> Result<Vec<TypingRecord>> {
        self.db
            .get_typing(&room_id.to_string())?
            .into_iter()
            .map(typing_from_row)
            .collect()
    }

    async fn unread_notifications(&self, user_id: UserId, limit: usize) -> Result<Vec<Notification>> {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        self.db
            .get_unread_notifications(&user_id.to_string(), limit)?
            .into_iter()
            .map(notification_from_row)
            .collect()
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        self.current_user()?;
        // Like a filtered UPDATE, an unknown id touches nothing
        let Some(row) = self.db.mark_notification_read(id)? else {
            return Ok(());
        };
        let notification = notification_from_row(row)?;
        self.feed.publish(ChangeEvent::new(
            Table::Notifications,
            ChangeKind::Update,
            serde_json::to_value(&notification)?,
            json!({ "id": notification.id }),
        ));
        Ok(())
    }

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        if bytes.is_empty() {
            return Err(PlatformError::Invalid("empty upload".into()));
        }
        if bytes.len() > MAX_OBJECT_SIZE {
            return Err(PlatformError::Invalid("upload exceeds 50 MB".into()));
        }
        let key = object_key(bucket, path)?;

        match &self.blobs {
            BlobStore::Memory(map) => {
                let mut map = map
                    .lock()
                    .map_err(|_| PlatformError::Storage("object map lock poisoned".into()))?;
                if map.contains_key(&key) {
                    return Err(PlatformError::Conflict(format!("object {} exists", key)));
                }
                map.insert(key.clone(), bytes);
            }
            BlobStore::Disk(root) => {
                let file_path = root.join(&key);
                if tokio::fs::try_exists(&file_path).await? {
                    return Err(PlatformError::Conflict(format!("object {} exists", key)));
                }
                if let Some(parent) = file_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&file_path, &bytes).await?;
            }
        }

        debug!("Stored object {} ({})", key, content_type);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        match &self.blobs {
            BlobStore::Memory(_) => format!("memory://{}/{}", bucket, path),
            BlobStore::Disk(root) => format!("file://{}/{}/{}", root.display(), bucket, path),
        }
    }

    async fn subscribe(&self, topic: &str, filters: Vec<ChangeFilter>) -> Result<Subscription> {
        if filters.is_empty() {
            return Err(PlatformError::Invalid("subscription needs at least one filter".into()));
        }
        Ok(self.feed.subscribe(topic, filters))
    }
}

/// Object key relative to the storage root. Rejects anything that could
/// escape it.
fn object_key(bucket: &str, path: &str) -> Result<String> {
    let relative = Path::new(path);
    let clean = !bucket.is_empty()
        && !bucket.contains(['/', '\\'])
        && bucket != ".."
        && !path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(PlatformError::Invalid(format!("bad object path {}/{}", bucket, path)));
    }
    Ok(format!("{}/{}", bucket, path))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| PlatformError::Storage(format!("corrupt id '{}': {}", raw, e)))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| PlatformError::Storage(format!("corrupt timestamp '{}': {}", raw, e)))
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn profile_from_row(row: ProfileRow) -> Result<Profile> {
    Ok(Profile {
        id: parse_uuid(&row.id)?,
        username: row.username,
        avatar_url: row.avatar_url,
    })
}

fn room_from_row(row: RoomRow) -> Result<Room> {
    Ok(Room {
        id: parse_uuid(&row.id)?,
        created_by: row.created_by.as_deref().map(parse_uuid).transpose()?,
        created_at: parse_time(&row.created_at)?,
        name: row.name,
        description: row.description,
    })
}

fn member_from_row(row: MemberRow) -> Result<RoomMember> {
    Ok(RoomMember {
        user_id: parse_uuid(&row.user_id)?,
        username: row.username,
        avatar_url: row.avatar_url,
        status: row.status,
    })
}

fn notification_from_row(row: NotificationRow) -> Result<Notification> {
    Ok(Notification {
        user_id: parse_uuid(&row.user_id)?,
        created_at: parse_time(&row.created_at)?,
        id: row.id,
        kind: row.kind,
        message: row.message,
        is_read: row.is_read,
    })
}

fn message_from_row(row: MessageRow) -> Result<MessageRecord> {
    let media_urls = row.media_list();
    if row.username.is_none() {
        warn!("Message {} has no author profile", row.id);
    }
    Ok(MessageRecord {
        room_id: parse_uuid(&row.room_id)?,
        user_id: parse_uuid(&row.user_id)?,
        created_at: parse_time(&row.created_at)?,
        edited_at: row.edited_at.as_deref().map(parse_time).transpose()?,
        id: MessageId::new(row.id),
        content: row.content,
        is_deleted: row.is_deleted,
        media_urls,
        author: Author {
            username: row.username.unwrap_or_default(),
            avatar_url: row.avatar_url,
        },
    })
}

/// The bare `messages` row, as a change payload carries it (no joins).
fn message_change_record(row: &MessageRow) -> Value {
    json!({
        "id": row.id,
        "room_id": row.room_id,
        "user_id": row.user_id,
        "content": row.content,
        "is_deleted": row.is_deleted,
        "media_urls": row.media_list(),
        "created_at": row.created_at,
        "edited_at": row.edited_at,
    })
}

fn reaction_from_row(row: ReactionDbRow) -> Result<ReactionRow> {
    Ok(ReactionRow {
        user_id: parse_uuid(&row.user_id)?,
        id: Some(row.id),
        message_id: MessageId::new(row.message_id),
        emoji: row.emoji,
    })
}

fn reaction_change_record(row: &ReactionDbRow) -> Value {
    json!({
        "id": row.id,
        "message_id": row.message_id,
        "user_id": row.user_id,
        "emoji": row.emoji,
        "created_at": row.created_at,
    })
}

fn typing_from_row(row: TypingRow) -> Result<TypingRecord> {
    Ok(TypingRecord {
        room_id: parse_uuid(&row.room_id)?,
        user_id: parse_uuid(&row.user_id)?,
        author: Author {
            username: row.username.unwrap_or_default(),
            avatar_url: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_stay_inside_the_root() {
        assert_eq!(object_key("message-media", "r/1-a.png").unwrap(), "message-media/r/1-a.png");
        assert!(object_key("message-media", "../etc/passwd").is_err());
        assert!(object_key("message-media", "/abs").is_err());
        assert!(object_key("message-media", "").is_err());
        assert!(object_key("a/b", "x").is_err());
        assert!(object_key("..", "x").is_err());
    }
}
