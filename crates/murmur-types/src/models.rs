use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub type RoomId = Uuid;
pub type UserId = Uuid;

/// Prefix carried by identifiers minted locally for optimistic records.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Message identifier. Server ids are opaque; optimistic ids start with `temp-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh temporary id for an optimistic record.
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4()))
    }

    /// True for ids that were never confirmed by the server.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

// -- Profiles --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Author display fields denormalized onto every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Author {
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorRow {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl From<AuthorRow> for Author {
    fn from(row: AuthorRow) -> Self {
        Self {
            username: row.username.unwrap_or_default(),
            avatar_url: row.avatar_url,
        }
    }
}

/// Shape of an embedded `profiles` join. Depending on how the relation is
/// resolved it arrives as one object or as a list holding one object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProfileJoin {
    One(AuthorRow),
    Many(Vec<AuthorRow>),
}

impl ProfileJoin {
    fn into_author(self) -> Author {
        match self {
            Self::One(row) => row.into(),
            Self::Many(rows) => rows.into_iter().next().map(Author::from).unwrap_or_default(),
        }
    }
}

impl<'de> Deserialize<'de> for Author {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let join = Option::<ProfileJoin>::deserialize(deserializer)?;
        Ok(join.map(ProfileJoin::into_author).unwrap_or_default())
    }
}

// -- Messages --

/// A `messages` row as the platform returns it, joined with the author profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub media_urls: Vec<String>,
    #[serde(default, rename = "profiles")]
    pub author: Author,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl MessageRecord {
    pub fn with_reactions(self, reactions: Vec<ReactionSummary>) -> Message {
        Message {
            id: self.id,
            room_id: self.room_id,
            user_id: self.user_id,
            content: self.content,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            edited_at: self.edited_at,
            media_urls: self.media_urls,
            author: self.author,
            reactions,
        }
    }
}

/// A message as held by a room view: the record plus grouped reactions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub media_urls: Vec<String>,
    pub author: Author,
    pub reactions: Vec<ReactionSummary>,
}

impl Message {
    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    pub fn reaction(&self, emoji: &str) -> Option<&ReactionSummary> {
        self.reactions.iter().find(|r| r.emoji == emoji)
    }
}

// -- Reactions --

/// A raw per-user `message_reactions` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub viewer_reacted: bool,
}

// -- Rooms --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Presence shown for members whose profile carries no status.
pub const OFFLINE: &str = "offline";

/// A room member with their presence status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MemberRow")]
pub struct RoomMember {
    pub user_id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status: String,
}

impl RoomMember {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

/// `room_members` row with its `profiles` join.
#[derive(Debug, Deserialize)]
struct MemberRow {
    user_id: UserId,
    #[serde(default)]
    profiles: Option<MemberProfile>,
}

#[derive(Debug, Deserialize)]
struct MemberProfile {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl From<MemberRow> for RoomMember {
    fn from(row: MemberRow) -> Self {
        let profile = row.profiles.unwrap_or(MemberProfile {
            username: None,
            avatar_url: None,
            status: None,
        });
        Self {
            user_id: row.user_id,
            username: profile.username.unwrap_or_default(),
            avatar_url: profile.avatar_url,
            status: profile.status.unwrap_or_else(|| OFFLINE.to_string()),
        }
    }
}

// -- Typing --

/// A `typing_indicators` row joined with the typist's username.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingRecord {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(default, rename = "profiles")]
    pub author: Author,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingUser {
    pub user_id: UserId,
    pub username: String,
}

impl From<TypingRecord> for TypingUser {
    fn from(record: TypingRecord) -> Self {
        Self {
            user_id: record.user_id,
            username: record.author.username,
        }
    }
}

// -- Notifications --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// -- Identity --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(profiles: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "m-1",
            "room_id": "00000000-0000-0000-0000-000000000001",
            "user_id": "00000000-0000-0000-0000-0000000000aa",
            "content": "hi",
            "is_deleted": false,
            "created_at": "2025-03-01T10:00:00.000000+00:00",
            "edited_at": null,
            "media_urls": null,
            "profiles": profiles,
        })
    }

    #[test]
    fn profile_join_as_object() {
        let record: MessageRecord =
            serde_json::from_value(row(json!({ "username": "ali", "avatar_url": "https://a/x.png" }))).unwrap();
        assert_eq!(record.author.username, "ali");
        assert_eq!(record.author.avatar_url.as_deref(), Some("https://a/x.png"));
        assert!(record.media_urls.is_empty());
    }

    #[test]
    fn profile_join_as_list() {
        let record: MessageRecord =
            serde_json::from_value(row(json!([{ "username": "ahmed", "avatar_url": null }]))).unwrap();
        assert_eq!(record.author.username, "ahmed");
        assert_eq!(record.author.avatar_url, None);
    }

    #[test]
    fn profile_join_missing() {
        let record: MessageRecord = serde_json::from_value(row(json!(null))).unwrap();
        assert_eq!(record.author, Author::default());

        let record: MessageRecord = serde_json::from_value(row(json!([]))).unwrap();
        assert_eq!(record.author, Author::default());
    }

    #[test]
    fn temporary_ids() {
        let temp = MessageId::temporary();
        assert!(temp.is_temporary());
        assert!(temp.as_str().starts_with("temp-"));
        assert_ne!(temp, MessageId::temporary());
        assert!(!MessageId::from("m-42").is_temporary());
    }

    #[test]
    fn notification_type_field() {
        let n: Notification = serde_json::from_value(json!({
            "id": "n-1",
            "user_id": "00000000-0000-0000-0000-0000000000aa",
            "type": "new_message",
            "created_at": "2025-03-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(n.kind, "new_message");
        assert!(!n.is_read);
    }

    #[test]
    fn member_defaults_to_offline() {
        let member: RoomMember = serde_json::from_value(json!({
            "user_id": "00000000-0000-0000-0000-0000000000aa",
            "profiles": { "id": "00000000-0000-0000-0000-0000000000aa", "username": "ali", "avatar_url": null, "status": null },
        }))
        .unwrap();
        assert_eq!(member.username, "ali");
        assert_eq!(member.status, OFFLINE);
        assert!(!member.is_online());

        let member: RoomMember = serde_json::from_value(json!({
            "user_id": "00000000-0000-0000-0000-0000000000bb",
            "profiles": { "username": "bo", "status": "online" },
        }))
        .unwrap();
        assert!(member.is_online());
    }
}
