use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MessageId, RoomId, UserId};

// -- Identity --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub username: String,
}

// -- Rooms --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRoom {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_by: UserId,
}

/// Upserted on the `(room_id, user_id)` conflict key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: UserId,
}

// -- Messages --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
}

impl NewMessage {
    pub fn new(room_id: RoomId, user_id: UserId, content: impl Into<String>) -> Self {
        Self {
            room_id,
            user_id,
            content: content.into(),
            is_deleted: false,
            media_urls: Vec::new(),
        }
    }
}

/// Partial update of a message row. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

impl MessagePatch {
    pub fn edit(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            content: Some(content.into()),
            edited_at: Some(at),
            is_deleted: None,
        }
    }

    pub fn soft_delete() -> Self {
        Self {
            is_deleted: Some(true),
            ..Self::default()
        }
    }
}

// -- Reactions --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

// -- Typing --

/// Upserted on the `(room_id, user_id)` conflict key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUpsert {
    pub room_id: RoomId,
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_sends_only_set_fields() {
        let delete = serde_json::to_value(MessagePatch::soft_delete()).unwrap();
        assert_eq!(delete, json!({ "is_deleted": true }));

        let at = "2025-03-01T10:00:00Z".parse().unwrap();
        let edit = serde_json::to_value(MessagePatch::edit("fixed", at)).unwrap();
        assert_eq!(edit["content"], "fixed");
        assert!(edit.get("is_deleted").is_none());
        assert!(edit.get("edited_at").is_some());
    }

    #[test]
    fn new_message_omits_empty_media() {
        let msg = NewMessage::new(RoomId::nil(), UserId::nil(), "hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("media_urls").is_none());
        assert_eq!(value["is_deleted"], false);
    }
}
