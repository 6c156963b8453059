/// Database row types. These map directly to SQLite rows.
/// Distinct from murmur-types models to keep the DB layer independent.

pub struct ProfileRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

/// A room membership joined with the member's profile.
pub struct MemberRow {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub joined_at: String,
}

/// A message joined with its author's profile.
pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub content: String,
    pub is_deleted: bool,
    /// Newline-separated URLs, empty when nothing is attached.
    pub media_urls: String,
    pub created_at: String,
    pub edited_at: Option<String>,
}

impl MessageRow {
    pub fn media_list(&self) -> Vec<String> {
        self.media_urls
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

pub struct TypingRow {
    pub room_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub updated_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub message: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}
