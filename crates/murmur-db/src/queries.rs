use crate::models::{MemberRow, MessageRow, NotificationRow, ProfileRow, ReactionRow, RoomRow, TypingRow};
use crate::{Database, now_text};
use anyhow::Result;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "m.id, m.room_id, m.user_id, p.username, p.avatar_url, m.content, m.is_deleted, m.media_urls, m.created_at, m.edited_at";

/// Fields of a message update; `None` leaves the column alone.
#[derive(Default)]
pub struct MessageUpdate<'a> {
    pub content: Option<&'a str>,
    pub edited_at: Option<&'a str>,
    pub is_deleted: Option<bool>,
}

impl Database {
    // -- Profiles --

    pub fn create_profile(
        &self,
        id: &str,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, email, username, password, status, created_at) VALUES (?1, ?2, ?3, ?4, 'online', ?5)",
                (id, email, username, password_hash, now_text()),
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "id", id))
    }

    pub fn get_profile_by_email(&self, email: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "email", email))
    }

    pub fn get_profile_by_username(&self, username: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "username", username))
    }

    // -- Rooms --

    pub fn create_room(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<RoomRow> {
        self.with_conn(|conn| {
            let created_at = now_text();
            conn.execute(
                "INSERT INTO rooms (id, name, description, created_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, name, description, created_by, created_at],
            )?;
            Ok(RoomRow {
                id: id.to_string(),
                name: name.to_string(),
                description: description.map(str::to_string),
                created_by: created_by.map(str::to_string),
                created_at,
            })
        })
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, created_by, created_at FROM rooms WHERE id = ?1",
                [id],
                room_from_row,
            )
            .optional()
        })
    }

    /// All rooms, newest first.
    pub fn get_rooms(&self) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, created_by, created_at
                 FROM rooms ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([], room_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns true when the user was not a member yet.
    pub fn add_room_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                (room_id, user_id, now_text()),
            )?;
            Ok(changed > 0)
        })
    }

    /// Members of a room with their profiles, in joining order.
    pub fn get_room_members(&self, room_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT rm.room_id, rm.user_id, p.username, p.avatar_url, p.status, rm.joined_at
                 FROM room_members rm
                 INNER JOIN profiles p ON rm.user_id = p.id
                 WHERE rm.room_id = ?1
                 ORDER BY rm.joined_at ASC, rm.rowid ASC",
            )?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(MemberRow {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        avatar_url: row.get(3)?,
                        status: row.get(4)?,
                        joined_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        user_id: &str,
        content: &str,
        media_urls: &[String],
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, user_id, content, media_urls, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, room_id, user_id, content, media_urls.join("\n"), now_text()),
            )?;
            query_message(conn, id)?.ok_or_else(|| anyhow::anyhow!("Message vanished after insert: {}", id))
        })
    }

    /// Non-deleted messages of a room, oldest first.
    pub fn get_messages(&self, room_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 LEFT JOIN profiles p ON m.user_id = p.id
                 WHERE m.room_id = ?1 AND m.is_deleted = 0
                 ORDER BY m.created_at ASC, m.rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([room_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Apply an update and return the row as it is afterwards, or `None` when
    /// no message has that id.
    pub fn update_message(&self, id: &str, update: &MessageUpdate<'_>) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET
                    content = COALESCE(?2, content),
                    edited_at = COALESCE(?3, edited_at),
                    is_deleted = COALESCE(?4, is_deleted)
                 WHERE id = ?1",
                rusqlite::params![id, update.content, update.edited_at, update.is_deleted],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_message(conn, id)
        })
    }

    /// Case-insensitive substring match over non-deleted messages of a room.
    pub fn search_messages(&self, room_id: &str, needle: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 LEFT JOIN profiles p ON m.user_id = p.id
                 WHERE m.room_id = ?1 AND m.is_deleted = 0
                   AND m.content LIKE ?2 ESCAPE '\\'
                 ORDER BY m.created_at ASC
                 LIMIT ?3"
            );
            let pattern = format!("%{}%", escape_like(needle));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![room_id, pattern, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    pub fn get_reactions(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM message_reactions WHERE message_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([message_id], reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn find_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<Option<ReactionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, user_id, emoji],
                reaction_from_row,
            )
            .optional()
        })
    }

    pub fn insert_reaction(&self, id: &str, message_id: &str, user_id: &str, emoji: &str) -> Result<ReactionRow> {
        self.with_conn(|conn| {
            let created_at = now_text();
            conn.execute(
                "INSERT INTO message_reactions (id, message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, message_id, user_id, emoji, created_at],
            )?;
            Ok(ReactionRow {
                id: id.to_string(),
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
                emoji: emoji.to_string(),
                created_at,
            })
        })
    }

    /// Delete matching reactions and return what was removed.
    pub fn delete_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            )?;
            let removed = stmt
                .query_map(rusqlite::params![message_id, user_id, emoji], reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, user_id, emoji],
            )?;
            Ok(removed)
        })
    }

    // -- Typing --

    /// Insert or refresh a typing row. Returns true when the row is new.
    pub fn upsert_typing(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let existed: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM typing_indicators WHERE room_id = ?1 AND user_id = ?2",
                    [room_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            conn.execute(
                "INSERT INTO typing_indicators (room_id, user_id, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(room_id, user_id) DO UPDATE SET updated_at = excluded.updated_at",
                (room_id, user_id, now_text()),
            )?;
            Ok(existed.is_none())
        })
    }

    /// Returns true when a row was removed.
    pub fn delete_typing(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM typing_indicators WHERE room_id = ?1 AND user_id = ?2",
                [room_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_typing(&self, room_id: &str) -> Result<Vec<TypingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.room_id, t.user_id, p.username, t.updated_at
                 FROM typing_indicators t
                 LEFT JOIN profiles p ON t.user_id = p.id
                 WHERE t.room_id = ?1
                 ORDER BY t.updated_at ASC",
            )?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(TypingRow {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        id: &str,
        user_id: &str,
        kind: &str,
        message: Option<&str>,
    ) -> Result<NotificationRow> {
        self.with_conn(|conn| {
            let created_at = now_text();
            conn.execute(
                "INSERT INTO notifications (id, user_id, type, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, user_id, kind, message, created_at],
            )?;
            Ok(NotificationRow {
                id: id.to_string(),
                user_id: user_id.to_string(),
                kind: kind.to_string(),
                message: message.map(str::to_string),
                is_read: false,
                created_at,
            })
        })
    }

    /// Unread notifications of a user, newest first.
    pub fn get_unread_notifications(&self, user_id: &str, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, type, message, is_read, created_at
                 FROM notifications WHERE user_id = ?1 AND is_read = 0
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark a notification read and return it, or `None` for an unknown id.
    pub fn mark_notification_read(&self, id: &str) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])?;
            if changed == 0 {
                return Ok(None);
            }
            conn.query_row(
                "SELECT id, user_id, type, message, is_read, created_at FROM notifications WHERE id = ?1",
                [id],
                notification_from_row,
            )
            .optional()
        })
    }
}

fn query_profile(conn: &Connection, column: &str, value: &str) -> Result<Option<ProfileRow>> {
    // `column` is always one of our own literals, never caller input.
    let sql = format!(
        "SELECT id, email, username, password, avatar_url, status, created_at FROM profiles WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(ProfileRow {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            password: row.get(3)?,
            avatar_url: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
        })
    })
    .optional()
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         LEFT JOIN profiles p ON m.user_id = p.id
         WHERE m.id = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([id], message_from_row).optional()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        avatar_url: row.get(4)?,
        content: row.get(5)?,
        is_deleted: row.get(6)?,
        media_urls: row.get(7)?,
        created_at: row.get(8)?,
        edited_at: row.get(9)?,
    })
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        message: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        emoji: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
