use murmur_platform::Platform;
use murmur_types::models::{MessageRecord, RoomId};

use crate::error::Result;

pub const SEARCH_LIMIT: usize = 10;

/// Messages of `room_id` containing `query`, ignoring case. A blank query
/// matches nothing and never reaches the platform.
pub async fn search_messages(platform: &dyn Platform, room_id: RoomId, query: &str) -> Result<Vec<MessageRecord>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(platform.search_messages(room_id, query, SEARCH_LIMIT).await?)
}
