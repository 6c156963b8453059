//! The room directory: listing, creating and entering rooms.

use murmur_platform::Platform;
use murmur_types::api::{Membership, NewRoom};
use murmur_types::models::{Room, RoomId, UserId};
use tracing::{info, warn};

use crate::error::{Result, SyncError};

/// All rooms, newest first.
pub async fn list_rooms(platform: &dyn Platform) -> Result<Vec<Room>> {
    Ok(platform.list_rooms().await?)
}

/// Create a room owned by the signed-in user.
pub async fn create_room(platform: &dyn Platform, name: &str, description: Option<&str>) -> Result<Room> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::EmptyRoomName);
    }
    let session = platform.session().await?.ok_or(SyncError::Unauthenticated)?;

    let room = platform
        .create_room(&NewRoom {
            name: name.to_string(),
            description: description.map(str::to_string),
            created_by: session.user_id,
        })
        .await?;
    info!("Created room {} ({})", room.name, room.id);
    Ok(room)
}

/// Look up a room and make `viewer` a member of it. A failed join is logged
/// and the room is still returned; a missing room is an error.
pub async fn enter_room(platform: &dyn Platform, room_id: RoomId, viewer: Option<UserId>) -> Result<Room> {
    let room = platform.get_room(room_id).await?;
    if let Some(user_id) = viewer {
        if let Err(e) = platform.join_room(&Membership { room_id, user_id }).await {
            warn!("Failed to join room {}: {}", room_id, e);
        }
    }
    Ok(room)
}
