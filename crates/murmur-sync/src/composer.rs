use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use murmur_platform::Platform;
use murmur_types::api::{NewMessage, TypingUpsert};
use murmur_types::models::{Author, Message, Session};
use murmur_types::MessageId;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::room::RoomHandle;

/// Bucket holding message attachments.
pub const MEDIA_BUCKET: &str = "message-media";

/// Body suggested when media is attached to an empty draft.
pub const MEDIA_PLACEHOLDER: &str = "📸 Image attached";

/// Shown for authors whose profile could not be loaded.
const UNKNOWN_AUTHOR: &str = "Unknown";

/// Sends messages into one room on behalf of the signed-in user.
pub struct Composer {
    platform: Arc<dyn Platform>,
    room: RoomHandle,
    config: SyncConfig,
    pending_media: Vec<String>,
    typing_idle: Option<JoinHandle<()>>,
}

impl Composer {
    pub fn new(platform: Arc<dyn Platform>, room: RoomHandle, config: SyncConfig) -> Self {
        Self {
            platform,
            room,
            config,
            pending_media: Vec::new(),
            typing_idle: None,
        }
    }

    /// Media URLs that will ride along with the next message.
    pub fn pending_media(&self) -> &[String] {
        &self.pending_media
    }

    /// Body to prefill when media is waiting and the draft is still empty.
    pub fn suggested_body(&self, draft: &str) -> Option<&'static str> {
        (draft.is_empty() && !self.pending_media.is_empty()).then_some(MEDIA_PLACEHOLDER)
    }

    async fn session(&self) -> Result<Session> {
        self.platform.session().await?.ok_or(SyncError::Unauthenticated)
    }

    /// Send `draft`. The message shows up in the room view immediately under
    /// a temporary id, which is swapped for the real one once the platform
    /// reports the insert. Returns the optimistic record.
    pub async fn send(&mut self, draft: &str) -> Result<Message> {
        if draft.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let session = self.session().await?;
        let room_id = self.room.room_id();

        let author = match self.platform.profile(session.user_id).await {
            Ok(profile) => Author {
                username: profile.username,
                avatar_url: profile.avatar_url,
            },
            Err(e) => {
                warn!("No profile for {}: {}", session.user_id, e);
                Author {
                    username: UNKNOWN_AUTHOR.to_string(),
                    avatar_url: None,
                }
            }
        };

        let optimistic = Message {
            id: MessageId::temporary(),
            room_id,
            user_id: session.user_id,
            content: draft.to_string(),
            is_deleted: false,
            created_at: Utc::now(),
            edited_at: None,
            media_urls: self.pending_media.clone(),
            author,
            reactions: Vec::new(),
        };
        self.room.apply_optimistic_insert(optimistic.clone());

        let mut message = NewMessage::new(room_id, session.user_id, draft);
        message.media_urls = self.pending_media.clone();
        if let Err(e) = self.platform.insert_message(&message).await {
            error!("Failed to send message to room {}: {}", room_id, e);
            return Err(e.into());
        }

        self.pending_media.clear();
        if let Some(timer) = self.typing_idle.take() {
            timer.abort();
        }
        if let Err(e) = self.platform.delete_typing(room_id, session.user_id).await {
            warn!("Failed to clear typing indicator: {}", e);
        }

        debug!("Sent {} to room {}", optimistic.id, room_id);
        Ok(optimistic)
    }

    /// Upload an attachment for the next message and return its public URL.
    pub async fn attach_media(&mut self, file_name: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.session().await?;
        let path = format!("{}/{}-{}", self.room.room_id(), Utc::now().timestamp_millis(), file_name);

        if let Err(e) = self.platform.upload(MEDIA_BUCKET, &path, bytes, content_type).await {
            error!("Failed to upload {}: {}", file_name, e);
            return Err(e.into());
        }

        let url = self.platform.public_url(MEDIA_BUCKET, &path);
        self.pending_media.push(url.clone());
        Ok(url)
    }

    /// Mark the user as typing and restart the idle timer that clears the
    /// indicator again. Does nothing when signed out.
    pub async fn keystroke(&mut self) {
        let Ok(Some(session)) = self.platform.session().await else {
            return;
        };
        let room_id = self.room.room_id();

        if let Some(timer) = self.typing_idle.take() {
            timer.abort();
        }

        let typing = TypingUpsert {
            room_id,
            user_id: session.user_id,
        };
        if let Err(e) = self.platform.upsert_typing(&typing).await {
            warn!("Failed to update typing indicator: {}", e);
        }

        let platform = self.platform.clone();
        let idle = self.config.typing_idle;
        self.typing_idle = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if let Err(e) = platform.delete_typing(room_id, session.user_id).await {
                warn!("Failed to clear typing indicator: {}", e);
            }
        }));
    }
}
