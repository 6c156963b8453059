use thiserror::Error;

use murmur_platform::PlatformError;
use murmur_types::MessageId;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("message cannot be empty")]
    EmptyMessage,

    #[error("room name cannot be empty")]
    EmptyRoomName,

    #[error("you must be signed in")]
    Unauthenticated,

    /// The message has not been confirmed by the platform yet.
    #[error("message {0} is still being sent")]
    Pending(MessageId),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}
