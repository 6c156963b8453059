//! Client-side synchronization for chat rooms backed by a hosted platform.
//!
//! The centre is [`RoomSync`]: it keeps a room's [`MessageView`] current by
//! merging optimistic local inserts, periodic refetches and pushed row
//! changes. Around it sit the [`Composer`], the [`TypingWatcher`] and
//! [`MemberWatcher`], the room directory, message search and notifications.

mod changes;
pub mod composer;
pub mod config;
pub mod error;
pub mod members;
pub mod notifications;
pub mod reactions;
pub mod room;
pub mod rooms;
pub mod search;
pub mod typing;
pub mod view;

pub use composer::Composer;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use members::{MemberWatcher, member_summary};
pub use notifications::{NotificationStream, mark_read, unread_notifications};
pub use reactions::group_reactions;
pub use room::{RoomHandle, RoomSync};
pub use rooms::{create_room, enter_room, list_rooms};
pub use search::search_messages;
pub use typing::{TypingWatcher, typing_label};
pub use view::{MessageView, Reconciled};
