mod common;

use uuid::Uuid;

use murmur_platform::{Platform, PlatformError};
use murmur_sync::{
    MemberWatcher, SyncError, create_room, enter_room, list_rooms, mark_read, member_summary,
    unread_notifications,
};

use common::{Instrumented, eventually, fast_config, sign_up};

#[tokio::test]
async fn entering_a_room_joins_it_once() {
    let platform = Instrumented::new();
    let alice = sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();

    let watcher = MemberWatcher::start(platform.clone(), room, &fast_config()).await.unwrap();
    assert!(watcher.members().is_empty());

    let entered = enter_room(platform.as_ref(), room, Some(alice.user_id)).await.unwrap();
    assert_eq!(entered.name, "general");
    enter_room(platform.as_ref(), room, Some(alice.user_id)).await.unwrap();
    assert!(eventually(|| watcher.members().len() == 1).await);

    let bob = sign_up(platform.as_ref(), "bob").await;
    enter_room(platform.as_ref(), room, Some(bob.user_id)).await.unwrap();
    assert!(eventually(|| watcher.members().len() == 2).await);

    let members = watcher.members();
    let names: Vec<&str> = members.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(member_summary(&members), "Members (2), 2 online");

    watcher.stop().await;
}

#[tokio::test]
async fn entering_read_only_or_missing_rooms() {
    let platform = Instrumented::new();
    sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();

    let before = Instrumented::count(&platform.mutations);
    enter_room(platform.as_ref(), room, None).await.unwrap();
    assert_eq!(Instrumented::count(&platform.mutations), before);
    assert!(platform.room_members(room).await.unwrap().is_empty());

    let missing = enter_room(platform.as_ref(), Uuid::new_v4(), None).await;
    assert!(matches!(missing, Err(SyncError::Platform(PlatformError::NotFound(_)))));
}

#[tokio::test]
async fn rooms_are_created_by_the_signed_in_user() {
    let platform = Instrumented::new();
    let me = sign_up(platform.as_ref(), "alice").await;

    assert!(matches!(create_room(platform.as_ref(), "   ", None).await, Err(SyncError::EmptyRoomName)));

    let room = create_room(platform.as_ref(), " rust ", Some("crabs")).await.unwrap();
    assert_eq!(room.name, "rust");
    assert_eq!(room.created_by, Some(me.user_id));

    let rooms = list_rooms(platform.as_ref()).await.unwrap();
    assert_eq!(rooms[0].id, room.id);

    platform.sign_out().await.unwrap();
    let result = create_room(platform.as_ref(), "later", None).await;
    assert!(matches!(result, Err(SyncError::Unauthenticated)));
}

#[tokio::test]
async fn unread_notifications_shrink_when_read() {
    let platform = Instrumented::new();
    let me = sign_up(platform.as_ref(), "alice").await;

    for i in 0..12 {
        platform.local.notify(me.user_id, "mention", Some(&format!("n{}", i))).unwrap();
    }

    let unread = unread_notifications(platform.as_ref(), me.user_id).await.unwrap();
    assert_eq!(unread.len(), 10);
    assert_eq!(unread[0].message.as_deref(), Some("n11"));

    mark_read(platform.as_ref(), &unread[0].id).await.unwrap();
    let unread = unread_notifications(platform.as_ref(), me.user_id).await.unwrap();
    assert_eq!(unread[0].message.as_deref(), Some("n10"));
    assert!(unread.iter().all(|n| !n.is_read));
}
