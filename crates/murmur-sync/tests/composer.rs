mod common;

use std::time::Duration;

use murmur_platform::Platform;
use murmur_sync::composer::{MEDIA_BUCKET, MEDIA_PLACEHOLDER};
use murmur_sync::{Composer, NotificationStream, RoomSync, SyncError, TypingWatcher, search_messages, typing_label};
use murmur_types::api::{NewMessage, TypingUpsert};

use common::{Instrumented, eventually, fast_config, sign_up};

#[tokio::test]
async fn send_shows_the_message_then_confirms_it() {
    let platform = Instrumented::new();
    let me = sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();
    let sync = RoomSync::attach(platform.clone(), room, Some(me.user_id), fast_config())
        .await
        .unwrap();
    let handle = sync.handle();
    let mut composer = Composer::new(platform.clone(), handle.clone(), fast_config());

    let sent = composer.send("hello room").await.unwrap();
    assert!(sent.is_temporary());
    assert_eq!(sent.author.username, "alice");

    assert!(eventually(|| {
        let messages = handle.messages();
        messages.len() == 1 && !messages[0].is_temporary() && messages[0].content == "hello room"
    })
    .await);

    sync.detach().await;
}

#[tokio::test]
async fn send_rejects_empty_and_signed_out() {
    let platform = Instrumented::new();
    let me = sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();
    let sync = RoomSync::attach(platform.clone(), room, Some(me.user_id), fast_config())
        .await
        .unwrap();
    let mut composer = Composer::new(platform.clone(), sync.handle(), fast_config());

    assert!(matches!(composer.send("  \n").await, Err(SyncError::EmptyMessage)));

    platform.sign_out().await.unwrap();
    assert!(matches!(composer.send("hi").await, Err(SyncError::Unauthenticated)));

    assert_eq!(Instrumented::count(&platform.mutations), 0);
    assert!(sync.handle().messages().is_empty());

    sync.detach().await;
}

#[tokio::test]
async fn attached_media_goes_out_with_the_next_message() {
    let platform = Instrumented::new();
    let me = sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();
    let sync = RoomSync::attach(platform.clone(), room, Some(me.user_id), fast_config())
        .await
        .unwrap();
    let mut composer = Composer::new(platform.clone(), sync.handle(), fast_config());

    assert_eq!(composer.suggested_body(""), None);
    let url = composer
        .attach_media("cat.png", vec![0x89, 0x50], "image/png")
        .await
        .unwrap();
    assert!(url.starts_with(&format!("memory://{}/{}/", MEDIA_BUCKET, room)));
    assert!(url.ends_with("-cat.png"));
    assert_eq!(composer.suggested_body(""), Some(MEDIA_PLACEHOLDER));
    assert_eq!(composer.suggested_body("look"), None);

    composer.send(MEDIA_PLACEHOLDER).await.unwrap();
    assert!(composer.pending_media().is_empty());

    let stored = platform.list_messages(room).await.unwrap();
    assert_eq!(stored[0].media_urls, vec![url]);

    sync.detach().await;
}

#[tokio::test]
async fn keystrokes_mark_typing_until_idle() {
    let platform = Instrumented::new();
    let me = sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();
    let sync = RoomSync::attach(platform.clone(), room, Some(me.user_id), fast_config())
        .await
        .unwrap();
    let mut composer = Composer::new(platform.clone(), sync.handle(), fast_config());

    composer.keystroke().await;
    assert_eq!(platform.typing(room).await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(platform.typing(room).await.unwrap().is_empty());

    // Sending clears the indicator right away
    composer.keystroke().await;
    composer.send("done").await.unwrap();
    assert!(platform.typing(room).await.unwrap().is_empty());

    sync.detach().await;
}

#[tokio::test]
async fn typing_watcher_lists_other_users() {
    let platform = Instrumented::new();
    let bob = sign_up(platform.as_ref(), "bob").await;
    let alice = sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();

    let watcher = TypingWatcher::start(platform.clone(), room, Some(alice.user_id), &fast_config())
        .await
        .unwrap();
    assert!(watcher.typing().is_empty());

    for user in [bob.user_id, alice.user_id] {
        platform
            .upsert_typing(&TypingUpsert { room_id: room, user_id: user })
            .await
            .unwrap();
    }
    assert!(eventually(|| watcher.typing() == vec!["bob".to_string()]).await);
    assert_eq!(typing_label(&watcher.typing()).as_deref(), Some("bob is typing"));

    platform.delete_typing(room, bob.user_id).await.unwrap();
    assert!(eventually(|| watcher.typing().is_empty()).await);

    watcher.stop().await;
}

#[tokio::test]
async fn blank_search_never_reaches_the_platform() {
    let platform = Instrumented::new();
    let me = sign_up(platform.as_ref(), "alice").await;
    let room = platform.local.seed_room("general").unwrap();

    assert!(search_messages(platform.as_ref(), room, "   ").await.unwrap().is_empty());
    assert_eq!(Instrumented::count(&platform.searches), 0);

    for i in 0..12 {
        platform
            .insert_message(&NewMessage::new(room, me.user_id, format!("Hello #{}", i)))
            .await
            .unwrap();
    }
    platform.insert_message(&NewMessage::new(room, me.user_id, "bye")).await.unwrap();

    let hits = search_messages(platform.as_ref(), room, "hello").await.unwrap();
    assert_eq!(hits.len(), 10);
    assert!(hits.iter().all(|m| m.content.starts_with("Hello")));
    assert_eq!(Instrumented::count(&platform.searches), 1);
}

#[tokio::test]
async fn notifications_reach_only_their_user() {
    let platform = Instrumented::new();
    let bob = sign_up(platform.as_ref(), "bob").await;
    let alice = sign_up(platform.as_ref(), "alice").await;

    let mut stream = NotificationStream::subscribe(platform.as_ref(), alice.user_id)
        .await
        .unwrap();

    platform.local.notify(bob.user_id, "mention", Some("for bob")).unwrap();
    platform.local.notify(alice.user_id, "message", Some("for alice")).unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.user_id, alice.user_id);
    assert_eq!(received.kind, "message");
    assert_eq!(received.message.as_deref(), Some("for alice"));
}
