mod commands;

use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use murmur_platform::{Platform, PlatformConfig};
use murmur_sync::{
    Composer, MemberWatcher, NotificationStream, RoomSync, SyncConfig, TypingWatcher, member_summary,
    typing_label,
};
use murmur_types::api::{Credentials, SignUp};
use murmur_types::models::Session;

use commands::Command;

/// Room created by the embedded platform's first migration.
const DEFAULT_ROOM: &str = "00000000-0000-0000-0000-000000000001";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug".into()),
        )
        .init();

    // Config
    let platform_config = PlatformConfig::from_env()?;
    let sync_config = SyncConfig::from_env();
    let room_id: Uuid = std::env::var("MURMUR_ROOM_ID")
        .unwrap_or_else(|_| DEFAULT_ROOM.into())
        .parse()
        .context("MURMUR_ROOM_ID is not a uuid")?;

    let platform = murmur_platform::connect(&platform_config)?;
    let session = authenticate(platform.as_ref()).await?;
    if let Some(session) = &session {
        info!("Signed in as {}", session.email);
    } else {
        warn!("No credentials given, following room {} read-only", room_id);
    }
    let viewer = session.as_ref().map(|s| s.user_id);

    let entered = murmur_sync::enter_room(platform.as_ref(), room_id, viewer).await?;
    info!("Entering #{}", entered.name);

    let sync = RoomSync::attach(platform.clone(), room_id, viewer, sync_config.clone()).await?;
    let room = sync.handle();
    let typing = TypingWatcher::start(platform.clone(), room_id, viewer, &sync_config).await?;
    let members = MemberWatcher::start(platform.clone(), room_id, &sync_config).await?;
    let mut composer = Composer::new(platform.clone(), room.clone(), sync_config);

    // Log every view change
    let mut snapshots = room.watch();
    let view_log = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let messages = snapshots.borrow_and_update().clone();
            match messages.last() {
                Some(last) => info!(
                    "{} messages, latest from {}: {}",
                    messages.len(),
                    last.author.username,
                    last.content
                ),
                None => info!("Room is empty"),
            }
        }
    });

    let mut typing_names = typing.watch();
    let typing_log = tokio::spawn(async move {
        while typing_names.changed().await.is_ok() {
            let names = typing_names.borrow_and_update().clone();
            if let Some(label) = typing_label(&names) {
                info!("{}", label);
            }
        }
    });

    let mut member_list = members.watch();
    let member_log = tokio::spawn(async move {
        while member_list.changed().await.is_ok() {
            let list = member_list.borrow_and_update().clone();
            info!("{}", member_summary(&list));
        }
    });

    let notification_log = match viewer {
        Some(user_id) => {
            let unread = murmur_sync::unread_notifications(platform.as_ref(), user_id).await?;
            if !unread.is_empty() {
                info!("{} unread notifications, /unread to list them", unread.len());
            }
            let mut stream = NotificationStream::subscribe(platform.as_ref(), user_id).await?;
            Some(tokio::spawn(async move {
                while let Some(notification) = stream.next().await {
                    info!(
                        "Notification ({}): {}",
                        notification.kind,
                        notification.message.unwrap_or_default()
                    );
                }
            }))
        }
        None => None,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = Command::parse(&line) else { continue };
                if let Err(e) = run(command, platform.as_ref(), &room, &members, &mut composer).await {
                    warn!("{}", e);
                }
            }
        }
    }

    info!("Shutting down");
    sync.detach().await;
    typing.stop().await;
    members.stop().await;
    view_log.abort();
    typing_log.abort();
    member_log.abort();
    if let Some(task) = notification_log {
        task.abort();
    }
    if session.is_some() {
        platform.sign_out().await?;
    }

    Ok(())
}

/// Sign up when `MURMUR_USERNAME` is set, otherwise sign in when
/// `MURMUR_EMAIL` and `MURMUR_PASSWORD` are.
async fn authenticate(platform: &dyn Platform) -> anyhow::Result<Option<Session>> {
    let (Ok(email), Ok(password)) = (std::env::var("MURMUR_EMAIL"), std::env::var("MURMUR_PASSWORD")) else {
        return Ok(None);
    };

    let session = match std::env::var("MURMUR_USERNAME") {
        Ok(username) => platform
            .sign_up(&SignUp { email, password, username })
            .await
            .context("sign-up failed")?,
        Err(_) => platform
            .sign_in(&Credentials { email, password })
            .await
            .context("sign-in failed")?,
    };
    Ok(Some(session))
}

async fn run(
    command: Command,
    platform: &dyn Platform,
    room: &murmur_sync::RoomHandle,
    members: &MemberWatcher,
    composer: &mut Composer,
) -> anyhow::Result<()> {
    match command {
        Command::Send(text) => {
            composer.send(&text).await?;
        }
        Command::Edit { id, content } => room.edit_message(&id, &content).await?,
        Command::Delete(id) => room.delete_message(&id).await?,
        Command::React { id, emoji } => room.toggle_reaction(&id, &emoji).await?,
        Command::Search(query) => {
            let hits = murmur_sync::search_messages(platform, room.room_id(), &query).await?;
            info!("{} matches for {:?}", hits.len(), query);
            for hit in hits {
                info!("  [{}] {}: {}", hit.id, hit.author.username, hit.content);
            }
        }
        Command::Attach(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("cannot read {}", path))?;
            let name = Path::new(&path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();
            let url = composer
                .attach_media(&name, bytes, commands::content_type(&name))
                .await?;
            info!("Attached {}", url);
            if let Some(body) = composer.suggested_body("") {
                info!("Send an empty line to post it as {:?}", body);
            }
        }
        Command::SendAttachment => {
            let body = composer.suggested_body("").unwrap_or_default();
            if !body.is_empty() {
                composer.send(body).await?;
            }
        }
        Command::List => {
            for message in room.messages() {
                info!("[{}] {}: {}", message.id, message.author.username, message.content);
            }
        }
        Command::Rooms => {
            for listed in murmur_sync::list_rooms(platform).await? {
                info!("  [{}] #{}", listed.id, listed.name);
            }
        }
        Command::NewRoom(name) => {
            let created = murmur_sync::create_room(platform, &name, None).await?;
            info!("Created #{} ({})", created.name, created.id);
        }
        Command::Members => {
            let list = members.members();
            info!("{}", member_summary(&list));
            for member in list {
                info!("  {} ({})", member.username, member.status);
            }
        }
        Command::Unread => {
            let Some(user_id) = room.viewer() else {
                warn!("Sign in to read notifications");
                return Ok(());
            };
            for notification in murmur_sync::unread_notifications(platform, user_id).await? {
                info!(
                    "  [{}] {}: {}",
                    notification.id,
                    notification.kind,
                    notification.message.unwrap_or_default()
                );
            }
        }
        Command::Read(id) => murmur_sync::mark_read(platform, &id).await?,
    }
    Ok(())
}
