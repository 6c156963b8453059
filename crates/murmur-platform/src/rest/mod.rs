//! Client for a hosted PostgREST-style platform.

mod auth;
pub mod query;
pub mod realtime;
mod storage;

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use murmur_types::api::{
    Credentials, Membership, MessagePatch, NewMessage, NewReaction, NewRoom, SignUp, TypingUpsert,
};
use murmur_types::events::ChangeFilter;
use murmur_types::models::{
    MessageId, MessageRecord, Notification, Profile, ReactionRow, Room, RoomId, RoomMember, Session,
    TypingRecord, UserId,
};

use crate::config::RemoteConfig;
use crate::error::{PlatformError, Result};
use crate::platform::Platform;
use crate::subscription::Subscription;

use query::{MEMBER_SELECT, MESSAGE_SELECT, Query};
use realtime::RealtimeClient;

/// Single-row reads ask for an object instead of an array.
const OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";

/// PostgREST code for "no (or more than one) row for a single-object read".
const NO_SINGLE_ROW: &str = "PGRST116";

pub struct HttpPlatform {
    client: Client,
    /// Base URL without a trailing slash
    base: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    realtime: RealtimeClient,
}

/// Error body of REST and auth responses. The two services name fields
/// differently.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl HttpPlatform {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| PlatformError::Invalid(format!("bad platform url {}: {}", config.url, e)))?;
        let realtime = RealtimeClient::new(realtime::websocket_url(&url, &config.anon_key)?);
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            session: RwLock::new(None),
            realtime,
        })
    }

    fn current_session(&self) -> Result<Option<Session>> {
        let session = self
            .session
            .read()
            .map_err(|_| PlatformError::Storage("session lock poisoned".into()))?;
        Ok(session.clone())
    }

    fn set_session(&self, session: Option<Session>) -> Result<()> {
        let mut slot = self
            .session
            .write()
            .map_err(|_| PlatformError::Storage("session lock poisoned".into()))?;
        *slot = session;
        Ok(())
    }

    fn access_token(&self) -> Option<String> {
        self.current_session().ok().flatten().and_then(|s| s.access_token)
    }

    fn require_session(&self) -> Result<Session> {
        self.current_session()?
            .filter(|s| s.access_token.is_some())
            .ok_or(PlatformError::Unauthenticated)
    }

    /// Request against `path` with the api key and the best bearer available.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self.access_token().unwrap_or_else(|| self.anon_key.clone());
        self.client
            .request(method, format!("{}/{}", self.base, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    fn table(&self, method: Method, table: &str, query: &Query) -> RequestBuilder {
        self.request(method, &format!("rest/v1/{}", table))
            .query(query.params())
    }

    /// Pass successful responses through; turn the rest into errors.
    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .message
            .or(body.msg)
            .or(body.error_description)
            .unwrap_or_else(|| text.clone());

        if status == StatusCode::NOT_ACCEPTABLE || body.code.as_deref() == Some(NO_SINGLE_ROW) {
            return Err(PlatformError::NotFound(message));
        }
        Err(PlatformError::Api {
            status: status.as_u16(),
            code: body.code,
            message,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, table: &str, query: &Query) -> Result<T> {
        let resp = self.table(Method::GET, table, query).send().await?;
        Ok(Self::check(resp).await?.json::<T>().await?)
    }

    async fn fetch_one<T: DeserializeOwned>(&self, table: &str, query: &Query) -> Result<T> {
        let resp = self
            .table(Method::GET, table, query)
            .header("Accept", OBJECT_MEDIA_TYPE)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json::<T>().await?)
    }

    async fn write<B: serde::Serialize + ?Sized>(&self, method: Method, table: &str, query: &Query, body: Option<&B>) -> Result<()> {
        let mut req = self
            .table(method, table, query)
            .header("Prefer", "return=minimal");
        if let Some(body) = body {
            req = req.json(body);
        }
        Self::check(req.send().await?).await?;
        Ok(())
    }

    /// Insert one row and read it back as the platform stored it.
    async fn insert_returning<B, T>(&self, table: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .table(Method::POST, table, &Query::new().select("*"))
            .header("Prefer", "return=representation")
            .header("Accept", OBJECT_MEDIA_TYPE)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json::<T>().await?)
    }

    /// Insert on the `conflict` key; `resolution` is `merge-duplicates` or
    /// `ignore-duplicates`.
    async fn upsert<B: serde::Serialize + ?Sized>(&self, table: &str, conflict: &str, resolution: &str, body: &B) -> Result<()> {
        let resp = self
            .table(Method::POST, table, &Query::new().on_conflict(conflict))
            .header("Prefer", format!("resolution={},return=minimal", resolution))
            .json(body)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn session(&self) -> Result<Option<Session>> {
        self.current_session()
    }

    async fn sign_up(&self, request: &SignUp) -> Result<Session> {
        self.auth_sign_up(request).await
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        self.auth_sign_in(credentials).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.auth_sign_out().await
    }

    async fn profile(&self, user_id: UserId) -> Result<Profile> {
        let query = Query::new().select("id, username, avatar_url").eq("id", user_id);
        self.fetch_one("profiles", &query).await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        let query = Query::new().select("*").order("created_at", false);
        self.fetch("rooms", &query).await
    }

    async fn get_room(&self, id: RoomId) -> Result<Room> {
        let query = Query::new().select("*").eq("id", id);
        self.fetch_one("rooms", &query).await
    }

    async fn create_room(&self, room: &NewRoom) -> Result<Room> {
        self.require_session()?;
        if room.name.trim().is_empty() {
            return Err(PlatformError::Invalid("room name is empty".into()));
        }
        let room: Room = self.insert_returning("rooms", room).await?;
        debug!("Created room {} ({})", room.name, room.id);
        Ok(room)
    }

    async fn join_room(&self, membership: &Membership) -> Result<()> {
        self.require_session()?;
        self.upsert("room_members", "room_id,user_id", "ignore-duplicates", membership).await
    }

    async fn room_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>> {
        let query = Query::new().select(MEMBER_SELECT).eq("room_id", room_id);
        self.fetch("room_members", &query).await
    }

    async fn list_messages(&self, room_id: RoomId) -> Result<Vec<MessageRecord>> {
        let query = Query::new()
            .select(MESSAGE_SELECT)
            .eq("room_id", room_id)
            .eq("is_deleted", false)
            .order("created_at", true);
        self.fetch("messages", &query).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<MessageRecord> {
        let query = Query::new().select(MESSAGE_SELECT).eq("id", id);
        self.fetch_one("messages", &query).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        self.require_session()?;
        self.write(Method::POST, "messages", &Query::new(), Some(message)).await?;
        debug!("Inserted message into room {}", message.room_id);
        Ok(())
    }

    async fn update_message(&self, id: &MessageId, patch: &MessagePatch) -> Result<()> {
        self.require_session()?;
        self.write(Method::PATCH, "messages", &Query::new().eq("id", id), Some(patch)).await
    }

    async fn search_messages(&self, room_id: RoomId, needle: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let query = Query::new()
            .select(MESSAGE_SELECT)
            .eq("room_id", room_id)
            .eq("is_deleted", false)
            .ilike_contains("content", needle)
            .order("created_at", true)
            .limit(limit);
        self.fetch("messages", &query).await
    }

    async fn reactions(&self, message_id: &MessageId) -> Result<Vec<ReactionRow>> {
        let query = Query::new().select("*").eq("message_id", message_id);
        self.fetch("message_reactions", &query).await
    }

    async fn find_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<Option<ReactionRow>> {
        let query = Query::new()
            .select("*")
            .eq("message_id", message_id)
            .eq("user_id", user_id)
            .eq("emoji", emoji)
            .limit(1);
        let rows: Vec<ReactionRow> = self.fetch("message_reactions", &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_reaction(&self, reaction: &NewReaction) -> Result<()> {
        self.require_session()?;
        self.write(Method::POST, "message_reactions", &Query::new(), Some(reaction)).await
    }

    async fn delete_reaction(&self, message_id: &MessageId, user_id: UserId, emoji: &str) -> Result<()> {
        self.require_session()?;
        let query = Query::new()
            .eq("message_id", message_id)
            .eq("user_id", user_id)
            .eq("emoji", emoji);
        self.write::<()>(Method::DELETE, "message_reactions", &query, None).await
    }

    async fn upsert_typing(&self, typing: &TypingUpsert) -> Result<()> {
        self.require_session()?;
        self.upsert("typing_indicators", "room_id,user_id", "merge-duplicates", typing).await
    }

    async fn delete_typing(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        let query = Query::new().eq("room_id", room_id).eq("user_id", user_id);
        self.write::<()>(Method::DELETE, "typing_indicators", &query, None).await
    }

    async fn typing(&self, room_id: RoomId) -> Result<Vec<TypingRecord>> {
        let query = Query::new()
            .select("room_id, user_id, profiles(username)")
            .eq("room_id", room_id);
        self.fetch("typing_indicators", &query).await
    }

    async fn unread_notifications(&self, user_id: UserId, limit: usize) -> Result<Vec<Notification>> {
        let query = Query::new()
            .select("*")
            .eq("user_id", user_id)
            .eq("is_read", false)
            .order("created_at", false)
            .limit(limit);
        self.fetch("notifications", &query).await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        self.require_session()?;
        let body = serde_json::json!({ "is_read": true });
        self.write(Method::PATCH, "notifications", &Query::new().eq("id", id), Some(&body)).await
    }

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.require_session()?;
        self.storage_upload(bucket, path, bytes, content_type).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.storage_public_url(bucket, path)
    }

    async fn subscribe(&self, topic: &str, filters: Vec<ChangeFilter>) -> Result<Subscription> {
        if filters.is_empty() {
            return Err(PlatformError::Invalid("subscription needs at least one filter".into()));
        }
        self.realtime.subscribe(topic, filters, self.access_token()).await
    }
}
