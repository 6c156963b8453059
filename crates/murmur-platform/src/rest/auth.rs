use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use murmur_types::api::{Credentials, SignUp};
use murmur_types::models::{Session, UserId};

use super::HttpPlatform;
use crate::error::{PlatformError, Result};

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: UserId,
    #[serde(default)]
    email: Option<String>,
}

/// Token grant response. Sign-up without auto-confirm returns only the user.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
    #[serde(default)]
    id: Option<UserId>,
}

impl AuthResponse {
    fn into_session(self, fallback_email: &str) -> Result<Session> {
        let (user_id, email) = match (self.user, self.id) {
            (Some(user), _) => (user.id, user.email),
            (None, Some(id)) => (id, None),
            (None, None) => return Err(PlatformError::Auth("response carried no user".into())),
        };
        Ok(Session {
            user_id,
            email: email.unwrap_or_else(|| fallback_email.to_string()),
            access_token: self.access_token,
        })
    }
}

impl HttpPlatform {
    pub(super) async fn auth_sign_up(&self, request: &SignUp) -> Result<Session> {
        let body = json!({
            "email": request.email,
            "password": request.password,
            "data": { "username": request.username },
        });
        let resp = self
            .request(Method::POST, "auth/v1/signup")
            .json(&body)
            .send()
            .await?;
        let session = Self::check(resp)
            .await?
            .json::<AuthResponse>()
            .await?
            .into_session(&request.email)?;

        if session.access_token.is_some() {
            self.set_session(Some(session.clone()))?;
        } else {
            info!("Sign-up for {} awaits email confirmation", request.email);
        }

        // The profile row is created by the client, not by an auth trigger
        let profile = json!({
            "id": session.user_id,
            "username": request.username,
            "status": "online",
        });
        let resp = self
            .request(Method::POST, "rest/v1/profiles")
            .header("Prefer", "return=minimal")
            .json(&profile)
            .send()
            .await?;
        if let Err(e) = Self::check(resp).await {
            warn!("Profile creation for {} failed: {}", session.user_id, e);
            return Err(e);
        }

        info!("Registered {} ({})", request.username, session.user_id);
        Ok(session)
    }

    pub(super) async fn auth_sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let resp = self
            .request(Method::POST, "auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(credentials)
            .send()
            .await?;
        let resp = match Self::check(resp).await {
            Ok(resp) => resp,
            Err(PlatformError::Api { status: 400, message, .. }) => return Err(PlatformError::Auth(message)),
            Err(e) => return Err(e),
        };
        let session = resp.json::<AuthResponse>().await?.into_session(&credentials.email)?;
        if session.access_token.is_none() {
            return Err(PlatformError::Auth("token grant returned no access token".into()));
        }

        self.set_session(Some(session.clone()))?;
        info!("Signed in as {}", session.user_id);
        Ok(session)
    }

    pub(super) async fn auth_sign_out(&self) -> Result<()> {
        if self.current_session()?.is_none() {
            return Ok(());
        }
        let resp = self.request(Method::POST, "auth/v1/logout").send().await?;
        // The local session is dropped even if the platform refused
        let outcome = Self::check(resp).await.map(|_| ());
        self.set_session(None)?;
        outcome
    }
}
