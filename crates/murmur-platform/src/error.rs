use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Failures reported by a platform adapter.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The requested row is not (yet) visible.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation needs a signed-in session.
    #[error("not signed in")]
    Unauthenticated,

    /// Sign-up or sign-in was refused.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller passed something the platform will never accept.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The platform answered with an error status.
    #[error("platform error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("realtime error: {0}")]
    Realtime(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Embedded store or blob storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<anyhow::Error> for PlatformError {
    fn from(e: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", e))
    }
}

impl From<std::io::Error> for PlatformError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
