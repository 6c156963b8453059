use std::path::PathBuf;

use crate::error::{PlatformError, Result};

/// Which backend to talk to.
#[derive(Debug, Clone)]
pub enum PlatformConfig {
    Remote(RemoteConfig),
    Local(LocalConfig),
}

/// A hosted platform reached over HTTPS and websockets.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `https://xyz.example.co`
    pub url: String,
    /// Public (anon) API key sent with every request
    pub anon_key: String,
}

/// The embedded platform. No `db_path` means an in-memory database.
#[derive(Debug, Clone, Default)]
pub struct LocalConfig {
    pub db_path: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
}

impl PlatformConfig {
    /// Read from the environment. `MURMUR_PLATFORM_URL` selects the remote
    /// platform and then requires `MURMUR_ANON_KEY`; otherwise the embedded
    /// platform is used with `MURMUR_LOCAL_DB` and `MURMUR_STORAGE_DIR`.
    pub fn from_env() -> Result<Self> {
        if let Ok(url) = std::env::var("MURMUR_PLATFORM_URL") {
            let anon_key = std::env::var("MURMUR_ANON_KEY").map_err(|_| {
                PlatformError::Invalid("MURMUR_ANON_KEY is required with MURMUR_PLATFORM_URL".into())
            })?;
            return Ok(Self::Remote(RemoteConfig { url, anon_key }));
        }

        Ok(Self::Local(LocalConfig {
            db_path: std::env::var("MURMUR_LOCAL_DB").ok().map(PathBuf::from),
            storage_dir: std::env::var("MURMUR_STORAGE_DIR").ok().map(PathBuf::from),
        }))
    }
}
