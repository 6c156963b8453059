//! Contract between the chat client and its hosted backend platform, plus the
//! two adapters that implement it: an embedded SQLite platform and an HTTP
//! client for a hosted PostgREST-style platform with realtime websockets.

pub mod config;
pub mod error;
pub mod feed;
pub mod local;
pub mod platform;
pub mod rest;
pub mod subscription;

use std::sync::Arc;

pub use config::{LocalConfig, PlatformConfig, RemoteConfig};
pub use error::{PlatformError, Result};
pub use feed::ChangeFeed;
pub use local::LocalPlatform;
pub use platform::Platform;
pub use rest::HttpPlatform;
pub use subscription::Subscription;

/// Build the platform adapter the configuration asks for.
pub fn connect(config: &PlatformConfig) -> Result<Arc<dyn Platform>> {
    match config {
        PlatformConfig::Remote(remote) => Ok(Arc::new(HttpPlatform::new(remote)?)),
        PlatformConfig::Local(local) => Ok(Arc::new(LocalPlatform::from_config(local)?)),
    }
}
