use std::time::Duration;

use tracing::warn;

/// Timing knobs of the room synchronizer and composer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Full refetch interval
    pub poll_interval: Duration,
    /// Extra attempts when a single message is not visible yet
    pub not_found_retries: u32,
    /// Delay between those attempts
    pub retry_delay: Duration,
    /// Typing indicator is cleared after this much keyboard silence
    pub typing_idle: Duration,
    /// Wait before reopening a closed change subscription
    pub resubscribe_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            not_found_retries: 5,
            retry_delay: Duration::from_millis(300),
            typing_idle: Duration::from_secs(3),
            resubscribe_delay: Duration::from_secs(3),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `MURMUR_POLL_INTERVAL_MS`,
    /// `MURMUR_NOT_FOUND_RETRIES`, `MURMUR_RETRY_DELAY_MS`,
    /// `MURMUR_TYPING_IDLE_MS` and `MURMUR_RESUBSCRIBE_DELAY_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_millis("MURMUR_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            not_found_retries: env_parse("MURMUR_NOT_FOUND_RETRIES").unwrap_or(defaults.not_found_retries),
            retry_delay: env_millis("MURMUR_RETRY_DELAY_MS").unwrap_or(defaults.retry_delay),
            typing_idle: env_millis("MURMUR_TYPING_IDLE_MS").unwrap_or(defaults.typing_idle),
            resubscribe_delay: env_millis("MURMUR_RESUBSCRIBE_DELAY_MS").unwrap_or(defaults.resubscribe_delay),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}, not a number", key, raw);
            None
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
