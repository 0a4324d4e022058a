use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the store, e.g. `http://127.0.0.1:3000`.
    pub server_url: String,
    pub session_path: PathBuf,
    pub backoff: BackoffConfig,
    /// How long a sent message may stay unconfirmed by the feed before the
    /// channel is resynced from the store.
    pub confirm_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            session_path: "huck-session.json".into(),
            backoff: BackoffConfig::default(),
            confirm_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Read `.env` (if present) and `HUCK_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| -> Result<Duration, ClientError> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| ClientError::Config(format!("{key}={raw}: {e}"))),
                None => Ok(fallback),
            }
        };

        let server_url = get("HUCK_SERVER_URL")
            .unwrap_or(defaults.server_url)
            .trim_end_matches('/')
            .to_string();
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "HUCK_SERVER_URL must be an http(s) URL, got '{server_url}'"
            )));
        }

        Ok(Self {
            server_url,
            session_path: get("HUCK_SESSION_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_path),
            backoff: BackoffConfig {
                initial: millis("HUCK_BACKOFF_INITIAL_MS", defaults.backoff.initial)?,
                max: millis("HUCK_BACKOFF_MAX_MS", defaults.backoff.max)?,
                ..defaults.backoff
            },
            confirm_timeout: millis("HUCK_CONFIRM_TIMEOUT_MS", defaults.confirm_timeout)?,
        })
    }

    /// WebSocket URL of the change feed.
    pub fn feed_url(&self) -> String {
        let base = match self.server_url.strip_prefix("https://") {
            Some(rest) => format!("wss://{rest}"),
            None => format!(
                "ws://{}",
                self.server_url.trim_start_matches("http://")
            ),
        };
        format!("{base}/feed")
    }
}
