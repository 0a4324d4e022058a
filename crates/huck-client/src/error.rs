use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("not logged in")]
    NotLoggedIn,

    #[error("no channel selected")]
    NoChannel,

    #[error("{0}")]
    Invalid(String),

    #[error("session file: {0}")]
    Session(#[from] std::io::Error),

    #[error("session data: {0}")]
    SessionFormat(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

/// Failure of a single change-feed subscription. Cloneable so it can be
/// reported to the engine and logged by the supervisor alike.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscription to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },

    #[error("feed closed by server")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}
