use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Colours handed out to new profiles. Display tag only.
pub const PROFILE_COLORS: &[&str] = &[
    "text-blue-500",
    "text-red-500",
    "text-green-500",
    "text-purple-500",
    "text-orange-500",
];

/// Author shown when a profile lookup fails or returns nothing.
pub const UNKNOWN_USERNAME: &str = "unknown";
pub const NEUTRAL_COLOR: &str = "text-zinc-500";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub color: String,
}

impl Profile {
    pub fn author(&self) -> Author {
        Author {
            username: self.username.clone(),
            color: self.color.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Denormalized author fields attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
    pub color: String,
}

impl Author {
    pub fn placeholder() -> Self {
        Self {
            username: UNKNOWN_USERNAME.to_string(),
            color: NEUTRAL_COLOR.to_string(),
        }
    }
}

/// A message row as the store persists it and as the change feed delivers it:
/// foreign keys only, no author display fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn with_author(self, author: Author) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            user_id: self.user_id,
            content: self.content,
            created_at: self.created_at,
            author,
        }
    }
}

/// An enriched message, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: Author,
}

impl Message {
    /// Total order inside a channel: creation time, then id for equal timestamps.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji_code: String,
}

/// Bulk-fetch shape: a message joined with its author and reactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWithReactions {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}
