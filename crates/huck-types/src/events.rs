use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{MessageRow, Reaction};

const MESSAGES_PREFIX: &str = "messages:";
const REACTIONS_TOPIC: &str = "reactions";

/// A change-feed topic. Message rows are scoped per channel; reaction rows
/// carry no channel id so they share one global topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages(Uuid),
    Reactions,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Messages(channel_id) => write!(f, "{MESSAGES_PREFIX}{channel_id}"),
            Self::Reactions => f.write_str(REACTIONS_TOPIC),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == REACTIONS_TOPIC {
            return Ok(Self::Reactions);
        }
        s.strip_prefix(MESSAGES_PREFIX)
            .and_then(|id| id.parse().ok())
            .map(Self::Messages)
            .ok_or_else(|| format!("unknown topic '{s}'"))
    }
}

impl Serialize for Topic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Messages,
    Reactions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Delete,
}

/// Primary key of a deleted row. DELETE records carry nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowKey {
    pub id: Uuid,
}

/// One row-level change notification as it travels over the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub topic: Topic,
    pub table: Table,
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<serde_json::Value>,
}

impl ChangeRecord {
    pub fn message_inserted(row: &MessageRow) -> serde_json::Result<Self> {
        Ok(Self {
            topic: Topic::Messages(row.channel_id),
            table: Table::Messages,
            event_type: EventType::Insert,
            new: Some(serde_json::to_value(row)?),
            old: None,
        })
    }

    pub fn reaction_inserted(reaction: &Reaction) -> serde_json::Result<Self> {
        Ok(Self {
            topic: Topic::Reactions,
            table: Table::Reactions,
            event_type: EventType::Insert,
            new: Some(serde_json::to_value(reaction)?),
            old: None,
        })
    }

    pub fn reaction_deleted(id: Uuid) -> serde_json::Result<Self> {
        Ok(Self {
            topic: Topic::Reactions,
            table: Table::Reactions,
            event_type: EventType::Delete,
            new: None,
            old: Some(serde_json::to_value(RowKey { id })?),
        })
    }

    /// Decode the untyped payload into a typed event.
    pub fn decode(&self) -> Result<FeedEvent, DecodeError> {
        match (self.table, self.event_type) {
            (Table::Messages, EventType::Insert) => {
                Ok(FeedEvent::MessageInserted(payload(self.new.as_ref(), "new")?))
            }
            (Table::Messages, EventType::Delete) => {
                let key: RowKey = payload(self.old.as_ref(), "old")?;
                Ok(FeedEvent::MessageDeleted { id: key.id })
            }
            (Table::Reactions, EventType::Insert) => {
                Ok(FeedEvent::ReactionInserted(payload(self.new.as_ref(), "new")?))
            }
            (Table::Reactions, EventType::Delete) => {
                let key: RowKey = payload(self.old.as_ref(), "old")?;
                Ok(FeedEvent::ReactionDeleted { id: key.id })
            }
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    value: Option<&serde_json::Value>,
    field: &'static str,
) -> Result<T, DecodeError> {
    let value = value.ok_or(DecodeError::Missing(field))?;
    serde_json::from_value(value.clone()).map_err(|e| DecodeError::Malformed(field, e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("record has no '{0}' payload")]
    Missing(&'static str),

    #[error("bad '{0}' payload: {1}")]
    Malformed(&'static str, String),
}

/// Typed change event, after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    MessageInserted(MessageRow),
    MessageDeleted { id: Uuid },
    ReactionInserted(Reaction),
    /// Only the primary key survives a delete.
    ReactionDeleted { id: Uuid },
}

/// Frames sent FROM client TO server on the feed socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedCommand {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
}

/// Frames sent FROM server TO client on the feed socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedFrame {
    Subscribed { topic: Topic },
    Rejected { topic: String, reason: String },
    Change(ChangeRecord),
}
