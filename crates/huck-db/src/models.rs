//! Database row types: these map directly to SQLite rows.
//! Conversion into huck-types models happens at the edge via `into_model`.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use huck_types::models::{Author, Channel, Message, MessageRow, Profile, Reaction};

pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub color: String,
}

impl ProfileRow {
    pub fn into_model(self) -> Result<Profile> {
        Ok(Profile {
            id: parse_id(&self.id)?,
            username: self.username,
            color: self.color,
        })
    }
}

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl ChannelRow {
    pub fn into_model(self) -> Result<Channel> {
        Ok(Channel {
            id: parse_id(&self.id)?,
            name: self.name,
            description: self.description,
        })
    }
}

/// A message joined with its author. Author columns are NULL when the
/// profile is gone (LEFT JOIN).
pub struct MessageJoinRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub author_username: Option<String>,
    pub author_color: Option<String>,
}

impl MessageJoinRow {
    pub fn into_model(self) -> Result<Message> {
        let author = match (self.author_username, self.author_color) {
            (Some(username), Some(color)) => Author { username, color },
            _ => Author::placeholder(),
        };
        let row = MessageRow {
            id: parse_id(&self.id)?,
            channel_id: parse_id(&self.channel_id)?,
            user_id: parse_id(&self.user_id)?,
            content: self.content,
            created_at: parse_timestamp(&self.created_at)?,
        };
        Ok(row.with_author(author))
    }
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji_code: String,
}

impl ReactionRow {
    pub fn into_model(self) -> Result<Reaction> {
        Ok(Reaction {
            id: parse_id(&self.id)?,
            message_id: parse_id(&self.message_id)?,
            user_id: parse_id(&self.user_id)?,
            emoji_code: self.emoji_code,
        })
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("corrupt timestamp '{raw}'"))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{raw}'"))
}
