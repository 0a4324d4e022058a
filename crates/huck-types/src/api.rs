use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Reaction;

// -- Identity --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupProfileRequest {
    pub username: String,
}

// -- Channels --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub user_id: Uuid,
    pub content: String,
}

// -- Reactions --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsertReactionRequest {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji_code: String,
}

/// Idempotent reaction intent keyed by `(message_id, user_id, emoji_code)`.
/// `present = true` inserts unless already there; `false` deletes if there.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetReactionRequest {
    pub user_id: Uuid,
    pub emoji_code: String,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetReactionResponse {
    /// False when the store already matched the requested state.
    pub changed: bool,
    pub reaction: Option<Reaction>,
}
