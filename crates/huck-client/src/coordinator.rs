use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::reactions::ReactionAggregator;

/// A reaction toggle resolved against local state, sent to the store as an
/// idempotent intent keyed by `(message_id, user_id, emoji_code)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionIntent {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji_code: String,
    pub present: bool,
}

/// Local side of optimistic writes: the composer buffer and the sends still
/// waiting for their row to come back through the feed.
///
/// Nothing here touches the message store. A sent message only becomes
/// visible once its INSERT is merged from the feed (or a resync).
#[derive(Debug, Default)]
pub struct SendCoordinator {
    composer: String,
    /// message id -> channel id
    pending: HashMap<Uuid, Uuid>,
}

impl SendCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn set_composer(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }

    /// Clear the composer and hand back its trimmed content. Blank content is
    /// left in place and yields `None`.
    pub fn take_composer(&mut self) -> Option<String> {
        let content = self.composer.trim();
        if content.is_empty() {
            return None;
        }
        let content = content.to_string();
        self.composer.clear();
        Some(content)
    }

    /// Remember a created message until the feed delivers it.
    pub fn track(&mut self, message_id: Uuid, channel_id: Uuid) {
        self.pending.insert(message_id, channel_id);
    }

    /// The feed delivered `message_id`. Returns true if it was one of ours.
    pub fn confirm(&mut self, message_id: Uuid) -> bool {
        let ours = self.pending.remove(&message_id).is_some();
        if ours {
            debug!("Send {} confirmed by feed", message_id);
        }
        ours
    }

    /// Stop waiting for `message_id`. Returns its channel if it was still
    /// unconfirmed.
    pub fn expire(&mut self, message_id: Uuid) -> Option<Uuid> {
        self.pending.remove(&message_id)
    }

    pub fn is_pending(&self, message_id: Uuid) -> bool {
        self.pending.contains_key(&message_id)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Decide what a toggle means right now: add the reaction if `user_id`
    /// does not hold it, remove it if they do.
    pub fn reaction_intent(
        &self,
        reactions: &ReactionAggregator,
        channel_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji_code: &str,
    ) -> ReactionIntent {
        let present = reactions
            .find(channel_id, message_id, user_id, emoji_code)
            .is_none();
        ReactionIntent {
            message_id,
            user_id,
            emoji_code: emoji_code.to_string(),
            present,
        }
    }

    pub fn clear(&mut self) {
        self.composer.clear();
        self.pending.clear();
    }
}
