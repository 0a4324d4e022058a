use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};
use uuid::Uuid;

use huck_types::models::Message;

/// Ordered, de-duplicated messages of one channel.
#[derive(Debug, Default)]
struct Timeline {
    /// Ascending by `(created_at, id)`.
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl Timeline {
    fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }

        let key = message.sort_key();
        // Feed delivery is mostly in order, so the tail is the common case
        match self.messages.last() {
            Some(last) if last.sort_key() > key => {
                let pos = self.messages.partition_point(|m| m.sort_key() < key);
                self.messages.insert(pos, message);
            }
            _ => self.messages.push(message),
        }
        true
    }
}

/// Per-channel message sequences. Every operation names the channel it
/// mutates; there is no implicit "current" channel here.
#[derive(Debug, Default)]
pub struct MessageStore {
    channels: HashMap<Uuid, Timeline>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the channel's sequence wholesale with a bulk-fetch result.
    pub fn seed(&mut self, channel_id: Uuid, messages: impl IntoIterator<Item = Message>) {
        let mut timeline = Timeline::default();
        for message in messages {
            if message.channel_id != channel_id {
                warn!("Seed for {} carried message {} of {}", channel_id, message.id, message.channel_id);
                continue;
            }
            timeline.insert(message);
        }
        debug!("Seeded channel {} with {} messages", channel_id, timeline.messages.len());
        self.channels.insert(channel_id, timeline);
    }

    /// Insert in sort position. Returns false when a message with the same id
    /// is already held (or the message belongs to another channel).
    pub fn apply_insert(&mut self, channel_id: Uuid, message: Message) -> bool {
        if message.channel_id != channel_id {
            warn!("Refusing message {} of {} in channel {}", message.id, message.channel_id, channel_id);
            return false;
        }
        let id = message.id;
        let inserted = self.channels.entry(channel_id).or_default().insert(message);
        if !inserted {
            debug!("Duplicate message {} in {} ignored", id, channel_id);
        }
        inserted
    }

    pub fn contains(&self, channel_id: Uuid, message_id: Uuid) -> bool {
        self.channels
            .get(&channel_id)
            .is_some_and(|t| t.ids.contains(&message_id))
    }

    /// The ordered read model rendering consumes.
    pub fn view(&self, channel_id: Uuid) -> &[Message] {
        self.channels
            .get(&channel_id)
            .map(|t| t.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
