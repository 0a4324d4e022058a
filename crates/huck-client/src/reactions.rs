use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;
use uuid::Uuid;

use huck_types::models::Reaction;

/// Deleted ids remembered per channel. Tombstones only need to outlive the
/// feed's reordering window.
const TOMBSTONE_LIMIT: usize = 1024;

/// Inserts remembered per channel before reactions on messages the channel
/// never received are forgotten.
const ARRIVAL_LIMIT: usize = 512;

/// emoji_code -> users who reacted with it.
pub type GroupedReactions = BTreeMap<String, BTreeSet<Uuid>>;

/// Display row for one emoji under a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji_code: String,
    pub count: usize,
    /// The current user is among the reactors.
    pub reacted: bool,
}

#[derive(Debug, Default)]
struct ChannelReactions {
    /// message id -> reaction id -> reaction
    by_message: HashMap<Uuid, BTreeMap<Uuid, Reaction>>,
    /// reaction id -> owning message id. Deletes carry only the reaction id.
    owners: HashMap<Uuid, Uuid>,
    /// Ids deleted before (or without) their insert being seen here. Reaction
    /// ids are never reused, so a later insert of one of these is stale.
    tombstones: HashSet<Uuid>,
    /// Tombstones oldest first.
    buried: VecDeque<Uuid>,
    /// Message ids of feed inserts, oldest first. The reactions topic is
    /// global, so many of these belong to other channels.
    arrivals: VecDeque<Uuid>,
}

impl ChannelReactions {
    fn insert(&mut self, reaction: Reaction) -> bool {
        if self.tombstones.contains(&reaction.id) || self.owners.contains_key(&reaction.id) {
            return false;
        }
        self.owners.insert(reaction.id, reaction.message_id);
        self.by_message
            .entry(reaction.message_id)
            .or_default()
            .insert(reaction.id, reaction);
        true
    }

    fn remove(&mut self, reaction_id: Uuid) -> Option<Reaction> {
        self.bury(reaction_id);
        let message_id = self.owners.remove(&reaction_id)?;
        let reactions = self.by_message.get_mut(&message_id)?;
        let removed = reactions.remove(&reaction_id);
        if reactions.is_empty() {
            self.by_message.remove(&message_id);
        }
        removed
    }

    fn bury(&mut self, reaction_id: Uuid) {
        if !self.tombstones.insert(reaction_id) {
            return;
        }
        self.buried.push_back(reaction_id);
        if self.buried.len() > TOMBSTONE_LIMIT {
            if let Some(oldest) = self.buried.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    /// Drop every reaction on `message_id`. Returns how many went.
    fn forget_message(&mut self, message_id: Uuid) -> usize {
        let Some(reactions) = self.by_message.remove(&message_id) else {
            return 0;
        };
        for reaction_id in reactions.keys() {
            self.owners.remove(reaction_id);
        }
        reactions.len()
    }
}

/// Per-channel reaction multisets, keyed by owning message.
///
/// Reactions may name a message this channel does not (yet) hold; they are
/// kept and show up once the message arrives.
#[derive(Debug, Default)]
pub struct ReactionAggregator {
    channels: HashMap<Uuid, ChannelReactions>,
}

impl ReactionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the channel's reactions with a bulk-fetch result. Tombstones
    /// survive, so a reaction deleted while the fetch was in flight stays gone.
    pub fn seed(&mut self, channel_id: Uuid, reactions: impl IntoIterator<Item = Reaction>) {
        let state = self.channels.entry(channel_id).or_default();
        state.by_message.clear();
        state.owners.clear();
        state.arrivals.clear();
        let mut count = 0;
        for reaction in reactions {
            if state.insert(reaction) {
                count += 1;
            }
        }
        debug!("Seeded {} reactions for channel {}", count, channel_id);
    }

    /// Add a reaction. Returns false for a redelivered (same id) or
    /// already-deleted reaction.
    pub fn apply_insert(&mut self, channel_id: Uuid, reaction: Reaction) -> bool {
        let (id, message_id) = (reaction.id, reaction.message_id);
        let state = self.channels.entry(channel_id).or_default();
        let inserted = state.insert(reaction);
        if inserted {
            state.arrivals.push_back(message_id);
        } else {
            debug!("Reaction {} already seen in {}, ignored", id, channel_id);
        }
        inserted
    }

    /// Forget reactions on messages that `held` still does not know once
    /// they are older than the last `ARRIVAL_LIMIT` inserts. A reaction that
    /// overtook its own message survives until then. Returns how many
    /// reactions were dropped.
    pub fn evict_unheld(&mut self, channel_id: Uuid, held: impl Fn(Uuid) -> bool) -> usize {
        let Some(state) = self.channels.get_mut(&channel_id) else {
            return 0;
        };
        let mut evicted = 0;
        while state.arrivals.len() > ARRIVAL_LIMIT {
            let Some(message_id) = state.arrivals.pop_front() else {
                break;
            };
            if !held(message_id) {
                evicted += state.forget_message(message_id);
            }
        }
        if evicted > 0 {
            debug!("Forgot {} reactions on messages outside channel {}", evicted, channel_id);
        }
        evicted
    }

    /// Remove the reaction with this id from whichever message holds it.
    pub fn apply_delete(&mut self, channel_id: Uuid, reaction_id: Uuid) -> Option<Reaction> {
        let removed = self.channels.entry(channel_id).or_default().remove(reaction_id);
        if removed.is_none() {
            debug!("Delete for unknown reaction {} in {} recorded", reaction_id, channel_id);
        }
        removed
    }

    pub fn grouped_view(&self, channel_id: Uuid, message_id: Uuid) -> GroupedReactions {
        let mut grouped = GroupedReactions::new();
        for reaction in self.reactions(channel_id, message_id) {
            grouped
                .entry(reaction.emoji_code.clone())
                .or_default()
                .insert(reaction.user_id);
        }
        grouped
    }

    /// Per-emoji counts with "did `me` react" flags, ready for display.
    pub fn summary(&self, channel_id: Uuid, message_id: Uuid, me: Option<Uuid>) -> Vec<ReactionGroup> {
        self.grouped_view(channel_id, message_id)
            .into_iter()
            .map(|(emoji_code, users)| ReactionGroup {
                count: users.len(),
                reacted: me.is_some_and(|me| users.contains(&me)),
                emoji_code,
            })
            .collect()
    }

    /// The reaction `user_id` placed with `emoji_code` on the message, if any.
    pub fn find(
        &self,
        channel_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji_code: &str,
    ) -> Option<&Reaction> {
        self.reactions(channel_id, message_id)
            .find(|r| r.user_id == user_id && r.emoji_code == emoji_code)
    }

    pub fn reactions(&self, channel_id: Uuid, message_id: Uuid) -> impl Iterator<Item = &Reaction> {
        self.channels
            .get(&channel_id)
            .and_then(|state| state.by_message.get(&message_id))
            .into_iter()
            .flat_map(|reactions| reactions.values())
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
