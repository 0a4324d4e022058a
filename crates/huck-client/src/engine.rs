//! The chat engine: one task owns all client state and applies every input
//! (feed records, fetch results, enrichment results, write outcomes) in the
//! order it arrives. Network work runs on spawned tasks that report back
//! through the engine's inbox.

use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huck_types::api::SetReactionResponse;
use huck_types::events::FeedEvent;
use huck_types::models::{Author, Channel, Message, MessageRow, MessageWithReactions, Profile};

use crate::config::ClientConfig;
use crate::coordinator::SendCoordinator;
use crate::enrich::Resolver;
use crate::error::ClientError;
use crate::feed::{
    Epoch, FeedKind, FeedSignal, FeedTransport, FeedUpdate, LinkState, SubscriptionManager,
};
use crate::reactions::{GroupedReactions, ReactionAggregator, ReactionGroup};
use crate::remote::RemoteStore;
use crate::session::SessionStore;
use crate::store::MessageStore;

/// Everything the engine reacts to besides direct method calls.
#[derive(Debug)]
pub enum EngineInput {
    Feed(FeedUpdate),
    Fetched {
        epoch: Epoch,
        /// Distinguishes a resync from the fetch it supersedes within one epoch.
        seq: u64,
        channel_id: Uuid,
        result: Result<Vec<MessageWithReactions>, ClientError>,
    },
    Enriched {
        epoch: Epoch,
        message: Message,
    },
    Sent {
        channel_id: Uuid,
        result: Result<MessageRow, ClientError>,
    },
    ReactionSet {
        result: Result<SetReactionResponse, ClientError>,
    },
    /// A sent message should have come back through the feed by now.
    ConfirmDeadline {
        message_id: Uuid,
    },
}

/// Bulk-fetch state of the active channel. `Ready` with an empty view means
/// the channel is empty; `Failed` means we do not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// No channel is active.
    Offline,
    Connecting,
    /// Both feeds of the active channel are live.
    Connected,
    /// At least one feed failed and is being retried.
    Degraded,
}

/// User-visible outcomes the UI should surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    LoginFailed(String),
    SendFailed(String),
    ReactionFailed(String),
    ChannelsFailed(String),
    FetchFailed { channel_id: Uuid, reason: String },
    Connectivity(Connectivity),
}

struct ActiveChannel {
    channel_id: Uuid,
    epoch: Epoch,
    status: FetchStatus,
    fetch_seq: u64,
    /// The latest fetch was started with both feeds live, so its snapshot
    /// cannot predate what the feeds deliver.
    fetch_live: bool,
    /// Feed events received while the bulk fetch is in flight, replayed on
    /// top of the seed.
    buffered: Vec<FeedEvent>,
    messages_link: LinkState,
    reactions_link: LinkState,
    /// Cancels fetches and enrichment lookups spawned for this channel.
    cancel: CancellationToken,
}

impl ActiveChannel {
    fn new(channel_id: Uuid, epoch: Epoch) -> Self {
        Self {
            channel_id,
            epoch,
            status: FetchStatus::Loading,
            fetch_seq: 0,
            fetch_live: false,
            buffered: Vec::new(),
            messages_link: LinkState::Idle,
            reactions_link: LinkState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    fn link_mut(&mut self, kind: FeedKind) -> &mut LinkState {
        match kind {
            FeedKind::Messages => &mut self.messages_link,
            FeedKind::Reactions => &mut self.reactions_link,
        }
    }

    fn connectivity(&self) -> Connectivity {
        let links = [self.messages_link, self.reactions_link];
        if links.contains(&LinkState::Failed) {
            Connectivity::Degraded
        } else if links.iter().all(|link| *link == LinkState::Active) {
            Connectivity::Connected
        } else {
            Connectivity::Connecting
        }
    }
}

pub struct ChatEngine {
    config: ClientConfig,
    remote: Arc<dyn RemoteStore>,
    session: SessionStore,
    resolver: Resolver,
    feeds: SubscriptionManager,
    inbox: UnboundedSender<EngineInput>,

    messages: MessageStore,
    reactions: ReactionAggregator,
    coordinator: SendCoordinator,

    profile: Option<Profile>,
    channels: Vec<Channel>,
    active: Option<ActiveChannel>,
    connectivity: Connectivity,
    notices: VecDeque<Notice>,
}

impl ChatEngine {
    /// Build an engine and the receiving end of its inbox. The caller drives
    /// the engine by passing every received input to [`ChatEngine::handle`].
    pub fn new(
        config: ClientConfig,
        remote: Arc<dyn RemoteStore>,
        transport: Arc<dyn FeedTransport>,
    ) -> (Self, UnboundedReceiver<EngineInput>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let engine = Self {
            session: SessionStore::new(config.session_path.clone()),
            resolver: Resolver::new(remote.clone()),
            feeds: SubscriptionManager::new(transport, config.backoff, inbox.clone()),
            config,
            remote,
            inbox,
            messages: MessageStore::new(),
            reactions: ReactionAggregator::new(),
            coordinator: SendCoordinator::new(),
            profile: None,
            channels: Vec::new(),
            active: None,
            connectivity: Connectivity::Offline,
            notices: VecDeque::new(),
        };
        (engine, rx)
    }

    // -- Session --

    /// Pick up the profile saved by an earlier login, if any. An unreadable
    /// session file counts as logged out.
    pub async fn restore_session(&mut self) -> Option<&Profile> {
        match self.session.load().await {
            Ok(Some(profile)) => {
                info!("Restored session for {}", profile.username);
                self.resolver.prime(&profile);
                self.profile = Some(profile);
            }
            Ok(None) => debug!("No saved session"),
            Err(e) => warn!(
                "Ignoring unreadable session {}: {}",
                self.session.path().display(),
                e
            ),
        }
        self.profile.as_ref()
    }

    /// Log in by display name, creating the profile on first use. On failure
    /// the login state is left as it was.
    pub async fn login(&mut self, username: &str) -> Result<Profile, ClientError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::Invalid("username is empty".into()));
        }

        let profile = match self.authenticate(username).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Login as {} failed: {}", username, e);
                self.notices.push_back(Notice::LoginFailed(e.to_string()));
                return Err(e);
            }
        };

        if self.profile.as_ref().is_some_and(|p| p.id != profile.id) {
            self.leave_channel();
        }
        info!("Logged in as {} ({})", profile.username, profile.id);
        self.resolver.prime(&profile);
        self.profile = Some(profile.clone());
        Ok(profile)
    }

    async fn authenticate(&self, username: &str) -> Result<Profile, ClientError> {
        let profile = self.remote.lookup_or_create_profile(username).await?;
        self.session.save(&profile).await?;
        Ok(profile)
    }

    /// Drop every subscription and all local state, then forget the session.
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        self.leave_channel();
        self.messages.clear();
        self.reactions.clear();
        self.coordinator.clear();
        self.resolver.clear();
        self.channels.clear();
        if let Some(profile) = self.profile.take() {
            info!("Logged out {}", profile.username);
        }
        self.session.clear().await
    }

    // -- Channels --

    pub async fn refresh_channels(&mut self) -> Result<&[Channel], ClientError> {
        match self.remote.list_channels().await {
            Ok(mut channels) => {
                channels.sort_by(|a, b| a.name.cmp(&b.name));
                debug!("Loaded {} channels", channels.len());
                self.channels = channels;
                Ok(&self.channels)
            }
            Err(e) => {
                warn!("Listing channels failed: {}", e);
                self.notices.push_back(Notice::ChannelsFailed(e.to_string()));
                Err(e)
            }
        }
    }

    pub async fn create_channel(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<Channel, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Invalid("channel name is empty".into()));
        }
        let channel = self.remote.create_channel(name, description.trim()).await?;
        info!("Created channel {} ({})", channel.name, channel.id);
        if !self.channels.iter().any(|c| c.id == channel.id) {
            self.channels.push(channel.clone());
            self.channels.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(channel)
    }

    /// Switch to `channel_id`: the previous channel's subscriptions and
    /// in-flight work are torn down before anything for the new one starts.
    pub fn select_channel(&mut self, channel_id: Uuid) -> Result<Epoch, ClientError> {
        if self.profile.is_none() {
            return Err(ClientError::NotLoggedIn);
        }

        self.leave_channel();
        let epoch = self.feeds.activate(channel_id);
        self.active = Some(ActiveChannel::new(channel_id, epoch));
        self.refresh_connectivity();
        self.spawn_fetch();
        Ok(epoch)
    }

    pub fn select_channel_by_name(&mut self, name: &str) -> Result<Epoch, ClientError> {
        let channel_id = self
            .channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
            .ok_or_else(|| ClientError::Invalid(format!("no channel named '{name}'")))?;
        self.select_channel(channel_id)
    }

    /// Re-seed the active channel from the store.
    pub fn resync(&mut self) -> Result<(), ClientError> {
        if self.active.is_none() {
            return Err(ClientError::NoChannel);
        }
        self.spawn_fetch();
        Ok(())
    }

    fn leave_channel(&mut self) {
        self.feeds.deactivate();
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            debug!("Left channel {} ({})", active.channel_id, active.epoch);
        }
        self.refresh_connectivity();
    }

    fn spawn_fetch(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.fetch_seq += 1;
        active.status = FetchStatus::Loading;
        active.fetch_live = active.connectivity() == Connectivity::Connected;

        let (epoch, seq, channel_id) = (active.epoch, active.fetch_seq, active.channel_id);
        let cancel = active.cancel.clone();
        let remote = self.remote.clone();
        debug!("Fetching channel {} ({} seq {})", channel_id, epoch, seq);
        spawn_reporting(&self.inbox, Some(cancel), async move {
            let result = remote.fetch_messages(channel_id).await;
            EngineInput::Fetched {
                epoch,
                seq,
                channel_id,
                result,
            }
        });
    }

    // -- User intents --

    pub fn set_composer(&mut self, text: impl Into<String>) {
        self.coordinator.set_composer(text);
    }

    /// Send the composer content to the active channel. The composer is
    /// cleared right away; the message shows up once the feed delivers it.
    pub fn send_message(&mut self) -> Result<(), ClientError> {
        let user_id = self.user_id()?;
        let channel_id = self.active_channel_id().ok_or(ClientError::NoChannel)?;
        let content = self
            .coordinator
            .take_composer()
            .ok_or_else(|| ClientError::Invalid("message is empty".into()))?;

        let remote = self.remote.clone();
        spawn_reporting(&self.inbox, None, async move {
            let result = remote.insert_message(channel_id, user_id, &content).await;
            EngineInput::Sent { channel_id, result }
        });
        Ok(())
    }

    /// Flip the current user's `emoji_code` reaction on a message. Returns
    /// whether the reaction is being added.
    pub fn toggle_reaction(
        &mut self,
        message_id: Uuid,
        emoji_code: &str,
    ) -> Result<bool, ClientError> {
        let user_id = self.user_id()?;
        let channel_id = self.active_channel_id().ok_or(ClientError::NoChannel)?;
        let emoji_code = emoji_code.trim();
        if emoji_code.is_empty() {
            return Err(ClientError::Invalid("emoji is empty".into()));
        }

        let intent = self.coordinator.reaction_intent(
            &self.reactions,
            channel_id,
            message_id,
            user_id,
            emoji_code,
        );
        let present = intent.present;
        debug!(
            "Reaction {} on {}: present={}",
            intent.emoji_code, intent.message_id, intent.present
        );

        let remote = self.remote.clone();
        spawn_reporting(&self.inbox, None, async move {
            let result = remote
                .set_reaction(
                    intent.message_id,
                    intent.user_id,
                    &intent.emoji_code,
                    intent.present,
                )
                .await;
            EngineInput::ReactionSet { result }
        });
        Ok(present)
    }

    fn user_id(&self) -> Result<Uuid, ClientError> {
        self.profile
            .as_ref()
            .map(|p| p.id)
            .ok_or(ClientError::NotLoggedIn)
    }

    // -- Inputs --

    /// Apply one input. Returns true when the active channel's messages or
    /// reactions may have changed.
    pub fn handle(&mut self, input: EngineInput) -> bool {
        match input {
            EngineInput::Feed(update) => self.on_feed(update),
            EngineInput::Fetched {
                epoch,
                seq,
                channel_id,
                result,
            } => self.on_fetched(epoch, seq, channel_id, result),
            EngineInput::Enriched { epoch, message } => self.on_enriched(epoch, message),
            EngineInput::Sent { channel_id, result } => {
                self.on_sent(channel_id, result);
                false
            }
            EngineInput::ReactionSet { result } => {
                match result {
                    Ok(resp) if !resp.changed => debug!("Reaction already in requested state"),
                    Ok(_) => debug!("Reaction applied, awaiting feed"),
                    Err(e) => {
                        warn!("Reaction failed: {}", e);
                        self.notices.push_back(Notice::ReactionFailed(e.to_string()));
                    }
                }
                false
            }
            EngineInput::ConfirmDeadline { message_id } => {
                self.on_confirm_deadline(message_id);
                false
            }
        }
    }

    fn current(&self, epoch: Epoch) -> Option<&ActiveChannel> {
        self.active.as_ref().filter(|a| a.epoch == epoch)
    }

    fn on_feed(&mut self, update: FeedUpdate) -> bool {
        let Some(active) = self.active.as_mut().filter(|a| a.epoch == update.epoch) else {
            if matches!(update.signal, FeedSignal::Record(_)) {
                warn!("Dropping {:?} record from stale feed {}", update.kind, update.epoch);
            }
            return false;
        };

        match update.signal {
            FeedSignal::State {
                state,
                after_failure,
            } => {
                *active.link_mut(update.kind) = state;
                // Anything published while the link was down, or between a
                // finished fetch and the subscription going live, is missed
                let resync = state == LinkState::Active
                    && (after_failure || active.status != FetchStatus::Loading);
                if resync {
                    info!(
                        "{:?} feed live on {}, resyncing channel {}",
                        update.kind, active.epoch, active.channel_id
                    );
                    self.spawn_fetch();
                }
                self.refresh_connectivity();
                false
            }
            FeedSignal::Record(record) => {
                let event = match record.decode() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Skipping {:?} record on {}: {}", record.table, record.topic, e);
                        return false;
                    }
                };
                if active.status == FetchStatus::Loading {
                    active.buffered.push(event);
                    return false;
                }
                let (channel_id, epoch) = (active.channel_id, active.epoch);
                self.apply_event(channel_id, epoch, event)
            }
        }
    }

    fn apply_event(&mut self, channel_id: Uuid, epoch: Epoch, event: FeedEvent) -> bool {
        match event {
            FeedEvent::MessageInserted(row) => {
                if row.channel_id != channel_id {
                    warn!(
                        "Dropping message {} of channel {} delivered to {}",
                        row.id, row.channel_id, channel_id
                    );
                    return false;
                }
                self.coordinator.confirm(row.id);
                if self.messages.contains(channel_id, row.id) {
                    debug!("Message {} already held", row.id);
                    return false;
                }
                match self.resolver.try_enrich(row) {
                    Ok(message) => self.messages.apply_insert(channel_id, message),
                    Err(row) => {
                        self.spawn_enrichment(epoch, row);
                        false
                    }
                }
            }
            FeedEvent::MessageDeleted { id } => {
                debug!("Ignoring delete of message {}", id);
                false
            }
            FeedEvent::ReactionInserted(reaction) => {
                let changed = self.reactions.apply_insert(channel_id, reaction);
                let messages = &self.messages;
                self.reactions
                    .evict_unheld(channel_id, |message_id| messages.contains(channel_id, message_id));
                changed
            }
            FeedEvent::ReactionDeleted { id } => {
                self.reactions.apply_delete(channel_id, id).is_some()
            }
        }
    }

    fn spawn_enrichment(&self, epoch: Epoch, row: MessageRow) {
        let Some(active) = self.current(epoch) else {
            return;
        };
        let resolver = self.resolver.clone();
        spawn_reporting(&self.inbox, Some(active.cancel.clone()), async move {
            EngineInput::Enriched {
                epoch,
                message: resolver.enrich(row).await,
            }
        });
    }

    fn on_fetched(
        &mut self,
        epoch: Epoch,
        seq: u64,
        channel_id: Uuid,
        result: Result<Vec<MessageWithReactions>, ClientError>,
    ) -> bool {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|a| a.epoch == epoch && a.fetch_seq == seq && a.channel_id == channel_id)
        else {
            warn!("Dropping stale fetch of channel {} ({} seq {})", channel_id, epoch, seq);
            return false;
        };

        let buffered = mem::take(&mut active.buffered);
        let fetch_live = active.fetch_live;
        let seeded = result.is_ok();
        match result {
            Ok(rows) => {
                active.status = FetchStatus::Ready;
                let mut messages = Vec::with_capacity(rows.len());
                let mut reactions = Vec::new();
                for row in rows {
                    if row.message.author != Author::placeholder() {
                        self.resolver
                            .remember(row.message.user_id, row.message.author.clone());
                    }
                    reactions.extend(row.reactions);
                    messages.push(row.message);
                }
                info!(
                    "Channel {} loaded: {} messages, {} reactions",
                    channel_id,
                    messages.len(),
                    reactions.len()
                );
                self.messages.seed(channel_id, messages);
                self.reactions.seed(channel_id, reactions);
            }
            Err(e) => {
                warn!("Fetch of channel {} failed: {}", channel_id, e);
                active.status = FetchStatus::Failed(e.to_string());
                self.notices.push_back(Notice::FetchFailed {
                    channel_id,
                    reason: e.to_string(),
                });
            }
        }

        if !buffered.is_empty() {
            debug!("Replaying {} buffered feed events", buffered.len());
        }
        for event in buffered {
            self.apply_event(channel_id, epoch, event);
        }

        // A snapshot taken before a feed went live can miss rows published
        // ahead of the subscription; once both feeds are up, fetch once more.
        let connected = self
            .current(epoch)
            .is_some_and(|a| a.connectivity() == Connectivity::Connected);
        if seeded && !fetch_live && connected {
            info!("Feeds went live during the fetch of {}, fetching again", channel_id);
            self.spawn_fetch();
        }
        true
    }

    fn on_enriched(&mut self, epoch: Epoch, message: Message) -> bool {
        let Some(channel_id) = self.current(epoch).map(|a| a.channel_id) else {
            warn!("Dropping enriched message {} from stale {}", message.id, epoch);
            return false;
        };
        self.messages.apply_insert(channel_id, message)
    }

    fn on_sent(&mut self, channel_id: Uuid, result: Result<MessageRow, ClientError>) {
        match result {
            Ok(row) => {
                if self.messages.contains(row.channel_id, row.id) {
                    debug!("Message {} confirmed before its send returned", row.id);
                    return;
                }
                debug!("Message {} created, awaiting feed", row.id);
                self.coordinator.track(row.id, channel_id);

                let message_id = row.id;
                let timeout = self.config.confirm_timeout;
                spawn_reporting(&self.inbox, None, async move {
                    tokio::time::sleep(timeout).await;
                    EngineInput::ConfirmDeadline { message_id }
                });
            }
            Err(e) => {
                warn!("Send to channel {} failed: {}", channel_id, e);
                self.notices.push_back(Notice::SendFailed(e.to_string()));
            }
        }
    }

    fn on_confirm_deadline(&mut self, message_id: Uuid) {
        let Some(channel_id) = self.coordinator.expire(message_id) else {
            return;
        };
        let Some(active) = self.active.as_ref().filter(|a| a.channel_id == channel_id) else {
            debug!("Unconfirmed message {} belongs to a channel we left", message_id);
            return;
        };
        if self.messages.contains(channel_id, message_id) || active.status == FetchStatus::Loading {
            return;
        }
        warn!(
            "Message {} not delivered by the feed within {:?}, resyncing channel {}",
            message_id, self.config.confirm_timeout, channel_id
        );
        self.spawn_fetch();
    }

    fn refresh_connectivity(&mut self) {
        let now = self
            .active
            .as_ref()
            .map_or(Connectivity::Offline, ActiveChannel::connectivity);
        if now != self.connectivity {
            info!("Connectivity {:?} -> {:?}", self.connectivity, now);
            self.connectivity = now;
            self.notices.push_back(Notice::Connectivity(now));
        }
    }

    // -- Read model --

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn active_channel_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.channel_id)
    }

    pub fn active_channel(&self) -> Option<&Channel> {
        let id = self.active_channel_id()?;
        self.channels.iter().find(|c| c.id == id)
    }

    /// Epoch of the live subscription set, if a channel is active.
    pub fn epoch(&self) -> Option<Epoch> {
        self.active.as_ref().map(|a| a.epoch)
    }

    /// Ordered messages of the active channel.
    pub fn view(&self) -> &[Message] {
        match self.active_channel_id() {
            Some(channel_id) => self.messages.view(channel_id),
            None => &[],
        }
    }

    pub fn channel_view(&self, channel_id: Uuid) -> &[Message] {
        self.messages.view(channel_id)
    }

    pub fn grouped_reactions(&self, message_id: Uuid) -> GroupedReactions {
        match self.active_channel_id() {
            Some(channel_id) => self.reactions.grouped_view(channel_id, message_id),
            None => GroupedReactions::new(),
        }
    }

    pub fn reaction_summary(&self, message_id: Uuid) -> Vec<ReactionGroup> {
        let me = self.profile.as_ref().map(|p| p.id);
        match self.active_channel_id() {
            Some(channel_id) => self.reactions.summary(channel_id, message_id, me),
            None => Vec::new(),
        }
    }

    pub fn fetch_status(&self) -> Option<&FetchStatus> {
        self.active.as_ref().map(|a| &a.status)
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn composer(&self) -> &str {
        self.coordinator.composer()
    }

    pub fn has_pending_sends(&self) -> bool {
        self.coordinator.has_pending()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }
}

/// Run `work` on its own task and post its result to the inbox, unless
/// `cancel` fires first.
fn spawn_reporting<F>(
    inbox: &UnboundedSender<EngineInput>,
    cancel: Option<CancellationToken>,
    work: F,
) where
    F: Future<Output = EngineInput> + Send + 'static,
{
    let inbox = inbox.clone();
    tokio::spawn(async move {
        let input = match cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => return,
                input = work => input,
            },
            None => work.await,
        };
        // The engine may be gone; nothing left to report to
        let _ = inbox.send(input);
    });
}
