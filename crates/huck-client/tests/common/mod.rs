//! In-memory store + change feed, and a harness that drives a `ChatEngine`
//! against it one input at a time.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use huck_client::backoff::BackoffConfig;
use huck_client::engine::{ChatEngine, EngineInput, Notice};
use huck_client::error::{ClientError, FeedError};
use huck_client::feed::{ChangeStream, FeedTransport};
use huck_client::remote::RemoteStore;
use huck_client::ClientConfig;
use huck_types::api::SetReactionResponse;
use huck_types::events::{ChangeRecord, Topic};
use huck_types::models::{
    Author, Channel, MessageRow, MessageWithReactions, PROFILE_COLORS, Profile, Reaction,
};

pub const GENERAL: Uuid = Uuid::from_u128(0x0001);
pub const RANDOM: Uuid = Uuid::from_u128(0x0002);

pub fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

pub fn row(id: u128, channel_id: Uuid, user_id: Uuid, millis: i64, content: &str) -> MessageRow {
    MessageRow {
        id: Uuid::from_u128(id),
        channel_id,
        user_id,
        content: content.into(),
        created_at: at(millis),
    }
}

#[derive(Default)]
struct State {
    profiles: Vec<Profile>,
    channels: Vec<Channel>,
    messages: Vec<MessageRow>,
    reactions: Vec<Reaction>,
    last_published: Option<ChangeRecord>,
}

/// Implements both `RemoteStore` and `FeedTransport`. Every mutation made
/// through it is published on the feed unless `mute_feed` is set.
pub struct MemoryBackend {
    state: Mutex<State>,
    feed: broadcast::Sender<ChangeRecord>,
    links: Mutex<CancellationToken>,
    /// Number of upcoming subscribe calls that fail.
    pub fail_subscribes: AtomicUsize,
    pub fail_fetches: AtomicBool,
    pub fail_sends: AtomicBool,
    pub fail_profile_lookups: AtomicBool,
    pub mute_feed: AtomicBool,
    fetch_delay_ms: AtomicU64,
    subscribe_delay_ms: AtomicU64,
    fetches: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let (feed, _) = broadcast::channel(256);
        let state = State {
            channels: vec![
                Channel {
                    id: GENERAL,
                    name: "general".into(),
                    description: "Everything start here".into(),
                },
                Channel {
                    id: RANDOM,
                    name: "random".into(),
                    description: String::new(),
                },
            ],
            ..State::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
            feed,
            links: Mutex::new(CancellationToken::new()),
            fail_subscribes: AtomicUsize::new(0),
            fail_fetches: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_profile_lookups: AtomicBool::new(false),
            mute_feed: AtomicBool::new(false),
            fetch_delay_ms: AtomicU64::new(0),
            subscribe_delay_ms: AtomicU64::new(0),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn add_profile(&self, username: &str) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            username: username.into(),
            color: PROFILE_COLORS[1].into(),
        };
        self.state.lock().unwrap().profiles.push(profile.clone());
        profile
    }

    /// Store a message without publishing it.
    pub fn store_message(&self, row: MessageRow) {
        self.state.lock().unwrap().messages.push(row);
    }

    /// Store a reaction without publishing it.
    pub fn store_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Reaction {
        let reaction = Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id,
            emoji_code: emoji.into(),
        };
        self.state.lock().unwrap().reactions.push(reaction.clone());
        reaction
    }

    /// Store and publish, like a write from another client.
    pub fn deliver_message(&self, row: MessageRow) {
        self.store_message(row.clone());
        self.publish(ChangeRecord::message_inserted(&row).unwrap());
    }

    pub fn add_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Reaction {
        let reaction = self.store_reaction(message_id, user_id, emoji);
        self.publish(ChangeRecord::reaction_inserted(&reaction).unwrap());
        reaction
    }

    pub fn remove_reaction(&self, reaction_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .reactions
            .retain(|r| r.id != reaction_id);
        self.publish(ChangeRecord::reaction_deleted(reaction_id).unwrap());
    }

    pub fn publish(&self, record: ChangeRecord) {
        self.state.lock().unwrap().last_published = Some(record.clone());
        if !self.mute_feed.load(Ordering::SeqCst) {
            // No live subscriber is fine: the record is simply missed
            let _ = self.feed.send(record);
        }
    }

    /// Publish the previous record again, as a redelivering transport would.
    pub fn redeliver_last(&self) {
        let record = self.state.lock().unwrap().last_published.clone();
        if let Some(record) = record {
            self.publish(record);
        }
    }

    /// End every open feed stream with a transport error.
    pub fn drop_links(&self) {
        let mut links = self.links.lock().unwrap();
        links.cancel();
        *links = CancellationToken::new();
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every subscribe before it starts listening, like a slow
    /// handshake. Records published meanwhile are missed by that stream.
    pub fn set_subscribe_delay(&self, delay: Duration) {
        self.subscribe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reaction_count(&self) -> usize {
        self.state.lock().unwrap().reactions.len()
    }

    fn snapshot(&self, channel_id: Uuid) -> Vec<MessageWithReactions> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<&MessageRow> = state
            .messages
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .collect();
        rows.sort_by_key(|m| (m.created_at, m.id));
        rows.into_iter()
            .map(|m| {
                let author = state
                    .profiles
                    .iter()
                    .find(|p| p.id == m.user_id)
                    .map(Profile::author)
                    .unwrap_or_else(Author::placeholder);
                MessageWithReactions {
                    message: m.clone().with_author(author),
                    reactions: state
                        .reactions
                        .iter()
                        .filter(|r| r.message_id == m.id)
                        .cloned()
                        .collect(),
                }
            })
            .collect()
    }
}

fn unavailable(what: &str) -> ClientError {
    ClientError::Unavailable(format!("{what} switched off"))
}

#[async_trait]
impl RemoteStore for MemoryBackend {
    async fn lookup_or_create_profile(&self, username: &str) -> Result<Profile, ClientError> {
        if self.fail_profile_lookups.load(Ordering::SeqCst) {
            return Err(unavailable("profiles"));
        }
        let existing = self
            .state
            .lock()
            .unwrap()
            .profiles
            .iter()
            .find(|p| p.username == username)
            .cloned();
        Ok(existing.unwrap_or_else(|| self.add_profile(username)))
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, ClientError> {
        if self.fail_profile_lookups.load(Ordering::SeqCst) {
            return Err(unavailable("profiles"));
        }
        let state = self.state.lock().unwrap();
        Ok(state.profiles.iter().find(|p| p.id == id).cloned())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, ClientError> {
        let mut channels = self.state.lock().unwrap().channels.clone();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(channels)
    }

    async fn create_channel(&self, name: &str, description: &str) -> Result<Channel, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.channels.iter().any(|c| c.name == name) {
            return Err(ClientError::Status {
                status: 409,
                message: "channel name already taken".into(),
            });
        }
        let channel = Channel {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
        };
        state.channels.push(channel.clone());
        Ok(channel)
    }

    async fn fetch_messages(
        &self,
        channel_id: Uuid,
    ) -> Result<Vec<MessageWithReactions>, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(unavailable("fetches"));
        }
        let snapshot = self.snapshot(channel_id);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(snapshot)
    }

    async fn insert_message(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<MessageRow, ClientError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(unavailable("sends"));
        }
        let row = MessageRow {
            id: Uuid::now_v7(),
            channel_id,
            user_id,
            content: content.into(),
            created_at: Utc::now(),
        };
        self.deliver_message(row.clone());
        Ok(row)
    }

    async fn set_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji_code: &str,
        present: bool,
    ) -> Result<SetReactionResponse, ClientError> {
        let existing = self
            .state
            .lock()
            .unwrap()
            .reactions
            .iter()
            .find(|r| {
                r.message_id == message_id && r.user_id == user_id && r.emoji_code == emoji_code
            })
            .cloned();

        match (present, existing) {
            (true, None) => Ok(SetReactionResponse {
                changed: true,
                reaction: Some(self.add_reaction(message_id, user_id, emoji_code)),
            }),
            (false, Some(reaction)) => {
                self.remove_reaction(reaction.id);
                Ok(SetReactionResponse {
                    changed: true,
                    reaction: Some(reaction),
                })
            }
            (_, reaction) => Ok(SetReactionResponse {
                changed: false,
                reaction,
            }),
        }
    }
}

#[async_trait]
impl FeedTransport for MemoryBackend {
    async fn subscribe(&self, topic: Topic) -> Result<ChangeStream, FeedError> {
        let refused = self
            .fail_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(FeedError::Connect("connection refused".into()));
        }

        let delay = self.subscribe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut rx = self.feed.subscribe();
        let dropped = self.links.lock().unwrap().clone();
        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = dropped.cancelled() => None,
                    next = rx.recv() => Some(next),
                };
                match next {
                    None => {
                        yield Err(FeedError::Transport("link dropped".into()));
                        break;
                    }
                    Some(Ok(record)) => {
                        if record.topic == topic {
                            yield Ok(record);
                        }
                    }
                    Some(Err(RecvError::Lagged(_))) => {
                        yield Err(FeedError::Closed);
                        break;
                    }
                    Some(Err(RecvError::Closed)) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// One engine wired to a [`MemoryBackend`], with a session file in a temp dir.
pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub engine: ChatEngine,
    pub inbox: UnboundedReceiver<EngineInput>,
    pub notices: Vec<Notice>,
    config: ClientConfig,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            server_url: "http://memory".into(),
            session_path: dir.path().join("session.json"),
            backoff: BackoffConfig {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
                factor: 2,
                jitter: 0.0,
            },
            confirm_timeout: Duration::from_millis(300),
        };
        let (engine, inbox) = ChatEngine::new(config.clone(), backend.clone(), backend.clone());
        Self {
            backend,
            engine,
            inbox,
            notices: Vec::new(),
            config,
            _dir: dir,
        }
    }

    /// A second engine on the same backend and session file, as after a
    /// process restart.
    pub fn restart(&self) -> (ChatEngine, UnboundedReceiver<EngineInput>) {
        ChatEngine::new(self.config.clone(), self.backend.clone(), self.backend.clone())
    }

    pub async fn login(&mut self, username: &str) -> Profile {
        let profile = self.engine.login(username).await.unwrap();
        self.engine.refresh_channels().await.unwrap();
        profile
    }

    /// Select a channel and wait until it is loaded and both feeds are live.
    pub async fn join(&mut self, channel_id: Uuid) {
        self.engine.select_channel(channel_id).unwrap();
        self.pump_until("channel to load with live feeds", |h| {
            h.engine.fetch_status() == Some(&huck_client::FetchStatus::Ready)
                && h.engine.connectivity() == huck_client::Connectivity::Connected
        })
        .await;
    }

    /// Feed inbox inputs to the engine until `done` holds.
    pub async fn pump_until(&mut self, what: &str, done: impl Fn(&Harness) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(self) {
            let input = tokio::time::timeout_at(deadline, self.inbox.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
                .expect("engine inbox closed");
            self.engine.handle(input);
            self.notices.extend(self.engine.take_notices());
        }
    }

    /// Process whatever arrives for `millis`.
    pub async fn settle(&mut self, millis: u64) {
        let deadline = Instant::now() + Duration::from_millis(millis);
        while let Ok(Some(input)) = tokio::time::timeout_at(deadline, self.inbox.recv()).await {
            self.engine.handle(input);
            self.notices.extend(self.engine.take_notices());
        }
    }

    pub fn contents(&self) -> Vec<String> {
        self.engine
            .view()
            .iter()
            .map(|m| m.content.clone())
            .collect()
    }

    pub fn holds(&self, content: &str) -> bool {
        self.engine.view().iter().any(|m| m.content == content)
    }
}
