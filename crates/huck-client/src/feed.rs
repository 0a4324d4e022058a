//! Change-feed subscription manager.
//!
//! At most one subscription set (messages of the active channel + reactions)
//! is live at a time. Each set is stamped with an [`Epoch`]; everything it
//! reports carries that epoch so the engine can drop output from a set that
//! has since been torn down.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huck_types::events::{ChangeRecord, Topic};

use crate::backoff::{Backoff, BackoffConfig};
use crate::engine::EngineInput;
use crate::error::FeedError;

pub type ChangeStream = BoxStream<'static, Result<ChangeRecord, FeedError>>;

/// Opens live subscriptions on the store's change feed.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Resolves once the subscription is acknowledged; the stream then yields
    /// every record published on `topic` until it ends or errors.
    async fn subscribe(&self, topic: Topic) -> Result<ChangeStream, FeedError>;
}

/// Generation of a subscription set. Strictly increasing per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Messages,
    Reactions,
}

/// Per-subscription state machine.
///
/// `Idle -> Subscribing -> Active`, any failure goes to `Failed`, and
/// `Failed -> Subscribing` again once the backoff delay has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Subscribing,
    Active,
    Failed,
}

#[derive(Debug, Clone)]
pub enum FeedSignal {
    State {
        state: LinkState,
        /// Set on the `Active` transition that follows a failure: records may
        /// have been missed while the link was down.
        after_failure: bool,
    },
    Record(ChangeRecord),
}

/// What a subscription task reports to the engine.
#[derive(Debug, Clone)]
pub struct FeedUpdate {
    pub epoch: Epoch,
    pub kind: FeedKind,
    pub signal: FeedSignal,
}

struct ActiveSet {
    epoch: Epoch,
    channel_id: Uuid,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SubscriptionManager {
    transport: Arc<dyn FeedTransport>,
    backoff: BackoffConfig,
    inbox: UnboundedSender<EngineInput>,
    last_epoch: u64,
    active: Option<ActiveSet>,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        backoff: BackoffConfig,
        inbox: UnboundedSender<EngineInput>,
    ) -> Self {
        Self {
            transport,
            backoff,
            inbox,
            last_epoch: 0,
            active: None,
        }
    }

    /// Tear down the current set, then subscribe to `channel_id`'s messages
    /// and to reactions under a fresh epoch.
    pub fn activate(&mut self, channel_id: Uuid) -> Epoch {
        self.deactivate();

        self.last_epoch += 1;
        let epoch = Epoch(self.last_epoch);
        let cancel = CancellationToken::new();

        let tasks = [
            (FeedKind::Messages, Topic::Messages(channel_id)),
            (FeedKind::Reactions, Topic::Reactions),
        ]
        .into_iter()
        .map(|(kind, topic)| {
            tokio::spawn(supervise(Supervisor {
                epoch,
                kind,
                topic,
                transport: self.transport.clone(),
                backoff: Backoff::new(self.backoff),
                inbox: self.inbox.clone(),
                cancel: cancel.clone(),
            }))
        })
        .collect();

        info!("Feed {} activated for channel {}", epoch, channel_id);
        self.active = Some(ActiveSet {
            epoch,
            channel_id,
            cancel,
            tasks,
        });
        epoch
    }

    /// Release every live subscription. Takes effect immediately: the tasks
    /// are cancelled and aborted before this returns.
    pub fn deactivate(&mut self) {
        if let Some(set) = self.active.take() {
            set.cancel.cancel();
            for task in set.tasks {
                task.abort();
            }
            info!("Feed {} for channel {} torn down", set.epoch, set.channel_id);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.deactivate();
    }
}

struct Supervisor {
    epoch: Epoch,
    kind: FeedKind,
    topic: Topic,
    transport: Arc<dyn FeedTransport>,
    backoff: Backoff,
    inbox: UnboundedSender<EngineInput>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Returns false once the engine has gone away.
    fn report(&self, signal: FeedSignal) -> bool {
        self.inbox
            .send(EngineInput::Feed(FeedUpdate {
                epoch: self.epoch,
                kind: self.kind,
                signal,
            }))
            .is_ok()
    }

    fn state(&self, state: LinkState, after_failure: bool) -> bool {
        self.report(FeedSignal::State {
            state,
            after_failure,
        })
    }
}

/// Keep one topic subscribed for the lifetime of an epoch.
async fn supervise(mut sup: Supervisor) {
    let mut failed_before = false;

    loop {
        if !sup.state(LinkState::Subscribing, false) {
            return;
        }

        let attempt = tokio::select! {
            _ = sup.cancel.cancelled() => return,
            attempt = sup.transport.subscribe(sup.topic) => attempt,
        };

        match attempt {
            Ok(mut stream) => {
                debug!("Feed {} subscribed to {}", sup.epoch, sup.topic);
                sup.backoff.reset();
                if !sup.state(LinkState::Active, failed_before) {
                    return;
                }

                let reason = loop {
                    let item = tokio::select! {
                        _ = sup.cancel.cancelled() => return,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(record)) => {
                            if !sup.report(FeedSignal::Record(record)) {
                                return;
                            }
                        }
                        Some(Err(e)) => break e,
                        None => break FeedError::Closed,
                    }
                };
                warn!("Feed {} lost {}: {}", sup.epoch, sup.topic, reason);
            }
            Err(e) => warn!("Feed {} could not subscribe to {}: {}", sup.epoch, sup.topic, e),
        }

        failed_before = true;
        if !sup.state(LinkState::Failed, false) {
            return;
        }

        let delay = sup.backoff.next_delay();
        debug!("Feed {} retrying {} in {:?}", sup.epoch, sup.topic, delay);
        tokio::select! {
            _ = sup.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
