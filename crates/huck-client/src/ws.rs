use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};

use huck_types::events::{ChangeRecord, FeedCommand, FeedFrame, Topic};

use crate::error::FeedError;
use crate::feed::{ChangeStream, FeedTransport};

/// How long to wait for the server to acknowledge a Subscribe.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// The server pings every 15s; this much silence means the link is dead.
const IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// [`FeedTransport`] over the huck-gateway WebSocket. One socket per topic.
#[derive(Debug, Clone)]
pub struct WsFeed {
    url: String,
}

impl WsFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl FeedTransport for WsFeed {
    async fn subscribe(&self, topic: Topic) -> Result<ChangeStream, FeedError> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        let cmd = serde_json::to_string(&FeedCommand::Subscribe { topic })
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        ws.send(WsMessage::Text(cmd.into()))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let early = tokio::time::timeout(SUBSCRIBE_TIMEOUT, await_ack(&mut ws, topic))
            .await
            .map_err(|_| {
                FeedError::Transport(format!("no ack for {topic} within {SUBSCRIBE_TIMEOUT:?}"))
            })??;

        let stream = async_stream::stream! {
            for record in early {
                yield Ok(record);
            }
            loop {
                let next = match tokio::time::timeout(IDLE_TIMEOUT, ws.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield Err(FeedError::Transport(format!("no traffic for {IDLE_TIMEOUT:?}")));
                        break;
                    }
                };
                match next {
                    None | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Err(e)) => {
                        yield Err(FeedError::Transport(e.to_string()));
                        break;
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<FeedFrame>(text.as_str()) {
                            Ok(FeedFrame::Change(record)) => yield Ok(record),
                            Ok(other) => debug!("Ignoring frame on {}: {:?}", topic, other),
                            Err(e) => warn!("Undecodable frame on {}: {}", topic, e),
                        }
                    }
                    // Pings are answered by tungstenite on the next read
                    Some(Ok(_)) => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Read frames until the server acknowledges `topic`. The gateway may write a
/// record for the topic ahead of the ack; those are handed back in order so
/// the caller can yield them first.
async fn await_ack<S>(frames: &mut S, topic: Topic) -> Result<Vec<ChangeRecord>, FeedError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut early = Vec::new();
    while let Some(msg) = frames.next().await {
        let msg = msg.map_err(|e| FeedError::Transport(e.to_string()))?;
        let WsMessage::Text(text) = msg else { continue };
        match serde_json::from_str::<FeedFrame>(text.as_str()) {
            Ok(FeedFrame::Subscribed { topic: acked }) if acked == topic => {
                if !early.is_empty() {
                    debug!("{} records on {} arrived ahead of the ack", early.len(), topic);
                }
                return Ok(early);
            }
            Ok(FeedFrame::Rejected { topic, reason }) => {
                return Err(FeedError::Rejected { topic, reason });
            }
            Ok(FeedFrame::Change(record)) if record.topic == topic => early.push(record),
            Ok(other) => debug!("Ignoring frame before ack on {}: {:?}", topic, other),
            Err(e) => warn!("Undecodable frame before ack on {}: {}", topic, e),
        }
    }
    Err(FeedError::Closed)
}
