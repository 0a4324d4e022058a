use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huck_types::events::{FeedCommand, FeedFrame, Topic};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve one change-feed WebSocket until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let open = dispatcher.connection_opened();
    info!("Feed connection {} opened ({} open)", conn_id, open);

    // Subscribe before any Subscribe command is acknowledged so no record
    // published after the ack can be missed.
    let mut broadcast_rx = dispatcher.subscribe();

    // Client commands, applied by the send task. The topic set lives there
    // too, so a Subscribed ack is always written before the topic's records.
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward subscribed records + replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let mut subscriptions: HashSet<Topic> = HashSet::new();

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // Records were lost; closing makes the client resubscribe and resync.
                            warn!("Feed connection {} lagged by {} records, closing", conn_id, n);
                            break;
                        }
                        Err(_) => break,
                    };

                    if !subscriptions.contains(&msg.topic) {
                        continue;
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    let Some(frame) = handle_command(conn_id, &cmd, &mut subscriptions) else {
                        continue;
                    };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize feed reply: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping feed connection {}", missed_heartbeats, conn_id);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if cmd_tx.send(text.to_string()).is_err() {
                        break;
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let open = dispatcher.connection_closed();
    info!("Feed connection {} closed ({} open)", conn_id, open);
}

/// Apply one client frame to the connection's topic set and build the reply.
fn handle_command(
    conn_id: Uuid,
    text: &str,
    subscriptions: &mut HashSet<Topic>,
) -> Option<FeedFrame> {
    let cmd = match serde_json::from_str::<FeedCommand>(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(
                "Feed connection {} bad command: {} -- raw: {}",
                conn_id,
                e,
                text.chars().take(200).collect::<String>()
            );
            return Some(FeedFrame::Rejected {
                topic: requested_topic(text).unwrap_or_default(),
                reason: e.to_string(),
            });
        }
    };

    match cmd {
        FeedCommand::Subscribe { topic } => {
            info!("Feed connection {} subscribed to {}", conn_id, topic);
            subscriptions.insert(topic);
            Some(FeedFrame::Subscribed { topic })
        }
        FeedCommand::Unsubscribe { topic } => {
            debug!("Feed connection {} unsubscribed from {}", conn_id, topic);
            subscriptions.remove(&topic);
            None
        }
    }
}

/// Best-effort extraction of `data.topic` from a frame that failed to parse.
fn requested_topic(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value
        .get("data")?
        .get("topic")?
        .as_str()
        .map(str::to_string)
}
