/// Integration tests: the gateway behind a real listener, driven by a
/// tungstenite client while the dispatcher keeps publishing.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use huck_gateway::connection::handle_connection;
use huck_gateway::dispatcher::Dispatcher;
use huck_types::events::{ChangeRecord, FeedCommand, FeedFrame, Topic};
use huck_types::models::MessageRow;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn feed_upgrade(
    State(dispatcher): State<Dispatcher>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, dispatcher))
}

async fn serve(dispatcher: Dispatcher) -> SocketAddr {
    let app = Router::new()
        .route("/feed", get(feed_upgrade))
        .with_state(dispatcher);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/feed"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Socket, cmd: FeedCommand) {
    let text = serde_json::to_string(&cmd).unwrap();
    ws.send(Message::text(text)).await.unwrap();
}

/// Next text frame, skipping pings.
async fn next_frame(ws: &mut Socket) -> FeedFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Publish a fresh record from `record` every millisecond until aborted.
fn keep_publishing(
    dispatcher: Dispatcher,
    record: impl Fn() -> ChangeRecord + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            dispatcher.publish(record());
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
}

fn message_in(channel_id: Uuid, content: &str) -> ChangeRecord {
    let row = MessageRow {
        id: Uuid::now_v7(),
        channel_id,
        user_id: Uuid::from_u128(7),
        content: content.into(),
        created_at: chrono::Utc::now(),
    };
    ChangeRecord::message_inserted(&row).unwrap()
}

#[tokio::test]
async fn ack_is_written_before_records_of_the_topic() {
    let dispatcher = Dispatcher::new();
    let addr = serve(dispatcher.clone()).await;
    let publisher = keep_publishing(dispatcher.clone(), || {
        ChangeRecord::reaction_deleted(Uuid::new_v4()).unwrap()
    });

    // Several rounds, so a record racing the ack has many chances to win
    for _ in 0..20 {
        let mut ws = connect(addr).await;
        send(&mut ws, FeedCommand::Subscribe { topic: Topic::Reactions }).await;

        let first = next_frame(&mut ws).await;
        assert!(
            matches!(first, FeedFrame::Subscribed { topic: Topic::Reactions }),
            "expected the ack first, got {first:?}"
        );
        let second = next_frame(&mut ws).await;
        assert!(matches!(second, FeedFrame::Change(ref r) if r.topic == Topic::Reactions));
    }

    publisher.abort();
}

#[tokio::test]
async fn only_subscribed_topics_are_forwarded() {
    let dispatcher = Dispatcher::new();
    let addr = serve(dispatcher.clone()).await;
    let (general, random) = (Uuid::from_u128(1), Uuid::from_u128(2));
    let noise = keep_publishing(dispatcher.clone(), move || message_in(random, "noise"));

    let mut ws = connect(addr).await;
    send(&mut ws, FeedCommand::Subscribe { topic: Topic::Messages(general) }).await;
    assert!(matches!(next_frame(&mut ws).await, FeedFrame::Subscribed { .. }));

    dispatcher.publish(message_in(general, "hello"));
    match next_frame(&mut ws).await {
        FeedFrame::Change(record) => assert_eq!(record.topic, Topic::Messages(general)),
        other => panic!("unexpected frame {other:?}"),
    }

    // Commands are applied in order, so once the next ack is in, the
    // unsubscribe has taken effect
    send(&mut ws, FeedCommand::Unsubscribe { topic: Topic::Messages(general) }).await;
    send(&mut ws, FeedCommand::Subscribe { topic: Topic::Reactions }).await;
    loop {
        match next_frame(&mut ws).await {
            FeedFrame::Subscribed { topic } => {
                assert_eq!(topic, Topic::Reactions);
                break;
            }
            FeedFrame::Change(record) => assert_eq!(record.topic, Topic::Messages(general)),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    dispatcher.publish(message_in(general, "after leaving"));
    dispatcher.publish(ChangeRecord::reaction_deleted(Uuid::new_v4()).unwrap());
    match next_frame(&mut ws).await {
        FeedFrame::Change(record) => assert_eq!(record.topic, Topic::Reactions),
        other => panic!("unexpected frame {other:?}"),
    }

    noise.abort();
}
