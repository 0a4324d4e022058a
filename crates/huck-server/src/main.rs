use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use huck_api::state::{AppState, AppStateInner};
use huck_gateway::connection;
use huck_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huck_server=debug,huck_api=debug,huck_gateway=debug,huck_db=info,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("HUCK_DB_PATH").unwrap_or_else(|_| "huck.db".into());
    let host = std::env::var("HUCK_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HUCK_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = huck_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: dispatcher.clone(),
    });

    let feed_route = Router::new()
        .route("/feed", get(feed_upgrade))
        .with_state(dispatcher);

    let app = huck_api::router(app_state)
        .merge(feed_route)
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Huck server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn feed_upgrade(
    State(dispatcher): State<Dispatcher>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, shutting down...");
    }
}
