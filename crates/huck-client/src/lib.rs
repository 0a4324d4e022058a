//! Realtime state synchronization for the Huck chat client.
//!
//! [`engine::ChatEngine`] keeps a per-channel, ordered, de-duplicated view of
//! messages and reactions consistent with a bulk fetch, a live change feed
//! and the user's own writes. The store and feed are reached through the
//! [`remote::RemoteStore`] and [`feed::FeedTransport`] traits; HTTP and
//! WebSocket implementations live in [`remote`] and [`ws`].

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod reactions;
pub mod remote;
pub mod session;
pub mod store;
pub mod ws;

pub use config::ClientConfig;
pub use engine::{ChatEngine, Connectivity, EngineInput, FetchStatus, Notice};
pub use error::{ClientError, FeedError};
