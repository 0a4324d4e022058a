pub mod channels;
pub mod error;
pub mod messages;
pub mod profiles;
pub mod reactions;
pub mod state;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::state::AppState;

/// All REST routes of the store. The feed socket is mounted by the server.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/profiles", post(profiles::lookup_or_create))
        .route("/profiles/{profile_id}", get(profiles::get_profile))
        .route("/channels", get(channels::list_channels).post(channels::create_channel))
        .route(
            "/channels/{channel_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/reactions", post(reactions::insert_reaction))
        .route("/reactions/{reaction_id}", delete(reactions::delete_reaction))
        .route("/messages/{message_id}/reactions", put(reactions::set_reaction))
        .with_state(state)
}
