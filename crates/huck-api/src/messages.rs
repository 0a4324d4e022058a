use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use huck_types::api::SendMessageRequest;
use huck_types::events::ChangeRecord;
use huck_types::models::{MessageRow, MessageWithReactions, Reaction};

use crate::error::ApiError;
use crate::state::{AppState, blocking};

/// GET /channels/{id}/messages: the whole channel, oldest first, with
/// authors and reactions attached.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
) -> Result<Json<Vec<MessageWithReactions>>, ApiError> {
    let cid = channel_id.to_string();

    let found = blocking(&state, move |db| {
        if !db.channel_exists(&cid)? {
            return Ok(None);
        }
        let rows = db.get_messages(&cid)?;
        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db.get_reactions_for_messages(&message_ids)?;
        Ok(Some((rows, reaction_rows)))
    })
    .await?;
    let (rows, reaction_rows) = found.ok_or(ApiError::NotFound("channel"))?;

    // Group reactions by owning message (cheap in-memory work, fine on async thread)
    let mut by_message: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
    for row in reaction_rows {
        match row.into_model() {
            Ok(reaction) => by_message.entry(reaction.message_id).or_default().push(reaction),
            Err(e) => warn!("Skipping corrupt reaction row: {:#}", e),
        }
    }

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        match row.into_model() {
            Ok(message) => {
                let reactions = by_message.remove(&message.id).unwrap_or_default();
                messages.push(MessageWithReactions { message, reactions });
            }
            Err(e) => warn!("Skipping corrupt message row in {}: {:#}", channel_id, e),
        }
    }

    debug!("Serving {} messages for channel {}", messages.len(), channel_id);
    Ok(Json(messages))
}

/// POST /channels/{id}/messages: persist a message and announce the raw row
/// on the channel's feed topic.
pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("message content must not be empty".into()));
    }

    let row = MessageRow {
        id: Uuid::now_v7(),
        channel_id,
        user_id: req.user_id,
        content: req.content,
        created_at: now_millis(),
    };

    let insert = row.clone();
    blocking(&state, move |db| {
        if !db.channel_exists(&insert.channel_id.to_string())? {
            return Err(anyhow::Error::new(Missing("channel")));
        }
        if db.get_profile(&insert.user_id.to_string())?.is_none() {
            return Err(anyhow::Error::new(Missing("profile")));
        }
        db.insert_message(&insert)
    })
    .await
    .map_err(not_found)?;

    state.dispatcher.publish(ChangeRecord::message_inserted(&row).map_err(anyhow::Error::from)?);

    Ok((StatusCode::CREATED, Json(row)))
}

/// Marker error so a missing parent row becomes a 404 instead of a 500.
#[derive(Debug, thiserror::Error)]
#[error("{0} not found")]
pub(crate) struct Missing(pub &'static str);

pub(crate) fn not_found(err: ApiError) -> ApiError {
    match err {
        ApiError::Store(e) => match e.downcast_ref::<Missing>() {
            Some(missing) => ApiError::NotFound(missing.0),
            None => ApiError::Store(e),
        },
        other => other,
    }
}

/// The store keeps millisecond precision; trim so the feed row matches it.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
