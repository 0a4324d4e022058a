use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use huck_db::ReactionChange;
use huck_types::api::{InsertReactionRequest, SetReactionRequest, SetReactionResponse};
use huck_types::events::ChangeRecord;
use huck_types::models::Reaction;

use crate::error::ApiError;
use crate::messages::{Missing, not_found};
use crate::state::{AppState, blocking};

/// POST /reactions: plain insert. 409 when the user already reacted with
/// this emoji on this message.
pub async fn insert_reaction(
    State(state): State<AppState>,
    Json(req): Json<InsertReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let emoji_code = validated_emoji(&req.emoji_code)?;
    let reaction = Reaction {
        id: Uuid::new_v4(),
        message_id: req.message_id,
        user_id: req.user_id,
        emoji_code,
    };

    let insert = reaction.clone();
    let inserted = blocking(&state, move |db| {
        if !db.message_exists(&insert.message_id.to_string())? {
            return Err(anyhow::Error::new(Missing("message")));
        }
        db.insert_reaction(&insert)
    })
    .await
    .map_err(not_found)?;

    if !inserted {
        return Err(ApiError::Conflict("reaction already exists".into()));
    }

    publish_insert(&state, &reaction)?;
    Ok((StatusCode::CREATED, Json(reaction)))
}

/// DELETE /reactions/{id}: the feed only learns the id.
pub async fn delete_reaction(
    State(state): State<AppState>,
    Path(reaction_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let id = reaction_id.to_string();
    let removed = blocking(&state, move |db| db.delete_reaction(&id)).await?;
    if removed.is_none() {
        return Err(ApiError::NotFound("reaction"));
    }

    publish_delete(&state, reaction_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /messages/{id}/reactions: idempotent toggle intent keyed by
/// `(message, user, emoji)`. Publishes only when a row actually changed.
pub async fn set_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<SetReactionRequest>,
) -> Result<Json<SetReactionResponse>, ApiError> {
    let emoji_code = validated_emoji(&req.emoji_code)?;
    let new_id = Uuid::new_v4().to_string();
    let (mid, uid, present) = (message_id.to_string(), req.user_id.to_string(), req.present);

    let change = blocking(&state, move |db| {
        if !db.message_exists(&mid)? {
            return Err(anyhow::Error::new(Missing("message")));
        }
        db.set_reaction(&new_id, &mid, &uid, &emoji_code, present)
    })
    .await
    .map_err(not_found)?;

    let response = match change {
        ReactionChange::Inserted(reaction) => {
            info!("{} reacted {} on {}", reaction.user_id, reaction.emoji_code, message_id);
            publish_insert(&state, &reaction)?;
            SetReactionResponse { changed: true, reaction: Some(reaction) }
        }
        ReactionChange::Deleted(reaction) => {
            info!("{} withdrew {} on {}", reaction.user_id, reaction.emoji_code, message_id);
            publish_delete(&state, reaction.id)?;
            SetReactionResponse { changed: true, reaction: Some(reaction) }
        }
        ReactionChange::Unchanged => SetReactionResponse { changed: false, reaction: None },
    };

    Ok(Json(response))
}

fn validated_emoji(raw: &str) -> Result<String, ApiError> {
    let code = raw.trim();
    if code.is_empty() || code.chars().count() > 32 {
        return Err(ApiError::BadRequest("emoji_code must be 1-32 characters".into()));
    }
    Ok(code.to_string())
}

fn publish_insert(state: &AppState, reaction: &Reaction) -> Result<(), ApiError> {
    let record = ChangeRecord::reaction_inserted(reaction).map_err(anyhow::Error::from)?;
    state.dispatcher.publish(record);
    Ok(())
}

fn publish_delete(state: &AppState, id: Uuid) -> Result<(), ApiError> {
    let record = ChangeRecord::reaction_deleted(id).map_err(anyhow::Error::from)?;
    state.dispatcher.publish(record);
    Ok(())
}
