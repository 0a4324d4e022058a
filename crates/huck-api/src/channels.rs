use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use uuid::Uuid;

use huck_types::api::CreateChannelRequest;
use huck_types::models::Channel;

use crate::error::ApiError;
use crate::state::{AppState, blocking};

/// GET /channels: every channel, ordered by name.
pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<Channel>>, ApiError> {
    let rows = blocking(&state, |db| db.list_channels()).await?;
    let channels = rows
        .into_iter()
        .map(|row| row.into_model())
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("channel name must not be empty".into()));
    }

    let channel = Channel {
        id: Uuid::new_v4(),
        name,
        description: req.description,
    };

    let (id, name, description) = (
        channel.id.to_string(),
        channel.name.clone(),
        channel.description.clone(),
    );
    let created = blocking(&state, move |db| db.create_channel(&id, &name, &description)).await?;
    if !created {
        return Err(ApiError::Conflict(format!("channel '{}' already exists", channel.name)));
    }

    Ok((StatusCode::CREATED, Json(channel)))
}
