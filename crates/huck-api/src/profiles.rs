use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use rand::seq::IndexedRandom;
use tracing::info;
use uuid::Uuid;

use huck_types::api::LookupProfileRequest;
use huck_types::models::{NEUTRAL_COLOR, PROFILE_COLORS, Profile};

use crate::error::ApiError;
use crate::state::{AppState, blocking};

const MAX_USERNAME_CHARS: usize = 32;

/// POST /profiles: return the profile with this exact username, creating it
/// with a random palette colour on first use.
pub async fn lookup_or_create(
    State(state): State<AppState>,
    Json(req): Json<LookupProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::BadRequest(format!(
            "username must be 1-{MAX_USERNAME_CHARS} characters"
        )));
    }

    let color = PROFILE_COLORS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(NEUTRAL_COLOR)
        .to_string();
    let new_id = Uuid::new_v4().to_string();

    let (row, created) = blocking(&state, move |db| {
        db.lookup_or_create_profile(&new_id, &username, &color)
    })
    .await?;
    let profile: Profile = row.into_model()?;

    if created {
        info!("Created profile {} ({})", profile.username, profile.id);
        Ok((StatusCode::CREATED, Json(profile)))
    } else {
        Ok((StatusCode::OK, Json(profile)))
    }
}

/// GET /profiles/{id}: point lookup used for enrichment.
pub async fn get_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
) -> Result<Json<Profile>, ApiError> {
    let id = profile_id.to_string();
    let row = blocking(&state, move |db| db.get_profile(&id))
        .await?
        .ok_or(ApiError::NotFound("profile"))?;
    Ok(Json(row.into_model()?))
}
