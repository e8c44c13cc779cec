//! Channel endpoints: objective creation and inspection

use crate::error::WebResult;
use crate::models::Channel;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct CreateChannelRequest {
    pub input_dimension: i64,
    pub output_dimension: i64,
    pub num_kraus: i64,
    pub minimization_attempts: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UpdateAttemptsRequest {
    pub channel_id: i64,
    pub minimization_attempts: i64,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/channels/create",
    request_body = CreateChannelRequest,
    responses((status = 200, description = "Channel created"))
))]
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> WebResult<Json<Channel>> {
    let channel = state
        .channels
        .create_channel(
            req.input_dimension,
            req.output_dimension,
            req.num_kraus,
            req.minimization_attempts,
        )
        .await?;
    state.wake.notify_one();
    Ok(Json(channel))
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/channels/list",
    responses((status = 200, description = "All channels"))
))]
pub async fn list(State(state): State<AppState>) -> WebResult<Json<Vec<Channel>>> {
    Ok(Json(state.channels.list_channels().await?))
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/channels/update-minimization-attempts",
    request_body = UpdateAttemptsRequest,
    responses((status = 200, description = "Attempts updated"))
))]
pub async fn update_minimization_attempts(
    State(state): State<AppState>,
    Json(req): Json<UpdateAttemptsRequest>,
) -> WebResult<()> {
    state
        .channels
        .update_minimization_attempts(req.channel_id, req.minimization_attempts)
        .await
}
