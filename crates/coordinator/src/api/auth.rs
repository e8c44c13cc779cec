//! Authentication endpoints: login, token refresh, and status

use crate::auth::{authenticate_user, generate_token, validate_token, Claims, LoginForm, TokenPair, TokenType, UserInfo};
use crate::error::{WebError, WebResult};
use crate::state::AppState;
use axum::extract::Request;
use axum::{extract::State, Extension, Json};

fn issue_pair(state: &AppState, user: &crate::auth::User) -> WebResult<TokenPair> {
    let access = Claims::new(
        user,
        TokenType::Access,
        chrono::Duration::from_std(state.config.access_token_ttl).unwrap(),
    );
    let refresh = Claims::new(
        user,
        TokenType::Refresh,
        chrono::Duration::from_std(state.config.refresh_token_ttl).unwrap(),
    );

    Ok(TokenPair {
        access_token: generate_token(&access)?,
        refresh_token: generate_token(&refresh)?,
        token_type: "bearer",
    })
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginForm,
    responses((status = 200, description = "Token pair issued"))
))]
pub async fn login(
    State(state): State<AppState>,
    Json(form): Json<LoginForm>,
) -> WebResult<Json<TokenPair>> {
    let user = authenticate_user(&state.pool, &form)
        .await
        .map_err(|e| WebError::BadRequest(e.to_string()))?;

    Ok(Json(issue_pair(&state, &user)?))
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/auth/refresh",
    responses((status = 200, description = "Token pair rotated"))
))]
pub async fn refresh(State(state): State<AppState>, request: Request) -> WebResult<Json<TokenPair>> {
    let presented = request
        .headers()
        .get("refresh")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(WebError::AuthMissing)?;

    if state.ephemeral.is_revoked(&presented).await {
        return Err(WebError::AuthRevoked);
    }

    let claims = validate_token(&presented).map_err(|_| WebError::AuthInvalid)?;
    if claims.token_type != TokenType::Refresh {
        return Err(WebError::AuthInvalid);
    }

    let user: crate::auth::User = sqlx::query_as(
        "SELECT id, username, email, password_hash, role, created_at FROM users WHERE id = ?",
    )
    .bind(&claims.sub)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(WebError::AuthInvalid)?;

    state
        .ephemeral
        .revoke(&presented, state.config.refresh_token_ttl)
        .await;

    Ok(Json(issue_pair(&state, &user)?))
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/auth/status",
    responses((status = 200, description = "Current authenticated user"))
))]
pub async fn status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> WebResult<Json<UserInfo>> {
    let user: crate::auth::User = sqlx::query_as(
        "SELECT id, username, email, password_hash, role, created_at FROM users WHERE id = ?",
    )
    .bind(&claims.sub)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| WebError::NotFound("user not found".to_string()))?;

    Ok(Json(user.into()))
}
