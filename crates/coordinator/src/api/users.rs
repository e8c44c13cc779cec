//! User account endpoints

use crate::auth::{Role, SignupForm, User, UserInfo};
use crate::error::{WebError, WebResult};
use crate::state::AppState;
use axum::{extract::State, Json};

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/users/signup",
    request_body = SignupForm,
    responses((status = 200, description = "User created"))
))]
pub async fn signup(
    State(state): State<AppState>,
    Json(form): Json<SignupForm>,
) -> WebResult<Json<UserInfo>> {
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM users WHERE username = ? OR email = ?",
    )
    .bind(&form.username)
    .bind(&form.email)
    .fetch_optional(&state.pool)
    .await?;

    if existing.is_some() {
        return Err(WebError::BadRequest(
            "username or email already registered".to_string(),
        ));
    }

    let user = User::new(form.username, form.email, &form.password, Role::User)
        .map_err(WebError::Internal)?;

    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.role)
    .bind(user.created_at)
    .execute(&state.pool)
    .await?;

    Ok(Json(user.into()))
}
