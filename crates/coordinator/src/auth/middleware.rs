//! JWT authentication middleware for Axum

use super::models::{Claims, Role, TokenType};
use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::env;

/// JWT signing secret, loaded from `COORDINATOR_JWT_SECRET`.
pub fn get_jwt_secret() -> String {
    env::var("COORDINATOR_JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("COORDINATOR_JWT_SECRET not set, using insecure default!");
        "INSECURE_DEFAULT_CHANGE_ME_IN_PRODUCTION".to_string()
    })
}

pub fn generate_token(claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = get_jwt_secret();
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn validate_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = get_jwt_secret();
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// Extract the bearer token from the `Authorization` header.
pub fn extract_bearer(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Axum middleware requiring a valid, non-expired access-typed bearer token.
/// Revocation is checked by handlers that need it (refresh rotation only);
/// access tokens are short-lived enough that checking the set here for
/// every request would add a lock round-trip to every hot path for no
/// practical gain.
pub async fn require_auth(mut request: Request, next: Next) -> Result<Response, AuthError> {
    let token = extract_bearer(&request).ok_or(AuthError::Missing)?;
    let claims = validate_token(&token).map_err(|_| AuthError::Invalid)?;

    if claims.token_type != TokenType::Access {
        return Err(AuthError::Invalid);
    }

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Axum middleware requiring the authenticated user to hold the admin role.
/// Must run after `require_auth` so `Claims` is already in the request.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AuthError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or(AuthError::Missing)?;

    if claims.role() != Role::Admin {
        return Err(AuthError::Forbidden);
    }

    Ok(next.run(request).await)
}

#[derive(Debug)]
pub enum AuthError {
    Missing,
    Invalid,
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::Missing => (StatusCode::BAD_REQUEST, "authentication required"),
            AuthError::Invalid => (StatusCode::UNAUTHORIZED, "invalid or expired token"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "admin role required"),
        };

        let body = serde_json::json!({ "error": message });

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::User;

    fn claims(token_type: TokenType) -> Claims {
        let user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "hunter2",
            Role::User,
        )
        .unwrap();
        Claims::new(&user, token_type, chrono::Duration::minutes(5))
    }

    #[test]
    fn generate_then_validate_round_trips() {
        let original = claims(TokenType::Access);
        let token = generate_token(&original).unwrap();
        let decoded = validate_token(&token).unwrap();
        assert_eq!(decoded.sub, original.sub);
        assert_eq!(decoded.token_type, TokenType::Access);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = generate_token(&claims(TokenType::Access)).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(validate_token(&tampered).is_err());
    }

    #[test]
    fn extract_bearer_reads_the_authorization_header() {
        let request = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&request).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn extract_bearer_rejects_non_bearer_schemes() {
        let request = Request::builder()
            .header(header::AUTHORIZATION, "Basic abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&request), None);
    }

    #[test]
    fn extract_bearer_is_none_without_a_header() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_bearer(&request), None);
    }
}
