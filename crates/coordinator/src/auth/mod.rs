//! Authentication module
//!
//! Provides JWT-based authentication with Argon2 password hashing and a
//! coarse admin/user role gate.

pub mod middleware;
pub mod models;

pub use middleware::{extract_bearer, generate_token, require_admin, require_auth, validate_token, AuthError};
pub use models::{Claims, LoginForm, Role, SignupForm, TokenPair, TokenType, User, UserInfo};

use sqlx::SqlitePool;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, String> {
    use argon2::{
        password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
        Argon2,
    };

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("password hash error: {e}"))
}

/// Create the default admin user if no users exist yet, logging the
/// generated credentials once so an operator can rotate them.
pub async fn ensure_default_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if count.0 == 0 {
        let admin = User::new(
            "admin".to_string(),
            "admin@localhost".to_string(),
            "changeme",
            Role::Admin,
        )
        .map_err(|e| sqlx::Error::Protocol(e))?;

        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&admin.id)
        .bind(&admin.username)
        .bind(&admin.email)
        .bind(&admin.password_hash)
        .bind(&admin.role)
        .bind(admin.created_at)
        .execute(pool)
        .await?;

        tracing::warn!(
            "created default admin user (username: admin, password: changeme) - change this password!"
        );
    }

    Ok(())
}

/// Fetch a user by username and verify a plaintext password.
pub async fn authenticate_user(
    pool: &SqlitePool,
    login: &LoginForm,
) -> Result<User, &'static str> {
    let user: User = sqlx::query_as(
        "SELECT id, username, email, password_hash, role, created_at FROM users WHERE username = ?",
    )
    .bind(&login.username)
    .fetch_one(pool)
    .await
    .map_err(|_| "invalid username or password")?;

    if !user.verify_password(&login.password) {
        return Err("invalid username or password");
    }

    Ok(user)
}
