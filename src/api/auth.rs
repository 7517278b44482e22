//! Account registration, email verification, sessions and password reset.
//!
//! Registration is two phase: an unverified row is created with a 5-digit
//! code, and only `verify-otp` turns it into a usable account. Login and
//! all lending operations see verified accounts only; the sweeper job
//! purges rows that never verify. Session tokens are random 32-byte hex
//! strings stored SHA-256 hashed.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::error::ApiError;
use super::MessageResponse;
use crate::config::AuthConfig;
use crate::db::{DbPool, LoginRequest, LoginResponse, RegisterRequest, Session, User, UserResponse, VerifyOtpRequest, ROLE_ADMIN, ROLE_USER};
use crate::utils::{normalize_email, now_rfc3339, to_rfc3339};
use crate::AppState;

const PASSWORD_MIN_LEN: usize = 8;
const PASSWORD_MAX_LEN: usize = 18;

/// How many concurrent unverified registrations one email may hold.
const MAX_UNVERIFIED_ATTEMPTS: i64 = 5;

/// Verification codes and reset tokens expire after this many minutes.
const CODE_TTL_MINUTES: i64 = 15;

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: UserResponse,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a 5-digit verification code
fn generate_verification_code() -> i64 {
    rand::rng().random_range(10_000..=99_999)
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < PASSWORD_MIN_LEN || password.len() > PASSWORD_MAX_LEN {
        return Err(ApiError::validation(format!(
            "Password must be between {PASSWORD_MIN_LEN} and {PASSWORD_MAX_LEN} characters"
        )));
    }
    Ok(())
}

/// Create a session for a user and return the raw bearer token.
async fn create_session(db: &DbPool, user_id: &str, ttl_days: i64) -> Result<String, ApiError> {
    let token = generate_token();
    let token_hash = hash_token(&token);
    let expires_at = to_rfc3339(Utc::now() + Duration::days(ttl_days));

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(&token_hash)
    .bind(&expires_at)
    .bind(now_rfc3339())
    .execute(db)
    .await?;

    Ok(token)
}

/// Register endpoint: creates an unverified account and emails the code
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = normalize_email(&request.email);
    if request.name.trim().is_empty() || email.is_empty() || request.password.is_empty() {
        return Err(ApiError::validation("Please fill all the fields"));
    }
    if !email.contains('@') {
        return Err(ApiError::validation("Invalid email address"));
    }
    validate_password(&request.password)?;

    let verified_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users WHERE email = ? AND account_verified = 1",
    )
    .bind(&email)
    .fetch_one(&state.db)
    .await?;
    if verified_exists > 0 {
        return Err(ApiError::bad_request("User already exists"));
    }

    let pending_attempts: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users WHERE email = ? AND account_verified = 0",
    )
    .bind(&email)
    .fetch_one(&state.db)
    .await?;
    if pending_attempts >= MAX_UNVERIFIED_ATTEMPTS {
        return Err(ApiError::rate_limited(
            "Too many registration attempts, please try again later",
        ));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {e}")))?;
    let code = generate_verification_code();
    let expires_at = to_rfc3339(Utc::now() + Duration::minutes(CODE_TTL_MINUTES));
    let now = now_rfc3339();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, account_verified,
                            verification_code, verification_expires_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(request.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(ROLE_USER)
    .bind(code)
    .bind(&expires_at)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    if let Err(e) = state
        .email
        .send_verification_code(&email, request.name.trim(), code)
        .await
    {
        tracing::warn!(to = %email, error = %e, "Failed to send verification email");
    }

    tracing::info!(email = %email, "Registered unverified account");

    Ok(Json(MessageResponse::ok(
        "Verification code sent to your email",
    )))
}

/// Verify-OTP endpoint: turns the newest unverified row into a real account
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = normalize_email(&request.email);

    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE email = ? AND account_verified = 0 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await?;
    let user = user.ok_or_else(|| ApiError::not_found("User not found"))?;

    // Drop any older duplicate registration attempts for this address
    sqlx::query("DELETE FROM users WHERE email = ? AND account_verified = 0 AND id != ?")
        .bind(&email)
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    let expired = user
        .verification_expires_at
        .as_deref()
        .map(|exp| exp < now_rfc3339().as_str())
        .unwrap_or(true);
    if expired {
        return Err(ApiError::bad_request("Verification code has expired"));
    }
    if user.verification_code != Some(request.otp) {
        return Err(ApiError::bad_request("Invalid OTP"));
    }

    sqlx::query(
        "UPDATE users SET account_verified = 1, verification_code = NULL,
                          verification_expires_at = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(now_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    let token = create_session(&state.db, &user.id, state.config.auth.session_ttl_days).await?;

    tracing::info!(email = %email, "Account verified");

    let mut user = user;
    user.account_verified = true;
    Ok(Json(LoginResponse {
        success: true,
        message: "Account verified successfully".to_string(),
        token,
        user: UserResponse::from(user),
    }))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = normalize_email(&request.email);

    let user: Option<User> =
        sqlx::query_as("SELECT * FROM users WHERE email = ? AND account_verified = 1")
            .bind(&email)
            .fetch_optional(&state.db)
            .await?;
    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = create_session(&state.db, &user.id, state.config.auth.session_ttl_days).await?;

    Ok(Json(LoginResponse {
        success: true,
        message: "Logged in successfully".to_string(),
        token,
        user: UserResponse::from(user),
    }))
}

/// Logout endpoint: revokes the presented session token
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, ApiError> {
    let token =
        extract_token(&headers).ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(hash_token(&token))
        .execute(&state.db)
        .await?;

    Ok(Json(MessageResponse::ok("Logged out successfully")))
}

/// Current-user endpoint
pub async fn me(user: User) -> Json<MeResponse> {
    Json(MeResponse {
        success: true,
        user: UserResponse::from(user),
    })
}

/// Forgot-password endpoint: emails a reset token
///
/// Responds identically whether or not the account exists, so the endpoint
/// cannot be used to probe for registered addresses.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = normalize_email(&request.email);

    let user: Option<User> =
        sqlx::query_as("SELECT * FROM users WHERE email = ? AND account_verified = 1")
            .bind(&email)
            .fetch_optional(&state.db)
            .await?;

    if let Some(user) = user {
        let token = generate_token();
        let expires_at = to_rfc3339(Utc::now() + Duration::minutes(CODE_TTL_MINUTES));

        sqlx::query(
            "UPDATE users SET reset_password_token = ?, reset_password_expires_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(hash_token(&token))
        .bind(&expires_at)
        .bind(now_rfc3339())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

        if let Err(e) = state
            .email
            .send_password_reset(&user.email, &user.name, &token)
            .await
        {
            tracing::warn!(to = %user.email, error = %e, "Failed to send password reset email");
        }
    }

    Ok(Json(MessageResponse::ok(
        "If that account exists, a reset token has been sent",
    )))
}

/// Reset-password endpoint
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if request.password != request.confirm_password {
        return Err(ApiError::validation("Passwords do not match"));
    }
    validate_password(&request.password)?;

    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE reset_password_token = ? AND reset_password_expires_at > ?",
    )
    .bind(hash_token(&token))
    .bind(now_rfc3339())
    .fetch_optional(&state.db)
    .await?;
    let user =
        user.ok_or_else(|| ApiError::bad_request("Reset token is invalid or has expired"))?;

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {e}")))?;

    sqlx::query(
        "UPDATE users SET password_hash = ?, reset_password_token = NULL,
                          reset_password_expires_at = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(&password_hash)
    .bind(now_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    // Existing sessions are revoked when the password changes
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(email = %user.email, "Password reset completed");

    Ok(Json(MessageResponse::ok("Password reset successfully")))
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Get the current user from a session token
pub async fn get_current_user(pool: &DbPool, token: &str) -> Result<User, ApiError> {
    let session: Option<Session> =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(hash_token(token))
            .bind(now_rfc3339())
            .fetch_optional(pool)
            .await?;
    let session = session.ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&session.user_id)
        .fetch_optional(pool)
        .await?;
    user.ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))
}

/// Extractor for the current authenticated user
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
        get_current_user(&state.db, &token).await
    }
}

/// Reject non-administrator callers.
pub fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Administrator access required"))
    }
}

/// Seed the administrator account from config on startup, if configured
/// and not already present.
pub async fn ensure_admin_user(db: &DbPool, auth: &AuthConfig) -> anyhow::Result<()> {
    let (Some(admin_email), Some(admin_password)) = (&auth.admin_email, &auth.admin_password)
    else {
        return Ok(());
    };

    let email = normalize_email(admin_email);
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users WHERE email = ? AND account_verified = 1",
    )
    .bind(&email)
    .fetch_one(db)
    .await?;
    if exists > 0 {
        return Ok(());
    }

    let password_hash = hash_password(admin_password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {e}"))?;
    let now = now_rfc3339();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, account_verified, created_at, updated_at)
         VALUES (?, 'Administrator', ?, ?, ?, 1, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&email)
    .bind(&password_hash)
    .bind(ROLE_ADMIN)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::info!(email = %email, "Seeded administrator account");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::notifications::SystemEmailService;

    async fn test_state() -> Arc<AppState> {
        let config = Config::default();
        let email = Arc::new(SystemEmailService::new(config.email.clone()));
        Arc::new(AppState {
            db: db::init_memory().await,
            config,
            email,
        })
    }

    async fn stored_user(db: &DbPool, email: &str) -> User {
        sqlx::query_as("SELECT * FROM users WHERE email = ? ORDER BY created_at DESC LIMIT 1")
            .bind(email)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert_ne!(hash, "correct horse");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_token_generation() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        // Hashing is deterministic and never stores the raw token
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_verification_code_is_five_digits() {
        for _ in 0..100 {
            let code = generate_verification_code();
            assert!((10_000..=99_999).contains(&code));
        }
    }

    #[tokio::test]
    async fn test_register_verify_login_flow() {
        let state = test_state().await;

        register(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Paul".to_string(),
                email: "  Paul@Example.com ".to_string(),
                password: "sandworms".to_string(),
            }),
        )
        .await
        .unwrap();

        let pending = stored_user(&state.db, "paul@example.com").await;
        assert!(!pending.account_verified);
        let code = pending.verification_code.unwrap();

        // Login is refused until the account is verified
        let err = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "paul@example.com".to_string(),
                password: "sandworms".to_string(),
            }),
        )
        .await;
        assert!(err.is_err());

        let verified = verify_otp(
            State(state.clone()),
            Json(VerifyOtpRequest {
                email: "paul@example.com".to_string(),
                otp: code,
            }),
        )
        .await
        .unwrap();
        assert!(verified.0.success);
        assert!(verified.0.user.account_verified);

        let login_response = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "paul@example.com".to_string(),
                password: "sandworms".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(!login_response.0.token.is_empty());

        let current = get_current_user(&state.db, &login_response.0.token)
            .await
            .unwrap();
        assert_eq!(current.email, "paul@example.com");
    }

    #[tokio::test]
    async fn test_register_rejects_bad_passwords() {
        let state = test_state().await;
        for password in ["short", "way-too-long-password"] {
            let result = register(
                State(state.clone()),
                Json(RegisterRequest {
                    name: "Paul".to_string(),
                    email: "paul@example.com".to_string(),
                    password: password.to_string(),
                }),
            )
            .await;
            assert!(result.is_err());
        }
    }

    #[tokio::test]
    async fn test_register_caps_unverified_attempts() {
        let state = test_state().await;
        for _ in 0..MAX_UNVERIFIED_ATTEMPTS {
            register(
                State(state.clone()),
                Json(RegisterRequest {
                    name: "Paul".to_string(),
                    email: "paul@example.com".to_string(),
                    password: "sandworms".to_string(),
                }),
            )
            .await
            .unwrap();
        }

        let result = register(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Paul".to_string(),
                email: "paul@example.com".to_string(),
                password: "sandworms".to_string(),
            }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_verify_otp_rejects_wrong_code_and_dedups() {
        let state = test_state().await;
        for _ in 0..3 {
            register(
                State(state.clone()),
                Json(RegisterRequest {
                    name: "Paul".to_string(),
                    email: "paul@example.com".to_string(),
                    password: "sandworms".to_string(),
                }),
            )
            .await
            .unwrap();
        }

        let result = verify_otp(
            State(state.clone()),
            Json(VerifyOtpRequest {
                email: "paul@example.com".to_string(),
                otp: 1,
            }),
        )
        .await;
        assert!(result.is_err());

        // Older duplicate attempts are dropped even when the code is wrong
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = 'paul@example.com'")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_ensure_admin_user_is_idempotent() {
        let state = test_state().await;
        let auth = AuthConfig {
            admin_email: Some("admin@example.com".to_string()),
            admin_password: Some("open sesame".to_string()),
            session_ttl_days: 7,
        };

        ensure_admin_user(&state.db, &auth).await.unwrap();
        ensure_admin_user(&state.db, &auth).await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = 'admin@example.com'")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(count, 1);

        let admin = stored_user(&state.db, "admin@example.com").await;
        assert!(admin.is_admin());
        assert!(admin.account_verified);
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let state = test_state().await;
        let auth = AuthConfig {
            admin_email: Some("admin@example.com".to_string()),
            admin_password: Some("open sesame".to_string()),
            session_ttl_days: 7,
        };
        ensure_admin_user(&state.db, &auth).await.unwrap();

        let response = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "admin@example.com".to_string(),
                password: "open sesame".to_string(),
            }),
        )
        .await
        .unwrap();
        let token = response.0.token;
        assert!(get_current_user(&state.db, &token).await.is_ok());

        let mut headers = HeaderMap::new();
        headers.insert("Authorization", format!("Bearer {token}").parse().unwrap());
        logout(State(state.clone()), headers).await.unwrap();

        assert!(get_current_user(&state.db, &token).await.is_err());
    }
}
