//! User administration endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::{hash_password, require_admin};
use super::error::ApiError;
use crate::db::{User, UserResponse, ROLE_ADMIN};
use crate::utils::{normalize_email, now_rfc3339};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub success: bool,
    pub users: Vec<UserResponse>,
}

#[derive(Debug, Deserialize)]
pub struct AddAdminRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminCreatedResponse {
    pub success: bool,
    pub message: String,
    pub user: UserResponse,
}

/// List all verified accounts (admin only)
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<UserListResponse>, ApiError> {
    require_admin(&user)?;

    let users: Vec<User> =
        sqlx::query_as("SELECT * FROM users WHERE account_verified = 1 ORDER BY created_at")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(UserListResponse {
        success: true,
        users: users.into_iter().map(UserResponse::from).collect(),
    }))
}

/// Create another administrator account (admin only)
///
/// Admin accounts skip the verification flow and are usable immediately.
pub async fn add_admin(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<AddAdminRequest>,
) -> Result<Json<AdminCreatedResponse>, ApiError> {
    require_admin(&user)?;

    let email = normalize_email(&request.email);
    if request.name.trim().is_empty() || email.is_empty() || request.password.is_empty() {
        return Err(ApiError::validation("Please fill all the fields"));
    }
    if !email.contains('@') {
        return Err(ApiError::validation("Invalid email address"));
    }

    let exists: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND account_verified = 1")
            .bind(&email)
            .fetch_one(&state.db)
            .await?;
    if exists > 0 {
        return Err(ApiError::bad_request("User already exists"));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {e}")))?;
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, account_verified, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&id)
    .bind(request.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(ROLE_ADMIN)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let created: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(email = %email, "Administrator account created");

    Ok(Json(AdminCreatedResponse {
        success: true,
        message: "Admin added successfully".to_string(),
        user: UserResponse::from(created),
    }))
}
