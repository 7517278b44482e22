//! User account, session and per-user loan cache models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_USER: &str = "User";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub account_verified: bool,
    pub verification_code: Option<i64>,
    pub verification_expires_at: Option<String>,
    pub reset_password_token: Option<String>,
    pub reset_password_expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub account_verified: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            account_verified: user.account_verified,
            created_at: user.created_at,
        }
    }
}

/// One row of the denormalized per-user loan cache. Mirrors a ledger entry
/// while the loan is open; `returned` flips on return.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BorrowedBook {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub book_title: String,
    pub borrow_date: String,
    pub due_date: String,
    pub returned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub user: UserResponse,
}
