//! Borrow-request workflow endpoints.
//!
//! Thin HTTP wrappers over [`crate::lending::requests`]; all state-machine
//! rules live there.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::require_admin;
use super::error::ApiError;
use super::MessageResponse;
use crate::db::{BorrowRequest, BorrowRequestView, User};
use crate::lending::requests;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RequestCreatedResponse {
    pub success: bool,
    pub message: String,
    pub borrow_request: BorrowRequest,
}

#[derive(Debug, Serialize)]
pub struct RequestListResponse {
    pub success: bool,
    pub requests: Vec<BorrowRequestView>,
}

/// File a borrow request for a book
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    _user: User,
    Path(book_id): Path<String>,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<RequestCreatedResponse>, ApiError> {
    let request = requests::create_request(&state.db, &book_id, &body.email).await?;

    Ok(Json(RequestCreatedResponse {
        success: true,
        message: "Borrow request submitted".to_string(),
        borrow_request: request,
    }))
}

/// List all pending requests (admin only)
pub async fn pending_requests(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<RequestListResponse>, ApiError> {
    require_admin(&user)?;

    let requests = requests::pending(&state.db).await?;
    Ok(Json(RequestListResponse {
        success: true,
        requests,
    }))
}

/// Approve a pending request and record the loan (admin only)
pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_admin(&user)?;

    requests::approve(&state.db, &id).await?;
    Ok(Json(MessageResponse::ok(
        "Borrow request approved and book borrowed successfully",
    )))
}

/// Reject a pending request (admin only)
pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_admin(&user)?;

    requests::reject(&state.db, &id).await?;
    Ok(Json(MessageResponse::ok("Borrow request rejected")))
}

/// List the calling user's own requests, newest first
pub async fn my_requests(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<RequestListResponse>, ApiError> {
    let requests = requests::for_user(&state.db, &user.id).await?;
    Ok(Json(RequestListResponse {
        success: true,
        requests,
    }))
}
