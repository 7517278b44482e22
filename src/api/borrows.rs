//! Loan ledger endpoints.
//!
//! Thin HTTP wrappers over [`crate::lending::loans`]; ordering of writes,
//! fine computation and cache cleanup all live there.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::require_admin;
use super::error::ApiError;
use crate::db::{Borrow, User};
use crate::lending::loans;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BorrowerBody {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRecordsBody {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LedgerListResponse {
    pub success: bool,
    pub borrowed_books: Vec<Borrow>,
}

#[derive(Debug, Serialize)]
pub struct LoanRecordedResponse {
    pub success: bool,
    pub message: String,
    pub record: Borrow,
}

#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    pub success: bool,
    pub message: String,
    pub fine: f64,
    pub total_charge: f64,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
    pub message: String,
    pub deleted: u64,
}

/// List the calling user's ledger entries, newest first
pub async fn my_borrowed_books(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<LedgerListResponse>, ApiError> {
    let entries: Vec<Borrow> =
        sqlx::query_as("SELECT * FROM borrows WHERE user_id = ? ORDER BY borrow_date DESC")
            .bind(&user.id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(LedgerListResponse {
        success: true,
        borrowed_books: entries,
    }))
}

/// List the full ledger (admin only)
pub async fn all_borrowed_books(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<LedgerListResponse>, ApiError> {
    require_admin(&user)?;

    let entries: Vec<Borrow> =
        sqlx::query_as("SELECT * FROM borrows ORDER BY borrow_date DESC")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(LedgerListResponse {
        success: true,
        borrowed_books: entries,
    }))
}

/// Record a loan directly, bypassing the request workflow (admin only)
pub async fn record_borrowed_book(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(book_id): Path<String>,
    Json(body): Json<BorrowerBody>,
) -> Result<Json<LoanRecordedResponse>, ApiError> {
    require_admin(&user)?;

    let record = loans::record_loan(&state.db, &book_id, &body.email).await?;

    Ok(Json(LoanRecordedResponse {
        success: true,
        message: "Book borrowed successfully".to_string(),
        record,
    }))
}

/// Return a borrowed book, settling the fine
pub async fn return_borrowed_book(
    State(state): State<Arc<AppState>>,
    _user: User,
    Path(id): Path<String>,
    Json(body): Json<BorrowerBody>,
) -> Result<Json<ReturnResponse>, ApiError> {
    let outcome = loans::return_loan(&state.db, &id, &body.email).await?;

    Ok(Json(ReturnResponse {
        success: true,
        message: "Book returned successfully".to_string(),
        fine: outcome.fine,
        total_charge: outcome.total_charge,
    }))
}

/// Delete selected ledger entries and their cache rows (admin only)
pub async fn delete_records(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(body): Json<DeleteRecordsBody>,
) -> Result<Json<DeletedResponse>, ApiError> {
    require_admin(&user)?;

    let deleted = loans::delete_records(&state.db, &body.ids).await?;

    Ok(Json(DeletedResponse {
        success: true,
        message: "Records deleted successfully".to_string(),
        deleted,
    }))
}

/// Wipe the entire ledger (admin only)
pub async fn delete_all_records(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<DeletedResponse>, ApiError> {
    require_admin(&user)?;

    let deleted = loans::delete_all_records(&state.db).await?;

    Ok(Json(DeletedResponse {
        success: true,
        message: "All records deleted successfully".to_string(),
        deleted,
    }))
}
