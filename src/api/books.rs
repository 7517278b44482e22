//! Catalog management endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::require_admin;
use super::error::ApiError;
use super::MessageResponse;
use crate::db::{Book, BookResponse, CreateBookRequest, User};
use crate::utils::now_rfc3339;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct BookListResponse {
    pub success: bool,
    pub books: Vec<BookResponse>,
}

#[derive(Debug, Serialize)]
pub struct BookCreatedResponse {
    pub success: bool,
    pub message: String,
    pub book: BookResponse,
}

/// Add a book to the catalog (admin only)
pub async fn add_book(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<CreateBookRequest>,
) -> Result<Json<BookCreatedResponse>, ApiError> {
    require_admin(&user)?;

    if request.title.trim().is_empty()
        || request.author.trim().is_empty()
        || request.description.trim().is_empty()
    {
        return Err(ApiError::validation("Please fill all the fields"));
    }
    if request.charge < 0.0 {
        return Err(ApiError::validation("Charge cannot be negative"));
    }
    if request.quantity < 0 {
        return Err(ApiError::validation("Quantity cannot be negative"));
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        "INSERT INTO books (id, title, author, description, charge, quantity, available, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(request.title.trim())
    .bind(request.author.trim())
    .bind(request.description.trim())
    .bind(request.charge)
    .bind(request.quantity)
    .bind(request.quantity > 0)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let book: Book = sqlx::query_as("SELECT * FROM books WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(title = %book.title, "Book added to catalog");

    Ok(Json(BookCreatedResponse {
        success: true,
        message: "Book added successfully".to_string(),
        book: BookResponse::from(book),
    }))
}

/// List the whole catalog
pub async fn list_books(
    State(state): State<Arc<AppState>>,
    _user: User,
) -> Result<Json<BookListResponse>, ApiError> {
    let books: Vec<Book> = sqlx::query_as("SELECT * FROM books ORDER BY title")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(BookListResponse {
        success: true,
        books: books.into_iter().map(BookResponse::from).collect(),
    }))
}

/// Remove a book from the catalog (admin only)
///
/// Existing ledger and cache rows keep their snapshot of the title, so
/// deleting a book never rewrites borrow history.
pub async fn delete_book(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_admin(&user)?;

    let deleted = sqlx::query("DELETE FROM books WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::not_found("Book not found"));
    }

    Ok(Json(MessageResponse::ok("Book deleted successfully")))
}
