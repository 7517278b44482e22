pub mod auth;
mod books;
mod borrow_requests;
mod borrows;
pub mod error;
mod users;

pub use error::{ApiError, ErrorCode};

use axum::{
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

/// Plain success envelope shared by handlers without a payload
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public; /me and /logout check the token themselves)
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/password/forgot", post(auth::forgot_password))
        .route("/password/reset/:token", put(auth::reset_password));

    // Protected API routes; every handler authenticates via the User
    // extractor, admin-only handlers additionally check the role
    let api_routes = Router::new()
        // Catalog
        .route("/books", get(books::list_books))
        .route("/books", post(books::add_book))
        .route("/books/:id", delete(books::delete_book))
        // Users
        .route("/users", get(users::list_users))
        .route("/users/add-admin", post(users::add_admin))
        // Borrow requests
        .route("/borrow-requests/request/:book_id", post(borrow_requests::create_request))
        .route("/borrow-requests/requests", get(borrow_requests::pending_requests))
        .route("/borrow-requests/approve/:id", post(borrow_requests::approve_request))
        .route("/borrow-requests/reject/:id", post(borrow_requests::reject_request))
        .route("/borrow-requests/my-requests", get(borrow_requests::my_requests))
        // Loan ledger
        .route("/borrow/my-borrowed-books", get(borrows::my_borrowed_books))
        .route("/borrow/admin/borrowed-books", get(borrows::all_borrowed_books))
        .route("/borrow/record-borrowed-book/:book_id", post(borrows::record_borrowed_book))
        .route("/borrow/return-borrowed-book/:id", put(borrows::return_borrowed_book))
        .route("/borrow/delete-records", delete(borrows::delete_records))
        .route("/borrow/delete-all-records", delete(borrows::delete_all_records));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
