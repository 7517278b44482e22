//! Borrow request models.
//!
//! A request is created `pending` and moves to exactly one of the terminal
//! states `approved` or `rejected`; terminal states are final.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const REQUEST_PENDING: &str = "pending";
pub const REQUEST_APPROVED: &str = "approved";
pub const REQUEST_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BorrowRequest {
    pub id: String,
    // Requester identity snapshotted at request time
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub book_id: String,
    pub request_date: String,
    pub status: String,
    pub created_at: String,
}

/// Listing projection with the referenced book joined in. The book may have
/// been deleted since the request was made, hence the options.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BorrowRequestView {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub book_id: String,
    pub book_title: Option<String>,
    pub book_author: Option<String>,
    pub charge: Option<f64>,
    pub request_date: String,
    pub status: String,
}
