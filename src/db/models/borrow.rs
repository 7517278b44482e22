//! Borrow ledger models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Authoritative record of one loan transaction. `return_date` transitions
/// once from NULL to a timestamp; `fine` is frozen at return time;
/// `notified` flips to true after a reminder email and never resets.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Borrow {
    pub id: String,
    // Borrower identity snapshotted at loan time
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub book_id: String,
    pub book_title: String,
    pub charge: f64,
    pub borrow_date: String,
    pub due_date: String,
    pub return_date: Option<String>,
    pub fine: f64,
    pub notified: bool,
    pub created_at: String,
}
