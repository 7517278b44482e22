//! Core lending workflow: borrow requests, loans/returns, fines.
//!
//! Everything in here is HTTP-agnostic. Operations are plain async
//! functions over the pool and surface exactly one `LendingError` kind per
//! failure path; the API layer maps those onto status codes.
//!
//! The multi-table writes (book, per-user cache, ledger) run in a fixed
//! order without a transaction. A failure mid-sequence leaves the earlier
//! writes in place; callers get the error and later operations re-derive
//! state from the current rows instead of trusting paired counters.

pub mod fine;
pub mod loans;
pub mod requests;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LendingError {
    #[error("Book not found")]
    BookNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("Request not found")]
    RequestNotFound,
    #[error("Borrow record not found")]
    RecordNotFound,
    #[error("Book not available")]
    Unavailable,
    #[error("You already have a pending request for this book")]
    DuplicatePending,
    #[error("You have already borrowed this book and have not returned it yet")]
    AlreadyBorrowed,
    #[error("This request has already been processed")]
    AlreadyProcessed,
    #[error("This book was not borrowed by you or has already been returned")]
    NotBorrowedOrAlreadyReturned,
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
