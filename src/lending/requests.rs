//! Borrow request state machine.
//!
//! Requests start `pending` and move to exactly one terminal state. A
//! pending request reserves nothing: availability is re-checked at
//! approval, because stock can change between request and approval.

use uuid::Uuid;

use super::{loans, LendingError};
use crate::db::{
    Book, BorrowRequest, BorrowRequestView, DbPool, User, REQUEST_APPROVED, REQUEST_PENDING,
    REQUEST_REJECTED,
};
use crate::utils::{normalize_email, now_rfc3339};

/// File a new request by `requester_email` for `book_id`.
///
/// At most one pending request may exist per (user, book) pair; duplicates
/// are rejected here, at creation time.
pub async fn create_request(
    db: &DbPool,
    book_id: &str,
    requester_email: &str,
) -> Result<BorrowRequest, LendingError> {
    let book: Option<Book> = sqlx::query_as("SELECT * FROM books WHERE id = ?")
        .bind(book_id)
        .fetch_optional(db)
        .await?;
    let book = book.ok_or(LendingError::BookNotFound)?;

    if book.quantity < 1 || !book.available {
        return Err(LendingError::Unavailable);
    }

    let user: Option<User> =
        sqlx::query_as("SELECT * FROM users WHERE email = ? AND account_verified = 1")
            .bind(normalize_email(requester_email))
            .fetch_optional(db)
            .await?;
    let user = user.ok_or(LendingError::UserNotFound)?;

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM borrow_requests WHERE user_id = ? AND book_id = ? AND status = ?",
    )
    .bind(&user.id)
    .bind(&book.id)
    .bind(REQUEST_PENDING)
    .fetch_one(db)
    .await?;
    if pending > 0 {
        return Err(LendingError::DuplicatePending);
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    sqlx::query(
        "INSERT INTO borrow_requests (id, user_id, user_name, user_email, book_id, request_date, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&book.id)
    .bind(&now)
    .bind(REQUEST_PENDING)
    .bind(&now)
    .execute(db)
    .await?;

    let request: BorrowRequest = sqlx::query_as("SELECT * FROM borrow_requests WHERE id = ?")
        .bind(&id)
        .fetch_one(db)
        .await?;

    tracing::info!(book = %book.title, user = %user.email, "Borrow request submitted");

    Ok(request)
}

async fn load_pending(db: &DbPool, request_id: &str) -> Result<BorrowRequest, LendingError> {
    let request: Option<BorrowRequest> =
        sqlx::query_as("SELECT * FROM borrow_requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(db)
            .await?;
    let request = request.ok_or(LendingError::RequestNotFound)?;

    if request.status != REQUEST_PENDING {
        return Err(LendingError::AlreadyProcessed);
    }
    Ok(request)
}

async fn set_status(db: &DbPool, request_id: &str, status: &str) -> Result<(), LendingError> {
    sqlx::query("UPDATE borrow_requests SET status = ? WHERE id = ?")
        .bind(status)
        .bind(request_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Approve a pending request and record the loan it asked for.
///
/// Availability is re-validated inside `record_loan`. If recording fails
/// (say the last copy went out between request and approval) the request
/// row is reverted to `pending` so the admin can retry once stock returns;
/// the revert is best effort and its own failure is only logged.
pub async fn approve(db: &DbPool, request_id: &str) -> Result<(), LendingError> {
    let request = load_pending(db, request_id).await?;

    set_status(db, request_id, REQUEST_APPROVED).await?;

    if let Err(err) = loans::record_loan(db, &request.book_id, &request.user_email).await {
        if let Err(revert_err) = set_status(db, request_id, REQUEST_PENDING).await {
            tracing::warn!(
                request = request_id,
                error = %revert_err,
                "Failed to revert request after loan recording failed"
            );
        }
        return Err(err);
    }

    tracing::info!(request = request_id, user = %request.user_email, "Borrow request approved");
    Ok(())
}

/// Reject a pending request. No other side effects.
pub async fn reject(db: &DbPool, request_id: &str) -> Result<(), LendingError> {
    load_pending(db, request_id).await?;
    set_status(db, request_id, REQUEST_REJECTED).await?;

    tracing::info!(request = request_id, "Borrow request rejected");
    Ok(())
}

const VIEW_COLUMNS: &str = "r.id, r.user_id, r.user_name, r.user_email, r.book_id, \
                            b.title AS book_title, b.author AS book_author, b.charge AS charge, \
                            r.request_date, r.status";

/// All pending requests, newest first.
pub async fn pending(db: &DbPool) -> Result<Vec<BorrowRequestView>, LendingError> {
    let rows = sqlx::query_as(&format!(
        "SELECT {VIEW_COLUMNS}
         FROM borrow_requests r
         LEFT JOIN books b ON b.id = r.book_id
         WHERE r.status = ?
         ORDER BY r.request_date DESC"
    ))
    .bind(REQUEST_PENDING)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// All of one user's requests regardless of state, newest first.
pub async fn for_user(db: &DbPool, user_id: &str) -> Result<Vec<BorrowRequestView>, LendingError> {
    let rows = sqlx::query_as(&format!(
        "SELECT {VIEW_COLUMNS}
         FROM borrow_requests r
         LEFT JOIN books b ON b.id = r.book_id
         WHERE r.user_id = ?
         ORDER BY r.request_date DESC"
    ))
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::lending::testing::{book_by_id, seed_book, seed_user};

    #[tokio::test]
    async fn test_create_request_snapshots_user() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        let request = create_request(&pool, &book.id, "paul@example.com").await.unwrap();
        assert_eq!(request.status, REQUEST_PENDING);
        assert_eq!(request.user_name, "Paul");
        assert_eq!(request.user_email, "paul@example.com");

        // No reservation: stock untouched by a pending request
        let book = book_by_id(&pool, &book.id).await;
        assert_eq!(book.quantity, 1);
    }

    #[tokio::test]
    async fn test_create_request_failure_paths() {
        let pool = db::init_memory().await;
        let out_of_stock = seed_book(&pool, "Dune", 3.0, 0).await;
        let in_stock = seed_book(&pool, "Hyperion", 2.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;
        seed_user(&pool, "Ghost", "ghost@example.com", false).await;

        assert!(matches!(
            create_request(&pool, "missing", "paul@example.com").await,
            Err(LendingError::BookNotFound)
        ));
        assert!(matches!(
            create_request(&pool, &out_of_stock.id, "paul@example.com").await,
            Err(LendingError::Unavailable)
        ));
        // Unverified accounts cannot request
        assert!(matches!(
            create_request(&pool, &in_stock.id, "ghost@example.com").await,
            Err(LendingError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_pending_rejected_until_terminal() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        let first = create_request(&pool, &book.id, "paul@example.com").await.unwrap();
        assert!(matches!(
            create_request(&pool, &book.id, "paul@example.com").await,
            Err(LendingError::DuplicatePending)
        ));

        // Once the first request is rejected a new one may be filed
        reject(&pool, &first.id).await.unwrap();
        assert!(create_request(&pool, &book.id, "paul@example.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_approve_records_loan_and_is_terminal() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        let request = create_request(&pool, &book.id, "paul@example.com").await.unwrap();
        approve(&pool, &request.id).await.unwrap();

        let book = book_by_id(&pool, &book.id).await;
        assert_eq!(book.quantity, 0);
        assert!(!book.available);

        let ledger: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrows WHERE book_id = ? AND return_date IS NULL",
        )
        .bind(&book.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(ledger, 1);

        assert!(matches!(
            approve(&pool, &request.id).await,
            Err(LendingError::AlreadyProcessed)
        ));
        assert!(matches!(
            reject(&pool, &request.id).await,
            Err(LendingError::AlreadyProcessed)
        ));
    }

    #[tokio::test]
    async fn test_approve_reverts_to_pending_when_stock_ran_out() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;
        seed_user(&pool, "Leto", "leto@example.com", true).await;

        let paul = create_request(&pool, &book.id, "paul@example.com").await.unwrap();
        let leto = create_request(&pool, &book.id, "leto@example.com").await.unwrap();

        approve(&pool, &paul.id).await.unwrap();
        // Last copy is gone; approving the second request fails and the
        // request stays actionable
        assert!(matches!(
            approve(&pool, &leto.id).await,
            Err(LendingError::Unavailable)
        ));

        let status: String = sqlx::query_scalar("SELECT status FROM borrow_requests WHERE id = ?")
            .bind(&leto.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, REQUEST_PENDING);
    }

    #[tokio::test]
    async fn test_listings_order_newest_first() {
        let pool = db::init_memory().await;
        let first = seed_book(&pool, "Dune", 3.0, 1).await;
        let second = seed_book(&pool, "Hyperion", 2.0, 1).await;
        let user = seed_user(&pool, "Paul", "paul@example.com", true).await;

        let older = create_request(&pool, &first.id, "paul@example.com").await.unwrap();
        // Force distinct, ordered request dates
        sqlx::query("UPDATE borrow_requests SET request_date = '2025-01-01T00:00:00.000Z' WHERE id = ?")
            .bind(&older.id)
            .execute(&pool)
            .await
            .unwrap();
        create_request(&pool, &second.id, "paul@example.com").await.unwrap();

        let rows = pending(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].book_title.as_deref(), Some("Hyperion"));
        assert_eq!(rows[1].book_title.as_deref(), Some("Dune"));

        let mine = for_user(&pool, &user.id).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].book_author.as_deref(), Some("Test Author"));
    }
}
