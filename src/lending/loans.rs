//! Loan recording, returns, and ledger maintenance.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{fine, LendingError};
use crate::db::{Book, Borrow, BorrowedBook, DbPool, User, REQUEST_APPROVED};
use crate::utils::{normalize_email, now_rfc3339, parse_rfc3339, to_rfc3339};

/// How long a borrower may keep a book before fines accrue.
pub const LOAN_PERIOD_DAYS: i64 = 7;

/// Outcome of a successful return, for display to the borrower.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnOutcome {
    pub fine: f64,
    pub total_charge: f64,
}

async fn load_book(db: &DbPool, book_id: &str) -> Result<Book, LendingError> {
    sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ?")
        .bind(book_id)
        .fetch_optional(db)
        .await?
        .ok_or(LendingError::BookNotFound)
}

async fn load_verified_user(db: &DbPool, email: &str) -> Result<User, LendingError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ? AND account_verified = 1")
        .bind(normalize_email(email))
        .fetch_optional(db)
        .await?
        .ok_or(LendingError::UserNotFound)
}

/// Record a loan of `book_id` to the user identified by `user_email`.
///
/// Writes run in a fixed order: book decrement, then the user's loan
/// cache, then the ledger. There is no rollback; a failure after the
/// decrement surfaces as an error and leaves the book decremented until
/// reconciled. The decrement itself is conditional on `quantity > 0`, so
/// two racing calls for the last copy cannot drive the count negative.
pub async fn record_loan(db: &DbPool, book_id: &str, user_email: &str) -> Result<Borrow, LendingError> {
    let book = load_book(db, book_id).await?;
    let user = load_verified_user(db, user_email).await?;

    if book.quantity < 1 {
        return Err(LendingError::Unavailable);
    }

    let open_loans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM borrowed_books WHERE user_id = ? AND book_id = ? AND returned = 0",
    )
    .bind(&user.id)
    .bind(&book.id)
    .fetch_one(db)
    .await?;
    if open_loans > 0 {
        return Err(LendingError::AlreadyBorrowed);
    }

    // Conditional decrement; `quantity` on the right-hand side is the
    // pre-update value, so `available` ends up as (quantity - 1) > 0.
    let decremented = sqlx::query(
        "UPDATE books
         SET quantity = quantity - 1,
             available = CASE WHEN quantity > 1 THEN 1 ELSE 0 END,
             updated_at = ?
         WHERE id = ? AND quantity > 0",
    )
    .bind(now_rfc3339())
    .bind(&book.id)
    .execute(db)
    .await?;
    if decremented.rows_affected() == 0 {
        return Err(LendingError::Unavailable);
    }

    let now = Utc::now();
    let borrow_date = to_rfc3339(now);
    let due_date = to_rfc3339(now + Duration::days(LOAN_PERIOD_DAYS));

    sqlx::query(
        "INSERT INTO borrowed_books (id, user_id, book_id, book_title, borrow_date, due_date, returned)
         VALUES (?, ?, ?, ?, ?, ?, 0)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(&book.id)
    .bind(&book.title)
    .bind(&borrow_date)
    .bind(&due_date)
    .execute(db)
    .await?;

    let ledger_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO borrows (id, user_id, user_name, user_email, book_id, book_title, charge,
                              borrow_date, due_date, return_date, fine, notified, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, 0, ?)",
    )
    .bind(&ledger_id)
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&book.id)
    .bind(&book.title)
    .bind(book.charge)
    .bind(&borrow_date)
    .bind(&due_date)
    .bind(now_rfc3339())
    .execute(db)
    .await?;

    let entry: Borrow = sqlx::query_as("SELECT * FROM borrows WHERE id = ?")
        .bind(&ledger_id)
        .fetch_one(db)
        .await?;

    tracing::info!(
        book = %book.title,
        user = %user.email,
        due = %due_date,
        "Loan recorded"
    );

    Ok(entry)
}

/// Close the ledger entry `record_id` for the user identified by `email`.
///
/// The user's cache entry governs whether the return is legal; the ledger
/// row is then closed with the computed fine. Mutation order is the reverse
/// of `record_loan`: cache, book increment, ledger.
pub async fn return_loan(db: &DbPool, record_id: &str, email: &str) -> Result<ReturnOutcome, LendingError> {
    let record: Borrow = sqlx::query_as("SELECT * FROM borrows WHERE id = ?")
        .bind(record_id)
        .fetch_optional(db)
        .await?
        .ok_or(LendingError::RecordNotFound)?;

    let book = load_book(db, &record.book_id).await?;
    let user = load_verified_user(db, email).await?;

    let entry: Option<BorrowedBook> = sqlx::query_as(
        "SELECT * FROM borrowed_books WHERE user_id = ? AND book_id = ? AND returned = 0",
    )
    .bind(&user.id)
    .bind(&record.book_id)
    .fetch_optional(db)
    .await?;
    let entry = entry.ok_or(LendingError::NotBorrowedOrAlreadyReturned)?;

    sqlx::query("UPDATE borrowed_books SET returned = 1 WHERE id = ?")
        .bind(&entry.id)
        .execute(db)
        .await?;

    // quantity + 1 is always positive, so the book becomes available again
    sqlx::query(
        "UPDATE books SET quantity = quantity + 1, available = 1, updated_at = ? WHERE id = ?",
    )
    .bind(now_rfc3339())
    .bind(&book.id)
    .execute(db)
    .await?;

    let now = Utc::now();
    let due = parse_rfc3339(&record.due_date)
        .map_err(|e| LendingError::Validation(e.to_string()))?;
    let owed = fine::fine(due, now);

    sqlx::query("UPDATE borrows SET return_date = ?, fine = ? WHERE id = ?")
        .bind(to_rfc3339(now))
        .bind(owed)
        .bind(&record.id)
        .execute(db)
        .await?;

    tracing::info!(
        book = %record.book_title,
        user = %user.email,
        fine = owed,
        "Loan returned"
    );

    Ok(ReturnOutcome {
        fine: owed,
        total_charge: record.charge + owed,
    })
}

/// Delete the given ledger entries and clean up the owning users' loan
/// caches and their matching approved requests.
///
/// Cleanup is grouped per user to batch the cache rewrite. A user that no
/// longer exists is skipped (the ledger rows are still deleted); that
/// divergence is accepted, not retried.
pub async fn delete_records(db: &DbPool, ids: &[String]) -> Result<u64, LendingError> {
    if ids.is_empty() {
        return Err(LendingError::Validation(
            "Invalid request: ids array is required".to_string(),
        ));
    }

    let mut records = Vec::new();
    for id in ids {
        let record: Option<Borrow> = sqlx::query_as("SELECT * FROM borrows WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?;
        if let Some(record) = record {
            records.push(record);
        }
    }
    if records.is_empty() {
        return Err(LendingError::RecordNotFound);
    }

    cleanup_user_caches(db, &records, false).await?;

    let mut deleted = 0;
    for record in &records {
        deleted += sqlx::query("DELETE FROM borrows WHERE id = ?")
            .bind(&record.id)
            .execute(db)
            .await?
            .rows_affected();
    }

    Ok(deleted)
}

/// Delete every ledger entry, with the same per-user cache cleanup as
/// `delete_records`. For a wiped ledger all of a user's approved requests
/// go too, not just the ones matching a deleted row.
pub async fn delete_all_records(db: &DbPool) -> Result<u64, LendingError> {
    let records: Vec<Borrow> = sqlx::query_as("SELECT * FROM borrows").fetch_all(db).await?;

    cleanup_user_caches(db, &records, true).await?;

    let deleted = sqlx::query("DELETE FROM borrows")
        .execute(db)
        .await?
        .rows_affected();

    Ok(deleted)
}

async fn cleanup_user_caches(
    db: &DbPool,
    records: &[Borrow],
    wipe_all_approved: bool,
) -> Result<(), LendingError> {
    let mut by_user: HashMap<&str, Vec<&Borrow>> = HashMap::new();
    for record in records {
        by_user.entry(record.user_id.as_str()).or_default().push(record);
    }

    for (user_id, user_records) in by_user {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db)
            .await?;
        let Some(user) = user else {
            tracing::warn!(user_id, "Owning user missing, skipping cache cleanup");
            continue;
        };

        for record in &user_records {
            // Cache rows are matched by book plus the exact borrow
            // timestamp, so other loans of the same title survive.
            sqlx::query(
                "DELETE FROM borrowed_books WHERE user_id = ? AND book_id = ? AND borrow_date = ?",
            )
            .bind(&user.id)
            .bind(&record.book_id)
            .bind(&record.borrow_date)
            .execute(db)
            .await?;

            if !wipe_all_approved {
                sqlx::query(
                    "DELETE FROM borrow_requests WHERE user_id = ? AND book_id = ? AND status = ?",
                )
                .bind(&user.id)
                .bind(&record.book_id)
                .bind(REQUEST_APPROVED)
                .execute(db)
                .await?;
            }
        }

        if wipe_all_approved {
            sqlx::query("DELETE FROM borrow_requests WHERE user_id = ? AND status = ?")
                .bind(&user.id)
                .bind(REQUEST_APPROVED)
                .execute(db)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::lending::testing::{book_by_id, seed_book, seed_user};

    #[tokio::test]
    async fn test_record_loan_decrements_and_writes_both_stores() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        let user = seed_user(&pool, "Paul", "paul@example.com", true).await;

        let entry = record_loan(&pool, &book.id, "paul@example.com").await.unwrap();
        assert_eq!(entry.book_title, "Dune");
        assert_eq!(entry.charge, 3.0);
        assert!(entry.return_date.is_none());
        assert_eq!(entry.fine, 0.0);

        let book = book_by_id(&pool, &book.id).await;
        assert_eq!(book.quantity, 0);
        assert!(!book.available);

        let cached: Vec<BorrowedBook> =
            sqlx::query_as("SELECT * FROM borrowed_books WHERE user_id = ?")
                .bind(&user.id)
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(cached.len(), 1);
        assert!(!cached[0].returned);
        assert_eq!(cached[0].due_date, entry.due_date);
    }

    #[tokio::test]
    async fn test_record_loan_unknown_book_or_user() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        assert!(matches!(
            record_loan(&pool, "missing", "paul@example.com").await,
            Err(LendingError::BookNotFound)
        ));
        assert!(matches!(
            record_loan(&pool, &book.id, "ghost@example.com").await,
            Err(LendingError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_record_loan_email_is_normalized() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 2).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        assert!(record_loan(&pool, &book.id, "  Paul@Example.COM ").await.is_ok());
    }

    #[tokio::test]
    async fn test_record_loan_out_of_stock() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 0).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        assert!(matches!(
            record_loan(&pool, &book.id, "paul@example.com").await,
            Err(LendingError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn test_double_borrow_same_title_rejected() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 5).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        record_loan(&pool, &book.id, "paul@example.com").await.unwrap();
        assert!(matches!(
            record_loan(&pool, &book.id, "paul@example.com").await,
            Err(LendingError::AlreadyBorrowed)
        ));
    }

    #[tokio::test]
    async fn test_return_restores_quantity_and_availability() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        let entry = record_loan(&pool, &book.id, "paul@example.com").await.unwrap();
        let outcome = return_loan(&pool, &entry.id, "paul@example.com").await.unwrap();
        assert_eq!(outcome.fine, 0.0);
        assert_eq!(outcome.total_charge, 3.0);

        let book = book_by_id(&pool, &book.id).await;
        assert_eq!(book.quantity, 1);
        assert!(book.available);

        let closed: Borrow = sqlx::query_as("SELECT * FROM borrows WHERE id = ?")
            .bind(&entry.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(closed.return_date.is_some());
    }

    #[tokio::test]
    async fn test_return_eight_days_late_charges_hourly_fine() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        let entry = record_loan(&pool, &book.id, "paul@example.com").await.unwrap();

        // Push the due date 8 days and a second into the past, so the
        // return is unambiguously inside the 193rd started hour
        let past_due = to_rfc3339(Utc::now() - Duration::days(8) - Duration::seconds(1));
        sqlx::query("UPDATE borrows SET due_date = ? WHERE id = ?")
            .bind(&past_due)
            .bind(&entry.id)
            .execute(&pool)
            .await
            .unwrap();

        let outcome = return_loan(&pool, &entry.id, "paul@example.com").await.unwrap();
        assert_eq!(outcome.fine, 96.5);
        assert_eq!(outcome.total_charge, 99.5);
    }

    #[tokio::test]
    async fn test_double_return_rejected() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;

        let entry = record_loan(&pool, &book.id, "paul@example.com").await.unwrap();
        return_loan(&pool, &entry.id, "paul@example.com").await.unwrap();

        assert!(matches!(
            return_loan(&pool, &entry.id, "paul@example.com").await,
            Err(LendingError::NotBorrowedOrAlreadyReturned)
        ));
    }

    #[tokio::test]
    async fn test_delete_records_cleans_owning_user_cache() {
        let pool = db::init_memory().await;
        let book = seed_book(&pool, "Dune", 3.0, 2).await;
        let user = seed_user(&pool, "Paul", "paul@example.com", true).await;

        let entry = record_loan(&pool, &book.id, "paul@example.com").await.unwrap();
        let deleted = delete_records(&pool, &[entry.id.clone()]).await.unwrap();
        assert_eq!(deleted, 1);

        let cached: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM borrowed_books WHERE user_id = ?")
            .bind(&user.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(cached, 0);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM borrows")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_delete_records_requires_ids() {
        let pool = db::init_memory().await;
        assert!(matches!(
            delete_records(&pool, &[]).await,
            Err(LendingError::Validation(_))
        ));
        assert!(matches!(
            delete_records(&pool, &["missing".to_string()]).await,
            Err(LendingError::RecordNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_all_records() {
        let pool = db::init_memory().await;
        let first = seed_book(&pool, "Dune", 3.0, 1).await;
        let second = seed_book(&pool, "Hyperion", 2.0, 1).await;
        seed_user(&pool, "Paul", "paul@example.com", true).await;
        seed_user(&pool, "Sol", "sol@example.com", true).await;

        record_loan(&pool, &first.id, "paul@example.com").await.unwrap();
        record_loan(&pool, &second.id, "sol@example.com").await.unwrap();

        let deleted = delete_all_records(&pool).await.unwrap();
        assert_eq!(deleted, 2);

        let cached: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM borrowed_books")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(cached, 0);
    }
}
