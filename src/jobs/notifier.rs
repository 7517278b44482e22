//! Overdue-loan reminder job.
//!
//! Scans the ledger for loans overdue past the grace window that have not
//! been reminded about, emails the borrower, then flips `notified`. The
//! flip happens only after a successful send, so a failed send is retried
//! on the next cycle: notification is at-least-once, and a crash between
//! send and persist can duplicate an email.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::time::{interval, Duration as TokioDuration};

use crate::config::JobsConfig;
use crate::db::{Borrow, DbPool};
use crate::notifications::{ReminderMailer, SystemEmailService};
use crate::utils::to_rfc3339;

/// Statistics from one notifier cycle.
#[derive(Debug, Default)]
pub struct NotifyStats {
    pub selected: u64,
    pub notified: u64,
    pub failed: u64,
}

/// Run a single reminder cycle as of `now`.
///
/// A send failure for one entry must not stop the rest of the batch; the
/// failed entry keeps `notified = 0` and is picked up again next cycle.
pub async fn run_once(
    db: &DbPool,
    mailer: &dyn ReminderMailer,
    now: DateTime<Utc>,
    grace_hours: i64,
) -> Result<NotifyStats> {
    let cutoff = to_rfc3339(now - Duration::hours(grace_hours));

    let overdue: Vec<Borrow> = sqlx::query_as(
        "SELECT * FROM borrows WHERE due_date < ? AND return_date IS NULL AND notified = 0",
    )
    .bind(&cutoff)
    .fetch_all(db)
    .await?;

    let mut stats = NotifyStats {
        selected: overdue.len() as u64,
        ..Default::default()
    };

    for entry in overdue {
        match mailer
            .send_return_reminder(
                &entry.user_email,
                &entry.user_name,
                &entry.book_title,
                &entry.due_date,
            )
            .await
        {
            Ok(()) => {
                sqlx::query("UPDATE borrows SET notified = 1 WHERE id = ?")
                    .bind(&entry.id)
                    .execute(db)
                    .await?;
                stats.notified += 1;
                tracing::info!(
                    to = %entry.user_email,
                    book = %entry.book_title,
                    "Return reminder sent"
                );
            }
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(
                    to = %entry.user_email,
                    book = %entry.book_title,
                    error = %e,
                    "Failed to send return reminder, will retry next cycle"
                );
            }
        }
    }

    Ok(stats)
}

/// Spawn the background reminder task.
pub fn spawn(db: DbPool, email: Arc<SystemEmailService>, config: JobsConfig) {
    tracing::info!(
        interval_secs = config.reminder_interval_secs,
        grace_hours = config.overdue_grace_hours,
        "Starting overdue reminder task"
    );

    tokio::spawn(async move {
        let mut tick = interval(TokioDuration::from_secs(config.reminder_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            match run_once(&db, email.as_ref(), Utc::now(), config.overdue_grace_hours).await {
                Ok(stats) if stats.selected > 0 => {
                    tracing::info!(
                        selected = stats.selected,
                        notified = stats.notified,
                        failed = stats.failed,
                        "Reminder cycle completed"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Reminder cycle failed");
                }
            }
        }
    });
}
