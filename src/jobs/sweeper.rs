//! Unverified-account sweeper.
//!
//! Registrations that never verify their code are purged once they pass
//! the TTL. A single batch delete per cycle; nothing else references the
//! rows (sessions require a verified account).

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::time::{interval, Duration as TokioDuration};

use crate::config::JobsConfig;
use crate::db::DbPool;
use crate::utils::to_rfc3339;

/// Run a single sweep as of `now`; returns the number of purged accounts.
pub async fn run_once(db: &DbPool, now: DateTime<Utc>, ttl_minutes: i64) -> Result<u64> {
    let cutoff = to_rfc3339(now - Duration::minutes(ttl_minutes));

    let purged = sqlx::query("DELETE FROM users WHERE account_verified = 0 AND created_at < ?")
        .bind(&cutoff)
        .execute(db)
        .await?
        .rows_affected();

    if purged > 0 {
        tracing::info!(purged, "Purged expired unverified accounts");
    }

    Ok(purged)
}

/// Spawn the background sweeper task.
pub fn spawn(db: DbPool, config: JobsConfig) {
    tracing::info!(
        interval_secs = config.sweep_interval_secs,
        ttl_minutes = config.unverified_ttl_minutes,
        "Starting unverified-account sweeper"
    );

    tokio::spawn(async move {
        let mut tick = interval(TokioDuration::from_secs(config.sweep_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = run_once(&db, Utc::now(), config.unverified_ttl_minutes).await {
                tracing::error!(error = %e, "Account sweep failed");
            }
        }
    });
}
