//! Background maintenance jobs.
//!
//! Both jobs are interval loops on the shared runtime: the overdue
//! notifier and the unverified-account sweeper. Each exposes a `run_once`
//! with an injectable clock so tests can drive a single cycle directly.

pub mod notifier;
pub mod sweeper;

use std::sync::Arc;

use crate::config::JobsConfig;
use crate::db::DbPool;
use crate::notifications::SystemEmailService;

/// Spawn all periodic jobs.
pub fn spawn_all(db: DbPool, email: Arc<SystemEmailService>, config: JobsConfig) {
    notifier::spawn(db.clone(), email, config.clone());
    sweeper::spawn(db, config);
}
