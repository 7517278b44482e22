pub mod api;
pub mod config;
pub mod db;
pub mod jobs;
pub mod lending;
pub mod notifications;
pub mod utils;

pub use db::DbPool;

use std::sync::Arc;

use config::Config;
use notifications::SystemEmailService;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub email: Arc<SystemEmailService>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let email = Arc::new(SystemEmailService::new(config.email.clone()));
        Self { config, db, email }
    }
}
