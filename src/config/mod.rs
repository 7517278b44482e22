use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Email for the seeded administrator account. No admin is created
    /// when unset.
    pub admin_email: Option<String>,
    /// Password for the seeded administrator account.
    pub admin_password: Option<String>,
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_email: None,
            admin_password: None,
            session_ttl_days: default_session_ttl_days(),
        }
    }
}

fn default_session_ttl_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl EmailConfig {
    /// Email sending works only when a host and a from address are set.
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "Libris".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Interval between overdue-reminder scans in seconds (default: 30 min).
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_secs: u64,
    /// A loan is reminded about once it is overdue by more than this many hours.
    #[serde(default = "default_overdue_grace_hours")]
    pub overdue_grace_hours: i64,
    /// Interval between unverified-account sweeps in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Unverified accounts older than this many minutes are purged.
    #[serde(default = "default_unverified_ttl_minutes")]
    pub unverified_ttl_minutes: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            reminder_interval_secs: default_reminder_interval(),
            overdue_grace_hours: default_overdue_grace_hours(),
            sweep_interval_secs: default_sweep_interval(),
            unverified_ttl_minutes: default_unverified_ttl_minutes(),
        }
    }
}

fn default_reminder_interval() -> u64 {
    30 * 60
}

fn default_overdue_grace_hours() -> i64 {
    24
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_unverified_ttl_minutes() -> i64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            jobs: JobsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
