use anyhow::{Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ACME_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub health_check_period: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub listen_addr: String,
    pub certs_dir: PathBuf,
    pub acme_contact_email: String,
    pub acme_directory_url: String,
    pub acme_storage_dir: PathBuf,
    pub renewal_interval_hours: u64,
    pub renewal_threshold_days: i64,
    pub container_runtime: String,
    pub system_actor: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        // Load .env early so process env reads pick it up.
        let _ = dotenvy::dotenv();

        let url = env::var("DATABASE_URL").map_err(|_| anyhow!("DATABASE_URL is required"))?;
        let database = DatabaseConfig {
            url,
            max_connections: env_u64("DB_MAX_CONNECTIONS", 10).clamp(1, u32::MAX as u64) as u32,
            connect_timeout: Duration::from_secs(env_u64("DB_CONNECT_TIMEOUT_SECS", 5).max(1)),
            operation_timeout: Duration::from_secs(env_u64("DB_OPERATION_TIMEOUT_SECS", 10).max(1)),
            health_check_period: Duration::from_secs(env_u64("DB_HEALTH_CHECK_SECS", 30).max(1)),
        };

        let acme_contact_email = env::var("ACME_CONTACT_EMAIL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("ACME_CONTACT_EMAIL is required"))?;

        let renewal_interval_hours = env_u64("RENEWAL_INTERVAL_HOURS", 24);
        if renewal_interval_hours == 0 {
            return Err(anyhow!("RENEWAL_INTERVAL_HOURS must be at least 1"));
        }

        Ok(Self {
            database,
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            certs_dir: env_path("CERTS_DIR", "data/certs"),
            acme_contact_email,
            acme_directory_url: env::var("ACME_DIRECTORY_URL")
                .unwrap_or_else(|_| DEFAULT_ACME_DIRECTORY.to_string()),
            acme_storage_dir: env_path("ACME_STORAGE_DIR", "data/acme"),
            renewal_interval_hours,
            renewal_threshold_days: env_u64("RENEWAL_THRESHOLD_DAYS", 30) as i64,
            container_runtime: env::var("CONTAINER_RUNTIME")
                .unwrap_or_else(|_| "docker".to_string()),
            system_actor: env::var("SYSTEM_ACTOR")
                .unwrap_or_else(|_| "system-renewal".to_string()),
        })
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_hours * 3600)
    }

    pub fn renewal_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.renewal_threshold_days)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
