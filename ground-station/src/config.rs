//! Ground station configuration

use std::time::Duration;

use anyhow::Result;
use telecommand_shared::config::{self, env_or, env_secs, env_string};
use telecommand_shared::timing;

#[derive(Debug, Clone)]
pub struct GroundConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Reported by `/health`; containers set `HOSTNAME`
    pub instance: String,
    pub store_connect_max_retries: u32,
    pub store_retry_delay: Duration,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            database_url: config::DEFAULT_DATABASE_URL.into(),
            host: "0.0.0.0".into(),
            port: 5000,
            instance: "local".into(),
            store_connect_max_retries: timing::STORE_CONNECT_MAX_RETRIES,
            store_retry_delay: Duration::from_millis(timing::STORE_RETRY_DELAY_MS),
        }
    }
}

impl GroundConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: config::database_url(),
            host: env_string("HOST", &defaults.host),
            port: env_or("PORT", defaults.port)?,
            instance: env_string("HOSTNAME", &defaults.instance),
            store_connect_max_retries: env_or(
                "STORE_CONNECT_MAX_RETRIES",
                defaults.store_connect_max_retries,
            )?,
            store_retry_delay: env_secs("STORE_RETRY_DELAY_SECS", defaults.store_retry_delay)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
