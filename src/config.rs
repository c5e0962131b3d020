//! Spacecraft simulator configuration

use anyhow::Result;
use telecommand_shared::config::{env_or, env_range, env_string, SecsRange};

#[derive(Debug, Clone)]
pub struct SpacecraftConfig {
    pub host: String,
    pub port: u16,
    /// Simulated on-board handling time per command
    pub processing_delay: SecsRange,
    pub instance: String,
}

impl Default for SpacecraftConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            processing_delay: SecsRange::new(0.1, 2.0),
            instance: "local".into(),
        }
    }
}

impl SpacecraftConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env_string("HOST", &defaults.host),
            port: env_or("PORT", defaults.port)?,
            processing_delay: env_range("PROCESSING_DELAY_SECS", defaults.processing_delay)?,
            instance: env_string("HOSTNAME", &defaults.instance),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
