//! Command sender configuration

use std::time::Duration;

use anyhow::{ensure, Result};
use telecommand_shared::config::{self, env_or, env_range, env_secs, env_string};

use crate::command::{DispatcherConfig, PhaseTimeouts};
use crate::executor::{HttpExecutorConfig, SimulatedLink};

/// Everything the sender binary needs at startup
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub database_url: String,
    pub dispatcher: DispatcherConfig,
    pub executor: HttpExecutorConfig,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            database_url: config::DEFAULT_DATABASE_URL.into(),
            dispatcher: DispatcherConfig::default(),
            executor: HttpExecutorConfig::default(),
        }
    }
}

impl SenderConfig {
    /// Defaults overridden from the environment
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let dispatcher = defaults.dispatcher;
        let link = defaults.executor.link;

        let timeouts = PhaseTimeouts {
            transmit: env_secs("TRANSMIT_TIMEOUT_SECS", dispatcher.timeouts.transmit)?,
            acknowledge: env_secs("ACK_TIMEOUT_SECS", dispatcher.timeouts.acknowledge)?,
            execute: env_secs("EXECUTE_TIMEOUT_SECS", dispatcher.timeouts.execute)?,
        };

        let config = Self {
            database_url: config::database_url(),
            dispatcher: DispatcherConfig {
                dispatcher_id: env_string("DISPATCHER_ID", &dispatcher.dispatcher_id),
                poll_interval: env_secs("POLL_INTERVAL_SECS", dispatcher.poll_interval)?,
                max_backoff: env_secs("MAX_BACKOFF_SECS", dispatcher.max_backoff)?,
                stale_claim_after: env_secs("STALE_CLAIM_AFTER_SECS", dispatcher.stale_claim_after)?,
                store_connect_max_retries: env_or(
                    "STORE_CONNECT_MAX_RETRIES",
                    dispatcher.store_connect_max_retries,
                )?,
                store_retry_delay: env_secs("STORE_RETRY_DELAY_SECS", dispatcher.store_retry_delay)?,
                timeouts,
            },
            executor: HttpExecutorConfig {
                spacecraft_url: env_string("SPACECRAFT_URL", &defaults.executor.spacecraft_url),
                request_timeout: env_secs("HTTP_TIMEOUT_SECS", defaults.executor.request_timeout)?,
                link: SimulatedLink {
                    uplink_delay: env_range("UPLINK_DELAY_SECS", link.uplink_delay)?,
                    downlink_delay: env_range("DOWNLINK_DELAY_SECS", link.downlink_delay)?,
                    execution_delay: env_range("EXECUTION_DELAY_SECS", link.execution_delay)?,
                    success_rate: env_or("SUCCESS_RATE", link.success_rate)?,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let rate = self.executor.link.success_rate;
        ensure!(
            (0.0..=1.0).contains(&rate),
            "SUCCESS_RATE must be between 0 and 1, got {rate}"
        );
        ensure!(
            !self.dispatcher.poll_interval.is_zero(),
            "POLL_INTERVAL_SECS must be positive"
        );
        ensure!(
            self.dispatcher.max_backoff >= self.dispatcher.poll_interval,
            "MAX_BACKOFF_SECS must not be shorter than POLL_INTERVAL_SECS"
        );
        ensure!(
            self.dispatcher.store_connect_max_retries > 0,
            "STORE_CONNECT_MAX_RETRIES must be at least 1"
        );
        if self.dispatcher.stale_claim_after <= self.dispatcher.timeouts.total() {
            tracing::warn!(
                "[SENDER] STALE_CLAIM_AFTER_SECS ({:?}) does not exceed the phase timeouts ({:?}); \
                 live claims may be expired",
                self.dispatcher.stale_claim_after,
                self.dispatcher.timeouts.total()
            );
        }
        Ok(())
    }
}

/// Longest the sender waits for the store at startup
pub fn store_wait_budget(config: &DispatcherConfig) -> Duration {
    config.store_retry_delay * config.store_connect_max_retries
}
