//! HTTP executor talking to the spacecraft simulator

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use telecommand_shared::config::SecsRange;
use telecommand_shared::{
    timing, Command, CommandError, Phase, TransmitRequest, TransmitResponse,
};
use tracing::{debug, info, warn};

use super::{Executor, Verdict};

/// Error recorded when the simulated execution roll fails
pub const EXECUTION_FAILED_MESSAGE: &str = "Command execution failed on spacecraft";

/// Simulated link characteristics layered over the real HTTP call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedLink {
    /// Delay before the command leaves the ground
    pub uplink_delay: SecsRange,
    /// Delay before the receipt is treated as an acknowledgement
    pub downlink_delay: SecsRange,
    /// Time the spacecraft takes to execute
    pub execution_delay: SecsRange,
    /// Probability that execution succeeds
    pub success_rate: f64,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self {
            uplink_delay: SecsRange::new(1.0, 30.0),
            downlink_delay: SecsRange::new(2.0, 8.0),
            execution_delay: SecsRange::new(3.0, 12.0),
            success_rate: timing::SIMULATED_SUCCESS_RATE,
        }
    }
}

impl SimulatedLink {
    /// No delays, fixed success rate
    pub fn instant(success_rate: f64) -> Self {
        Self {
            uplink_delay: SecsRange::new(0.0, 0.0),
            downlink_delay: SecsRange::new(0.0, 0.0),
            execution_delay: SecsRange::new(0.0, 0.0),
            success_rate,
        }
    }

    fn sample(range: SecsRange) -> Duration {
        let secs = if range.max > range.min {
            rand::rng().random_range(range.min..=range.max)
        } else {
            range.min
        };
        Duration::from_secs_f64(secs)
    }

    fn roll_success(&self) -> bool {
        rand::rng().random_bool(self.success_rate.clamp(0.0, 1.0))
    }
}

/// Configuration for the HTTP executor
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// Spacecraft base URL, or its full `/commands` endpoint
    pub spacecraft_url: String,
    /// Per-request timeout for `POST /commands`
    pub request_timeout: Duration,
    pub link: SimulatedLink,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            spacecraft_url: "http://127.0.0.1:8080".into(),
            request_timeout: Duration::from_millis(timing::HTTP_REQUEST_TIMEOUT_MS),
            link: SimulatedLink::default(),
        }
    }
}

/// Executor that posts commands to the spacecraft over HTTP
pub struct HttpExecutor {
    client: reqwest::Client,
    commands_url: String,
    request_timeout: Duration,
    link: SimulatedLink,
}

impl HttpExecutor {
    pub fn new(config: &HttpExecutorConfig) -> Result<Self, CommandError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CommandError::ExecutorUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            commands_url: commands_url(&config.spacecraft_url),
            request_timeout: config.request_timeout,
            link: config.link,
        })
    }

    fn send_error(&self, err: reqwest::Error) -> CommandError {
        if err.is_timeout() {
            CommandError::ExecutorTimeout {
                phase: Phase::Transmit,
                after: self.request_timeout,
            }
        } else {
            CommandError::ExecutorUnavailable(format!("Spacecraft unreachable: {err}"))
        }
    }
}

fn commands_url(spacecraft_url: &str) -> String {
    let base = spacecraft_url.trim_end_matches('/');
    if base.ends_with("/commands") {
        base.to_string()
    } else {
        format!("{base}/commands")
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &str {
        "spacecraft-http"
    }

    async fn transmit(&self, command: &Command) -> Result<TransmitResponse, CommandError> {
        let uplink = SimulatedLink::sample(self.link.uplink_delay);
        info!(
            "[SENDER] Transmitting {} ({}) after {:.1}s uplink",
            command.name, command.id, uplink.as_secs_f64()
        );
        tokio::time::sleep(uplink).await;

        let response = self
            .client
            .post(&self.commands_url)
            .json(&TransmitRequest::from(command))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("[SENDER] Spacecraft answered {} for {}", status, command.id);
            return Err(CommandError::ExecutorUnavailable(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let receipt: TransmitResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.send_error(e)
            } else {
                CommandError::ExecutorUnavailable(format!("Unreadable receipt from spacecraft: {e}"))
            }
        })?;
        debug!("[SENDER] Receipt for {}: {}", command.id, receipt.status);
        Ok(receipt)
    }

    async fn acknowledge(
        &self,
        command: &Command,
        receipt: &TransmitResponse,
    ) -> Result<Verdict, CommandError> {
        let downlink = SimulatedLink::sample(self.link.downlink_delay);
        tokio::time::sleep(downlink).await;

        if receipt.is_received() {
            return Ok(Verdict::Accepted);
        }
        warn!(
            "[SENDER] Spacecraft did not acknowledge {}: {}",
            command.id, receipt.status
        );
        Ok(Verdict::Refused(format!(
            "Spacecraft did not acknowledge: {} {}",
            receipt.status, receipt.message
        )
        .trim_end()
        .to_string()))
    }

    async fn execute(&self, command: &Command) -> Result<Verdict, CommandError> {
        let execution = SimulatedLink::sample(self.link.execution_delay);
        let succeeded = self.link.roll_success();
        debug!(
            "[SENDER] Waiting {:.1}s for execution of {}",
            execution.as_secs_f64(),
            command.id
        );
        tokio::time::sleep(execution).await;

        if succeeded {
            Ok(Verdict::Accepted)
        } else {
            Ok(Verdict::Refused(EXECUTION_FAILED_MESSAGE.into()))
        }
    }
}
