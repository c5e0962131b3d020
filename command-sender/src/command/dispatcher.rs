//! Dispatcher: poll the store, claim Ready commands, drive them through the executor

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use telecommand_shared::store;
use telecommand_shared::{
    timing, Command, CommandError, CommandStore, LifecycleEvent, Phase, StateUpdate,
};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::timeout::PhaseTimeouts;
use crate::executor::{Executor, Verdict};

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Recorded as `claimed_by` on every claim
    pub dispatcher_id: String,
    /// Sleep between poll cycles
    pub poll_interval: Duration,
    /// Ceiling for the backoff after a failed cycle
    pub max_backoff: Duration,
    /// Claims older than this are failed by recovery
    pub stale_claim_after: Duration,
    pub store_connect_max_retries: u32,
    pub store_retry_delay: Duration,
    pub timeouts: PhaseTimeouts,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            dispatcher_id: format!("command-sender-{}", &suffix[..8]),
            poll_interval: Duration::from_millis(timing::POLL_INTERVAL_MS),
            max_backoff: Duration::from_millis(timing::MAX_BACKOFF_MS),
            stale_claim_after: Duration::from_millis(timing::STALE_CLAIM_AFTER_MS),
            store_connect_max_retries: timing::STORE_CONNECT_MAX_RETRIES,
            store_retry_delay: Duration::from_millis(timing::STORE_RETRY_DELAY_MS),
            timeouts: PhaseTimeouts::default(),
        }
    }
}

/// How processing of one claimed command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Executed,
    Failed,
    /// A phase write found the record no longer ours
    Lost,
}

/// Tally of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    /// Ready commands another dispatcher or a cancel got to first
    pub skipped: usize,
    pub executed: usize,
    pub failed: usize,
    pub lost: usize,
    /// Stale claims failed by recovery
    pub recovered: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Executed => self.executed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Lost => self.lost += 1,
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "claimed={} skipped={} executed={} failed={} lost={} recovered={}",
            self.claimed, self.skipped, self.executed, self.failed, self.lost, self.recovered
        )
    }
}

/// Polls the store and drives claimed commands through the executor
pub struct Dispatcher {
    store: Arc<dyn CommandStore>,
    executor: Arc<dyn Executor>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CommandStore>,
        executor: Arc<dyn Executor>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.dispatcher_id
    }

    /// Probe the store until it answers or the retry budget runs out.
    /// Returns the number of stored commands.
    pub async fn wait_for_store(&self) -> Result<u64, CommandError> {
        let count = store::wait_until_ready(
            self.store.as_ref(),
            self.config.store_connect_max_retries,
            self.config.store_retry_delay,
        )
        .await?;
        Ok(count)
    }

    /// Poll until `shutdown` flips to true.
    ///
    /// A failed cycle is logged and followed by an exponentially growing
    /// pause, capped at `max_backoff` and reset by the next good cycle.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[SENDER] Dispatcher {} polling every {:?} via {}",
            self.id(),
            self.config.poll_interval,
            self.executor.name()
        );
        let mut backoff = self.config.poll_interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.poll_cycle(&shutdown).await {
                Ok(report) => {
                    if report.is_idle() {
                        debug!("[SENDER] Nothing to do");
                    } else {
                        info!("[SENDER] Cycle complete: {}", report);
                    }
                    backoff = self.config.poll_interval;
                    self.config.poll_interval
                }
                Err(e) => {
                    let pause = backoff;
                    error!("[SENDER] Poll cycle failed: {}; retrying in {:?}", e, pause);
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    pause
                }
            };

            tokio::select! {
                _ = sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can ask us to keep going
                        break;
                    }
                }
            }
        }

        info!("[SENDER] Dispatcher {} stopped", self.id());
    }

    /// One recover-fetch-claim-process pass.
    ///
    /// Store failures abort the cycle with `StoreUnavailable`. Executor
    /// failures are recorded on the command and never abort the cycle.
    pub async fn poll_cycle(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport, CommandError> {
        let mut report = CycleReport {
            recovered: self.recover_stale_claims().await?,
            ..Default::default()
        };

        let ready = self.store.fetch_ready_ordered().await?;
        if !ready.is_empty() {
            debug!("[SENDER] {} Ready telecommands", ready.len());
        }

        for command in ready {
            if *shutdown.borrow() {
                info!("[SENDER] Shutdown requested, not claiming further work");
                break;
            }

            let Some(claimed) = self.claim(command).await? else {
                report.skipped += 1;
                continue;
            };
            report.claimed += 1;

            let outcome = self.process(claimed).await?;
            report.record(outcome);
        }

        Ok(report)
    }

    async fn claim(&self, mut command: Command) -> Result<Option<Command>, CommandError> {
        let at = command.stamp_time(telecommand_shared::now());
        let update = StateUpdate::claim(self.id(), at);

        if !self.store.advance(command.id, &update).await? {
            debug!(
                "[SENDER] Telecommand {} already taken, skipping",
                command.id
            );
            return Ok(None);
        }

        update.apply(&mut command);
        info!(
            "[SENDER] Claimed telecommand {} ({}, priority {})",
            command.id, command.name, command.priority
        );
        Ok(Some(command))
    }

    /// Drive a claimed command through transmit, acknowledge and execute.
    ///
    /// Each phase write lands before the next phase starts.
    pub async fn process(&self, mut command: Command) -> Result<Outcome, CommandError> {
        let timeouts = self.config.timeouts;

        // Transmit
        let transmitted = timeouts
            .run(Phase::Transmit, self.executor.transmit(&command))
            .await;
        let receipt = match transmitted {
            Ok(receipt) => receipt,
            Err(e) => {
                return self
                    .fail_phase(&mut command, LifecycleEvent::TransmitFailed, e)
                    .await
            }
        };
        if !self.advance(&mut command, LifecycleEvent::TransmitConfirmed, None).await? {
            return Ok(Outcome::Lost);
        }

        // Acknowledge
        let ack = timeouts
            .run(
                Phase::Acknowledge,
                self.executor.acknowledge(&command, &receipt),
            )
            .await;
        match ack {
            Ok(Verdict::Accepted) => {
                if !self.advance(&mut command, LifecycleEvent::Acknowledge, None).await? {
                    return Ok(Outcome::Lost);
                }
                info!("[SENDER] Telecommand {} acknowledged", command.id);
            }
            Ok(Verdict::Refused(reason)) => {
                return self
                    .fail(&mut command, LifecycleEvent::AcknowledgeFailed, reason)
                    .await
            }
            Err(e) => {
                return self
                    .fail_phase(&mut command, LifecycleEvent::AcknowledgeFailed, e)
                    .await
            }
        }

        // Execute
        let execution = timeouts
            .run(Phase::Execute, self.executor.execute(&command))
            .await;
        match execution {
            Ok(Verdict::Accepted) => {
                if !self.advance(&mut command, LifecycleEvent::Execute, None).await? {
                    return Ok(Outcome::Lost);
                }
                info!("[SENDER] Telecommand {} executed", command.id);
                Ok(Outcome::Executed)
            }
            Ok(Verdict::Refused(reason)) => {
                self.fail(&mut command, LifecycleEvent::ExecutionFailed, reason)
                    .await
            }
            Err(e) => {
                self.fail_phase(&mut command, LifecycleEvent::ExecutionFailed, e)
                    .await
            }
        }
    }

    /// Record an executor error on the command. Anything else (a store
    /// outage surfacing through the executor) aborts the cycle and leaves
    /// the claim to stale-claim recovery.
    async fn fail_phase(
        &self,
        command: &mut Command,
        event: LifecycleEvent,
        err: CommandError,
    ) -> Result<Outcome, CommandError> {
        if !err.is_executor_failure() {
            return Err(err);
        }
        self.fail(command, event, err.to_string()).await
    }

    async fn fail(
        &self,
        command: &mut Command,
        event: LifecycleEvent,
        reason: String,
    ) -> Result<Outcome, CommandError> {
        warn!(
            "[SENDER] Telecommand {} failed ({}): {}",
            command.id, event, reason
        );
        if self.advance(command, event, Some(reason)).await? {
            Ok(Outcome::Failed)
        } else {
            Ok(Outcome::Lost)
        }
    }

    /// Guarded write of `event`; on success mirrors it onto `command`
    async fn advance(
        &self,
        command: &mut Command,
        event: LifecycleEvent,
        error_message: Option<String>,
    ) -> Result<bool, CommandError> {
        let at = command.stamp_time(telecommand_shared::now());
        let mut update = StateUpdate::new(command.state, event, at)?;
        if let Some(message) = error_message {
            update = update.with_error(message);
        }

        if self.store.advance(command.id, &update).await? {
            update.apply(command);
            return Ok(true);
        }

        warn!(
            "[SENDER] Telecommand {} changed underneath us during {}; abandoning",
            command.id, event
        );
        Ok(false)
    }

    /// Fail in-progress commands whose claim outlived the stale threshold
    pub async fn recover_stale_claims(&self) -> Result<usize, CommandError> {
        let threshold = self.config.stale_claim_after;
        let age = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let cutoff = telecommand_shared::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let mut recovered = 0;
        for command in self.store.fetch_stale_claims(cutoff).await? {
            let owner = command.claimed_by.as_deref().unwrap_or("unknown");
            let message = format!(
                "Claim expired: dispatcher {} did not finish within {}s",
                owner,
                threshold.as_secs()
            );

            let at = command.stamp_time(telecommand_shared::now());
            let update = StateUpdate::new(command.state, LifecycleEvent::ClaimExpired, at)?
                .with_error(message);

            if self.store.advance(command.id, &update).await? {
                warn!(
                    "[SENDER] Recovered stale telecommand {} from {} ({})",
                    command.id, owner, command.state
                );
                recovered += 1;
            }
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use telecommand_shared::{CommandState, MemoryStore, NewCommand, StoreError, TransmitResponse};

    /// Executor whose behaviour is fixed up front
    struct ScriptedExecutor {
        transmit_delay: Duration,
        ack_delay: Duration,
        execute_delay: Duration,
        ack: Verdict,
        execution: Verdict,
        transmits: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn succeeding() -> Self {
            Self {
                transmit_delay: Duration::ZERO,
                ack_delay: Duration::ZERO,
                execute_delay: Duration::ZERO,
                ack: Verdict::Accepted,
                execution: Verdict::Accepted,
                transmits: AtomicUsize::new(0),
            }
        }

        fn transmit_count(&self) -> usize {
            self.transmits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn transmit(&self, command: &Command) -> Result<TransmitResponse, CommandError> {
            self.transmits.fetch_add(1, Ordering::SeqCst);
            sleep(self.transmit_delay).await;
            Ok(TransmitResponse::received(command.name.clone(), 0.0))
        }

        async fn acknowledge(
            &self,
            _command: &Command,
            _receipt: &TransmitResponse,
        ) -> Result<Verdict, CommandError> {
            sleep(self.ack_delay).await;
            Ok(self.ack.clone())
        }

        async fn execute(&self, _command: &Command) -> Result<Verdict, CommandError> {
            sleep(self.execute_delay).await;
            Ok(self.execution.clone())
        }
    }

    /// Executor that is never reachable
    struct DownExecutor;

    #[async_trait]
    impl Executor for DownExecutor {
        fn name(&self) -> &str {
            "down"
        }

        async fn transmit(&self, _command: &Command) -> Result<TransmitResponse, CommandError> {
            Err(CommandError::ExecutorUnavailable("HTTP 503".into()))
        }

        async fn acknowledge(
            &self,
            _command: &Command,
            _receipt: &TransmitResponse,
        ) -> Result<Verdict, CommandError> {
            unreachable!("acknowledge after failed transmit")
        }

        async fn execute(&self, _command: &Command) -> Result<Verdict, CommandError> {
            unreachable!("execute after failed transmit")
        }
    }

    /// Executor whose acknowledge step trips over a store outage
    struct StoreFaultExecutor;

    #[async_trait]
    impl Executor for StoreFaultExecutor {
        fn name(&self) -> &str {
            "store-fault"
        }

        async fn transmit(&self, command: &Command) -> Result<TransmitResponse, CommandError> {
            Ok(TransmitResponse::received(command.name.clone(), 0.0))
        }

        async fn acknowledge(
            &self,
            _command: &Command,
            _receipt: &TransmitResponse,
        ) -> Result<Verdict, CommandError> {
            Err(StoreError::Offline("receipt ledger".into()).into())
        }

        async fn execute(&self, _command: &Command) -> Result<Verdict, CommandError> {
            unreachable!("execute after failed acknowledge")
        }
    }

    fn config(id: &str) -> DispatcherConfig {
        DispatcherConfig {
            dispatcher_id: id.into(),
            poll_interval: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            stale_claim_after: Duration::from_secs(300),
            store_connect_max_retries: 3,
            store_retry_delay: Duration::from_millis(5),
            timeouts: PhaseTimeouts::uniform(Duration::from_secs(5)),
        }
    }

    fn dispatcher(
        store: &Arc<MemoryStore>,
        executor: Arc<dyn Executor>,
        id: &str,
    ) -> Dispatcher {
        Dispatcher::new(store.clone(), executor, config(id))
    }

    async fn enqueue(store: &MemoryStore, request: NewCommand) -> Command {
        let cmd = request.into_command(telecommand_shared::now()).unwrap();
        store.insert(&cmd).await.unwrap();
        cmd
    }

    fn idle() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn assert_monotonic(cmd: &Command) {
        let mut last = cmd.created_at;
        for stamp in [cmd.claimed_at, cmd.transmitted_at, cmd.acknowledged_at, cmd.executed_at]
            .into_iter()
            .flatten()
        {
            assert!(stamp >= last, "timestamps must not go backwards: {cmd:?}");
            last = stamp;
        }
    }

    #[tokio::test]
    async fn test_ping_runs_to_executed() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let dispatcher = dispatcher(&store, Arc::new(ScriptedExecutor::succeeding()), "sender-1");

        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.executed, 1);

        let done = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(done.state, CommandState::Executed);
        assert!(done.transmitted_at.is_some());
        assert!(done.acknowledged_at.is_some());
        assert!(done.executed_at.is_some());
        assert!(done.error_message.is_none());
        assert_eq!(done.claimed_by.as_deref(), Some("sender-1"));
        assert_monotonic(&done);
    }

    #[tokio::test]
    async fn test_transmit_timeout_fails_without_transmitted_at() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("DEPLOY_PANEL")).await;
        let executor = ScriptedExecutor {
            transmit_delay: Duration::from_secs(5),
            ..ScriptedExecutor::succeeding()
        };
        let mut cfg = config("sender-1");
        cfg.timeouts.transmit = Duration::from_millis(30);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(executor), cfg);

        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.failed, 1);

        let failed = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(failed.state, CommandState::Failed);
        assert!(failed.transmitted_at.is_none());
        assert!(failed.executed_at.is_none());
        let message = failed.error_message.unwrap();
        assert!(message.contains("timed out during transmit"), "{message}");
    }

    #[tokio::test]
    async fn test_ack_timeout_fails_after_transmit() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let executor = ScriptedExecutor {
            ack_delay: Duration::from_secs(5),
            ..ScriptedExecutor::succeeding()
        };
        let mut cfg = config("sender-1");
        cfg.timeouts.acknowledge = Duration::from_millis(30);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(executor), cfg);

        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.failed, 1);

        let failed = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(failed.state, CommandState::Failed);
        assert!(failed.transmitted_at.is_some());
        assert!(failed.acknowledged_at.is_none());
        assert!(failed.executed_at.is_none());
        let message = failed.error_message.unwrap();
        assert!(message.contains("timed out during acknowledge"), "{message}");
    }

    #[tokio::test]
    async fn test_execute_timeout_fails_with_executed_at() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let executor = ScriptedExecutor {
            execute_delay: Duration::from_secs(5),
            ..ScriptedExecutor::succeeding()
        };
        let mut cfg = config("sender-1");
        cfg.timeouts.execute = Duration::from_millis(30);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(executor), cfg);

        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.failed, 1);

        let failed = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(failed.state, CommandState::Failed);
        assert!(failed.acknowledged_at.is_some());
        assert!(failed.executed_at.is_some());
        let message = failed.error_message.clone().unwrap();
        assert!(message.contains("timed out during execute"), "{message}");
        assert_monotonic(&failed);
    }

    #[tokio::test]
    async fn test_store_error_from_executor_aborts_cycle() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let dispatcher = dispatcher(&store, Arc::new(StoreFaultExecutor), "sender-1");

        assert!(matches!(
            dispatcher.poll_cycle(&idle()).await,
            Err(CommandError::StoreUnavailable(_))
        ));

        // Claim stays in place for stale-claim recovery
        let stranded = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(stranded.state, CommandState::Transmitted);
        assert!(stranded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_executor_fails_command_not_cycle() {
        let store = Arc::new(MemoryStore::new());
        let first = enqueue(&store, NewCommand::named("A")).await;
        let second = enqueue(&store, NewCommand::named("B")).await;
        let dispatcher = dispatcher(&store, Arc::new(DownExecutor), "sender-1");

        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.failed, 2);

        for id in [first.id, second.id] {
            let cmd = store.get(id).await.unwrap().unwrap();
            assert_eq!(cmd.state, CommandState::Failed);
            assert_eq!(cmd.error_message.as_deref(), Some("Executor unavailable: HTTP 503"));
        }
    }

    #[tokio::test]
    async fn test_negative_ack_fails_before_execution() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let executor = ScriptedExecutor {
            ack: Verdict::Refused("Spacecraft did not acknowledge: rejected".into()),
            ..ScriptedExecutor::succeeding()
        };
        let dispatcher = dispatcher(&store, Arc::new(executor), "sender-1");

        dispatcher.poll_cycle(&idle()).await.unwrap();

        let failed = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(failed.state, CommandState::Failed);
        assert!(failed.transmitted_at.is_some());
        assert!(failed.acknowledged_at.is_none());
        assert!(failed.executed_at.is_none());
    }

    #[tokio::test]
    async fn test_execution_failure_records_message() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let executor = ScriptedExecutor {
            execution: Verdict::Refused("Command execution failed on spacecraft".into()),
            ..ScriptedExecutor::succeeding()
        };
        let dispatcher = dispatcher(&store, Arc::new(executor), "sender-1");

        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.failed, 1);

        let failed = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(failed.state, CommandState::Failed);
        assert!(failed.executed_at.is_some());
        assert_eq!(
            failed.error_message.as_deref(),
            Some("Command execution failed on spacecraft")
        );
        assert_monotonic(&failed);
    }

    #[tokio::test]
    async fn test_priority_order_within_cycle() {
        let store = Arc::new(MemoryStore::new());
        let routine = enqueue(&store, NewCommand::named("ROUTINE").with_priority(9)).await;
        let urgent = enqueue(&store, NewCommand::named("URGENT").with_priority(1)).await;
        let dispatcher = dispatcher(&store, Arc::new(ScriptedExecutor::succeeding()), "sender-1");

        dispatcher.poll_cycle(&idle()).await.unwrap();

        let routine = store.get(routine.id).await.unwrap().unwrap();
        let urgent = store.get(urgent.id).await.unwrap().unwrap();
        assert!(urgent.executed_at.unwrap() <= routine.claimed_at.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_command_is_never_transmitted() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        store.try_cancel(cmd.id, telecommand_shared::now()).await.unwrap();
        let executor = Arc::new(ScriptedExecutor::succeeding());
        let dispatcher = dispatcher(&store, executor.clone(), "sender-1");

        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert!(report.is_idle());
        assert_eq!(executor.transmit_count(), 0);
        assert_eq!(
            store.get(cmd.id).await.unwrap().unwrap().state,
            CommandState::Cancelled
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_dispatchers_transmit_each_command_once() {
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for i in 0..12 {
            ids.push(enqueue(&store, NewCommand::named(format!("CMD_{i}"))).await.id);
        }
        let executor = Arc::new(ScriptedExecutor {
            transmit_delay: Duration::from_millis(2),
            ..ScriptedExecutor::succeeding()
        });

        let cycles = (0..3).map(|i| {
            let dispatcher = dispatcher(&store, executor.clone(), &format!("sender-{i}"));
            tokio::spawn(async move { dispatcher.poll_cycle(&idle()).await.unwrap() })
        });
        let reports: Vec<CycleReport> = futures::future::join_all(cycles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(reports.iter().map(|r| r.claimed).sum::<usize>(), 12);
        assert_eq!(executor.transmit_count(), 12);
        for id in ids {
            let cmd = store.get(id).await.unwrap().unwrap();
            assert_eq!(cmd.state, CommandState::Executed);
        }
    }

    #[tokio::test]
    async fn test_store_outage_aborts_cycle_then_recovers() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let dispatcher = dispatcher(&store, Arc::new(ScriptedExecutor::succeeding()), "sender-1");

        store.set_offline(true);
        assert!(matches!(
            dispatcher.poll_cycle(&idle()).await,
            Err(CommandError::StoreUnavailable(_))
        ));

        store.set_offline(false);
        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(
            store.get(cmd.id).await.unwrap().unwrap().state,
            CommandState::Executed
        );
    }

    #[tokio::test]
    async fn test_stale_claim_is_failed_by_recovery() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let long_ago = cmd.created_at - chrono::Duration::seconds(600);
        // Crashed dispatcher: claimed long ago, never finished
        store.try_claim(cmd.id, "sender-crashed", long_ago).await.unwrap();

        let dispatcher = dispatcher(&store, Arc::new(ScriptedExecutor::succeeding()), "sender-1");
        let report = dispatcher.poll_cycle(&idle()).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.claimed, 0);

        let failed = store.get(cmd.id).await.unwrap().unwrap();
        assert_eq!(failed.state, CommandState::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("Claim expired: dispatcher sender-crashed did not finish within 300s")
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_claiming() {
        let store = Arc::new(MemoryStore::new());
        enqueue(&store, NewCommand::named("PING")).await;
        let executor = Arc::new(ScriptedExecutor::succeeding());
        let dispatcher = dispatcher(&store, executor.clone(), "sender-1");

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = dispatcher.poll_cycle(&rx).await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(executor.transmit_count(), 0);

        // run() returns promptly once the flag is set
        tokio::time::timeout(Duration::from_secs(1), dispatcher.run(rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_processes_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let cmd = enqueue(&store, NewCommand::named("PING")).await;
        let dispatcher = Arc::new(dispatcher(
            &store,
            Arc::new(ScriptedExecutor::succeeding()),
            "sender-1",
        ));

        let (tx, rx) = watch::channel(false);
        let handle = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(rx).await })
        };

        for _ in 0..100 {
            if store.get(cmd.id).await.unwrap().unwrap().state == CommandState::Executed {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            store.get(cmd.id).await.unwrap().unwrap().state,
            CommandState::Executed
        );
    }

    #[tokio::test]
    async fn test_wait_for_store_gives_up() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let dispatcher = dispatcher(&store, Arc::new(DownExecutor), "sender-1");

        assert!(matches!(
            dispatcher.wait_for_store().await,
            Err(CommandError::StoreUnavailable(_))
        ));

        store.set_offline(false);
        assert_eq!(dispatcher.wait_for_store().await.unwrap(), 0);
    }

    #[test]
    fn test_report_tally() {
        let mut report = CycleReport::default();
        assert!(report.is_idle());
        report.record(Outcome::Executed);
        report.record(Outcome::Lost);
        assert_eq!(report.executed, 1);
        assert_eq!(report.lost, 1);
        assert!(!report.is_idle());
    }
}
