//! Orchestrator implementation.
//!
//! Drives transactions through the state machine:
//! - Dispatch: due triggers and polls are claimed under the registry lock,
//!   then run as separate tasks gated by the dispatch budget
//! - Sweep: deadlines are enforced independently of any timer
//!
//! No task holds a transaction across a network call. The registry keeps a
//! snapshot per transaction and the loops re-drive it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactArchive, ArtifactFetcher};
use crate::audit::AuditHandle;
use crate::gateway::{GatewayError, RemoteGateway, SubjectKey, TransactionUpdate};
use crate::metrics;
use crate::risk::aggregate;
use crate::transaction::{
    ApplyOutcome, Phase, TransactionError, TransactionHandle, TransactionMachine,
    TransactionState, Transition,
};

use super::budget::DispatchBudget;
use super::config::OrchestratorConfig;
use super::types::{CompletionEvent, OrchestratorError, OrchestratorStatus};

/// One tracked transaction and its timer.
struct Entry {
    machine: TransactionMachine,
    /// Subject fingerprint, for submit deduplication.
    fingerprint: String,
    /// When the next trigger or poll is due. `None` while one is in flight,
    /// and once terminal.
    due_at: Option<Instant>,
    /// When the completion was published. The sweep evicts the entry once
    /// `terminal_retention_secs` have passed.
    retired_at: Option<Instant>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Entry>,
    /// Keys of operations currently in flight (see [`Job::key`]).
    in_flight: HashSet<String>,
}

#[derive(Debug, Clone)]
enum JobKind {
    Trigger,
    Poll { remote_uid: String },
}

/// A claimed network operation.
#[derive(Debug, Clone)]
struct Job {
    local_request_id: String,
    subject: SubjectKey,
    kind: JobKind,
}

impl Job {
    /// Polls are deduplicated per remote UID, triggers per transaction.
    fn key(&self) -> String {
        match &self.kind {
            JobKind::Trigger => format!("trigger:{}", self.local_request_id),
            JobKind::Poll { remote_uid } => format!("poll:{}", remote_uid),
        }
    }
}

/// Work left over after a terminal transition, done outside the registry lock.
enum FollowUp {
    Publish(CompletionEvent),
    FetchArtifacts {
        local_request_id: String,
        update: TransactionUpdate,
    },
}

/// State shared between the caller API and the background tasks.
struct Shared {
    config: OrchestratorConfig,
    gateway: Arc<dyn RemoteGateway>,
    fetcher: ArtifactFetcher,
    audit: AuditHandle,
    budget: DispatchBudget,
    registry: RwLock<Registry>,
    completions: broadcast::Sender<CompletionEvent>,
}

impl Shared {
    fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    fn retrigger_delay(&self) -> Duration {
        let min = self.config.retrigger_jitter_min_ms;
        let max = self.config.retrigger_jitter_max_ms.max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Arm the timer for whatever the current phase needs next.
    fn reschedule(&self, entry: &mut Entry, now: Instant) {
        entry.due_at = match entry.machine.phase() {
            Phase::Pending | Phase::FailedRetryable => Some(now + self.retrigger_delay()),
            Phase::Polling => Some(now + self.poll_delay()),
            _ => None,
        };
    }

    /// Mark the entry's next operation as in flight and build its job.
    ///
    /// Returns `None` when there is nothing to send, or when the same
    /// operation is already in flight (the firing is dropped, not queued).
    fn claim(&self, entry: &mut Entry, in_flight: &mut HashSet<String>) -> Option<Job> {
        let kind = match (entry.machine.phase(), entry.machine.remote_uid()) {
            (Phase::Pending | Phase::FailedRetryable, _) => JobKind::Trigger,
            (Phase::Polling, Some(uid)) => JobKind::Poll {
                remote_uid: uid.to_string(),
            },
            _ => {
                entry.due_at = None;
                return None;
            }
        };
        let job = Job {
            local_request_id: entry.machine.local_request_id().to_string(),
            subject: entry.machine.subject().clone(),
            kind,
        };

        entry.due_at = None;
        if !in_flight.insert(job.key()) {
            metrics::DUPLICATE_DISPATCH_DROPPED.inc();
            debug!(
                local_request_id = %job.local_request_id,
                key = %job.key(),
                "Dispatch dropped, operation already in flight"
            );
            return None;
        }

        Some(job)
    }

    /// Bookkeeping for a terminal transition.
    fn finish(&self, entry: &mut Entry, transition: &Transition) -> FollowUp {
        entry.due_at = None;
        metrics::TRANSACTIONS_FINISHED
            .with_label_values(&[transition.to.as_str()])
            .inc();

        {
            let state = entry.machine.state();
            info!(
                local_request_id = %state.handle.local_request_id,
                remote_uid = ?state.handle.remote_uid,
                phase = %state.phase,
                attempts = state.attempt_count,
                "Transaction finished"
            );
        }

        if transition.to == Phase::Succeeded {
            let verdict = entry
                .machine
                .state()
                .last_update
                .as_ref()
                .map(|u| aggregate(&u.risk_indicators));
            if let Some(Err(error)) = verdict {
                warn!(
                    local_request_id = %entry.machine.local_request_id(),
                    "No risk verdict: {}",
                    error
                );
                entry.machine.add_warning(error.into());
            }

            if entry.machine.begin_artifact_fetch() {
                if let Some(update) = entry.machine.state().last_update.clone() {
                    return FollowUp::FetchArtifacts {
                        local_request_id: entry.machine.local_request_id().to_string(),
                        update,
                    };
                }
            }
        }

        entry.retired_at = Some(Instant::now());
        FollowUp::Publish(CompletionEvent::from_state(entry.machine.state()))
    }

    fn follow_up(self: &Arc<Self>, follow_ups: Vec<FollowUp>) {
        for item in follow_ups {
            match item {
                FollowUp::Publish(event) => self.publish(event),
                FollowUp::FetchArtifacts {
                    local_request_id,
                    update,
                } => {
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        shared.fetch_artifacts(local_request_id, update).await;
                    });
                }
            }
        }
    }

    fn publish(&self, event: CompletionEvent) {
        debug!(
            local_request_id = %event.local_request_id(),
            phase = %event.phase,
            "Publishing completion"
        );
        // Nobody listening is fine.
        let _ = self.completions.send(event);
    }

    async fn fetch_artifacts(&self, local_request_id: String, update: TransactionUpdate) {
        let warnings = self
            .fetcher
            .fetch_all(&local_request_id, &update, &self.budget)
            .await;

        let event = {
            let mut registry = self.registry.write().await;
            let Some(entry) = registry.entries.get_mut(&local_request_id) else {
                return;
            };
            entry.machine.finish_artifact_fetch(warnings);
            entry.retired_at = Some(Instant::now());
            CompletionEvent::from_state(entry.machine.state())
        };
        self.publish(event);
    }

    /// One dispatch tick: expire overdue transactions and start due operations.
    async fn dispatch_due(self: &Arc<Self>) {
        let now = Instant::now();
        let wall = Utc::now();
        let mut jobs = Vec::new();
        let mut follow_ups = Vec::new();

        {
            let mut registry = self.registry.write().await;
            let Registry {
                entries,
                in_flight,
            } = &mut *registry;

            for entry in entries.values_mut() {
                if !entry.due_at.is_some_and(|due| due <= now) {
                    continue;
                }
                if let Some(t) = entry.machine.expire_if_due(wall) {
                    follow_ups.push(self.finish(entry, &t));
                    continue;
                }
                if let Some(job) = self.claim(entry, in_flight) {
                    jobs.push(job);
                }
            }
        }

        self.follow_up(follow_ups);
        for job in jobs {
            self.spawn_job(job);
        }
    }

    /// Expire every overdue transaction, whether or not a timer is armed,
    /// and evict finished ones past their retention.
    async fn sweep_deadlines(self: &Arc<Self>) {
        let now = Utc::now();
        let retention = Duration::from_secs(self.config.terminal_retention_secs);
        let follow_ups: Vec<FollowUp> = {
            let mut registry = self.registry.write().await;

            let before = registry.entries.len();
            registry.entries.retain(|_, entry| {
                !entry
                    .retired_at
                    .is_some_and(|at| at.elapsed() >= retention)
            });
            let evicted = before - registry.entries.len();
            if evicted > 0 {
                debug!(evicted, "Evicted finished transactions");
            }

            registry
                .entries
                .values_mut()
                .filter_map(|entry| {
                    let t = entry.machine.expire_if_due(now)?;
                    warn!(
                        local_request_id = %entry.machine.local_request_id(),
                        from = %t.from,
                        "Deadline exceeded"
                    );
                    Some(self.finish(entry, &t))
                })
                .collect()
        };
        self.follow_up(follow_ups);
    }

    fn spawn_job(self: &Arc<Self>, job: Job) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.run(job).await;
        });
    }

    async fn run(self: &Arc<Self>, job: Job) {
        let Some(permit) = self.budget.acquire().await else {
            debug!(
                local_request_id = %job.local_request_id,
                key = %job.key(),
                "Dispatch budget closed, operation not sent"
            );
            let mut registry = self.registry.write().await;
            registry.in_flight.remove(&job.key());
            if let Some(entry) = registry.entries.get_mut(&job.local_request_id) {
                self.reschedule(entry, Instant::now());
            }
            return;
        };
        if !self.confirm(&job).await {
            return;
        }

        let result = match &job.kind {
            JobKind::Trigger => {
                metrics::TRIGGERS_SENT.inc();
                debug!(
                    local_request_id = %job.local_request_id,
                    data_source = %job.subject.data_source,
                    "Sending trigger"
                );
                self.gateway.trigger(&job.subject).await
            }
            JobKind::Poll { remote_uid } => {
                metrics::POLLS_SENT.inc();
                debug!(
                    local_request_id = %job.local_request_id,
                    remote_uid = %remote_uid,
                    "Sending poll"
                );
                self.gateway.poll(&job.subject, remote_uid).await
            }
        };
        drop(permit);

        self.complete(&job, result).await;
    }

    /// Re-check a claimed job once its permit is held: the deadline may have
    /// passed or the caller may have cancelled while it waited.
    ///
    /// A trigger enters `Triggering` here, so waiting for a permit never
    /// consumes an attempt.
    async fn confirm(self: &Arc<Self>, job: &Job) -> bool {
        let mut follow_ups = Vec::new();
        let wanted = {
            let mut registry = self.registry.write().await;
            let Registry {
                entries,
                in_flight,
            } = &mut *registry;

            let wanted = match entries.get_mut(&job.local_request_id) {
                None => false,
                Some(entry) => {
                    if let Some(t) = entry.machine.expire_if_due(Utc::now()) {
                        follow_ups.push(self.finish(entry, &t));
                        false
                    } else {
                        let wanted = match (&job.kind, entry.machine.phase()) {
                            (JobKind::Trigger, Phase::Pending | Phase::FailedRetryable) => {
                                entry.machine.begin_trigger().is_ok()
                            }
                            (JobKind::Poll { remote_uid }, Phase::Polling) => {
                                entry.machine.remote_uid() == Some(remote_uid.as_str())
                            }
                            _ => false,
                        };
                        if !wanted && entry.due_at.is_none() {
                            self.reschedule(entry, Instant::now());
                        }
                        wanted
                    }
                }
            };
            if !wanted {
                in_flight.remove(&job.key());
                debug!(local_request_id = %job.local_request_id, "Claimed operation abandoned");
            }
            wanted
        };
        self.follow_up(follow_ups);
        wanted
    }

    /// Feed an operation's result back into its transaction.
    async fn complete(
        self: &Arc<Self>,
        job: &Job,
        result: Result<TransactionUpdate, GatewayError>,
    ) {
        let now = Instant::now();
        let mut follow_ups = Vec::new();

        {
            let mut registry = self.registry.write().await;
            let Registry {
                entries,
                in_flight,
            } = &mut *registry;
            in_flight.remove(&job.key());

            let Some(entry) = entries.get_mut(&job.local_request_id) else {
                return;
            };

            match result {
                Ok(update) => {
                    self.audit.record(&job.local_request_id, &update);
                    metrics::OUTCOMES
                        .with_label_values(&[update.outcome().snake_name()])
                        .inc();

                    let code = update.code;
                    match entry.machine.apply_update(update) {
                        ApplyOutcome::Moved(t) => {
                            debug!(
                                local_request_id = %job.local_request_id,
                                remote_uid = ?entry.machine.remote_uid(),
                                code,
                                from = %t.from,
                                phase = %t.to,
                                "Applied update"
                            );
                            if t.is_terminal() {
                                follow_ups.push(self.finish(entry, &t));
                            } else {
                                self.reschedule(entry, now);
                            }
                        }
                        ApplyOutcome::Duplicate => {
                            debug!(local_request_id = %job.local_request_id, code, "Duplicate update");
                            self.reschedule(entry, now);
                        }
                        ApplyOutcome::Discarded(reason) => {
                            debug!(
                                local_request_id = %job.local_request_id,
                                code,
                                ?reason,
                                "Update discarded"
                            );
                            self.reschedule(entry, now);
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        local_request_id = %job.local_request_id,
                        phase = %entry.machine.phase(),
                        "Gateway gave up: {}",
                        error
                    );
                    match entry.machine.record_transport_failure(&error) {
                        Some(t) if t.is_terminal() => follow_ups.push(self.finish(entry, &t)),
                        _ => self.reschedule(entry, now),
                    }
                }
            }
        }

        self.follow_up(follow_ups);
    }
}

/// Drives background-check transactions from submission to a terminal phase.
pub struct Orchestrator {
    shared: Arc<Shared>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Create a new orchestrator. Nothing is dispatched until [`start`](Self::start).
    pub fn new(
        config: OrchestratorConfig,
        gateway: Arc<dyn RemoteGateway>,
        archive: Arc<dyn ArtifactArchive>,
        audit: AuditHandle,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (completions, _) = broadcast::channel(config.completion_buffer.max(1));
        let budget = DispatchBudget::new(
            config.max_concurrent_operations,
            config.max_operations_per_minute,
        );
        let fetcher = ArtifactFetcher::new(Arc::clone(&gateway), archive);

        Self {
            shared: Arc::new(Shared {
                config,
                gateway,
                fetcher,
                audit,
                budget,
                registry: RwLock::new(Registry::default()),
                completions,
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Start the orchestrator (spawns background tasks).
    ///
    /// A stopped orchestrator cannot be started again.
    pub async fn start(&self) {
        if self.shared.budget.is_closed() {
            warn!("Orchestrator was stopped, not restarting");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!(gateway = %self.shared.gateway.name(), "Starting orchestrator");
        self.spawn_dispatch_loop();
        self.spawn_sweep_loop();
        info!("Orchestrator started");
    }

    /// Stop the orchestrator.
    ///
    /// Operations already in flight complete and are applied. Operations
    /// still waiting for a dispatch permit are never sent, and their
    /// transactions keep their phase.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping orchestrator");
        let _ = self.shutdown_tx.send(());
        self.shared.budget.close();
        info!("Orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start a transaction for `subject`.
    ///
    /// If a live transaction for the same subject exists its handle is
    /// returned instead. `deadline` defaults to `default_deadline_secs`.
    pub async fn submit(
        &self,
        subject: SubjectKey,
        deadline: Option<Duration>,
    ) -> Result<TransactionHandle, OrchestratorError> {
        self.ensure_running()?;
        let deadline_at = self.deadline_at(&subject, deadline)?;
        let fingerprint = subject.fingerprint();

        let mut registry = self.shared.registry.write().await;
        if let Some(entry) = registry
            .entries
            .values()
            .find(|e| e.fingerprint == fingerprint && !e.machine.phase().is_terminal())
        {
            debug!(
                local_request_id = %entry.machine.local_request_id(),
                "Subject already in progress"
            );
            return Ok(entry.machine.state().handle.clone());
        }

        let local_request_id = Uuid::new_v4().to_string();
        Ok(self.insert(&mut registry, local_request_id, subject, fingerprint, deadline_at))
    }

    /// Start a transaction under a caller-chosen id.
    ///
    /// Re-submitting an id with the same subject returns the existing
    /// handle; with a different subject it fails with `SubjectChanged`.
    pub async fn submit_with_id(
        &self,
        local_request_id: impl Into<String>,
        subject: SubjectKey,
        deadline: Option<Duration>,
    ) -> Result<TransactionHandle, OrchestratorError> {
        self.ensure_running()?;
        let local_request_id = local_request_id.into();
        if local_request_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "local request id is empty".to_string(),
            ));
        }
        let deadline_at = self.deadline_at(&subject, deadline)?;

        let mut registry = self.shared.registry.write().await;
        if let Some(entry) = registry.entries.get(&local_request_id) {
            entry.machine.ensure_subject(&subject)?;
            return Ok(entry.machine.state().handle.clone());
        }

        let fingerprint = subject.fingerprint();
        Ok(self.insert(&mut registry, local_request_id, subject, fingerprint, deadline_at))
    }

    /// Snapshot of one transaction.
    pub async fn status(
        &self,
        handle: &TransactionHandle,
    ) -> Result<TransactionState, OrchestratorError> {
        let registry = self.shared.registry.read().await;
        registry
            .entries
            .get(&handle.local_request_id)
            .map(|e| e.machine.state().clone())
            .ok_or_else(|| TransactionError::NotFound(handle.local_request_id.clone()).into())
    }

    /// Cancel a transaction.
    ///
    /// An operation already in flight completes and its result is discarded.
    pub async fn cancel(&self, handle: &TransactionHandle) -> Result<(), OrchestratorError> {
        let follow_up = {
            let mut registry = self.shared.registry.write().await;
            let entry = registry
                .entries
                .get_mut(&handle.local_request_id)
                .ok_or_else(|| TransactionError::NotFound(handle.local_request_id.clone()))?;
            let t = entry.machine.cancel()?;
            info!(local_request_id = %handle.local_request_id, from = %t.from, "Transaction cancelled");
            self.shared.finish(entry, &t)
        };
        self.shared.follow_up(vec![follow_up]);
        Ok(())
    }

    /// Fire the poll timer of a polling transaction now.
    ///
    /// Returns false when a poll for its remote UID is already in flight;
    /// the request is then dropped.
    pub async fn poll_now(&self, handle: &TransactionHandle) -> Result<bool, OrchestratorError> {
        self.ensure_running()?;

        let job = {
            let mut registry = self.shared.registry.write().await;
            let Registry {
                entries,
                in_flight,
            } = &mut *registry;
            let entry = entries
                .get_mut(&handle.local_request_id)
                .ok_or_else(|| TransactionError::NotFound(handle.local_request_id.clone()))?;

            let phase = entry.machine.phase();
            if phase.is_terminal() {
                return Err(TransactionError::AlreadyTerminal {
                    local_request_id: handle.local_request_id.clone(),
                    phase,
                }
                .into());
            }
            if phase != Phase::Polling {
                return Err(TransactionError::InvalidPhase {
                    expected: Phase::Polling.to_string(),
                    actual: phase,
                }
                .into());
            }
            self.shared.claim(entry, in_flight)
        };

        match job {
            Some(job) => {
                self.shared.spawn_job(job);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Receive a [`CompletionEvent`] for every transaction that finishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.shared.completions.subscribe()
    }

    /// Snapshots of every tracked transaction. Finished ones are listed
    /// until they are evicted.
    pub async fn list(&self) -> Vec<TransactionState> {
        let registry = self.shared.registry.read().await;
        registry
            .entries
            .values()
            .map(|e| e.machine.state().clone())
            .collect()
    }

    /// Get current orchestrator status.
    pub async fn status_summary(&self) -> OrchestratorStatus {
        let registry = self.shared.registry.read().await;
        let mut status = OrchestratorStatus {
            running: self.is_running(),
            in_flight: self.shared.budget.in_flight(),
            audit_dropped: self.shared.audit.dropped(),
            ..Default::default()
        };
        for entry in registry.entries.values() {
            status.count(entry.machine.phase());
        }
        status
    }

    fn ensure_running(&self) -> Result<(), OrchestratorError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(OrchestratorError::NotRunning)
        }
    }

    fn deadline_at(
        &self,
        subject: &SubjectKey,
        deadline: Option<Duration>,
    ) -> Result<DateTime<Utc>, OrchestratorError> {
        if subject.data_source.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "subject has no data source".to_string(),
            ));
        }
        let deadline =
            deadline.unwrap_or(Duration::from_secs(self.shared.config.default_deadline_secs));
        if deadline.is_zero() {
            return Err(OrchestratorError::InvalidRequest(
                "deadline must be positive".to_string(),
            ));
        }
        let deadline = chrono::Duration::from_std(deadline)
            .map_err(|e| OrchestratorError::InvalidRequest(format!("deadline: {}", e)))?;
        Utc::now()
            .checked_add_signed(deadline)
            .ok_or_else(|| OrchestratorError::InvalidRequest("deadline out of range".to_string()))
    }

    fn insert(
        &self,
        registry: &mut Registry,
        local_request_id: String,
        subject: SubjectKey,
        fingerprint: String,
        deadline_at: DateTime<Utc>,
    ) -> TransactionHandle {
        let handle = TransactionHandle::new(local_request_id.clone(), subject);
        let machine = TransactionMachine::new(
            handle.clone(),
            Utc::now(),
            deadline_at,
            self.shared.config.max_trigger_attempts,
        );

        info!(
            local_request_id = %local_request_id,
            data_source = %handle.subject.data_source,
            deadline_at = %deadline_at,
            "Transaction submitted"
        );
        registry.entries.insert(
            local_request_id,
            Entry {
                machine,
                fingerprint,
                due_at: Some(Instant::now()),
                retired_at: None,
            },
        );
        handle
    }

    /// Spawn the dispatch loop task.
    fn spawn_dispatch_loop(&self) {
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let tick = Duration::from_millis(shared.config.tick_interval_ms.max(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Dispatch loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(tick) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        shared.dispatch_due().await;
                    }
                }
            }
            info!("Dispatch loop stopped");
        });
    }

    /// Spawn the deadline sweep task.
    fn spawn_sweep_loop(&self) {
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_millis(shared.config.sweep_interval_ms.max(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Deadline sweep started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Deadline sweep received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        shared.sweep_deadlines().await;
                    }
                }
            }
            info!("Deadline sweep stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::create_audit_pipeline;
    use crate::testing::{MemoryAuditSink, MockArchive, MockGateway};

    fn orchestrator(config: OrchestratorConfig) -> (Orchestrator, Arc<MockGateway>) {
        let gateway = Arc::new(MockGateway::new());
        let (audit, _writer) = create_audit_pipeline(Arc::new(MemoryAuditSink::new()), 16);
        let orchestrator = Orchestrator::new(
            config,
            Arc::clone(&gateway) as Arc<dyn RemoteGateway>,
            Arc::new(MockArchive::new()),
            audit,
        );
        (orchestrator, gateway)
    }

    fn subject(tax_id: &str) -> SubjectKey {
        SubjectKey::new("cpf-status").with_param("tax_id", tax_id)
    }

    #[test]
    fn test_retrigger_delay_within_bounds() {
        let config = OrchestratorConfig {
            retrigger_jitter_min_ms: 10,
            retrigger_jitter_max_ms: 20,
            ..Default::default()
        };
        let (orchestrator, _) = orchestrator(config);
        for _ in 0..100 {
            let delay = orchestrator.shared.retrigger_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_job_keys() {
        let trigger = Job {
            local_request_id: "req-1".into(),
            subject: subject("1"),
            kind: JobKind::Trigger,
        };
        let poll = Job {
            kind: JobKind::Poll {
                remote_uid: "u1".into(),
            },
            ..trigger.clone()
        };
        assert_eq!(trigger.key(), "trigger:req-1");
        assert_eq!(poll.key(), "poll:u1");
    }

    #[tokio::test]
    async fn test_submit_requires_running() {
        let (orchestrator, _) = orchestrator(OrchestratorConfig::default());
        let result = orchestrator.submit(subject("1"), None).await;
        assert!(matches!(result, Err(OrchestratorError::NotRunning)));
    }

    #[tokio::test]
    async fn test_submit_dedups_live_subject() {
        let (orchestrator, _) = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;

        let a = orchestrator.submit(subject("1"), None).await.unwrap();
        let b = orchestrator.submit(subject("1"), None).await.unwrap();
        let c = orchestrator.submit(subject("2"), None).await.unwrap();

        assert_eq!(a.local_request_id, b.local_request_id);
        assert_ne!(a.local_request_id, c.local_request_id);
        assert_eq!(orchestrator.list().await.len(), 2);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_submit_with_id_rejects_subject_change() {
        let (orchestrator, _) = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;

        orchestrator
            .submit_with_id("req-1", subject("1"), None)
            .await
            .unwrap();
        let again = orchestrator
            .submit_with_id("req-1", subject("1"), None)
            .await
            .unwrap();
        assert_eq!(again.local_request_id, "req-1");

        let err = orchestrator
            .submit_with_id("req-1", subject("2"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Transaction(TransactionError::SubjectChanged { .. })
        ));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_requests() {
        let (orchestrator, _) = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;

        let no_source = orchestrator.submit(SubjectKey::new(""), None).await;
        assert!(matches!(no_source, Err(OrchestratorError::InvalidRequest(_))));

        let zero = orchestrator
            .submit(subject("1"), Some(Duration::ZERO))
            .await;
        assert!(matches!(zero, Err(OrchestratorError::InvalidRequest(_))));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_submit_rejects_out_of_range_deadline() {
        let (orchestrator, _) = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;

        let result = orchestrator
            .submit(subject("1"), Some(Duration::from_secs(10_000_000_000_000)))
            .await;
        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));

        let result = orchestrator
            .submit_with_id("req-1", subject("1"), Some(Duration::MAX))
            .await;
        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
        assert!(orchestrator.list().await.is_empty());
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_finished_transactions_are_evicted() {
        let config = OrchestratorConfig {
            tick_interval_ms: 60_000,
            sweep_interval_ms: 10,
            terminal_retention_secs: 0,
            ..Default::default()
        };
        let (orchestrator, _) = orchestrator(config);
        orchestrator.start().await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let handle = orchestrator
                .submit(subject(&i.to_string()), None)
                .await
                .unwrap();
            orchestrator.cancel(&handle).await.unwrap();
            handles.push(handle);
        }
        let live = orchestrator.submit(subject("live"), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let listed = orchestrator.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].handle.local_request_id, live.local_request_id);
        assert!(matches!(
            orchestrator.status(&handles[0]).await,
            Err(OrchestratorError::Transaction(TransactionError::NotFound(_)))
        ));
        assert_eq!(orchestrator.status_summary().await.total, 1);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_finished_transactions_kept_within_retention() {
        let config = OrchestratorConfig {
            tick_interval_ms: 60_000,
            sweep_interval_ms: 10,
            ..Default::default()
        };
        let (orchestrator, _) = orchestrator(config);
        orchestrator.start().await;

        let handle = orchestrator.submit(subject("1"), None).await.unwrap();
        orchestrator.cancel(&handle).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = orchestrator.status(&handle).await.unwrap();
        assert_eq!(state.phase, Phase::Cancelled);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_budget_and_blocks_restart() {
        let (orchestrator, _) = orchestrator(OrchestratorConfig::default());
        orchestrator.start().await;
        orchestrator.stop().await;
        assert!(orchestrator.shared.budget.is_closed());

        orchestrator.start().await;
        assert!(!orchestrator.is_running());
        let result = orchestrator.submit(subject("1"), None).await;
        assert!(matches!(result, Err(OrchestratorError::NotRunning)));
    }

    #[tokio::test]
    async fn test_status_unknown_handle() {
        let (orchestrator, _) = orchestrator(OrchestratorConfig::default());
        let handle = TransactionHandle::new("nope", subject("1"));
        assert!(matches!(
            orchestrator.status(&handle).await,
            Err(OrchestratorError::Transaction(TransactionError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_poll_now_outside_polling_is_misuse() {
        let config = OrchestratorConfig {
            // Keep the transaction in Pending.
            tick_interval_ms: 60_000,
            ..Default::default()
        };
        let (orchestrator, _) = orchestrator(config);
        orchestrator.start().await;

        let handle = orchestrator.submit(subject("1"), None).await.unwrap();
        let err = orchestrator.poll_now(&handle).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Transaction(TransactionError::InvalidPhase {
                actual: Phase::Pending,
                ..
            })
        ));

        orchestrator.cancel(&handle).await.unwrap();
        let err = orchestrator.poll_now(&handle).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Transaction(TransactionError::AlreadyTerminal {
                phase: Phase::Cancelled,
                ..
            })
        ));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_status_summary_counts() {
        let config = OrchestratorConfig {
            tick_interval_ms: 60_000,
            ..Default::default()
        };
        let (orchestrator, _) = orchestrator(config);
        orchestrator.start().await;

        let a = orchestrator.submit(subject("1"), None).await.unwrap();
        orchestrator.submit(subject("2"), None).await.unwrap();
        orchestrator.cancel(&a).await.unwrap();

        let status = orchestrator.status_summary().await;
        assert!(status.running);
        assert_eq!(status.total, 2);
        assert_eq!(status.pending, 1);
        assert_eq!(status.cancelled, 1);
        assert_eq!(status.in_flight, 0);
        orchestrator.stop().await;
    }
}
