//! Mock remote gateway for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::gateway::{GatewayError, Operation, RemoteGateway, SubjectKey, TransactionUpdate};

/// A recorded gateway call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: Operation,
    /// Subject of triggers and polls. `None` for artifact fetches.
    pub subject: Option<SubjectKey>,
    /// Polled UID, or fetched URL for artifact fetches.
    pub target: Option<String>,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

type Scripted = Result<TransactionUpdate, GatewayError>;

/// Mock implementation of the RemoteGateway trait.
///
/// Responses are scripted per subject (triggers) and per remote UID (polls)
/// and handed out in order. With nothing scripted:
/// - a trigger answers `12` (in progress) with a fresh UID
/// - a poll answers `12` for the polled UID
///
/// # Example
///
/// ```rust,ignore
/// let gateway = MockGateway::new();
/// gateway.push_trigger(&subject, TransactionUpdate::new(12).with_uid("u1")).await;
/// gateway.push_poll("u1", TransactionUpdate::new(1)).await;
///
/// // ... drive the orchestrator ...
///
/// assert_eq!(gateway.trigger_count().await, 1);
/// assert_eq!(gateway.poll_count("u1").await, 1);
/// ```
#[derive(Debug)]
pub struct MockGateway {
    /// Scripted trigger responses by subject fingerprint.
    triggers: Arc<RwLock<HashMap<String, VecDeque<Scripted>>>>,
    /// Scripted poll responses by remote UID.
    polls: Arc<RwLock<HashMap<String, VecDeque<Scripted>>>>,
    /// Artifact bytes by URL. Unknown URLs fail with HTTP 404.
    artifacts: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Recorded calls.
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// If set, the next call of any kind fails with this error.
    next_error: Arc<RwLock<Option<GatewayError>>>,
    /// Delay applied to every call.
    latency: Arc<RwLock<Duration>>,
    /// Counter for generating unique UIDs.
    uid_counter: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Create a new mock gateway.
    pub fn new() -> Self {
        Self {
            triggers: Arc::new(RwLock::new(HashMap::new())),
            polls: Arc::new(RwLock::new(HashMap::new())),
            artifacts: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            latency: Arc::new(RwLock::new(Duration::ZERO)),
            uid_counter: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue a trigger response for `subject`.
    pub async fn push_trigger(&self, subject: &SubjectKey, update: TransactionUpdate) {
        self.push(&self.triggers, subject.fingerprint(), Ok(update))
            .await;
    }

    /// Queue a trigger failure for `subject`.
    pub async fn push_trigger_error(&self, subject: &SubjectKey, error: GatewayError) {
        self.push(&self.triggers, subject.fingerprint(), Err(error))
            .await;
    }

    /// Queue a poll response for `remote_uid`. The UID is filled in when missing.
    pub async fn push_poll(&self, remote_uid: &str, update: TransactionUpdate) {
        self.push(&self.polls, remote_uid.to_string(), Ok(update))
            .await;
    }

    /// Queue a poll failure for `remote_uid`.
    pub async fn push_poll_error(&self, remote_uid: &str, error: GatewayError) {
        self.push(&self.polls, remote_uid.to_string(), Err(error))
            .await;
    }

    /// Serve `bytes` for artifact `url`.
    pub async fn set_artifact(&self, url: &str, bytes: Vec<u8>) {
        self.artifacts.write().await.insert(url.to_string(), bytes);
    }

    /// Delay every subsequent call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    /// Make the next call fail with the given error.
    pub async fn set_next_error(&self, error: GatewayError) {
        *self.next_error.write().await = Some(error);
    }

    /// Get all recorded calls.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Number of trigger calls made.
    pub async fn trigger_count(&self) -> usize {
        self.count(|c| c.operation == Operation::Trigger).await
    }

    /// Number of poll calls made for `remote_uid`.
    pub async fn poll_count(&self, remote_uid: &str) -> usize {
        self.count(|c| {
            c.operation == Operation::Poll && c.target.as_deref() == Some(remote_uid)
        })
        .await
    }

    /// Number of artifact fetches made.
    pub async fn artifact_fetch_count(&self) -> usize {
        self.count(|c| c.operation == Operation::ArtifactFetch).await
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn push(
        &self,
        script: &RwLock<HashMap<String, VecDeque<Scripted>>>,
        key: String,
        response: Scripted,
    ) {
        script
            .write()
            .await
            .entry(key)
            .or_default()
            .push_back(response);
    }

    async fn count(&self, filter: impl Fn(&RecordedCall) -> bool) -> usize {
        self.calls.read().await.iter().filter(|c| filter(c)).count()
    }

    /// Record the call, apply latency and return the injected error, if any.
    async fn enter(
        &self,
        operation: Operation,
        subject: Option<&SubjectKey>,
        target: Option<&str>,
    ) -> Option<GatewayError> {
        self.calls.write().await.push(RecordedCall {
            operation,
            subject: subject.cloned(),
            target: target.map(str::to_string),
            timestamp: Utc::now(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.next_error.write().await.take()
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn trigger(&self, subject: &SubjectKey) -> Result<TransactionUpdate, GatewayError> {
        let injected = self.enter(Operation::Trigger, Some(subject), None).await;
        self.leave();
        if let Some(error) = injected {
            return Err(error);
        }

        let scripted = self
            .triggers
            .write()
            .await
            .get_mut(&subject.fingerprint())
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(response) => response,
            None => {
                let n = self.uid_counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(TransactionUpdate::new(12).with_uid(format!("mock-uid-{}", n)))
            }
        }
    }

    async fn poll(
        &self,
        subject: &SubjectKey,
        remote_uid: &str,
    ) -> Result<TransactionUpdate, GatewayError> {
        let injected = self
            .enter(Operation::Poll, Some(subject), Some(remote_uid))
            .await;
        self.leave();
        if let Some(error) = injected {
            return Err(error);
        }

        let scripted = self
            .polls
            .write()
            .await
            .get_mut(remote_uid)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(Ok(mut update)) => {
                if update.uid.is_none() {
                    update.uid = Some(remote_uid.to_string());
                }
                Ok(update)
            }
            Some(Err(error)) => Err(error),
            None => Ok(TransactionUpdate::new(12).with_uid(remote_uid)),
        }
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        let injected = self
            .enter(Operation::ArtifactFetch, None, Some(url))
            .await;
        self.leave();
        if let Some(error) = injected {
            return Err(error);
        }

        self.artifacts
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| GatewayError::Http {
                status: 404,
                body: format!("no artifact at {}", url),
            })
    }
}
