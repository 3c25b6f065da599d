//! Orchestration of asynchronous background-check transactions.
//!
//! A transaction is triggered against a remote data source, polled until the
//! service reports a final status, and completed with a risk verdict and its
//! artifacts archived. See [`Orchestrator`] for the entry point.

pub mod artifact;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod risk;
pub mod scheduler;
pub mod testing;
pub mod transaction;

pub use artifact::{ArchiveError, ArtifactArchive, ArtifactFetcher, ArtifactKind};
pub use audit::{
    create_audit_pipeline, AuditError, AuditHandle, AuditRecord, AuditSink, AuditWriter,
    TracingAuditSink,
};
pub use classifier::{classify, OutcomeClass, RequiredAction};
pub use config::{
    load_config, load_config_from_str, validate_config, AuditConfig, Config, ConfigError,
    GatewayConfig, LogFormat, LoggingConfig,
};
pub use gateway::{GatewayError, HttpGateway, RemoteGateway, SubjectKey, TransactionUpdate};
pub use logging::{init_logging, LoggingError};
pub use risk::{aggregate, RiskError, RiskIndicator, RiskLevel, RiskVerdict};
pub use scheduler::{
    CompletionEvent, DispatchBudget, Orchestrator, OrchestratorConfig, OrchestratorError,
    OrchestratorStatus,
};
pub use transaction::{
    CompletionWarning, ErrorKind, FailureReason, Phase, TransactionError, TransactionHandle,
    TransactionState,
};
