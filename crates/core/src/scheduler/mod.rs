//! Scheduler / poll loop driver.
//!
//! The [`Orchestrator`] keeps every transaction's machine in one registry and
//! re-drives it from timers:
//! - **Dispatch loop**: on each tick, claims due transactions and spawns their
//!   trigger or poll
//! - **Deadline sweep**: expires overdue transactions even when no timer is set
//!
//! Every network operation first takes a permit from the shared
//! [`DispatchBudget`].

mod budget;
mod config;
mod runner;
mod types;

pub use budget::{DispatchBudget, DispatchPermit, TokenBucket};
pub use config::OrchestratorConfig;
pub use runner::Orchestrator;
pub use types::{CompletionEvent, OrchestratorError, OrchestratorStatus};
