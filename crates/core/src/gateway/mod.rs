//! Remote gateway adapter.
//!
//! Issues the two remote operations (trigger and poll) plus artifact
//! downloads, and normalises every response into a [`TransactionUpdate`].
//! Transport failures are retried here, independently of the status code
//! classifier.

mod error;
mod http;
mod traits;
mod types;

pub use error::GatewayError;
pub use http::{transport_backoff, HttpGateway};
pub use traits::RemoteGateway;
pub use types::{Operation, SubjectKey, TransactionUpdate};
