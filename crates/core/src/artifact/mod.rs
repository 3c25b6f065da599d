//! Artifact retrieval and hand-off.
//!
//! When a transaction succeeds with `has_pdf`, the PDF (and the original
//! files archive, when the service offers one) is downloaded once and handed
//! to an [`ArtifactArchive`]. Failures here degrade the result to a warning;
//! they never undo the success.

mod fetcher;
mod traits;
mod types;

pub use fetcher::ArtifactFetcher;
pub use traits::ArtifactArchive;
pub use types::{ArchiveError, ArtifactKind};
