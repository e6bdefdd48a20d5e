/// Category-specific recovery handlers
///
/// Each handler owns its own state (HTTP client pool, quarantine tree, disk-space
/// cache) and reports a [`HandlerOutcome`]. Handlers never re-run caller work;
/// success means "the mitigation was applied, the operation may be retried".
pub mod network;
pub mod pdf;
pub mod storage;

pub use network::{CachingResolver, NetworkHandler};
pub use pdf::{
    HeuristicPdfBackend, PdfBackend, PdfHandler, PdfValidation, QuarantineReason,
    QuarantineRecord,
};
pub use storage::{
    CleanupExtension, CleanupRecommendation, CleanupReport, SpaceProbe, SpaceReport,
    StatvfsProbe, StorageHandler,
};

use std::path::PathBuf;

/// Result of delegating an error to a specialized handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Mitigation applied; the operation may be re-run
    Recovered(String),

    /// Input moved out of the pipeline; the item should be dropped
    Quarantined(PathBuf),

    /// Nothing the handler tried worked
    Unrecovered(String),
}

impl HandlerOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, HandlerOutcome::Recovered(_))
    }
}
