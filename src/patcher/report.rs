//! Outcome of a patching run.

use std::path::PathBuf;

use crate::injection::InjectionOutcome;

/// Result of applying one compiled patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Calls were inserted
    Injected {
        /// Number of inserted calls
        count: usize,
    },
    /// The target already called the patch
    AlreadyPresent,
    /// The patch could not be applied
    Failed(String),
}

impl From<InjectionOutcome> for PatchOutcome {
    fn from(outcome: InjectionOutcome) -> Self {
        match outcome {
            InjectionOutcome::Injected { count } => PatchOutcome::Injected { count },
            InjectionOutcome::AlreadyPresent => PatchOutcome::AlreadyPresent,
        }
    }
}

/// One patch that reached the injection phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    /// Patch name
    pub name: String,
    /// Patch source file
    pub source: PathBuf,
    /// File name of the binary the patch targets
    pub target_assembly: String,
    /// What happened
    pub outcome: PatchOutcome,
}

/// A source or binary that failed as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Source file or binary path
    pub path: PathBuf,
    /// Rendered error
    pub reason: String,
}

/// Everything a [`crate::patcher::PatchSession::patch`] run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Patches in application order
    pub patches: Vec<PatchRecord>,
    /// Sources that failed to parse or compile
    pub compile_failures: Vec<Failure>,
    /// Binaries that were written
    pub written: Vec<PathBuf>,
    /// Binaries that could not be loaded, failed the write gate or failed to write
    pub rejected: Vec<Failure>,
}

impl PatchReport {
    /// True if every source compiled, every patch applied and no binary was rejected
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.compile_failures.is_empty() && self.rejected.is_empty() && self.failed_count() == 0
    }

    /// Patches that inserted calls in this run
    #[must_use]
    pub fn injected_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, PatchOutcome::Injected { .. }))
    }

    /// Patches that were already applied
    #[must_use]
    pub fn already_present_count(&self) -> usize {
        self.count(|outcome| *outcome == PatchOutcome::AlreadyPresent)
    }

    /// Patches that failed during injection
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, PatchOutcome::Failed(_)))
    }

    fn count(&self, predicate: impl Fn(&PatchOutcome) -> bool) -> usize {
        self.patches
            .iter()
            .filter(|record| predicate(&record.outcome))
            .count()
    }
}
