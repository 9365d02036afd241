//! Process-wide execution environment flags.
//!
//! # Responsibility
//! - Track whether the current process is inside a pipeline-step
//!   execution scope.
//!
//! # Invariants
//! - Scopes nest; the flag clears only when every guard has been dropped.
//! - Enforcement happens at repository construction time, not through
//!   runtime locking.

use std::sync::atomic::{AtomicUsize, Ordering};

static STEP_SCOPE_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Whether a pipeline step is currently executing in this process.
///
/// Repository construction is rejected while this holds; worker code
/// running one step must not mutate orchestration metadata.
pub fn step_is_running() -> bool {
    STEP_SCOPE_DEPTH.load(Ordering::SeqCst) > 0
}

/// RAII scope marking the current process as executing a pipeline step.
///
/// Orchestration integrations enter a scope around user step code and
/// rely on `Drop` to clear it, panics included.
#[must_use = "the step scope ends when this guard is dropped"]
pub struct StepExecutionScope(());

impl StepExecutionScope {
    pub fn enter() -> Self {
        STEP_SCOPE_DEPTH.fetch_add(1, Ordering::SeqCst);
        Self(())
    }
}

impl Drop for StepExecutionScope {
    fn drop(&mut self) {
        STEP_SCOPE_DEPTH.fetch_sub(1, Ordering::SeqCst);
    }
}
