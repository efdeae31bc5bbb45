//! Structured result for best-effort, multi-item operations.

use serde::{Deserialize, Serialize};

/// Per-item tally of a best-effort operation.
///
/// Distinguishes "everything worked", "some of it worked" and "there was
/// nothing to do", which a plain `bool` cannot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Items that were processed successfully.
    pub succeeded: Vec<String>,
    /// Items that failed, with a reason.
    pub failed: Vec<String>,
    /// Items that were skipped (missing source, nothing to do).
    pub skipped: Vec<String>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(&mut self, item: impl Into<String>) {
        self.succeeded.push(item.into());
    }

    pub fn fail(&mut self, item: impl Into<String>, reason: impl std::fmt::Display) {
        self.failed.push(format!("{}: {}", item.into(), reason));
    }

    pub fn skip(&mut self, item: impl Into<String>) {
        self.skipped.push(item.into());
    }

    /// Number of items attempted (succeeded or failed).
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Nothing was attempted at all.
    pub fn is_noop(&self) -> bool {
        self.attempted() == 0
    }

    /// Full or partial success: no failures, or at least one item recovered.
    pub fn is_usable(&self) -> bool {
        self.failed.is_empty() || !self.succeeded.is_empty()
    }
}
