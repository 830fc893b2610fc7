use std::fmt::{self, Display};

use serde::Serialize;

/// Aggregated outcome of one batch run.
///
/// Individual request failures are absorbed by the `on_failure` callbacks and
/// only counted here; a run that completes returns `Ok(RunSummary)` even when
/// every single execution failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    total: usize,
    succeeded: usize,
    failed: usize,
}

impl RunSummary {
    pub(crate) fn record_success(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.total += 1;
        self.failed += 1;
    }

    /// Number of executions that ran to completion (success or failure)
    #[inline]
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Number of executions whose response handler completed without error
    #[inline]
    #[must_use]
    pub const fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Number of executions routed to `on_failure`
    #[inline]
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.failed
    }

    /// Returns `true` if no execution failed
    #[inline]
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "📝 Summary")?;
        writeln!(f, "-------------------")?;
        writeln!(f, "🔍 Total: {}", self.total)?;
        writeln!(f, "✅ Successful: {}", self.succeeded)?;
        write!(f, "🚫 Failed: {}", self.failed)
    }
}
