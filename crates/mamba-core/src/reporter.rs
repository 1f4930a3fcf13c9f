//! Reporter trait for dependency injection
//!
//! Core logic reports progress and status through this trait so it is not
//! coupled to a terminal implementation. The CLI provides a console
//! reporter; tests and library callers use [`NullReporter`].

use crate::transaction::TransactionPlan;

/// Sink for user-facing progress events.
pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Fetching", "Linking").
    fn section(&self, title: &str);

    /// A subdir's metadata is available; `origin` says where it came from.
    fn subdir_loaded(&self, subdir: &str, origin: &str);

    /// Updates the progress of a package download.
    fn downloading(&self, name: &str, version: &str, current: u64, total: Option<u64>);

    /// A package archive is being unpacked into the cache.
    fn extracting(&self, name: &str, version: &str);

    /// A package is being linked into the prefix.
    fn linking(&self, name: &str, version: &str);

    /// A package is being unlinked from the prefix.
    fn unlinking(&self, name: &str, version: &str);

    /// Marks a package operation as successfully completed.
    fn done(&self, name: &str, version: &str, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, name: &str, version: &str, reason: &str);

    /// Present the transaction plan before confirmation.
    fn plan(&self, plan: &TransactionPlan);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn subdir_loaded(&self, subdir: &str, origin: &str) {
        (**self).subdir_loaded(subdir, origin);
    }
    fn downloading(&self, name: &str, version: &str, current: u64, total: Option<u64>) {
        (**self).downloading(name, version, current, total);
    }
    fn extracting(&self, name: &str, version: &str) {
        (**self).extracting(name, version);
    }
    fn linking(&self, name: &str, version: &str) {
        (**self).linking(name, version);
    }
    fn unlinking(&self, name: &str, version: &str) {
        (**self).unlinking(name, version);
    }
    fn done(&self, name: &str, version: &str, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &str, version: &str, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn plan(&self, plan: &TransactionPlan) {
        (**self).plan(plan);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn subdir_loaded(&self, _: &str, _: &str) {}
    fn downloading(&self, _: &str, _: &str, _: u64, _: Option<u64>) {}
    fn extracting(&self, _: &str, _: &str) {}
    fn linking(&self, _: &str, _: &str) {}
    fn unlinking(&self, _: &str, _: &str) {}
    fn done(&self, _: &str, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str, _: &str) {}
    fn plan(&self, _: &TransactionPlan) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
