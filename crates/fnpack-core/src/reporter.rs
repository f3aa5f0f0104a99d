//! Reporter trait for dependency injection
//!
//! Lets the orchestrator report per-entry-point progress without being tied
//! to a particular terminal presentation.

pub trait Reporter: Send + Sync {
    /// A new phase of the run has started (e.g. "Packaging").
    fn section(&self, title: &str);

    /// An entry point started packaging.
    fn packaging(&self, entry: &str);

    /// An archive was written.
    fn packaged(&self, entry: &str, archive: &str, size: u64);

    /// Reconciliation started for an entry point's function.
    fn deploying(&self, entry: &str, function: &str);

    /// Reconciliation finished; `detail` lists the applied actions.
    fn deployed(&self, entry: &str, function: &str, detail: &str);

    /// An entry point failed with a specific reason.
    fn failed(&self, entry: &str, reason: &str);

    fn info(&self, msg: &str);

    fn warning(&self, msg: &str);

    /// Final summary of the run.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title)
    }
    fn packaging(&self, entry: &str) {
        (**self).packaging(entry)
    }
    fn packaged(&self, entry: &str, archive: &str, size: u64) {
        (**self).packaged(entry, archive, size)
    }
    fn deploying(&self, entry: &str, function: &str) {
        (**self).deploying(entry, function)
    }
    fn deployed(&self, entry: &str, function: &str, detail: &str) {
        (**self).deployed(entry, function, detail)
    }
    fn failed(&self, entry: &str, reason: &str) {
        (**self).failed(entry, reason)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs)
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn packaging(&self, _: &str) {}
    fn packaged(&self, _: &str, _: &str, _: u64) {}
    fn deploying(&self, _: &str, _: &str) {}
    fn deployed(&self, _: &str, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
