//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress callbacks, invoked synchronously on the patching thread.
///
/// Callbacks must not block: the pipeline does no work while one runs.
/// Absent callbacks are simply skipped.
#[derive(Default)]
pub struct ProgressHooks {
    /// Called with (processed, total) uncompressed byte counts.
    pub bytes: Option<Box<dyn FnMut(u64, u64) + Send>>,
    /// Called with (processed, total) entry counts.
    pub files: Option<Box<dyn FnMut(u64, u64) + Send>>,
    /// Called with the name of the entry being processed.
    pub entry: Option<Box<dyn FnMut(&str) + Send>>,
}

impl ProgressHooks {
    pub(crate) fn on_bytes(&mut self, current: u64, maximum: u64) {
        if let Some(callback) = &mut self.bytes {
            callback(current, maximum);
        }
    }

    pub(crate) fn on_files(&mut self, current: u64, maximum: u64) {
        if let Some(callback) = &mut self.files {
            callback(current, maximum);
        }
    }

    pub(crate) fn on_entry(&mut self, name: &str) {
        if let Some(callback) = &mut self.entry {
            callback(name);
        }
    }
}

/// Shared cancellation flag.
///
/// Any thread may publish cancellation; the patching thread polls at
/// entry boundaries, around boot-image codec calls, around pass-2
/// transforms, and before each finalization entry. Cancellation is
/// best-effort: work in flight between boundaries is not preempted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Creates a flag in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
