//! Bulk-transfer progress reporting.
//!
//! The core has no opinion on how progress is displayed; it just calls back
//! with `(bytes_done, bytes_total)` after every chunk of an upload or
//! download.

/// A progress sink for [`crate::client::Badgelink`]'s upload/download calls.
/// The CLI wires this to an `indicatif` bar; library callers can pass a
/// closure, a logger, or nothing.
pub trait Progress: Send {
    /// Called after each chunk with the number of bytes transferred so far
    /// and the total size of the transfer.
    fn on_progress(&mut self, done: u64, total: u64);
}

/// No-op sink for callers that don't care about progress.
pub struct NoProgress;

impl Progress for NoProgress {
    fn on_progress(&mut self, _done: u64, _total: u64) {}
}

impl<F: FnMut(u64, u64) + Send> Progress for F {
    fn on_progress(&mut self, done: u64, total: u64) {
        self(done, total)
    }
}
