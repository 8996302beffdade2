/// Trait for reporting progress of sync, attribute calculation and grouping.
///
/// The CLI implements this with indicatif bars. Every method has a no-op default.
/// Implementations are called from background task threads and from rayon workers.
pub trait ProgressReporter: Send + Sync {
    fn on_sync_start(&self, _root: &str) {}
    fn on_sync_progress(&self, _files_seen: usize, _current_path: &str) {}
    fn on_sync_complete(
        &self,
        _files_seen: usize,
        _pruned: usize,
        _inaccessible: usize,
        _duration_secs: f64,
    ) {
    }
    fn on_calculate_start(&self, _attribute: &str, _total_files: usize) {}
    fn on_calculate_progress(&self, _files_done: usize, _total_files: usize) {}
    fn on_calculate_complete(
        &self,
        _attribute: &str,
        _stored: usize,
        _failed: usize,
        _duration_secs: f64,
    ) {
    }
    fn on_group_start(&self) {}
    fn on_group_complete(&self, _groups: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
