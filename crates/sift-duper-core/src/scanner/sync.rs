use super::walk::{compile_ignore_patterns, walk, WalkItem};
use crate::config::RevalidationPolicy;
use crate::error::{Error, InaccessiblePath};
use crate::progress::ProgressReporter;
use crate::storage::models::UpsertOutcome;
use crate::storage::Database;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const PROGRESS_EVERY: usize = 256;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub recursive: bool,
    pub ignore_patterns: Vec<String>,
    pub revalidation: RevalidationPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            ignore_patterns: Vec::new(),
            revalidation: RevalidationPolicy::Never,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub source_id: i64,
    pub scan_start: i64,
    pub files_seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub pruned: usize,
    /// Entries that could not be read. Their stored records were neither refreshed nor pruned.
    pub inaccessible: Vec<InaccessiblePath>,
    pub duration: Duration,
}

/// True when `relative_path` is, or lies beneath, one of the protected paths.
fn is_protected(relative_path: &str, protected: &[String]) -> bool {
    protected.iter().any(|p| {
        p.is_empty()
            || relative_path == p
            || relative_path
                .strip_prefix(p.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn join_relative(relative_dir: &str, name: &str) -> String {
    if relative_dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", relative_dir, name)
    }
}

/// Reconcile one source root into the store.
///
/// Every accessible file is upserted with a fresh `last_seen`; afterwards, records of the
/// source not seen in this scan are pruned, unless they sit at or under a path that could not
/// be read this time. The whole reconciliation is one transaction: an error or cancellation
/// leaves the store exactly as it was.
pub fn sync_source(
    db: &Database,
    source_id: i64,
    root: &Path,
    options: &SyncOptions,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<SyncReport, Error> {
    let root_display = root.display().to_string();
    let store_err = |e: rusqlite::Error| Error::store("sync", root_display.clone(), e);

    if !root.is_dir() {
        return Err(Error::validation(
            "source root",
            format!("{} is not a readable directory", root_display),
        ));
    }
    let source = db
        .get_source(source_id)
        .map_err(store_err)?
        .ok_or_else(|| Error::validation("source id", format!("no source with id {}", source_id)))?;
    if Path::new(&source.path) != root {
        return Err(Error::validation(
            "source root",
            format!(
                "source {} is registered for {}, not {}",
                source_id, source.path, root_display
            ),
        ));
    }

    let start = Instant::now();
    reporter.on_sync_start(&root_display);
    info!("Syncing source {} at {}", source_id, root_display);

    let tx = db.connection().unchecked_transaction().map_err(store_err)?;

    // Epochs strictly increase per source, even if the clock stalls or steps back.
    let now = chrono::Utc::now().timestamp_micros();
    let previous = db.max_last_seen(source_id).map_err(store_err)?;
    let scan_start = previous.map_or(now, |p| now.max(p + 1));

    let mut report = SyncReport {
        source_id,
        scan_start,
        ..SyncReport::default()
    };
    let mut protected: Vec<String> = Vec::new();
    let ignore_patterns = compile_ignore_patterns(&options.ignore_patterns);

    for item in walk(root, options.recursive, &ignore_patterns) {
        if cancel.load(Ordering::Relaxed) {
            info!("Sync of {} cancelled, rolling back", root_display);
            return Err(Error::Cancelled);
        }

        match item {
            WalkItem::File(file) => {
                let outcome = db
                    .upsert_scanned_file(source_id, &file, scan_start, options.revalidation)
                    .map_err(store_err)?;
                match outcome {
                    UpsertOutcome::Inserted => report.inserted += 1,
                    UpsertOutcome::Changed => report.updated += 1,
                    UpsertOutcome::Unchanged => report.unchanged += 1,
                }
                report.files_seen += 1;
                if report.files_seen % PROGRESS_EVERY == 0 {
                    reporter.on_sync_progress(report.files_seen, &file.name);
                }
            }
            WalkItem::Inaccessible { entry, relative } => {
                warn!("Cannot read {}: {}", entry.path.display(), entry.reason);
                protected.push(relative);
                report.inaccessible.push(entry);
            }
        }
    }

    let stale: Vec<i64> = db
        .stale_files(source_id, scan_start)
        .map_err(store_err)?
        .into_iter()
        .filter(|(_, relative_dir, name)| {
            !is_protected(&join_relative(relative_dir, name), &protected)
        })
        .map(|(id, _, _)| id)
        .collect();
    report.pruned = db.delete_files(&stale).map_err(store_err)?;

    tx.commit().map_err(store_err)?;

    report.duration = start.elapsed();
    debug!(
        "Sync of source {}: {} seen, {} new, {} changed, {} pruned, {} inaccessible",
        source_id,
        report.files_seen,
        report.inserted,
        report.updated,
        report.pruned,
        report.inaccessible.len()
    );
    reporter.on_sync_complete(
        report.files_seen,
        report.pruned,
        report.inaccessible.len(),
        report.duration.as_secs_f64(),
    );
    Ok(report)
}
