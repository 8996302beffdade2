pub mod cluster;

use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::storage::{Database, FileEntry, FileFilter};
use crate::strategy::{ActiveStrategy, Similarity, Strategy};
use std::time::Instant;
use tracing::{debug, info};

/// Files that matched on every enabled criterion. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub files: Vec<FileEntry>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file_ids(&self) -> Vec<i64> {
        self.files.iter().map(|f| f.id()).collect()
    }

    /// Bytes reclaimable by keeping only the largest member.
    pub fn wasted_bytes(&self) -> i64 {
        let sizes: Vec<i64> = self
            .files
            .iter()
            .filter_map(|f| f.attributes.size)
            .collect();
        let largest = sizes.iter().copied().max().unwrap_or(0);
        sizes.iter().sum::<i64>() - largest
    }
}

/// Group the filtered files by the active strategies.
///
/// Exact keys are grouped by a single aggregate query; similarity strategies then split
/// each group with a greedy pivot pass, requiring every similarity test to pass. With no
/// exact key, the pivot pass starts from all filtered files. Reads run in one transaction
/// so the result reflects a single snapshot of the store.
pub fn find_duplicates(
    db: &Database,
    strategies: &[ActiveStrategy],
    filter: &FileFilter,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<DuplicateGroup>, Error> {
    if strategies.is_empty() {
        return Err(Error::validation(
            "comparison options",
            "no comparison strategy is enabled",
        ));
    }
    if filter.source_ids.is_empty() {
        return Err(Error::validation("source ids", "no source selected"));
    }

    let mut exact_columns = Vec::new();
    let mut similarities: Vec<Similarity> = Vec::new();
    for active in strategies {
        match active.strategy {
            Strategy::ExactKey(key) => exact_columns.push(key.column()),
            Strategy::Similarity(similarity) => similarities.push(similarity),
        }
    }

    let start = Instant::now();
    reporter.on_group_start();
    let store_err = |e: rusqlite::Error| Error::store("grouping", "duplicate search", e);
    let tx = db.connection().unchecked_transaction().map_err(store_err)?;

    // Phase A
    let candidate_groups: Vec<Vec<i64>> = if exact_columns.is_empty() {
        let all = db.filtered_file_ids(filter).map_err(store_err)?;
        if all.len() < 2 {
            Vec::new()
        } else {
            vec![all]
        }
    } else {
        db.group_ids_by_keys(&exact_columns, filter)
            .map_err(store_err)?
    };
    debug!(
        "Exact phase over [{}] produced {} candidate groups",
        exact_columns.join(", "),
        candidate_groups.len()
    );

    // Phase B
    let mut groups = Vec::new();
    for ids in candidate_groups {
        let files = db.get_files(&ids).map_err(store_err)?;
        if similarities.is_empty() {
            if files.len() >= 2 {
                groups.push(DuplicateGroup { files });
            }
            continue;
        }
        let clusters = cluster::split_by_pivot(files, |pivot: &FileEntry, candidate: &FileEntry| {
            similarities
                .iter()
                .all(|test| test.matches(&pivot.attributes, &candidate.attributes))
        });
        groups.extend(clusters.into_iter().map(|files| DuplicateGroup { files }));
    }

    tx.commit().map_err(store_err)?;

    let elapsed = start.elapsed().as_secs_f64();
    reporter.on_group_complete(groups.len(), elapsed);
    info!(
        "Found {} duplicate groups using [{}] in {:.2}s",
        groups.len(),
        strategies
            .iter()
            .map(|s| s.key)
            .collect::<Vec<_>>()
            .join(", "),
        elapsed
    );
    Ok(groups)
}
