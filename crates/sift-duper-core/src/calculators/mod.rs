pub mod histogram;

use crate::embedding::{Embedder, EmbeddingError};
use crate::error::{CalculationError, Error};
use crate::hasher;
use crate::progress::ProgressReporter;
use crate::storage::{Attribute, AttributeValue, Database, FileFilter};
use ahash::AHashSet;
use histogram::HistogramMethod;
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Derives one attribute from a file on disk.
pub trait Calculator: Send + Sync {
    fn attribute(&self) -> Attribute;
    fn compute(&self, path: &Path) -> Result<AttributeValue, CalculationError>;
}

fn io_error(path: &Path, source: std::io::Error) -> CalculationError {
    CalculationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Modification time in whole seconds since the epoch; 0 when the platform cannot say.
pub fn modified_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct SizeCalculator;

impl Calculator for SizeCalculator {
    fn attribute(&self) -> Attribute {
        Attribute::Size
    }

    fn compute(&self, path: &Path) -> Result<AttributeValue, CalculationError> {
        let metadata = fs::metadata(path).map_err(|e| io_error(path, e))?;
        Ok(AttributeValue::Integer(metadata.len() as i64))
    }
}

pub struct ModifiedDateCalculator;

impl Calculator for ModifiedDateCalculator {
    fn attribute(&self) -> Attribute {
        Attribute::ModifiedDate
    }

    fn compute(&self, path: &Path) -> Result<AttributeValue, CalculationError> {
        let metadata = fs::metadata(path).map_err(|e| io_error(path, e))?;
        Ok(AttributeValue::Integer(modified_secs(&metadata)))
    }
}

pub struct ContentHashCalculator;

impl Calculator for ContentHashCalculator {
    fn attribute(&self) -> Attribute {
        Attribute::ContentHash
    }

    fn compute(&self, path: &Path) -> Result<AttributeValue, CalculationError> {
        hasher::hash_file(path)
            .map(AttributeValue::Text)
            .map_err(|e| io_error(path, e))
    }
}

pub struct HistogramCalculator {
    method: HistogramMethod,
}

impl HistogramCalculator {
    pub fn new(method: HistogramMethod) -> Self {
        Self { method }
    }
}

impl Calculator for HistogramCalculator {
    fn attribute(&self) -> Attribute {
        Attribute::Histogram(self.method)
    }

    fn compute(&self, path: &Path) -> Result<AttributeValue, CalculationError> {
        histogram::compute_histogram(path).map(AttributeValue::Vector)
    }
}

pub struct EmbeddingCalculator {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingCalculator {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl Calculator for EmbeddingCalculator {
    fn attribute(&self) -> Attribute {
        Attribute::Embedding
    }

    fn compute(&self, path: &Path) -> Result<AttributeValue, CalculationError> {
        let unavailable = |source: EmbeddingError| CalculationError::EmbeddingUnavailable {
            path: path.to_path_buf(),
            source,
        };
        let vector = self.embedder.embed(path).map_err(unavailable)?;
        let expected = self.embedder.dimension();
        if vector.len() != expected {
            return Err(unavailable(EmbeddingError::Dimension {
                expected,
                actual: vector.len(),
            }));
        }
        Ok(AttributeValue::Vector(vector))
    }
}

#[derive(Debug, Clone)]
pub struct PopulateReport {
    pub attribute: Attribute,
    /// Files whose attribute was NULL when the pass started.
    pub pending: usize,
    pub stored: usize,
    pub failed: usize,
}

/// Compute `calculator`'s attribute for every filtered file that lacks it. With
/// `candidates`, only those file ids are considered.
///
/// Values are computed in parallel per batch and each batch is written in one transaction.
/// Cancellation is observed before each file starts; files not yet started keep a NULL
/// attribute. Per-file failures are logged and leave the attribute NULL; permanent ones are
/// recorded so later passes skip the file until it changes.
pub fn populate_attribute(
    db: &Database,
    calculator: &dyn Calculator,
    filter: &FileFilter,
    candidates: Option<&AHashSet<i64>>,
    batch_size: usize,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<PopulateReport, Error> {
    let attribute = calculator.attribute();
    let column = attribute.column();
    let mut pending = db
        .files_missing_attribute(attribute, filter)
        .map_err(|e| Error::store("attribute lookup", column, e))?;
    if let Some(candidates) = candidates {
        pending.retain(|(file_id, _)| candidates.contains(file_id));
    }

    let start = Instant::now();
    let total = pending.len();
    reporter.on_calculate_start(column, total);
    debug!("{} files need {}", total, column);

    let mut report = PopulateReport {
        attribute,
        pending: total,
        stored: 0,
        failed: 0,
    };
    let mut done = 0usize;

    for batch in pending.chunks(batch_size.max(1)) {
        if cancel.load(Ordering::Relaxed) {
            info!("Calculation of {} cancelled after {} files", column, done);
            return Err(Error::Cancelled);
        }

        let results: Vec<(i64, Result<AttributeValue, CalculationError>)> = batch
            .par_iter()
            .filter(|_| !cancel.load(Ordering::Relaxed))
            .map(|(file_id, path)| (*file_id, calculator.compute(path)))
            .collect();

        let mut values = Vec::with_capacity(results.len());
        let mut permanent = Vec::new();
        for (file_id, result) in results {
            match result {
                Ok(value) => values.push((file_id, value)),
                Err(e) => {
                    warn!("Could not compute {} for file {}: {}", column, file_id, e);
                    if e.is_permanent() {
                        permanent.push(file_id);
                    }
                    report.failed += 1;
                }
            }
        }

        report.stored += db
            .write_attributes(attribute, &values)
            .map_err(|e| Error::store("attribute write", column, e))?;
        if !permanent.is_empty() {
            db.record_calculation_failures(attribute, &permanent)
                .map_err(|e| Error::store("failure record", column, e))?;
        }
        done += batch.len();
        reporter.on_calculate_progress(done, total);
    }

    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled);
    }

    let elapsed = start.elapsed().as_secs_f64();
    reporter.on_calculate_complete(column, report.stored, report.failed, elapsed);
    info!(
        "Computed {} for {} of {} files ({} failed) in {:.2}s",
        column,
        report.stored,
        total,
        report.failed,
        elapsed
    );
    Ok(report)
}
