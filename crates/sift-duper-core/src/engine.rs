use ahash::AHashSet;
use crate::calculators::{self, PopulateReport};
use crate::config::{self, AppConfig};
use crate::embedding::ThumbnailEmbedder;
use crate::error::Error;
use crate::grouping::{self, DuplicateGroup};
use crate::progress::ProgressReporter;
use crate::scanner::{self, SyncOptions, SyncReport};
use crate::storage::{Attribute, Database, FileEntry, FileFilter, Source};
use crate::strategy::options::ComparisonOptions;
use crate::strategy::registry::Registry;
use crate::strategy::{ActiveStrategy, ExactKey, Strategy};
use crate::task::TaskHandle;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Entry point for every store operation.
///
/// The engine holds configuration and the strategy registry; each operation opens its own
/// store connection. Sync and duplicate search never overlap: both take the operation lock,
/// which clones of the engine share.
#[derive(Clone)]
pub struct Engine {
    config: AppConfig,
    registry: Arc<Registry>,
    cancel_token: Arc<AtomicBool>,
    op_lock: Arc<Mutex<()>>,
}

impl Engine {
    pub fn new(config: AppConfig) -> Self {
        let registry = Registry::with_builtins(Some(Arc::new(ThumbnailEmbedder::default())));
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: AppConfig, registry: Registry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            cancel_token: Arc::new(AtomicBool::new(false)),
            op_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_db_path(mut self, path: &str) -> Self {
        self.config.db_path = path.to_string();
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Token observed by inline operations. Setting it cancels the running operation; it is
    /// cleared again when the next inline operation starts.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_token)
    }

    pub fn open_database(&self) -> Result<Database, Error> {
        Ok(Database::open(&self.config.db_path)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, Error> {
        self.op_lock
            .lock()
            .map_err(|_| Error::Other("operation lock poisoned by a failed task".to_string()))
    }

    // ── Sources ──────────────────────────────────────────────────

    /// Register a root directory and return its source id. The stored path is canonical.
    pub fn register_source(&self, root: &Path) -> Result<i64, Error> {
        let canonical = canonical_dir(root)?;
        let db = self.open_database()?;
        let source_id = db
            .add_source(&canonical.to_string_lossy())
            .map_err(|e| Error::store("register source", canonical.display().to_string(), e))?;
        info!("Registered source {} for {}", source_id, canonical.display());
        Ok(source_id)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>, Error> {
        Ok(self.open_database()?.list_sources()?)
    }

    /// Remove every source together with its files and attributes.
    pub fn clear_sources(&self) -> Result<usize, Error> {
        let _guard = self.lock()?;
        let removed = self.open_database()?.clear_sources()?;
        info!("Cleared {} sources", removed);
        Ok(removed)
    }

    pub fn get_file(&self, file_id: i64) -> Result<Option<FileEntry>, Error> {
        Ok(self.open_database()?.get_file(file_id)?)
    }

    /// Forget the record for `dir/name`. The file on disk is left alone.
    pub fn delete_file_record(&self, dir: &Path, name: &str) -> Result<bool, Error> {
        let _guard = self.lock()?;
        let dir = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        Ok(self.open_database()?.delete_file_record(&dir, name)?)
    }

    // ── Sync ─────────────────────────────────────────────────────

    fn sync_options(&self, recursive: bool) -> SyncOptions {
        SyncOptions {
            recursive,
            ignore_patterns: self.config.ignore_patterns.clone(),
            revalidation: self.config.revalidation,
        }
    }

    /// Reconcile one registered source with the filesystem.
    pub fn sync(
        &self,
        source_id: i64,
        root: &Path,
        recursive: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<SyncReport, Error> {
        self.cancel_token.store(false, Ordering::Relaxed);
        run_sync(
            &self.config.db_path,
            &self.op_lock,
            source_id,
            root,
            &self.sync_options(recursive),
            &self.cancel_token,
            reporter,
        )
    }

    /// Register and sync every configured root. Roots nested inside another configured root
    /// are covered by the outer one and skipped.
    pub fn sync_configured_roots(
        &self,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<SyncReport>, Error> {
        let mut roots: Vec<(String, bool)> = Vec::new();
        for root in &self.config.roots {
            let canonical = canonical_dir(Path::new(&root.path))?;
            roots.push((canonical.to_string_lossy().into_owned(), root.recursive));
        }
        let kept =
            config::non_overlapping_directories(roots.iter().map(|(p, _)| p.clone()).collect());
        info!("Processing directories: {:?}", kept);

        let mut reports = Vec::new();
        for (path, recursive) in roots {
            if !kept.contains(&path) {
                continue;
            }
            let source_id = self.register_source(Path::new(&path))?;
            reports.push(self.sync(source_id, Path::new(&path), recursive, reporter)?);
        }
        Ok(reports)
    }

    /// Run a sync on a background thread with its own cancel token.
    pub fn spawn_sync(
        &self,
        source_id: i64,
        root: PathBuf,
        recursive: bool,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<TaskHandle<SyncReport>, Error> {
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let engine = self.clone();
        TaskHandle::spawn("sift-sync", cancel, move || {
            run_sync(
                &engine.config.db_path,
                &engine.op_lock,
                source_id,
                &root,
                &engine.sync_options(recursive),
                &worker_cancel,
                reporter.as_ref(),
            )
        })
    }

    // ── Attributes & grouping ────────────────────────────────────

    /// Compute any missing attributes the given options need, for every filtered file.
    /// Duplicate search narrows this to candidates; use this to precompute a whole source.
    pub fn populate_attributes(
        &self,
        source_ids: &[i64],
        options: &ComparisonOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<PopulateReport>, Error> {
        self.cancel_token.store(false, Ordering::Relaxed);
        let _guard = self.lock()?;
        let db = self.open_database()?;
        let filter = self.filter_for(source_ids, options);
        let mut seen: AHashSet<Attribute> = AHashSet::new();
        let mut reports = Vec::new();
        for active in self.registry.resolve(options)? {
            let Some(attribute) = active.strategy.required_attribute() else {
                continue;
            };
            if seen.insert(attribute) {
                reports.extend(self.populate_one(
                    &db,
                    attribute,
                    &filter,
                    None,
                    &self.cancel_token,
                    reporter,
                )?);
            }
        }
        Ok(reports)
    }

    /// Group files of the given sources by the enabled criteria, computing missing
    /// attributes first.
    pub fn find_duplicates(
        &self,
        source_ids: &[i64],
        options: &ComparisonOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<DuplicateGroup>, Error> {
        self.cancel_token.store(false, Ordering::Relaxed);
        self.find_with(source_ids, options, &self.cancel_token, reporter)
    }

    /// Run a duplicate search on a background thread with its own cancel token.
    pub fn spawn_find_duplicates(
        &self,
        source_ids: Vec<i64>,
        options: ComparisonOptions,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<TaskHandle<Vec<DuplicateGroup>>, Error> {
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let engine = self.clone();
        TaskHandle::spawn("sift-find", cancel, move || {
            engine.find_with(&source_ids, &options, &worker_cancel, reporter.as_ref())
        })
    }

    fn filter_for(&self, source_ids: &[i64], options: &ComparisonOptions) -> FileFilter {
        let extensions = options
            .extensions
            .clone()
            .or_else(|| self.config.extension_filter());
        FileFilter::for_sources(source_ids).with_extensions(extensions)
    }

    fn find_with(
        &self,
        source_ids: &[i64],
        options: &ComparisonOptions,
        cancel: &AtomicBool,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<DuplicateGroup>, Error> {
        let strategies = self.registry.resolve(options)?;
        if strategies.is_empty() {
            return Err(Error::validation(
                "comparison options",
                "no comparison strategy is enabled",
            ));
        }
        if source_ids.is_empty() {
            return Err(Error::validation("source ids", "no source selected"));
        }

        let _guard = self.lock()?;
        let db = self.open_database()?;
        let filter = self.filter_for(source_ids, options);
        self.populate_candidates(&db, &strategies, &filter, cancel, reporter)?;

        let groups = grouping::find_duplicates(&db, &strategies, &filter, reporter);
        if let Err(e) = &groups {
            error!("Duplicate search failed: {}", e);
        }
        groups
    }

    /// Compute what grouping needs, narrowing as it goes: exact keys run cheapest first
    /// (stored metadata before content hashes) and each later attribute is only computed
    /// for files still sharing every key so far. Similarity attributes come last.
    fn populate_candidates(
        &self,
        db: &Database,
        strategies: &[ActiveStrategy],
        filter: &FileFilter,
        cancel: &AtomicBool,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<PopulateReport>, Error> {
        let mut exact: Vec<ExactKey> = strategies
            .iter()
            .filter_map(|active| match active.strategy {
                Strategy::ExactKey(key) => Some(key),
                Strategy::Similarity(_) => None,
            })
            .collect();
        exact.sort_by_key(|key| key.is_content_derived());

        let mut seen: AHashSet<Attribute> = AHashSet::new();
        let mut reports = Vec::new();
        let mut columns: Vec<&str> = Vec::new();
        let mut candidates: Option<AHashSet<i64>> = None;

        for key in exact {
            if let Some(attribute) = key.attribute() {
                if seen.insert(attribute) {
                    reports.extend(self.populate_one(
                        db,
                        attribute,
                        filter,
                        candidates.as_ref(),
                        cancel,
                        reporter,
                    )?);
                }
            }
            columns.push(key.column());
            let groups = db
                .group_ids_by_keys(&columns, filter)
                .map_err(|e| Error::store("candidate grouping", columns.join(", "), e))?;
            let narrowed: AHashSet<i64> = groups.into_iter().flatten().collect();
            debug!("{} candidate files after grouping on {:?}", narrowed.len(), columns);
            candidates = Some(narrowed);
        }

        for active in strategies {
            let Strategy::Similarity(similarity) = active.strategy else {
                continue;
            };
            let attribute = similarity.metric.attribute();
            if seen.insert(attribute) {
                reports.extend(self.populate_one(
                    db,
                    attribute,
                    filter,
                    candidates.as_ref(),
                    cancel,
                    reporter,
                )?);
            }
        }
        Ok(reports)
    }

    fn populate_one(
        &self,
        db: &Database,
        attribute: Attribute,
        filter: &FileFilter,
        candidates: Option<&AHashSet<i64>>,
        cancel: &AtomicBool,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<PopulateReport>, Error> {
        let Some(calculator) = self.registry.calculator_for(attribute) else {
            warn!(
                "No calculator registered for {}; files without it will not match",
                attribute.column()
            );
            return Ok(None);
        };
        calculators::populate_attribute(
            db,
            calculator,
            filter,
            candidates,
            self.config.batch_size,
            cancel,
            reporter,
        )
        .map(Some)
    }
}

fn canonical_dir(root: &Path) -> Result<PathBuf, Error> {
    let canonical = fs::canonicalize(root).map_err(|e| {
        Error::validation("source root", format!("{}: {}", root.display(), e))
    })?;
    if !canonical.is_dir() {
        return Err(Error::validation(
            "source root",
            format!("{} is not a directory", canonical.display()),
        ));
    }
    Ok(canonical)
}

fn run_sync(
    db_path: &str,
    op_lock: &Mutex<()>,
    source_id: i64,
    root: &Path,
    options: &SyncOptions,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<SyncReport, Error> {
    let _guard = op_lock
        .lock()
        .map_err(|_| Error::Other("operation lock poisoned by a failed task".to_string()))?;
    let db = Database::open(db_path)?;
    let report = scanner::sync_source(&db, source_id, root, options, cancel, reporter);
    if let Err(e) = &report {
        if !matches!(e, Error::Cancelled) {
            error!("Sync of {} failed: {}", root.display(), e);
        }
    }
    report
}
