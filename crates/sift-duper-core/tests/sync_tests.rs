use sift_duper_core::config::RevalidationPolicy;
use sift_duper_core::scanner::{sync_source, SyncOptions, SyncReport};
use sift_duper_core::storage::{Attribute, AttributeValue, Database};
use sift_duper_core::{Error, SilentReporter};
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tempfile::tempdir;

fn not_cancelled() -> AtomicBool {
    AtomicBool::new(false)
}

fn run(
    db: &Database,
    source_id: i64,
    root: &Path,
    options: &SyncOptions,
) -> Result<SyncReport, Error> {
    sync_source(db, source_id, root, options, &not_cancelled(), &SilentReporter)
}

fn register(db: &Database, root: &Path) -> i64 {
    db.add_source(&root.to_string_lossy()).unwrap()
}

fn file_count(db: &Database, source_id: i64) -> i64 {
    db.count_files(source_id).unwrap()
}

fn populate_tree(root: &Path) {
    fs::create_dir_all(root.join("sub/deeper")).unwrap();
    fs::write(root.join("a.txt"), b"alpha").unwrap();
    fs::write(root.join("sub/b.txt"), b"bravo").unwrap();
    fs::write(root.join("sub/deeper/c.txt"), b"charlie").unwrap();
}

#[test]
fn test_sync_inserts_every_file() {
    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());

    let report = sync_source(
        &db,
        source_id,
        tmp.path(),
        &SyncOptions::default(),
        &not_cancelled(),
        &SilentReporter,
    )
    .unwrap();

    assert_eq!(report.files_seen, 3);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.pruned, 0);
    assert!(report.inaccessible.is_empty());
    assert_eq!(file_count(&db, source_id), 3);

    let id = db.find_file_id(source_id, "sub/deeper", "c.txt").unwrap().unwrap();
    let entry = db.get_file(id).unwrap().unwrap();
    assert_eq!(entry.attributes.size, Some(7));
    assert_eq!(entry.path, tmp.path().join("sub").join("deeper").join("c.txt"));
}

#[test]
fn test_resync_is_idempotent() {
    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());
    let options = SyncOptions::default();

    let first = run(&db, source_id, tmp.path(), &options).unwrap();
    let ids_before = db
        .filtered_file_ids(&sift_duper_core::storage::FileFilter::for_sources(&[source_id]))
        .unwrap();

    let second = run(&db, source_id, tmp.path(), &options).unwrap();
    let ids_after = db
        .filtered_file_ids(&sift_duper_core::storage::FileFilter::for_sources(&[source_id]))
        .unwrap();

    assert_eq!(ids_before, ids_after);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(second.pruned, 0);
    assert!(second.scan_start > first.scan_start);
}

#[test]
fn test_removed_files_are_pruned() {
    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());
    let options = SyncOptions::default();

    run(&db, source_id, tmp.path(), &options).unwrap();
    fs::remove_dir_all(tmp.path().join("sub/deeper")).unwrap();

    let report = run(&db, source_id, tmp.path(), &options).unwrap();
    assert_eq!(report.pruned, 1);
    assert_eq!(file_count(&db, source_id), 2);
    assert!(db
        .find_file_id(source_id, "sub/deeper", "c.txt")
        .unwrap()
        .is_none());

    let orphans: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM file_attributes a \
             LEFT JOIN files f ON f.id = a.file_id WHERE f.id IS NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn test_pruning_is_scoped_to_the_synced_source() {
    let first_root = tempdir().unwrap();
    let second_root = tempdir().unwrap();
    fs::write(first_root.path().join("one.txt"), b"1").unwrap();
    fs::write(second_root.path().join("two.txt"), b"2").unwrap();

    let db = Database::open_in_memory().unwrap();
    let first = register(&db, first_root.path());
    let second = register(&db, second_root.path());
    let options = SyncOptions::default();
    run(&db, first, first_root.path(), &options).unwrap();
    run(&db, second, second_root.path(), &options).unwrap();

    fs::remove_file(first_root.path().join("one.txt")).unwrap();
    run(&db, first, first_root.path(), &options).unwrap();

    assert_eq!(file_count(&db, first), 0);
    assert_eq!(file_count(&db, second), 1);
}

#[test]
fn test_non_recursive_sync_stays_at_top_level() {
    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());
    let options = SyncOptions {
        recursive: false,
        ..SyncOptions::default()
    };

    let report = run(&db, source_id, tmp.path(), &options).unwrap();
    assert_eq!(report.files_seen, 1);
    assert!(db.find_file_id(source_id, "", "a.txt").unwrap().is_some());
}

#[test]
fn test_ignore_patterns_skip_files() {
    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());
    let options = SyncOptions {
        ignore_patterns: vec!["**/deeper".to_string()],
        ..SyncOptions::default()
    };

    let report = run(&db, source_id, tmp.path(), &options).unwrap();
    assert_eq!(report.files_seen, 2);
}

#[test]
fn test_invalid_roots_are_rejected_without_mutation() {
    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let other = tempdir().unwrap();
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());
    let options = SyncOptions::default();

    let missing = tmp.path().join("missing");
    assert!(matches!(
        run(&db, source_id, &missing, &options),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        run(&db, source_id, &tmp.path().join("a.txt"), &options),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        run(&db, source_id, other.path(), &options),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        run(&db, source_id + 100, tmp.path(), &options),
        Err(Error::Validation { .. })
    ));
    assert_eq!(file_count(&db, source_id), 0);
}

#[test]
fn test_cancelled_sync_rolls_back() {
    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());
    let options = SyncOptions::default();

    run(&db, source_id, tmp.path(), &options).unwrap();
    fs::remove_file(tmp.path().join("a.txt")).unwrap();
    fs::write(tmp.path().join("new.txt"), b"new").unwrap();

    let cancelled = AtomicBool::new(true);
    let result = sync_source(&db, source_id, tmp.path(), &options, &cancelled, &SilentReporter);
    assert!(matches!(result, Err(Error::Cancelled)));

    // Neither the removal nor the addition was applied.
    assert_eq!(file_count(&db, source_id), 3);
    assert!(db.find_file_id(source_id, "", "a.txt").unwrap().is_some());
    assert!(db.find_file_id(source_id, "", "new.txt").unwrap().is_none());
}

#[test]
fn test_changed_file_keeps_hash_unless_revalidating() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("a.txt");
    fs::write(&path, b"short").unwrap();
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());

    run(&db, source_id, tmp.path(), &SyncOptions::default()).unwrap();
    let file_id = db.find_file_id(source_id, "", "a.txt").unwrap().unwrap();
    db.write_attributes(
        Attribute::ContentHash,
        &[(file_id, AttributeValue::Text("cached".into()))],
    )
    .unwrap();

    fs::write(&path, b"a good deal longer").unwrap();
    let report = sync_source(
        &db,
        source_id,
        tmp.path(),
        &SyncOptions::default(),
        &not_cancelled(),
        &SilentReporter,
    )
    .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(
        db.read_attribute(file_id, Attribute::ContentHash).unwrap(),
        Some(AttributeValue::Text("cached".into()))
    );

    fs::write(&path, b"and now different again").unwrap();
    let revalidating = SyncOptions {
        revalidation: RevalidationPolicy::OnChange,
        ..SyncOptions::default()
    };
    run(&db, source_id, tmp.path(), &revalidating).unwrap();
    assert_eq!(db.read_attribute(file_id, Attribute::ContentHash).unwrap(), None);
    assert_eq!(
        db.read_attribute(file_id, Attribute::Size).unwrap(),
        Some(AttributeValue::Integer(23))
    );
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_keeps_its_records() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempdir().unwrap();
    populate_tree(tmp.path());
    let db = Database::open_in_memory().unwrap();
    let source_id = register(&db, tmp.path());
    let options = SyncOptions::default();
    run(&db, source_id, tmp.path(), &options).unwrap();

    let locked = tmp.path().join("sub");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Running with privileges that ignore permission bits.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let report = run(&db, source_id, tmp.path(), &options);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let report = report.unwrap();

    assert!(report.inaccessible.iter().any(|entry| entry.path == locked));
    assert_eq!(report.pruned, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(file_count(&db, source_id), 3);
    assert!(db.find_file_id(source_id, "sub", "b.txt").unwrap().is_some());
    assert!(db
        .find_file_id(source_id, "sub/deeper", "c.txt")
        .unwrap()
        .is_some());
}
