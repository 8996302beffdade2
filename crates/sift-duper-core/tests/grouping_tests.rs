use sift_duper_core::calculators::histogram::HistogramMethod;
use sift_duper_core::config::RevalidationPolicy;
use sift_duper_core::grouping::find_duplicates;
use sift_duper_core::storage::models::ScannedFile;
use sift_duper_core::storage::{Attribute, AttributeValue, Database, FileFilter};
use sift_duper_core::strategy::registry::{
    COMPARE_CONTENT_HASH, COMPARE_DATE, COMPARE_EMBEDDING, COMPARE_HISTOGRAM, COMPARE_NAME,
    COMPARE_SIZE,
};
use sift_duper_core::{ActiveStrategy, ComparisonOptions, Error, Registry, SilentReporter};

struct Store {
    db: Database,
    source_id: i64,
}

impl Store {
    fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let source_id = db.add_source("/data").unwrap();
        Self { db, source_id }
    }

    fn file(&self, relative_dir: &str, name: &str, size: i64) -> i64 {
        let ext = name
            .rsplit_once('.')
            .map(|(_, e)| e.to_string())
            .unwrap_or_default();
        let scanned = ScannedFile {
            relative_dir: relative_dir.to_string(),
            name: name.to_string(),
            ext,
            size,
            modified_date: 1_700_000_000,
        };
        self.db
            .upsert_scanned_file(self.source_id, &scanned, 1, RevalidationPolicy::Never)
            .unwrap();
        self.db
            .find_file_id(self.source_id, relative_dir, name)
            .unwrap()
            .unwrap()
    }

    fn set(&self, file_id: i64, attribute: Attribute, value: AttributeValue) {
        self.db.write_attributes(attribute, &[(file_id, value)]).unwrap();
    }

    fn hash(&self, file_id: i64, hash: &str) {
        self.set(file_id, Attribute::ContentHash, AttributeValue::Text(hash.to_string()));
    }

    fn embedding(&self, file_id: i64, vector: &[f32]) {
        self.set(file_id, Attribute::Embedding, AttributeValue::Vector(vector.to_vec()));
    }

    fn filter(&self) -> FileFilter {
        FileFilter::for_sources(&[self.source_id])
    }

    fn groups(&self, options: &ComparisonOptions, filter: &FileFilter) -> Vec<Vec<i64>> {
        let strategies = resolve(options);
        find_duplicates(&self.db, &strategies, filter, &SilentReporter)
            .unwrap()
            .into_iter()
            .map(|g| g.file_ids())
            .collect()
    }
}

fn resolve(options: &ComparisonOptions) -> Vec<ActiveStrategy> {
    Registry::with_builtins(None).resolve(options).unwrap()
}

#[test]
fn test_size_groups_but_size_and_hash_does_not() {
    let store = Store::new();
    let a = store.file("", "A.bin", 100);
    let b = store.file("", "B.bin", 100);
    let c = store.file("", "C.bin", 200);
    store.hash(a, "h1");
    store.hash(b, "h2");
    store.hash(c, "h1");

    let by_size = ComparisonOptions::new().enable(COMPARE_SIZE);
    assert_eq!(store.groups(&by_size, &store.filter()), vec![vec![a, b]]);

    let by_size_and_hash = by_size.enable(COMPARE_CONTENT_HASH);
    assert!(store.groups(&by_size_and_hash, &store.filter()).is_empty());
}

#[test]
fn test_name_matches_across_directories() {
    let store = Store::new();
    let a = store.file("2020", "beach.jpg", 10);
    let b = store.file("2021", "beach.jpg", 20);
    store.file("2021", "forest.jpg", 10);

    let by_name = ComparisonOptions::new().enable(COMPARE_NAME);
    assert_eq!(store.groups(&by_name, &store.filter()), vec![vec![a, b]]);

    let by_name_and_date = by_name.enable(COMPARE_DATE);
    assert_eq!(store.groups(&by_name_and_date, &store.filter()), vec![vec![a, b]]);
}

#[test]
fn test_groups_are_ordered_by_first_member() {
    let store = Store::new();
    let a = store.file("", "a", 1);
    let b = store.file("", "b", 2);
    let c = store.file("", "c", 2);
    let d = store.file("", "d", 1);

    let by_size = ComparisonOptions::new().enable(COMPARE_SIZE);
    assert_eq!(
        store.groups(&by_size, &store.filter()),
        vec![vec![a, d], vec![b, c]]
    );
}

#[test]
fn test_missing_hash_never_matches() {
    let store = Store::new();
    let a = store.file("", "a", 5);
    let b = store.file("", "b", 5);
    store.file("", "c", 5);
    store.hash(a, "same");
    store.hash(b, "same");

    let by_hash = ComparisonOptions::new().enable(COMPARE_CONTENT_HASH);
    assert_eq!(store.groups(&by_hash, &store.filter()), vec![vec![a, b]]);
}

#[test]
fn test_missing_embedding_fails_closed() {
    let store = Store::new();
    let a = store.file("", "a.png", 5);
    let b = store.file("", "b.png", 5);
    store.embedding(a, &[1.0, 0.0]);
    store.embedding(b, &[1.0, 0.0]);
    let c = store.file("", "c.png", 5);
    let d = store.file("", "d.png", 5);
    store.embedding(d, &[1.0, 0.0, 0.0]);

    let options = ComparisonOptions::new().enable(COMPARE_EMBEDDING);
    let groups = store.groups(&options, &store.filter());
    assert_eq!(groups, vec![vec![a, b]]);
    assert!(!groups.iter().flatten().any(|id| *id == c || *id == d));
}

#[test]
fn test_pivot_clustering_does_not_chain() {
    let store = Store::new();
    let a = store.file("", "a.png", 5);
    let b = store.file("", "b.png", 5);
    let c = store.file("", "c.png", 5);
    store.embedding(a, &[1.0, 0.0]);
    store.embedding(b, &[0.7071, 0.7071]);
    store.embedding(c, &[0.0, 1.0]);

    let options = ComparisonOptions::new()
        .enable(COMPARE_EMBEDDING)
        .with_threshold(COMPARE_EMBEDDING, 0.8);
    assert_eq!(store.groups(&options, &store.filter()), vec![vec![a, b]]);
}

#[test]
fn test_similarity_threshold_is_inclusive() {
    let store = Store::new();
    let a = store.file("", "a.png", 5);
    let b = store.file("", "b.png", 5);
    // Orthogonal vectors score exactly 0.5 once normalised.
    store.embedding(a, &[1.0, 0.0]);
    store.embedding(b, &[0.0, 1.0]);

    let at_boundary = ComparisonOptions::new()
        .enable(COMPARE_EMBEDDING)
        .with_threshold(COMPARE_EMBEDDING, 0.5);
    assert_eq!(store.groups(&at_boundary, &store.filter()), vec![vec![a, b]]);

    let above = ComparisonOptions::new()
        .enable(COMPARE_EMBEDDING)
        .with_threshold(COMPARE_EMBEDDING, 0.5001);
    assert!(store.groups(&above, &store.filter()).is_empty());
}

#[test]
fn test_lower_is_similar_histogram_boundary() {
    let store = Store::new();
    let a = store.file("", "a.png", 5);
    let b = store.file("", "b.png", 5);
    let c = store.file("", "c.png", 5);
    let column = Attribute::Histogram(HistogramMethod::ChiSquare);
    store.set(a, column, AttributeValue::Vector(vec![0.5, 0.5]));
    store.set(b, column, AttributeValue::Vector(vec![0.5, 0.5]));
    store.set(c, column, AttributeValue::Vector(vec![1.0, 0.0]));

    let identical_only = ComparisonOptions::new()
        .enable(COMPARE_HISTOGRAM)
        .with_method(COMPARE_HISTOGRAM, "chi_square")
        .with_threshold(COMPARE_HISTOGRAM, 0.0);
    assert_eq!(store.groups(&identical_only, &store.filter()), vec![vec![a, b]]);
}

#[test]
fn test_exact_keys_then_similarity_refinement() {
    let store = Store::new();
    let a = store.file("", "a.png", 10);
    let b = store.file("", "b.png", 10);
    let c = store.file("", "c.png", 20);
    let d = store.file("", "d.png", 20);
    for id in [a, b, c] {
        store.embedding(id, &[1.0, 1.0]);
    }
    store.embedding(d, &[-1.0, -1.0]);

    let options = ComparisonOptions::new()
        .enable(COMPARE_SIZE)
        .enable(COMPARE_EMBEDDING);
    assert_eq!(store.groups(&options, &store.filter()), vec![vec![a, b]]);
}

#[test]
fn test_extension_filter_limits_candidates() {
    let store = Store::new();
    let a = store.file("", "a.jpg", 10);
    let b = store.file("", "b.txt", 10);
    let c = store.file("", "c.jpg", 10);

    let by_size = ComparisonOptions::new().enable(COMPARE_SIZE);
    let images = store.filter().with_extensions(Some(vec![".JPG".to_string()]));
    assert_eq!(store.groups(&by_size, &images), vec![vec![a, c]]);

    let text = store.filter().with_extensions(Some(vec!["txt".to_string()]));
    assert!(store.groups(&by_size, &text).is_empty());
    assert_eq!(store.groups(&by_size, &store.filter()), vec![vec![a, b, c]]);
}

#[test]
fn test_other_sources_are_excluded() {
    let store = Store::new();
    let a = store.file("", "a", 10);
    let other = store.db.add_source("/elsewhere").unwrap();
    store
        .db
        .upsert_scanned_file(
            other,
            &ScannedFile {
                relative_dir: String::new(),
                name: "b".to_string(),
                ext: String::new(),
                size: 10,
                modified_date: 0,
            },
            1,
            RevalidationPolicy::Never,
        )
        .unwrap();

    let by_size = ComparisonOptions::new().enable(COMPARE_SIZE);
    assert!(store.groups(&by_size, &store.filter()).is_empty());

    let both = FileFilter::for_sources(&[store.source_id, other]);
    let groups = store.groups(&by_size, &both);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0][0], a);
}

#[test]
fn test_nothing_enabled_is_a_validation_error() {
    let store = Store::new();
    store.file("", "a", 10);
    store.file("", "b", 10);

    let result = find_duplicates(&store.db, &[], &store.filter(), &SilentReporter);
    assert!(matches!(result, Err(Error::Validation { .. })));

    let strategies = resolve(&ComparisonOptions::new().enable(COMPARE_SIZE));
    let result = find_duplicates(&store.db, &strategies, &FileFilter::default(), &SilentReporter);
    assert!(matches!(result, Err(Error::Validation { .. })));
}

#[test]
fn test_unknown_option_key_is_rejected() {
    let options = ComparisonOptions::new().enable("compare_colour");
    assert!(matches!(
        Registry::with_builtins(None).resolve(&options),
        Err(Error::Validation { .. })
    ));
}

#[test]
fn test_wasted_bytes_keeps_one_copy() {
    let store = Store::new();
    store.file("", "a", 300);
    store.file("", "b", 300);
    store.file("", "c", 300);

    let strategies = resolve(&ComparisonOptions::new().enable(COMPARE_SIZE));
    let groups = find_duplicates(&store.db, &strategies, &store.filter(), &SilentReporter).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 3);
    assert_eq!(groups[0].wasted_bytes(), 600);
}
