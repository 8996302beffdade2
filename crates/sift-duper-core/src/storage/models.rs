use crate::calculators::histogram::HistogramMethod;
use std::path::PathBuf;

/// A registered root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: i64,
    pub path: String,
}

/// A file discovered under a source during sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub source_id: i64,
    /// `/`-separated path of the parent directory relative to the source root; empty at the root.
    pub relative_dir: String,
    pub name: String,
    pub ext: String,
    pub last_seen: i64,
}

/// Derived attributes of a file. Exactly one row exists per `FileRecord`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAttributes {
    pub size: Option<i64>,
    pub modified_date: Option<i64>,
    pub content_hash: Option<String>,
    pub histogram_correlation: Option<Vec<f32>>,
    pub histogram_chi_square: Option<Vec<f32>>,
    pub histogram_intersection: Option<Vec<f32>>,
    pub histogram_distance: Option<Vec<f32>>,
    pub embedding: Option<Vec<f32>>,
}

/// A file record joined with its attributes and resolved absolute path.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub record: FileRecord,
    pub attributes: FileAttributes,
    pub path: PathBuf,
}

impl FileEntry {
    pub fn id(&self) -> i64 {
        self.record.id
    }
}

/// Values written to the store by sync for one file.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub relative_dir: String,
    pub name: String,
    pub ext: String,
    pub size: i64,
    pub modified_date: i64,
}

/// Outcome of upserting a single scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
    Changed,
}

/// f32 vectors are stored as little-endian blobs.
pub fn vector_to_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn blob_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// A column of `file_attributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Size,
    ModifiedDate,
    ContentHash,
    Histogram(HistogramMethod),
    Embedding,
}

impl Attribute {
    pub fn column(&self) -> &'static str {
        match self {
            Attribute::Size => "size",
            Attribute::ModifiedDate => "modified_date",
            Attribute::ContentHash => "content_hash",
            Attribute::Histogram(method) => method.column(),
            Attribute::Embedding => "embedding",
        }
    }

    /// Columns derived from file content, as opposed to values sync reads from metadata.
    pub fn is_content_derived(&self) -> bool {
        !matches!(self, Attribute::Size | Attribute::ModifiedDate)
    }

    pub fn all() -> Vec<Attribute> {
        let mut all = vec![Attribute::Size, Attribute::ModifiedDate, Attribute::ContentHash];
        all.extend(HistogramMethod::ALL.iter().map(|m| Attribute::Histogram(*m)));
        all.push(Attribute::Embedding);
        all
    }
}

/// A typed attribute value as stored in its column.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
    Vector(Vec<f32>),
}

/// Restricts store queries to a set of sources and, optionally, file extensions.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub source_ids: Vec<i64>,
    /// Lower-case extensions without the dot. `None` admits every file.
    pub extensions: Option<Vec<String>>,
}

impl FileFilter {
    pub fn for_sources(source_ids: &[i64]) -> Self {
        Self {
            source_ids: source_ids.to_vec(),
            extensions: None,
        }
    }

    pub fn with_extensions(mut self, extensions: Option<Vec<String>>) -> Self {
        self.extensions =
            extensions.map(|exts| exts.iter().map(|e| normalize_extension(e)).collect());
        self
    }
}

pub fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}
