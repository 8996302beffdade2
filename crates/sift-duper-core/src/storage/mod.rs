pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::{
    Attribute, AttributeValue, FileAttributes, FileEntry, FileFilter, FileRecord, Source,
};
pub use sqlite::Database;
