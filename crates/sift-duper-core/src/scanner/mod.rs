pub mod sync;
pub mod walk;

pub use sync::{sync_source, SyncOptions, SyncReport};
