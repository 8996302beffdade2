pub mod calculators;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod grouping;
pub mod hasher;
pub mod progress;
pub mod scanner;
pub mod storage;
pub mod strategy;
pub mod task;

pub use config::AppConfig;
pub use embedding::{Embedder, EmbeddingError, ThumbnailEmbedder};
pub use engine::Engine;
pub use error::{CalculationError, Error, InaccessiblePath};
pub use grouping::DuplicateGroup;
pub use progress::{ProgressReporter, SilentReporter};
pub use scanner::{SyncOptions, SyncReport};
pub use strategy::options::{ComparisonOptions, FileTypeFilter, StrategyOptions};
pub use strategy::registry::Registry;
pub use strategy::{ActiveStrategy, Direction, ExactKey, Metric, Similarity, Strategy};
pub use task::TaskHandle;
