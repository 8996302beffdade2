//! Comparison criteria.
//!
//! A criterion is either an equality key the store can group on, or a pairwise similarity
//! test scored against a threshold. The grouping engine matches on [`Strategy`] exhaustively.

pub mod options;
pub mod registry;

use crate::calculators::histogram::HistogramMethod;
use crate::embedding;
use crate::storage::{Attribute, FileAttributes};

pub use options::{ComparisonOptions, FileTypeFilter, StrategyOptions};
pub use registry::{Registry, StrategyEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Scores are similarities: a match needs `score >= threshold`.
    HigherIsSimilar,
    /// Scores are distances: a match needs `score <= threshold`.
    LowerIsSimilar,
}

impl Direction {
    /// Thresholds are inclusive in both directions.
    pub fn accepts(self, score: f64, threshold: f64) -> bool {
        if score.is_nan() {
            return false;
        }
        match self {
            Direction::HigherIsSimilar => score >= threshold,
            Direction::LowerIsSimilar => score <= threshold,
        }
    }
}

/// Equality criteria, each backed by one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExactKey {
    Name,
    ModifiedDate,
    Size,
    ContentHash,
}

impl ExactKey {
    /// Qualified column expression used in the aggregate query.
    pub fn column(&self) -> &'static str {
        match self {
            ExactKey::Name => "f.name",
            ExactKey::ModifiedDate => "a.modified_date",
            ExactKey::Size => "a.size",
            ExactKey::ContentHash => "a.content_hash",
        }
    }

    /// Keys read from file content rather than stored metadata.
    pub fn is_content_derived(&self) -> bool {
        matches!(self, ExactKey::ContentHash)
    }

    pub fn attribute(&self) -> Option<Attribute> {
        match self {
            ExactKey::Name => None,
            ExactKey::ModifiedDate => Some(Attribute::ModifiedDate),
            ExactKey::Size => Some(Attribute::Size),
            ExactKey::ContentHash => Some(Attribute::ContentHash),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Histogram(HistogramMethod),
    Embedding,
}

impl Metric {
    pub fn attribute(&self) -> Attribute {
        match self {
            Metric::Histogram(method) => Attribute::Histogram(*method),
            Metric::Embedding => Attribute::Embedding,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Metric::Histogram(method) => method.direction(),
            Metric::Embedding => Direction::HigherIsSimilar,
        }
    }

    /// `None` when either side lacks a usable value.
    pub fn score(&self, a: &FileAttributes, b: &FileAttributes) -> Option<f64> {
        match self {
            Metric::Histogram(method) => {
                let (ha, hb) = (method.select(a)?, method.select(b)?);
                method.compare(ha, hb)
            }
            Metric::Embedding => {
                embedding::normalized_similarity(a.embedding.as_deref()?, b.embedding.as_deref()?)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub metric: Metric,
    pub threshold: f64,
    pub direction: Direction,
}

impl Similarity {
    pub fn new(metric: Metric, threshold: f64) -> Self {
        Self {
            metric,
            threshold,
            direction: metric.direction(),
        }
    }

    pub fn score(&self, a: &FileAttributes, b: &FileAttributes) -> Option<f64> {
        self.metric.score(a, b)
    }

    /// Missing attributes fail closed.
    pub fn matches(&self, a: &FileAttributes, b: &FileAttributes) -> bool {
        self.score(a, b)
            .is_some_and(|score| self.direction.accepts(score, self.threshold))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    ExactKey(ExactKey),
    Similarity(Similarity),
}

impl Strategy {
    pub fn required_attribute(&self) -> Option<Attribute> {
        match self {
            Strategy::ExactKey(key) => key.attribute(),
            Strategy::Similarity(similarity) => Some(similarity.metric.attribute()),
        }
    }
}

/// A strategy resolved from enabled options.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStrategy {
    pub key: &'static str,
    pub strategy: Strategy,
}
