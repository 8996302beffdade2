use super::options::{ComparisonOptions, StrategyOptions};
use super::{ActiveStrategy, ExactKey, Metric, Similarity, Strategy};
use crate::calculators::histogram::HistogramMethod;
use crate::calculators::{
    Calculator, ContentHashCalculator, EmbeddingCalculator, HistogramCalculator,
    ModifiedDateCalculator, SizeCalculator,
};
use crate::embedding::Embedder;
use crate::error::Error;
use crate::storage::Attribute;
use std::sync::Arc;

pub const COMPARE_NAME: &str = "compare_name";
pub const COMPARE_DATE: &str = "compare_date";
pub const COMPARE_SIZE: &str = "compare_size";
pub const COMPARE_CONTENT_HASH: &str = "compare_content_hash";
pub const COMPARE_HISTOGRAM: &str = "compare_histogram";
pub const COMPARE_EMBEDDING: &str = "compare_embedding";

pub const DEFAULT_EMBEDDING_THRESHOLD: f64 = 0.95;

/// A registered comparison criterion.
pub struct StrategyEntry {
    pub key: &'static str,
    pub description: &'static str,
    pub needs_attribute: bool,
    build: fn(&StrategyOptions) -> Result<Strategy, Error>,
}

impl StrategyEntry {
    pub fn new(
        key: &'static str,
        description: &'static str,
        needs_attribute: bool,
        build: fn(&StrategyOptions) -> Result<Strategy, Error>,
    ) -> Self {
        Self {
            key,
            description,
            needs_attribute,
            build,
        }
    }

    pub fn build(&self, options: &StrategyOptions) -> Result<Strategy, Error> {
        (self.build)(options)
    }
}

/// Strategies and calculators known to an engine, built once at startup.
pub struct Registry {
    strategies: Vec<StrategyEntry>,
    calculators: Vec<Box<dyn Calculator>>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
            calculators: Vec::new(),
        }
    }

    /// Every built-in criterion. Embedding comparisons only produce matches when an
    /// embedder is supplied; without one the embedding column is never populated.
    pub fn with_builtins(embedder: Option<Arc<dyn Embedder>>) -> Self {
        let mut registry = Self::empty();

        let entries = [
            StrategyEntry::new(COMPARE_NAME, "identical file name", false, |_| {
                Ok(Strategy::ExactKey(ExactKey::Name))
            }),
            StrategyEntry::new(COMPARE_DATE, "identical modification time", true, |_| {
                Ok(Strategy::ExactKey(ExactKey::ModifiedDate))
            }),
            StrategyEntry::new(COMPARE_SIZE, "identical size in bytes", true, |_| {
                Ok(Strategy::ExactKey(ExactKey::Size))
            }),
            StrategyEntry::new(COMPARE_CONTENT_HASH, "identical BLAKE3 content hash", true, |_| {
                Ok(Strategy::ExactKey(ExactKey::ContentHash))
            }),
            StrategyEntry::new(
                COMPARE_HISTOGRAM,
                "similar colour histogram",
                true,
                build_histogram,
            ),
            StrategyEntry::new(
                COMPARE_EMBEDDING,
                "similar image embedding",
                true,
                build_embedding,
            ),
        ];
        for entry in entries {
            registry.strategies.push(entry);
        }

        registry.calculators.push(Box::new(SizeCalculator));
        registry.calculators.push(Box::new(ModifiedDateCalculator));
        registry.calculators.push(Box::new(ContentHashCalculator));
        for method in HistogramMethod::ALL {
            registry
                .calculators
                .push(Box::new(HistogramCalculator::new(method)));
        }
        if let Some(embedder) = embedder {
            registry
                .calculators
                .push(Box::new(EmbeddingCalculator::new(embedder)));
        }

        registry
    }

    pub fn register_strategy(&mut self, entry: StrategyEntry) -> Result<(), Error> {
        if self.strategy(entry.key).is_some() {
            return Err(Error::validation(
                "strategy registration",
                format!("option key '{}' is already registered", entry.key),
            ));
        }
        self.strategies.push(entry);
        Ok(())
    }

    /// Replaces any calculator already registered for the same attribute.
    pub fn register_calculator(&mut self, calculator: Box<dyn Calculator>) {
        let attribute = calculator.attribute();
        self.calculators.retain(|c| c.attribute() != attribute);
        self.calculators.push(calculator);
    }

    pub fn strategies(&self) -> &[StrategyEntry] {
        &self.strategies
    }

    pub fn strategy(&self, key: &str) -> Option<&StrategyEntry> {
        self.strategies.iter().find(|s| s.key == key)
    }

    pub fn calculators(&self) -> impl Iterator<Item = &dyn Calculator> {
        self.calculators.iter().map(|c| c.as_ref())
    }

    pub fn calculator_for(&self, attribute: Attribute) -> Option<&dyn Calculator> {
        self.calculators()
            .find(|c| c.attribute() == attribute)
    }

    /// Build the active strategies for a set of options, in registration order.
    /// Unknown option keys are rejected.
    pub fn resolve(&self, options: &ComparisonOptions) -> Result<Vec<ActiveStrategy>, Error> {
        for key in options.strategies.keys() {
            if self.strategy(key).is_none() {
                return Err(Error::validation(
                    "comparison option",
                    format!("unknown option key '{}'", key),
                ));
            }
        }

        let mut active = Vec::new();
        for entry in &self.strategies {
            let Some(opts) = options.strategies.get(entry.key) else {
                continue;
            };
            if !opts.enabled {
                continue;
            }
            active.push(ActiveStrategy {
                key: entry.key,
                strategy: entry.build(opts)?,
            });
        }
        Ok(active)
    }
}

fn checked_threshold(key: &str, threshold: f64) -> Result<f64, Error> {
    if !threshold.is_finite() {
        return Err(Error::validation(
            format!("threshold for {}", key),
            format!("{} is not a finite number", threshold),
        ));
    }
    Ok(threshold)
}

fn build_histogram(options: &StrategyOptions) -> Result<Strategy, Error> {
    let method = match options.method.as_deref() {
        Some(name) => name.parse::<HistogramMethod>().map_err(|reason| {
            Error::validation(format!("method for {}", COMPARE_HISTOGRAM), reason)
        })?,
        None => HistogramMethod::Correlation,
    };
    let threshold = checked_threshold(
        COMPARE_HISTOGRAM,
        options.threshold.unwrap_or(method.default_threshold()),
    )?;
    Ok(Strategy::Similarity(Similarity::new(
        Metric::Histogram(method),
        threshold,
    )))
}

fn build_embedding(options: &StrategyOptions) -> Result<Strategy, Error> {
    if let Some(method) = &options.method {
        return Err(Error::validation(
            format!("method for {}", COMPARE_EMBEDDING),
            format!("'{}' given but embedding comparison takes no method", method),
        ));
    }
    let threshold = checked_threshold(
        COMPARE_EMBEDDING,
        options.threshold.unwrap_or(DEFAULT_EMBEDDING_THRESHOLD),
    )?;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::validation(
            format!("threshold for {}", COMPARE_EMBEDDING),
            format!("{} is outside [0, 1]", threshold),
        ));
    }
    Ok(Strategy::Similarity(Similarity::new(Metric::Embedding, threshold)))
}
