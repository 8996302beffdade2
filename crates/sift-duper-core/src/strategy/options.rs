use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Settings for one comparison criterion, keyed by its option key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StrategyOptions {
    #[serde(default)]
    pub enabled: bool,
    pub threshold: Option<f64>,
    pub method: Option<String>,
}

/// Which criteria to compare with, plus an optional extension allow-list.
///
/// Deserialises from a flat table, e.g.
/// `compare_size = { enabled = true }` and
/// `compare_histogram = { enabled = true, method = "chi_square", threshold = 0.2 }`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ComparisonOptions {
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(flatten)]
    pub strategies: BTreeMap<String, StrategyOptions>,
}

impl ComparisonOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(mut self, key: &str) -> Self {
        self.strategies.entry(key.to_string()).or_default().enabled = true;
        self
    }

    pub fn with_threshold(mut self, key: &str, threshold: f64) -> Self {
        self.strategies.entry(key.to_string()).or_default().threshold = Some(threshold);
        self
    }

    pub fn with_method(mut self, key: &str, method: &str) -> Self {
        self.strategies.entry(key.to_string()).or_default().method = Some(method.to_string());
        self
    }

    pub fn with_extensions(mut self, extensions: Option<Vec<String>>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.strategies.get(key).is_some_and(|o| o.enabled)
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&str, &StrategyOptions)> {
        self.strategies
            .iter()
            .filter(|(_, o)| o.enabled)
            .map(|(k, o)| (k.as_str(), o))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTypeFilter {
    #[default]
    All,
    Image,
    Video,
    Audio,
    Document,
}

impl FileTypeFilter {
    pub fn name(&self) -> &'static str {
        match self {
            FileTypeFilter::All => "all",
            FileTypeFilter::Image => "image",
            FileTypeFilter::Video => "video",
            FileTypeFilter::Audio => "audio",
            FileTypeFilter::Document => "document",
        }
    }

    /// Look up the category in the configured extension table. `All` yields `None`.
    /// A category missing from the table yields an empty allow-list.
    pub fn resolve(&self, table: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
        match self {
            FileTypeFilter::All => None,
            other => Some(table.get(other.name()).cloned().unwrap_or_default()),
        }
    }
}

impl fmt::Display for FileTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileTypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(FileTypeFilter::All),
            "image" => Ok(FileTypeFilter::Image),
            "video" => Ok(FileTypeFilter::Video),
            "audio" => Ok(FileTypeFilter::Audio),
            "document" => Ok(FileTypeFilter::Document),
            other => Err(format!(
                "unknown file type '{}', expected all|image|video|audio|document",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_enables_and_configures() {
        let options = ComparisonOptions::new()
            .enable("compare_histogram")
            .with_method("compare_histogram", "distance")
            .with_threshold("compare_histogram", 0.3);
        let histogram = &options.strategies["compare_histogram"];
        assert!(histogram.enabled);
        assert_eq!(histogram.method.as_deref(), Some("distance"));
        assert_eq!(histogram.threshold, Some(0.3));
        assert!(!options.is_enabled("compare_size"));
    }

    #[test]
    fn test_threshold_without_enable_stays_disabled() {
        let options = ComparisonOptions::new().with_threshold("compare_embedding", 0.9);
        assert_eq!(options.enabled().count(), 0);
    }

    #[test]
    fn test_file_type_parse() {
        assert_eq!("Image".parse::<FileTypeFilter>(), Ok(FileTypeFilter::Image));
        assert!("spreadsheet".parse::<FileTypeFilter>().is_err());
    }

    #[test]
    fn test_unknown_category_yields_empty_allow_list() {
        let table = BTreeMap::new();
        assert_eq!(FileTypeFilter::Audio.resolve(&table), Some(vec![]));
    }
}
