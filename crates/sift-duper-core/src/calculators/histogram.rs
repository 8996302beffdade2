use crate::error::CalculationError;
use crate::storage::FileAttributes;
use crate::strategy::Direction;
use image::imageops::FilterType;
use image::RgbImage;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const BINS_PER_CHANNEL: usize = 16;
pub const HISTOGRAM_LEN: usize = BINS_PER_CHANNEL * 3;

/// Images are downsampled before binning; the histogram shape is insensitive to resolution.
const SAMPLE_SIDE: u32 = 256;

/// Ways of comparing two colour histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistogramMethod {
    /// Pearson correlation of bin values, in [-1, 1].
    Correlation,
    /// Symmetric chi-square distance, in [0, 4].
    ChiSquare,
    /// Sum of bin-wise minima, in [0, 1].
    Intersection,
    /// Bhattacharyya distance, in [0, 1].
    Distance,
}

impl HistogramMethod {
    pub const ALL: [HistogramMethod; 4] = [
        HistogramMethod::Correlation,
        HistogramMethod::ChiSquare,
        HistogramMethod::Intersection,
        HistogramMethod::Distance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HistogramMethod::Correlation => "correlation",
            HistogramMethod::ChiSquare => "chi_square",
            HistogramMethod::Intersection => "intersection",
            HistogramMethod::Distance => "distance",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            HistogramMethod::Correlation => "histogram_correlation",
            HistogramMethod::ChiSquare => "histogram_chi_square",
            HistogramMethod::Intersection => "histogram_intersection",
            HistogramMethod::Distance => "histogram_distance",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            HistogramMethod::Correlation | HistogramMethod::Intersection => {
                Direction::HigherIsSimilar
            }
            HistogramMethod::ChiSquare | HistogramMethod::Distance => Direction::LowerIsSimilar,
        }
    }

    pub fn default_threshold(&self) -> f64 {
        match self {
            HistogramMethod::Correlation => 0.95,
            HistogramMethod::ChiSquare => 0.1,
            HistogramMethod::Intersection => 0.9,
            HistogramMethod::Distance => 0.1,
        }
    }

    /// The stored histogram this method compares.
    pub fn select<'a>(&self, attributes: &'a FileAttributes) -> Option<&'a [f32]> {
        match self {
            HistogramMethod::Correlation => attributes.histogram_correlation.as_deref(),
            HistogramMethod::ChiSquare => attributes.histogram_chi_square.as_deref(),
            HistogramMethod::Intersection => attributes.histogram_intersection.as_deref(),
            HistogramMethod::Distance => attributes.histogram_distance.as_deref(),
        }
    }

    /// Score two histograms. `None` when their lengths differ or they are empty.
    pub fn compare(&self, a: &[f32], b: &[f32]) -> Option<f64> {
        if a.len() != b.len() || a.is_empty() {
            return None;
        }
        let pairs = a.iter().zip(b).map(|(&x, &y)| (f64::from(x), f64::from(y)));

        let score = match self {
            HistogramMethod::Correlation => {
                let n = a.len() as f64;
                let mean_a = a.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
                let mean_b = b.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
                let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
                for (x, y) in pairs {
                    cov += (x - mean_a) * (y - mean_b);
                    var_a += (x - mean_a) * (x - mean_a);
                    var_b += (y - mean_b) * (y - mean_b);
                }
                let denom = (var_a * var_b).sqrt();
                if denom == 0.0 {
                    if a == b {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    cov / denom
                }
            }
            HistogramMethod::ChiSquare => pairs
                .filter(|(x, y)| x + y > 0.0)
                .map(|(x, y)| 2.0 * (x - y) * (x - y) / (x + y))
                .sum(),
            HistogramMethod::Intersection => pairs.map(|(x, y)| x.min(y)).sum(),
            HistogramMethod::Distance => {
                let sum_a: f64 = a.iter().map(|&v| f64::from(v)).sum();
                let sum_b: f64 = b.iter().map(|&v| f64::from(v)).sum();
                let norm = (sum_a * sum_b).sqrt();
                if norm == 0.0 {
                    return None;
                }
                let coefficient: f64 = pairs.map(|(x, y)| (x * y).sqrt()).sum::<f64>() / norm;
                (1.0 - coefficient).max(0.0).sqrt()
            }
        };
        Some(score)
    }
}

impl fmt::Display for HistogramMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HistogramMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HistogramMethod::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s.to_ascii_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown histogram method '{}', expected {}",
                    s, "correlation|chi_square|intersection|distance"
                )
            })
    }
}

/// RGB histogram of an image file, normalised so all bins sum to 1.
pub fn compute_histogram(path: &Path) -> Result<Vec<f32>, CalculationError> {
    let image = image::open(path).map_err(|source| CalculationError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let sample = if image.width() > SAMPLE_SIDE || image.height() > SAMPLE_SIDE {
        image.resize(SAMPLE_SIDE, SAMPLE_SIDE, FilterType::Triangle)
    } else {
        image
    };
    Ok(histogram_of(&sample.to_rgb8()))
}

pub fn histogram_of(image: &RgbImage) -> Vec<f32> {
    let mut counts = vec![0u64; HISTOGRAM_LEN];
    for pixel in image.pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            let bin = value as usize * BINS_PER_CHANNEL / 256;
            counts[channel * BINS_PER_CHANNEL + bin] += 1;
        }
    }

    let total: u64 = counts.iter().sum();
    if total == 0 {
        return vec![0.0; HISTOGRAM_LEN];
    }
    counts
        .into_iter()
        .map(|c| (c as f64 / total as f64) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(r: u8, g: u8, b: u8) -> Vec<f32> {
        histogram_of(&RgbImage::from_pixel(8, 8, Rgb([r, g, b])))
    }

    #[test]
    fn test_histogram_is_normalised() {
        let h = solid(10, 200, 90);
        assert_eq!(h.len(), HISTOGRAM_LEN);
        let sum: f32 = h.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_identical_histograms_score_perfectly() {
        let h = solid(10, 200, 90);
        assert!((HistogramMethod::Correlation.compare(&h, &h).unwrap() - 1.0).abs() < 1e-9);
        assert!(HistogramMethod::ChiSquare.compare(&h, &h).unwrap().abs() < 1e-9);
        assert!((HistogramMethod::Intersection.compare(&h, &h).unwrap() - 1.0).abs() < 1e-6);
        assert!(HistogramMethod::Distance.compare(&h, &h).unwrap() < 1e-3);
    }

    #[test]
    fn test_disjoint_histograms_score_worst() {
        let red = solid(255, 0, 0);
        let blue = solid(0, 0, 255);
        assert!(HistogramMethod::Intersection.compare(&red, &blue).unwrap() < 0.7);
        assert!(HistogramMethod::Distance.compare(&red, &blue).unwrap() > 0.5);
        assert!(HistogramMethod::ChiSquare.compare(&red, &blue).unwrap() > 0.5);
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        assert!(HistogramMethod::Correlation.compare(&[0.5, 0.5], &[1.0]).is_none());
        assert!(HistogramMethod::Intersection.compare(&[], &[]).is_none());
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in HistogramMethod::ALL {
            assert_eq!(method.name().parse::<HistogramMethod>(), Ok(method));
        }
    }
}
