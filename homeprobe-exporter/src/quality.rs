//! Threshold-based quality classification.
//!
//! A table maps a metric name to ordered buckets `{bucket, lower, upper}`
//! that together cover `[0, +inf)`. A value belongs to the bucket with the
//! greatest `lower` not above it, so `[0,9]`, `[10,19]`, `[20,inf)` puts 9.5
//! into the first bucket.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use homeprobe_common::{Labels, MetricKind, MetricSample};

/// Name of the indicator metric family.
pub const QUALITY_METRIC: &str = "quality";

/// Labels set on every indicator sample. Module labels may not reuse them.
pub const INDICATOR_LABELS: [&str; 2] = ["metric", "quality"];

/// One threshold range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Bucket name, e.g. "good".
    pub bucket: String,
    /// Inclusive lower bound.
    pub lower: f64,
    /// Inclusive upper bound; omitted or `Infinity` for the last bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl BucketConfig {
    pub fn new(bucket: impl Into<String>, lower: f64, upper: Option<f64>) -> Self {
        Self {
            bucket: bucket.into(),
            lower,
            upper,
        }
    }

    fn upper_bound(&self) -> f64 {
        self.upper.unwrap_or(f64::INFINITY)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum QualityError {
    #[error("metric '{0}' has no buckets")]
    Empty(String),

    #[error("metric '{metric}': bucket '{bucket}' has lower bound above upper bound")]
    InvertedRange { metric: String, bucket: String },

    #[error("metric '{metric}': bucket '{bucket}' declared twice")]
    DuplicateBucket { metric: String, bucket: String },

    #[error("metric '{metric}': first bucket starts at {lower}, expected 0")]
    NotStartingAtZero { metric: String, lower: f64 },

    #[error("metric '{0}': last bucket must be unbounded")]
    Bounded(String),

    #[error("metric '{metric}': buckets '{first}' and '{second}' overlap")]
    Overlap {
        metric: String,
        first: String,
        second: String,
    },

    #[error("metric '{metric}': gap between buckets '{first}' and '{second}'")]
    Gap {
        metric: String,
        first: String,
        second: String,
    },
}

/// Validated quality thresholds for all metrics.
#[derive(Debug, Clone, Default)]
pub struct QualityTable {
    tables: HashMap<String, Vec<BucketConfig>>,
}

impl QualityTable {
    /// Validate and build the table. Bucket declaration order is kept for
    /// indicator output.
    pub fn new(tables: HashMap<String, Vec<BucketConfig>>) -> Result<Self, QualityError> {
        for (metric, buckets) in &tables {
            validate_buckets(metric, buckets)?;
        }
        Ok(Self { tables })
    }

    /// Bucket a value falls into, if the metric has a table and the value is
    /// a non-negative number.
    pub fn classify(&self, metric: &str, value: f64) -> Option<&str> {
        self.tables
            .get(metric)?
            .iter()
            .filter(|b| b.lower <= value)
            .max_by(|a, b| a.lower.total_cmp(&b.lower))
            .map(|b| b.bucket.as_str())
    }

    /// One indicator sample per bucket: 1 for the matching bucket, 0 for the
    /// others. Empty when the metric has no table.
    pub fn indicators(&self, metric: &str, value: f64, labels: &Labels) -> Vec<MetricSample> {
        let Some(buckets) = self.tables.get(metric) else {
            return Vec::new();
        };
        let matched = self.classify(metric, value);

        buckets
            .iter()
            .map(|b| {
                let hit = matched == Some(b.bucket.as_str());
                MetricSample::new(
                    QUALITY_METRIC,
                    "Quality bucket indicator per measured metric",
                    if hit { 1.0 } else { 0.0 },
                )
                .with_kind(MetricKind::Gauge)
                .with_label(INDICATOR_LABELS[0], metric)
                .with_label(INDICATOR_LABELS[1], &b.bucket)
                .with_labels(labels)
            })
            .collect()
    }
}

fn validate_buckets(metric: &str, buckets: &[BucketConfig]) -> Result<(), QualityError> {
    if buckets.is_empty() {
        return Err(QualityError::Empty(metric.to_string()));
    }

    let mut names = HashSet::new();
    for b in buckets {
        let upper = b.upper_bound();
        if b.lower.is_nan() || upper.is_nan() || b.lower > upper {
            return Err(QualityError::InvertedRange {
                metric: metric.to_string(),
                bucket: b.bucket.clone(),
            });
        }
        if !names.insert(b.bucket.as_str()) {
            return Err(QualityError::DuplicateBucket {
                metric: metric.to_string(),
                bucket: b.bucket.clone(),
            });
        }
    }

    let mut sorted: Vec<&BucketConfig> = buckets.iter().collect();
    sorted.sort_by(|a, b| a.lower.total_cmp(&b.lower));

    if sorted[0].lower != 0.0 {
        return Err(QualityError::NotStartingAtZero {
            metric: metric.to_string(),
            lower: sorted[0].lower,
        });
    }

    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let boundary = prev.upper_bound();
        if next.lower <= boundary {
            return Err(QualityError::Overlap {
                metric: metric.to_string(),
                first: prev.bucket.clone(),
                second: next.bucket.clone(),
            });
        }
        if next.lower - boundary > 1.0 {
            return Err(QualityError::Gap {
                metric: metric.to_string(),
                first: prev.bucket.clone(),
                second: next.bucket.clone(),
            });
        }
    }

    if sorted[sorted.len() - 1].upper_bound().is_finite() {
        return Err(QualityError::Bounded(metric.to_string()));
    }

    Ok(())
}
