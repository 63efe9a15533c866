use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::naming::{is_valid_label_name, is_valid_metric_name};

/// Exposition type of a metric family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Untyped,
    Counter,
    Gauge,
}

impl MetricKind {
    /// Get the string used in `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Untyped => "untyped",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered label set.
///
/// Keeps insertion order; inserting a key that is already present replaces
/// its value in place so keys stay unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace a label.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Copy every label of `other` into this set.
    pub fn extend(&mut self, other: &Labels) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut labels = Labels::new();
        for (k, v) in iter {
            labels.insert(k, v);
        }
        labels
    }
}

/// A single exported sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name as declared (without unit suffix).
    pub name: String,

    /// `# HELP` text.
    pub help: String,

    /// `# TYPE` of the family.
    pub kind: MetricKind,

    /// Optional unit, appended to the exposed name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Sample labels.
    #[serde(default)]
    pub labels: Labels,

    /// The sample value.
    pub value: f64,
}

impl MetricSample {
    /// Create an untyped sample without unit or labels.
    pub fn new(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: MetricKind::Untyped,
            unit: None,
            labels: Labels::new(),
            value,
        }
    }

    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the unit; an empty string clears it.
    pub fn with_unit(mut self, unit: Option<String>) -> Self {
        self.unit = unit.filter(|u| !u.is_empty());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key, value);
        self
    }

    pub fn with_labels(mut self, labels: &Labels) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Name as it appears on the wire.
    ///
    /// The unit is appended as a suffix unless the name already carries it.
    pub fn family_name(&self) -> String {
        match &self.unit {
            Some(unit) if !self.name.ends_with(&format!("_{}", unit)) => {
                format!("{}_{}", self.name, unit)
            }
            _ => self.name.clone(),
        }
    }

    /// Check identifier rules for the name and every label key.
    pub fn validate(&self) -> Result<()> {
        let name = self.family_name();
        if !is_valid_metric_name(&name) {
            return Err(Error::InvalidMetricName(name));
        }

        for (i, (key, _)) in self.labels.iter().enumerate() {
            if !is_valid_label_name(key) {
                return Err(Error::InvalidLabelName {
                    metric: name,
                    label: key.to_string(),
                });
            }
            if self.labels.iter().skip(i + 1).any(|(k, _)| k == key) {
                return Err(Error::DuplicateLabel {
                    metric: name,
                    label: key.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Ordered collection of samples produced by one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    samples: Vec<MetricSample>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// First sample with the given declared name.
    pub fn get(&self, name: &str) -> Option<&MetricSample> {
        self.samples.iter().find(|s| s.name == name)
    }

    /// Declared names in order, duplicates removed.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for sample in &self.samples {
            if !names.contains(&sample.name.as_str()) {
                names.push(&sample.name);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Extend<MetricSample> for MetricSet {
    fn extend<T: IntoIterator<Item = MetricSample>>(&mut self, iter: T) {
        self.samples.extend(iter);
    }
}

impl FromIterator<MetricSample> for MetricSet {
    fn from_iter<T: IntoIterator<Item = MetricSample>>(iter: T) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for MetricSet {
    type Item = MetricSample;
    type IntoIter = std::vec::IntoIter<MetricSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}
