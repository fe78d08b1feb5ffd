//! Metric and sample types consumed by the path engine

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;

/// Reserved label holding the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Byte separating label names and values when fingerprinting. It can never
/// occur in valid UTF-8.
const SEPARATOR_BYTE: u8 = 0xff;

/// Metric labels (the label set identifying a time series)
///
/// Labels are kept ordered by name, so iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Metric {
    labels: BTreeMap<String, String>,
}

impl Metric {
    /// Create a new metric with the given name
    pub fn new(name: &str) -> Self {
        Self::default().with_label(METRIC_NAME_LABEL, name)
    }

    /// Add a label to this metric
    pub fn with_label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name.to_string(), value.to_string());
        self
    }

    /// Get the metric name (__name__ label)
    pub fn name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    /// Get a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(|s| s.as_str())
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Labels in lexicographic order of their names
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Stable 64-bit FNV-1a hash over the full, sorted label set.
    ///
    /// Identical to the fingerprint Prometheus computes for a label set.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = FnvHasher::default();
        for (name, value) in &self.labels {
            hasher.write(name.as_bytes());
            hasher.write_u8(SEPARATOR_BYTE);
            hasher.write(value.as_bytes());
            hasher.write_u8(SEPARATOR_BYTE);
        }
        Fingerprint(hasher.finish())
    }
}

impl From<BTreeMap<String, String>> for Metric {
    fn from(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metric {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            labels: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or_default())?;
        let mut first = true;
        for (name, value) in self.iter().filter(|(name, _)| *name != METRIC_NAME_LABEL) {
            f.write_str(if first { "{" } else { ", " })?;
            write!(f, "{name}={value:?}")?;
            first = false;
        }
        if !first {
            f.write_str("}")?;
        }
        Ok(())
    }
}

/// Content-addressed identity of a label set, used as cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A single sample (metric + value at a point in time)
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric labels (including __name__)
    pub metric: Metric,
    /// The sample value
    pub value: f64,
    /// Timestamp in milliseconds since epoch
    pub timestamp: i64,
}

impl Sample {
    pub fn new(metric: Metric, value: f64, timestamp: i64) -> Self {
        Self {
            metric,
            value,
            timestamp,
        }
    }

    /// NaN and infinite values cannot be written to Graphite.
    pub fn has_valid_value(&self) -> bool {
        self.value.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_creation() {
        let metric = Metric::new("http_requests_total")
            .with_label("job", "api")
            .with_label("method", "GET");

        assert_eq!(metric.name(), Some("http_requests_total"));
        assert_eq!(metric.get("job"), Some("api"));
        assert_eq!(metric.get("nonexistent"), None);
        assert_eq!(metric.len(), 3);
    }

    #[test]
    fn test_iteration_is_sorted() {
        let metric: Metric = [("zeta", "1"), ("alpha", "2"), (METRIC_NAME_LABEL, "m")]
            .into_iter()
            .collect();

        let names: Vec<&str> = metric.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec![METRIC_NAME_LABEL, "alpha", "zeta"]);
    }

    #[test]
    fn test_fingerprint_is_insertion_order_independent() {
        let a = Metric::new("up").with_label("job", "api").with_label("env", "prod");
        let b = Metric::default()
            .with_label("env", "prod")
            .with_label("job", "api")
            .with_label(METRIC_NAME_LABEL, "up");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(
            a.fingerprint(),
            a.clone().with_label("env", "dev").fingerprint()
        );
    }

    #[test]
    fn test_fingerprint_separates_names_and_values() {
        let a: Metric = [("ab", "c")].into_iter().collect();
        let b: Metric = [("a", "bc")].into_iter().collect();

        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_empty_fingerprint_is_fnv_offset_basis() {
        let fingerprint = Metric::default().fingerprint();
        assert_eq!(fingerprint, Fingerprint(0xcbf29ce484222325));
        assert_eq!(fingerprint.to_string(), "cbf29ce484222325");
    }

    #[test]
    fn test_display() {
        let metric = Metric::new("up").with_label("job", "api");
        assert_eq!(metric.to_string(), "up{job=\"api\"}");
        assert_eq!(Metric::new("up").to_string(), "up");
    }

    #[test]
    fn test_sample_value_validity() {
        let valid = |value| Sample::new(Metric::new("up"), value, 0).has_valid_value();
        assert!(valid(1.0));
        assert!(!valid(f64::NAN));
        assert!(!valid(f64::INFINITY));
        assert!(!valid(f64::NEG_INFINITY));
    }
}
