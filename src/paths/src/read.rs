//! Read side: recovering labels from stored paths and building backend queries

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use regex::Regex;

use crate::error::PathError;
use crate::escape::unescape;
use crate::model::{METRIC_NAME_LABEL, Metric};
use crate::rules::anchored_regex;

/// Tag carrying the metric name in tagged formats
const NAME_TAG: &str = "name";

/// Recover the label set of a path written in the dotted format.
///
/// The prefix and surrounding dots are stripped; the first node is the
/// metric name and the remaining nodes are name/value pairs.
///
/// A metric whose last label has an empty value does not round-trip: its
/// path ends with a dot, which is stripped, leaving an odd number of nodes.
pub fn parse_path(path: &str, prefix: &str) -> Result<Metric, PathError> {
    let cleaned = path.strip_prefix(prefix).unwrap_or(path).trim_matches('.');
    let mut nodes = cleaned.split('.');
    let name = nodes.next().unwrap_or_default();
    let rest: Vec<&str> = nodes.collect();

    if rest.len() % 2 != 0 {
        return Err(PathError::MalformedPath {
            path: path.to_string(),
        });
    }

    let mut labels = BTreeMap::new();
    labels.insert(METRIC_NAME_LABEL.to_string(), unescape(name));
    for pair in rest.chunks_exact(2) {
        labels.insert(unescape(pair[0]), unescape(pair[1]));
    }
    Ok(Metric::from(labels))
}

/// Labels of a series returned by a tag query.
///
/// The `name` tag becomes the metric name with the prefix removed; every
/// other tag is kept verbatim.
pub fn labels_from_tags<'a, I>(tags: I, prefix: &str) -> Metric
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    tags.into_iter()
        .map(|(name, value)| {
            if name == NAME_TAG {
                let value = value.strip_prefix(prefix).unwrap_or(value);
                (METRIC_NAME_LABEL.to_string(), value.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Label matcher types matching Prometheus semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    /// Exact string match (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Regex match (=~)
    RegexMatch,
    /// Regex not match (!~)
    RegexNotMatch,
}

impl MatchOp {
    /// Map the remote-read protocol matcher type.
    pub fn from_code(code: i32) -> Result<Self, PathError> {
        match code {
            0 => Ok(Self::Equal),
            1 => Ok(Self::NotEqual),
            2 => Ok(Self::RegexMatch),
            3 => Ok(Self::RegexNotMatch),
            other => Err(PathError::UnknownMatchType(other)),
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::RegexMatch => write!(f, "=~"),
            Self::RegexNotMatch => write!(f, "!~"),
        }
    }
}

/// A single label matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    /// Value, or pattern for regex operations
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: &str, op: MatchOp, value: &str) -> Self {
        Self {
            name: name.to_string(),
            op,
            value: value.to_string(),
        }
    }

    pub fn equal(name: &str, value: &str) -> Self {
        Self::new(name, MatchOp::Equal, value)
    }

    pub fn not_equal(name: &str, value: &str) -> Self {
        Self::new(name, MatchOp::NotEqual, value)
    }

    pub fn regex_match(name: &str, pattern: &str) -> Self {
        Self::new(name, MatchOp::RegexMatch, pattern)
    }

    pub fn regex_not_match(name: &str, pattern: &str) -> Self {
        Self::new(name, MatchOp::RegexNotMatch, pattern)
    }

    fn compile(&self) -> Result<CompiledMatcher<'_>, PathError> {
        let regex = match self.op {
            MatchOp::RegexMatch | MatchOp::RegexNotMatch => Some(anchored_regex(&self.value)?),
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(CompiledMatcher {
            matcher: self,
            regex,
        })
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

struct CompiledMatcher<'a> {
    matcher: &'a LabelMatcher,
    regex: Option<Regex>,
}

impl CompiledMatcher<'_> {
    /// Absent labels compare as the empty string.
    fn matches(&self, metric: &Metric) -> bool {
        let value = metric.get(&self.matcher.name).unwrap_or_default();
        match (self.matcher.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.matcher.value,
            (MatchOp::NotEqual, _) => value != self.matcher.value,
            (MatchOp::RegexMatch, Some(regex)) => regex.is_match(value),
            (MatchOp::RegexNotMatch, Some(regex)) => !regex.is_match(value),
            (MatchOp::RegexMatch | MatchOp::RegexNotMatch, None) => false,
        }
    }
}

/// Glob query listing every leaf below the metric name.
pub fn expand_query(matchers: &[LabelMatcher], prefix: &str) -> Result<String, PathError> {
    let name = matchers
        .iter()
        .rev()
        .find(|m| m.name == METRIC_NAME_LABEL && m.op == MatchOp::Equal)
        .map(|m| m.value.as_str())
        .filter(|name| !name.is_empty())
        .ok_or(PathError::MissingMetricName)?;
    Ok(format!("{prefix}{name}.**"))
}

/// `seriesByTag(...)` expression selecting the series of a tagged backend.
pub fn series_by_tag_query(matchers: &[LabelMatcher], prefix: &str) -> String {
    let expressions: Vec<String> = matchers
        .iter()
        .map(|m| {
            let (name, value) = if m.name == METRIC_NAME_LABEL {
                (NAME_TAG, format!("{prefix}{}", m.value))
            } else {
                (m.name.as_str(), m.value.clone())
            };
            match m.op {
                MatchOp::Equal => format!("\"{name}={value}\""),
                MatchOp::NotEqual => format!("\"{name}!={value}\""),
                MatchOp::RegexMatch => format!("\"{name}=~^({value})$\""),
                MatchOp::RegexNotMatch => format!("\"{name}!=~^({value})$\""),
            }
        })
        .collect();
    format!("seriesByTag({})", expressions.join(","))
}

/// Keep the dotted targets whose recovered labels satisfy every matcher.
///
/// Targets that cannot be parsed are logged and skipped. An invalid regex
/// fails the whole filter.
pub fn filter_targets(
    targets: &[String],
    matchers: &[LabelMatcher],
    prefix: &str,
) -> Result<Vec<String>, PathError> {
    let compiled = matchers
        .iter()
        .map(LabelMatcher::compile)
        .collect::<Result<Vec<_>, _>>()?;

    let mut results = Vec::new();
    for target in targets {
        let metric = match parse_path(target, prefix) {
            Ok(metric) => metric,
            Err(err) => {
                tracing::warn!(path = %target, prefix, error = %err, "Skipping target");
                continue;
            }
        };
        tracing::debug!(target = %target, labels = %metric, "Filtering target");

        if compiled.iter().all(|matcher| matcher.matches(&metric)) {
            results.push(target.clone());
        }
    }
    Ok(results)
}

/// A point returned by the backend render API
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub value: Option<f64>,
}

impl Datapoint {
    pub fn new(timestamp: i64, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }
}

/// Convert backend points to `(timestamp_ms, value)` samples.
///
/// Null points are dropped. With a non-zero `max_point_delta` of at least a
/// second, points are linearly interpolated every `max_point_delta` between
/// two consecutive non-null points.
pub fn samples_from_datapoints(points: &[Datapoint], max_point_delta: Duration) -> Vec<(i64, f64)> {
    let interval = i64::try_from(max_point_delta.as_secs()).unwrap_or(i64::MAX);
    let mut samples = Vec::with_capacity(points.len());

    for (idx, point) in points.iter().enumerate() {
        let Some(value) = point.value else {
            continue;
        };
        samples.push((point.timestamp * 1000, value));

        if interval == 0 {
            continue;
        }
        let Some(Datapoint {
            timestamp: next_timestamp,
            value: Some(next_value),
        }) = points.get(idx + 1).copied()
        else {
            continue;
        };

        let delta = next_timestamp - point.timestamp;
        if delta <= 0 {
            continue;
        }
        let variation = (next_value - value) / delta as f64;
        for step in 1..delta / interval {
            let timestamp = point.timestamp + step * interval;
            let interpolated = value + (timestamp - point.timestamp) as f64 * variation;
            samples.push((timestamp * 1000, interpolated));
        }
    }

    samples
}
