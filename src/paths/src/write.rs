//! Path generation for the write path
//!
//! Rules are walked in configured order. Matching rules with a template
//! contribute one path each; the walk stops at the first matching rule that
//! does not continue. A terminal rule without template silences the metric
//! entirely. When the walk never reaches a terminal rule, the default path is
//! appended after the templated ones.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::cache::PathCache;
use crate::error::PathError;
use crate::escape::escape;
use crate::format::Format;
use crate::model::{METRIC_NAME_LABEL, Metric, Sample};
use crate::rules::{Rule, RuleTemplate};

/// Extra values exposed to rule templates next to `labels`
pub type TemplateData = BTreeMap<String, Value>;

/// Key under which templates find the metric labels
const LABELS_KEY: &str = "labels";

/// Graphite paths for `metric`.
///
/// With a cache, a stored list is returned as is; otherwise the computed
/// list is stored under the metric fingerprint. Template failures are not
/// cached and no partial list is returned.
pub fn generate_paths(
    metric: &Metric,
    format: Format,
    prefix: &str,
    rules: &[Rule],
    template_data: &TemplateData,
    cache: Option<&PathCache>,
) -> Result<Vec<String>, PathError> {
    let keyed = cache.map(|cache| (cache, metric.fingerprint()));
    if let Some((cache, fingerprint)) = keyed {
        if let Some(paths) = cache.get(fingerprint) {
            return Ok(paths);
        }
    }

    let walk = templated_paths(metric, rules, template_data)?;
    let mut paths = walk.paths;
    if !walk.stopped {
        paths.push(default_path(metric, format, prefix));
    }

    if let Some((cache, fingerprint)) = keyed {
        cache.insert(fingerprint, paths.clone());
    }
    Ok(paths)
}

struct RuleWalk {
    paths: Vec<String>,
    /// A terminal rule matched
    stopped: bool,
}

fn templated_paths(
    metric: &Metric,
    rules: &[Rule],
    template_data: &TemplateData,
) -> Result<RuleWalk, PathError> {
    let mut paths = Vec::new();
    let mut context = None;

    for (index, rule) in rules.iter().enumerate() {
        if !rule.matches(metric) {
            continue;
        }

        match &rule.template {
            RuleTemplate::Untemplated if !rule.continue_on_match => {
                tracing::debug!(rule = index, %metric, "Metric silenced");
                return Ok(RuleWalk {
                    paths: Vec::new(),
                    stopped: true,
                });
            }
            RuleTemplate::Untemplated => {}
            RuleTemplate::Templated(template) => {
                let context =
                    context.get_or_insert_with(|| template_context(metric, template_data));
                let path = template
                    .execute(context)
                    .map_err(|source| PathError::Template {
                        rule: index,
                        source,
                    })?;
                tracing::debug!(rule = index, %path, "Rendered templated path");
                paths.push(path);
            }
        }

        if !rule.continue_on_match {
            return Ok(RuleWalk {
                paths,
                stopped: true,
            });
        }
    }

    Ok(RuleWalk {
        paths,
        stopped: false,
    })
}

/// Evaluation context: the template data overlaid with a `labels` map.
fn template_context(metric: &Metric, template_data: &TemplateData) -> Value {
    let mut context: Map<String, Value> = template_data
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let labels: Map<String, Value> = metric
        .iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect();
    context.insert(LABELS_KEY.to_string(), Value::Object(labels));
    Value::Object(context)
}

/// Path encoding every label, in label name order, after the escaped name.
pub fn default_path(metric: &Metric, format: Format, prefix: &str) -> String {
    let mut path = String::from(prefix);
    path.push_str(&escape(metric.name().unwrap_or_default()));

    let labels = metric
        .iter()
        .filter(|(name, _)| *name != METRIC_NAME_LABEL && !name.is_empty());

    match format {
        Format::Carbon => {
            for (name, value) in labels {
                path.push('.');
                path.push_str(&escape(name));
                path.push('.');
                path.push_str(&escape(value));
            }
        }
        Format::CarbonTags => {
            for (name, value) in labels {
                path.push(';');
                path.push_str(name);
                path.push('=');
                path.push_str(&escape(value));
            }
        }
        Format::CarbonOpenMetrics => {
            let pairs: Vec<String> = labels
                .map(|(name, value)| format!("{name}=\"{}\"", escape(value)))
                .collect();
            if !pairs.is_empty() {
                path.push('{');
                path.push_str(&pairs.join(","));
                path.push('}');
            }
        }
    }

    path
}

/// A plaintext protocol line: `<path> <value> <unix seconds>\n`.
pub fn format_datapoint(path: &str, value: f64, timestamp_ms: i64) -> String {
    let seconds = timestamp_ms as f64 / 1000.0;
    format!("{path} {value:.6} {seconds:.0}\n")
}

/// One line per path for `sample`. NaN and infinite values are rejected.
pub fn to_datapoints(sample: &Sample, paths: &[String]) -> Result<Vec<String>, PathError> {
    if !sample.has_valid_value() {
        return Err(PathError::InvalidSampleValue(sample.value));
    }
    Ok(paths
        .iter()
        .map(|path| format_datapoint(path, sample.value, sample.timestamp))
        .collect())
}

/// Pack lines into buffers of at most `max_bytes`.
///
/// Lines are never split, so a single line longer than the limit gets a
/// buffer of its own. No empty buffer is produced.
pub fn chunk_lines<I>(lines: I, max_bytes: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in lines {
        if !current.is_empty() && current.len() + line.len() > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateEngine;
    use common::config::RuleConfig;
    use serde_json::json;
    use std::time::Duration;

    fn metric() -> Metric {
        Metric::new("test:metric")
            .with_label("owner", "team-X")
            .with_label("testlabel", "test:value")
    }

    fn rule(exact: &[(&str, &str)], template: Option<&str>, continue_on_match: bool) -> Rule {
        let config = RuleConfig {
            template: template.map(str::to_string),
            match_labels: exact
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_re: BTreeMap::new(),
            continue_on_match,
        };
        Rule::compile(&config, 0, &TemplateEngine::new()).unwrap()
    }

    fn generate(metric: &Metric, rules: &[Rule]) -> Result<Vec<String>, PathError> {
        generate_paths(
            metric,
            Format::Carbon,
            "prefix.",
            rules,
            &TemplateData::new(),
            None,
        )
    }

    #[test]
    fn test_default_path_formats() {
        let metric = metric();
        assert_eq!(
            default_path(&metric, Format::Carbon, "prefix."),
            "prefix.test:metric.owner.team-X.testlabel.test:value"
        );
        assert_eq!(
            default_path(&metric, Format::CarbonTags, "prefix."),
            "prefix.test:metric;owner=team-X;testlabel=test:value"
        );
        assert_eq!(
            default_path(&metric, Format::CarbonOpenMetrics, "prefix."),
            "prefix.test:metric{owner=\"team-X\",testlabel=\"test:value\"}"
        );
    }

    #[test]
    fn test_default_path_without_labels() {
        let metric = Metric::new("up");
        assert_eq!(default_path(&metric, Format::Carbon, ""), "up");
        assert_eq!(default_path(&metric, Format::CarbonTags, ""), "up");
        assert_eq!(default_path(&metric, Format::CarbonOpenMetrics, ""), "up");
    }

    #[test]
    fn test_default_path_escapes_dotted_label_names() {
        let metric = Metric::new("a.b").with_label("odd.name", "v/1");
        assert_eq!(
            default_path(&metric, Format::Carbon, ""),
            "a%2Eb.odd%2Ename.v%2F1"
        );
        assert_eq!(
            default_path(&metric, Format::CarbonTags, ""),
            "a%2Eb;odd.name=v%2F1"
        );
    }

    #[test]
    fn test_no_rules_yields_default_path() {
        assert_eq!(
            generate(&metric(), &[]).unwrap(),
            vec!["prefix.test:metric.owner.team-X.testlabel.test:value"]
        );
    }

    #[test]
    fn test_terminal_templated_rule_replaces_default() {
        let template = Some("custom.{{.labels.owner}}");
        let rules = [rule(&[("owner", "team-X")], template, false)];
        assert_eq!(generate(&metric(), &rules).unwrap(), vec!["custom.team-X"]);
    }

    #[test]
    fn test_silencing_discards_accumulated_paths() {
        let rules = [
            rule(&[], Some("first"), true),
            rule(&[("owner", "team-X")], None, false),
        ];
        assert!(generate(&metric(), &rules).unwrap().is_empty());
    }

    #[test]
    fn test_continuing_untemplated_rule_is_a_no_op() {
        let rules = [rule(&[], None, true), rule(&[], Some("t"), true)];
        assert_eq!(
            generate(&metric(), &rules).unwrap(),
            vec!["t", "prefix.test:metric.owner.team-X.testlabel.test:value"]
        );
    }

    #[test]
    fn test_rules_after_terminal_match_are_ignored() {
        let rules = [
            rule(&[], Some("a"), true),
            rule(&[], Some("b"), false),
            rule(&[], Some("c"), true),
        ];
        assert_eq!(generate(&metric(), &rules).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_template_data_in_context() {
        let rules = [rule(&[], Some("{{.shared}}.{{.labels.__name__}}"), false)];
        let data = TemplateData::from([("shared".to_string(), json!("data.foo"))]);
        let paths =
            generate_paths(&metric(), Format::Carbon, "", &rules, &data, None).unwrap();
        assert_eq!(paths, vec!["data.foo.test:metric"]);
    }

    #[test]
    fn test_labels_key_shadows_template_data() {
        let rules = [rule(&[], Some("{{.labels.owner}}"), false)];
        let data = TemplateData::from([("labels".to_string(), json!({"owner": "data"}))]);
        let paths =
            generate_paths(&metric(), Format::Carbon, "", &rules, &data, None).unwrap();
        assert_eq!(paths, vec!["team-X"]);
    }

    #[test]
    fn test_template_error_propagates() {
        let rules = [
            rule(&[], Some("ok"), true),
            rule(&[], Some(r#"{{ replace .labels.missing "a" "b" }}"#), true),
        ];
        let err = generate(&metric(), &rules).unwrap_err();
        assert!(matches!(err, PathError::Template { rule: 1, .. }));
    }

    #[tokio::test]
    async fn test_cached_paths_skip_templates() {
        let cache = PathCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let rules = [rule(&[], Some("t.{{.labels.owner}}"), false)];
        let data = TemplateData::new();

        let first = generate_paths(&metric(), Format::Carbon, "", &rules, &data, Some(&cache))
            .unwrap();
        let second = generate_paths(&metric(), Format::Carbon, "", &rules, &data, Some(&cache))
            .unwrap();

        assert_eq!(first, second);
        let RuleTemplate::Templated(template) = &rules[0].template else {
            panic!("expected a templated rule");
        };
        assert_eq!(template.executions(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn test_template_failure_is_not_cached() {
        let cache = PathCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let rules = [rule(&[], Some(r#"{{ replace .labels.missing "a" "b" }}"#), false)];

        let result = generate_paths(
            &metric(),
            Format::Carbon,
            "",
            &rules,
            &TemplateData::new(),
            Some(&cache),
        );

        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_format_datapoint() {
        assert_eq!(
            format_datapoint("a.b", 1.5, 1_500_000_000_123),
            "a.b 1.500000 1500000000\n"
        );
        assert_eq!(format_datapoint("a.b", -2.0, 999), "a.b -2.000000 1\n");
    }

    #[test]
    fn test_to_datapoints_rejects_invalid_values() {
        let paths = vec!["a".to_string(), "b".to_string()];
        let sample = Sample::new(metric(), 3.0, 1000);
        assert_eq!(
            to_datapoints(&sample, &paths).unwrap(),
            vec!["a 3.000000 1\n", "b 3.000000 1\n"]
        );

        let sample = Sample::new(metric(), f64::NAN, 1000);
        assert!(matches!(
            to_datapoints(&sample, &paths),
            Err(PathError::InvalidSampleValue(_))
        ));
    }

    #[test]
    fn test_chunk_lines() {
        let lines: Vec<String> = ["aaaa\n", "bbbb\n", "cc\n"].map(String::from).into();
        assert_eq!(chunk_lines(lines.clone(), 10), vec!["aaaa\nbbbb\n", "cc\n"]);
        assert_eq!(
            chunk_lines(lines.clone(), 3),
            vec!["aaaa\n", "bbbb\n", "cc\n"]
        );
        assert_eq!(chunk_lines(lines, 1024).len(), 1);
        assert!(chunk_lines(Vec::new(), 10).is_empty());
    }
}
