//! Compiled templating rules and label matching

use std::collections::BTreeMap;

use common::config::RuleConfig;
use regex::Regex;

use crate::error::PathError;
use crate::model::Metric;
use crate::template::{Template, TemplateEngine};

/// What a matching rule produces
#[derive(Debug)]
pub enum RuleTemplate {
    /// Renders one path per matching metric
    Templated(Template),
    /// No template: a terminal untemplated rule silences the metric
    Untemplated,
}

/// A rule ready for evaluation, compiled from a [`RuleConfig`]
#[derive(Debug)]
pub struct Rule {
    pub match_labels: BTreeMap<String, String>,
    /// Anchored patterns
    pub match_re: BTreeMap<String, Regex>,
    pub template: RuleTemplate,
    pub continue_on_match: bool,
}

impl Rule {
    /// Compile a rule from its configuration. `index` is the position of the
    /// rule in the configured list and only serves error reporting.
    pub fn compile(
        config: &RuleConfig,
        index: usize,
        engine: &TemplateEngine,
    ) -> Result<Self, PathError> {
        let match_re = config
            .match_re
            .iter()
            .map(|(name, pattern)| {
                anchored_regex(pattern)
                    .map(|regex| (name.clone(), regex))
                    .map_err(|err| PathError::InvalidRule {
                        rule: index,
                        reason: err.to_string(),
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let template = match &config.template {
            Some(source) => RuleTemplate::Templated(engine.compile(source).map_err(|err| {
                PathError::InvalidRule {
                    rule: index,
                    reason: err.to_string(),
                }
            })?),
            None => RuleTemplate::Untemplated,
        };

        Ok(Self {
            match_labels: config.match_labels.clone(),
            match_re,
            template,
            continue_on_match: config.continue_on_match,
        })
    }

    /// A terminal rule without template: matching metrics produce no path.
    pub fn is_silencing(&self) -> bool {
        !self.continue_on_match && matches!(self.template, RuleTemplate::Untemplated)
    }

    pub fn matches(&self, metric: &Metric) -> bool {
        matches(metric, &self.match_labels, &self.match_re)
    }
}

/// Whether `metric` satisfies every exact and regex condition.
///
/// An absent label compares as the empty string. Empty condition maps match
/// every metric.
pub fn matches(
    metric: &Metric,
    exact: &BTreeMap<String, String>,
    regex: &BTreeMap<String, Regex>,
) -> bool {
    exact
        .iter()
        .all(|(name, value)| metric.get(name).unwrap_or_default() == value.as_str())
        && regex
            .iter()
            .all(|(name, re)| re.is_match(metric.get(name).unwrap_or_default()))
}

/// Compile `pattern` so that it must match the whole value.
pub fn anchored_regex(pattern: &str) -> Result<Regex, PathError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| PathError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_config(exact: &[(&str, &str)], re: &[(&str, &str)]) -> RuleConfig {
        RuleConfig {
            template: Some("t".to_string()),
            match_labels: exact
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_re: re
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            continue_on_match: false,
        }
    }

    fn compile(config: &RuleConfig) -> Rule {
        Rule::compile(config, 0, &TemplateEngine::new()).unwrap()
    }

    fn metric() -> Metric {
        Metric::new("test:metric")
            .with_label("owner", "team-X")
            .with_label("testlabel", "test:value")
    }

    #[test]
    fn test_empty_conditions_match_everything() {
        assert!(compile(&rule_config(&[], &[])).matches(&metric()));
        assert!(compile(&rule_config(&[], &[])).matches(&Metric::default()));
    }

    fn matches_metric(exact: &[(&str, &str)], re: &[(&str, &str)]) -> bool {
        compile(&rule_config(exact, re)).matches(&metric())
    }

    #[test]
    fn test_exact_match() {
        assert!(matches_metric(&[("owner", "team-X")], &[]));
        assert!(!matches_metric(&[("owner", "team-Y")], &[]));
        assert!(!matches_metric(&[("owner", "team-X"), ("extra", "v")], &[]));
    }

    #[test]
    fn test_absent_label_compares_as_empty() {
        assert!(matches_metric(&[("missing", "")], &[]));
        assert!(matches_metric(&[], &[("missing", "x?")]));
        assert!(!matches_metric(&[], &[("missing", ".+")]));
    }

    #[test]
    fn test_regex_is_anchored() {
        assert!(matches_metric(&[], &[("testlabel", "test:.*")]));
        assert!(!matches_metric(&[], &[("testlabel", "test")]));
        assert!(!matches_metric(&[], &[("testlabel", "value")]));
        assert!(matches_metric(&[], &[("owner", "team-X|team-Y")]));
    }

    #[test]
    fn test_silencing_rule() {
        let mut config = rule_config(&[("owner", "team-Z")], &[]);
        config.template = None;
        assert!(compile(&config).is_silencing());

        config.continue_on_match = true;
        assert!(!compile(&config).is_silencing());

        config.continue_on_match = false;
        config.template = Some("x".to_string());
        assert!(!compile(&config).is_silencing());
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let config = rule_config(&[], &[("owner", "(team")]);
        let err = Rule::compile(&config, 3, &TemplateEngine::new()).unwrap_err();
        assert!(matches!(err, PathError::InvalidRule { rule: 3, .. }));
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let mut config = rule_config(&[], &[]);
        config.template = Some("{{ .labels.owner".to_string());
        let err = Rule::compile(&config, 1, &TemplateEngine::new()).unwrap_err();
        assert!(matches!(err, PathError::InvalidRule { rule: 1, .. }));
    }
}
