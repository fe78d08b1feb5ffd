//! Template engine used by rules to render custom paths.
//!
//! Templates follow the familiar `{{ ... }}` action syntax: field chains such
//! as `.labels.owner`, pipelines with `|`, parenthesized sub-pipelines,
//! `if`/`with`/`range` blocks and trim markers. Only `$` is available as a
//! variable. The function set is fixed:
//!
//! | function | behaviour |
//! |---|---|
//! | `replace input from to` | replace every occurrence; fails on a missing input |
//! | `split input delim` | list of substrings |
//! | `escape input` | path escaping (see [`crate::escape`]) |
//! | `isSet value key` | whether a map holds `key` |
//! | `replaceRegex input pattern repl` | regex replace-all, `$1` expands groups |
//! | `index`, `len`, `eq`, `ne`, `not`, `and`, `or`, `print` | builtins |

mod exec;
mod funcs;
mod parse;
mod regex_cache;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

pub use regex_cache::RegexCache;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("template parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("template execution failed: {0}")]
    Exec(String),
}

/// Compiles templates sharing a single regex cache
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    regex_cache: Arc<RegexCache>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regex_cache(regex_cache: Arc<RegexCache>) -> Self {
        Self { regex_cache }
    }

    pub fn regex_cache(&self) -> &Arc<RegexCache> {
        &self.regex_cache
    }

    /// Parse `source` into an executable template.
    pub fn compile(&self, source: &str) -> Result<Template, TemplateError> {
        let nodes = parse::parse(source)?;
        Ok(Template {
            source: source.to_string(),
            nodes,
            regex_cache: Arc::clone(&self.regex_cache),
            executions: AtomicU64::new(0),
        })
    }
}

/// A compiled template, immutable and safe to execute concurrently
pub struct Template {
    source: String,
    nodes: Vec<parse::Node>,
    regex_cache: Arc<RegexCache>,
    executions: AtomicU64,
}

impl Template {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the template against `context`, usually a JSON object.
    pub fn execute(&self, context: &Value) -> Result<String, TemplateError> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        exec::Exec::new(context, &self.regex_cache).run(&self.nodes)
    }

    /// How many times this template has been executed
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, context: Value) -> Result<String, TemplateError> {
        TemplateEngine::new().compile(source)?.execute(&context)
    }

    #[test]
    fn test_labels_and_template_data() {
        let context = json!({
            "shared": "data.foo",
            "labels": {"owner": "team-X", "testlabel": "test:value"},
        });
        assert_eq!(
            render("tmpl_1.{{.shared | escape}}.{{.labels.owner}}", context).unwrap(),
            "tmpl_1.data%2Efoo.team-X"
        );
    }

    #[test]
    fn test_split_and_index() {
        let context = json!({"labels": {"testlabel": "test:value"}});
        assert_eq!(
            render(
                r#"{{ index (split .labels.testlabel ":") 1 }}"#,
                context
            )
            .unwrap(),
            "value"
        );
    }

    #[test]
    fn test_replace_regex_through_pipeline() {
        let context = json!({"labels": {"host": "long-hostname-machine01234"}});
        assert_eq!(
            render(
                r#"hosts.{{ replaceRegex .labels.host `^([a-z_\-]*)[0-9]*$` "$1" }}"#,
                context
            )
            .unwrap(),
            "hosts.long-hostname-machine"
        );
    }

    #[test]
    fn test_replace_on_missing_label_fails() {
        let context = json!({"labels": {}});
        let err = render(r#"{{ replace .labels.nope "a" "b" }}"#, context).unwrap_err();
        let TemplateError::Exec(message) = err else {
            panic!("expected an execution error, got {err:?}");
        };
        assert!(message.contains("cannot replace"));
    }

    #[test]
    fn test_is_set_on_template_data() {
        let source = r#"{{ if isSet $ "shared" }}{{ .shared }}{{ else }}none{{ end }}"#;
        assert_eq!(render(source, json!({"shared": "x"})).unwrap(), "x");
        assert_eq!(render(source, json!({})).unwrap(), "none");
    }

    #[test]
    fn test_compile_error() {
        let err = TemplateEngine::new().compile("{{ .labels.owner").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
    }

    #[test]
    fn test_templates_share_regex_cache() {
        let engine = TemplateEngine::new();
        let a = engine.compile(r#"{{ replaceRegex . "a+" "b" }}"#).unwrap();
        let b = engine.compile(r#"{{ replaceRegex . "a+" "c" }}"#).unwrap();

        assert_eq!(a.execute(&json!("xaa")).unwrap(), "xb");
        assert_eq!(b.execute(&json!("aay")).unwrap(), "cy");
        assert_eq!(engine.regex_cache().len(), 1);
    }

    #[test]
    fn test_execution_counter_and_debug() {
        let template = TemplateEngine::new().compile("static").unwrap();
        template.execute(&json!({})).unwrap();
        template.execute(&json!({})).unwrap();

        assert_eq!(template.executions(), 2);
        assert_eq!(template.source(), "static");
        assert!(format!("{template:?}").contains("static"));
    }

    #[test]
    fn test_concurrent_execution() {
        let template = Arc::new(TemplateEngine::new().compile("{{.labels.n}}").unwrap());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let template = Arc::clone(&template);
                std::thread::spawn(move || {
                    template
                        .execute(&json!({"labels": {"n": n.to_string()}}))
                        .unwrap()
                })
            })
            .collect();

        let mut outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        outputs.sort();
        assert_eq!(outputs, vec!["0", "1", "2", "3"]);
        assert_eq!(template.executions(), 4);
    }
}
