use crate::template::TemplateError;

/// Errors surfaced by path generation and path parsing
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// A matching rule's template failed to render; the sample yields no path
    #[error("template of rule #{rule} failed: {source}")]
    Template {
        rule: usize,
        #[source]
        source: TemplateError,
    },
    #[error("unable to parse labels from path {path:?}: odd number of nodes in path")]
    MalformedPath { path: String },
    #[error("invalid sample value {0}")]
    InvalidSampleValue(f64),
    #[error("unknown match type {0}")]
    UnknownMatchType(i32),
    #[error("invalid remote query: no __name__ label provided")]
    MissingMetricName,
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// Configuration-time failure compiling a rule
    #[error("invalid rule #{rule}: {reason}")]
    InvalidRule { rule: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_error_display() {
        let err = PathError::MalformedPath {
            path: "a.b".to_string(),
        };
        assert!(err.to_string().contains("odd number of nodes"));

        let err = PathError::UnknownMatchType(7);
        assert_eq!(err.to_string(), "unknown match type 7");

        let err = PathError::Template {
            rule: 2,
            source: TemplateError::Exec("boom".to_string()),
        };
        assert!(err.to_string().starts_with("template of rule #2 failed"));
    }
}
