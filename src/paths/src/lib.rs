//! Metric path translation engine
//!
//! Maps Prometheus metrics (name + label set) to Graphite storage paths
//! through an ordered, templated rule set, and maps stored paths back to
//! label sets for remote read.
//!
//! ## Formats
//!
//! - **carbon**: `prefix.name.label.value.label.value`
//! - **carbon tags**: `prefix.name;label=value;label=value`
//! - **openmetrics**: `prefix.name{label="value",label="value"}`

pub mod cache;
pub mod error;
pub mod escape;
pub mod format;
pub mod model;
pub mod read;
pub mod rules;
pub mod template;
pub mod translator;
pub mod write;

pub use cache::PathCache;
pub use error::PathError;
pub use escape::{escape, unescape};
pub use format::Format;
pub use model::{Fingerprint, METRIC_NAME_LABEL, Metric, Sample};
pub use read::{Datapoint, LabelMatcher, MatchOp, labels_from_tags, parse_path};
pub use rules::{Rule, RuleTemplate};
pub use template::{RegexCache, Template, TemplateEngine, TemplateError};
pub use translator::{PathConfig, Translator, TranslatorStats};
pub use write::{TemplateData, default_path, format_datapoint, generate_paths};
