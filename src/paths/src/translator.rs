//! Configuration snapshots and the shared translator
//!
//! A [`PathConfig`] bundles everything path generation reads: format, prefix,
//! compiled rules and template data. The [`Translator`] holds the active
//! snapshot and swaps it as a whole on reload, so a call always works on a
//! single configuration generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::config::Configuration;
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::cache::PathCache;
use crate::error::PathError;
use crate::format::Format;
use crate::model::{Metric, Sample};
use crate::rules::Rule;
use crate::template::TemplateEngine;
use crate::write::{self, TemplateData};

/// One configuration generation, immutable once built
#[derive(Debug, Default)]
pub struct PathConfig {
    pub format: Format,
    /// Prepended to default paths
    pub prefix: String,
    pub rules: Vec<Rule>,
    pub template_data: TemplateData,
}

impl PathConfig {
    pub fn new(format: Format, prefix: &str) -> Self {
        Self {
            format,
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_template_data(mut self, template_data: TemplateData) -> Self {
        self.template_data = template_data;
        self
    }

    /// Compile the rules of `config`. Fails on the first invalid rule.
    pub fn from_config(config: &Configuration, engine: &TemplateEngine) -> Result<Self, PathError> {
        let rules = config
            .write
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| Rule::compile(rule, index, engine))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            format: Format::from_flags(config.enable_tags, config.openmetrics),
            prefix: config.default_prefix.clone(),
            rules,
            template_data: config.write.template_data.clone(),
        })
    }
}

/// Counters of the write path
#[derive(Debug, Clone, Default)]
pub struct TranslatorStats {
    inner: Arc<StatsInner>,
    cache: Option<Arc<PathCache>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    /// Samples dropped for a NaN or infinite value
    ignored_samples: AtomicU64,
    /// Samples dropped because a rule template failed
    template_failures: AtomicU64,
}

impl TranslatorStats {
    fn with_cache(cache: Option<Arc<PathCache>>) -> Self {
        Self {
            inner: Arc::default(),
            cache,
        }
    }

    fn record_ignored_sample(&self) {
        self.inner.ignored_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn record_template_failure(&self) {
        self.inner.template_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ignored_samples(&self) -> u64 {
        self.inner.ignored_samples.load(Ordering::Relaxed)
    }

    pub fn template_failures(&self) -> u64 {
        self.inner.template_failures.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| cache.hits())
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| cache.misses())
    }
}

/// Shared entry point of the write path
#[derive(Debug)]
pub struct Translator {
    config: RwLock<Arc<PathConfig>>,
    cache: Option<Arc<PathCache>>,
    stats: TranslatorStats,
}

impl Translator {
    pub fn new(config: PathConfig, cache: Option<Arc<PathCache>>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            stats: TranslatorStats::with_cache(cache.clone()),
            cache,
        }
    }

    /// Build the snapshot and, when enabled, the paths cache from `config`.
    pub fn from_config(config: &Configuration, engine: &TemplateEngine) -> Result<Self, PathError> {
        let paths_config = PathConfig::from_config(config, engine)?;
        let cache = config.write.enable_paths_cache.then(|| {
            Arc::new(PathCache::new(
                config.write.paths_cache_ttl,
                config.write.paths_cache_purge_interval,
            ))
        });

        tracing::info!(
            format = %paths_config.format,
            prefix = %paths_config.prefix,
            rules = paths_config.rules.len(),
            cache = cache.is_some(),
            "Loaded path configuration"
        );
        Ok(Self::new(paths_config, cache))
    }

    /// The active configuration generation
    pub fn snapshot(&self) -> Arc<PathConfig> {
        self.config.read().clone()
    }

    /// Replace the active configuration.
    ///
    /// Calls already running finish with the previous snapshot. The paths
    /// cache is kept: entries computed with the previous rules are served
    /// until they expire.
    pub fn reload(&self, config: PathConfig) {
        let rules = config.rules.len();
        *self.config.write() = Arc::new(config);
        tracing::info!(rules, "Reloaded path configuration");
    }

    pub fn cache(&self) -> Option<&Arc<PathCache>> {
        self.cache.as_ref()
    }

    pub fn stats(&self) -> &TranslatorStats {
        &self.stats
    }

    /// Paths for `metric`, with `prefix` overriding the configured one.
    pub fn paths(&self, metric: &Metric, prefix: Option<&str>) -> Result<Vec<String>, PathError> {
        let config = self.snapshot();
        self.paths_with(&config, metric, prefix)
    }

    fn paths_with(
        &self,
        config: &PathConfig,
        metric: &Metric,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, PathError> {
        write::generate_paths(
            metric,
            config.format,
            prefix.unwrap_or(&config.prefix),
            &config.rules,
            &config.template_data,
            self.cache.as_deref(),
        )
    }

    /// Plaintext lines for one sample.
    pub fn datapoints(
        &self,
        sample: &Sample,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, PathError> {
        let config = self.snapshot();
        self.datapoints_with(&config, sample, prefix)
    }

    fn datapoints_with(
        &self,
        config: &PathConfig,
        sample: &Sample,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, PathError> {
        if !sample.has_valid_value() {
            self.stats.record_ignored_sample();
            return Err(PathError::InvalidSampleValue(sample.value));
        }

        match self.paths_with(config, &sample.metric, prefix) {
            Ok(paths) => write::to_datapoints(sample, &paths),
            Err(err) => {
                self.stats.record_template_failure();
                Err(err)
            }
        }
    }

    /// Encode a batch into plaintext buffers.
    ///
    /// The whole batch uses one configuration snapshot. Samples that cannot
    /// be encoded are counted, logged and skipped. With `max_chunk_bytes`
    /// the lines are split into several buffers.
    pub fn encode_batch(
        &self,
        samples: &[Sample],
        prefix: Option<&str>,
        max_chunk_bytes: Option<usize>,
    ) -> Vec<String> {
        let config = self.snapshot();
        tracing::debug!(samples = samples.len(), "Encoding batch");

        let mut lines = Vec::with_capacity(samples.len());
        for sample in samples {
            match self.datapoints_with(&config, sample, prefix) {
                Ok(datapoints) => lines.extend(datapoints),
                Err(PathError::InvalidSampleValue(value)) => {
                    tracing::debug!(
                        metric = %sample.metric,
                        value,
                        "Cannot send a value, skipping sample"
                    );
                }
                Err(err) => {
                    tracing::warn!(metric = %sample.metric, error = %err, "Skipping sample");
                }
            }
        }

        match max_chunk_bytes {
            Some(max_bytes) => write::chunk_lines(lines, max_bytes),
            None if lines.is_empty() => Vec::new(),
            None => vec![lines.concat()],
        }
    }

    /// Start the periodic purge of the paths cache, if there is one.
    pub fn start_cache_purge(&self) -> Option<JoinHandle<()>> {
        self.cache.as_ref().map(PathCache::start_purge)
    }
}
