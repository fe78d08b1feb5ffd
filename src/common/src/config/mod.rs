use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};

/// Configuration file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "graphite-bridge.yaml";

/// Prefix of environment variables overriding configuration keys.
pub const ENV_PREFIX: &str = "GRAPHITE_BRIDGE__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("configuration file {0} does not exist")]
    NotFound(std::path::PathBuf),
}

/// A templating rule as written in the configuration file.
///
/// Regexes and templates are kept as text here; they are compiled when the
/// configuration is turned into a path snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_re: BTreeMap<String, String>,
    #[serde(rename = "continue", default)]
    pub continue_on_match: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WriteConfig {
    /// Memoize generated paths per metric fingerprint
    pub enable_paths_cache: bool,
    /// Lifetime of a cached path list
    #[serde(with = "humantime_serde")]
    pub paths_cache_ttl: Duration,
    /// Interval of the background sweep removing expired entries
    #[serde(with = "humantime_serde")]
    pub paths_cache_purge_interval: Duration,
    /// Extra values exposed to every rule template
    pub template_data: BTreeMap<String, serde_json::Value>,
    /// Ordered rule list
    pub rules: Vec<RuleConfig>,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            enable_paths_cache: true,
            paths_cache_ttl: Duration::from_secs(60 * 60),
            paths_cache_purge_interval: Duration::from_secs(2 * 60 * 60),
            template_data: BTreeMap::new(),
            rules: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReadConfig {
    /// When non-zero, intermediate samples are interpolated between two
    /// backend points further apart than this delta
    #[serde(with = "humantime_serde")]
    pub max_point_delta: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Configuration {
    /// Prepended to every default path
    pub default_prefix: String,
    /// Emit `name;tag=value` paths
    pub enable_tags: bool,
    /// Emit `name{tag="value"}` paths, takes precedence over `enable_tags`
    pub openmetrics: bool,
    pub write: WriteConfig,
    pub read: ReadConfig,
}

impl Configuration {
    /// Load defaults, then `graphite-bridge.yaml`, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment().merge(Yaml::file(DEFAULT_CONFIG_FILE)))
    }

    /// Load defaults, then the given YAML file, then environment overrides.
    /// Unlike [`Configuration::load`], the file must exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::from_figment(Self::figment().merge(Yaml::file(path)))
    }

    /// Parse configuration from YAML text, without environment overrides.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = Self::figment()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write.enable_paths_cache {
            if self.write.paths_cache_ttl.is_zero() {
                return Err(ConfigError::Invalid(
                    "write.paths_cache_ttl must be positive when the paths cache is enabled"
                        .to_string(),
                ));
            }
            if self.write.paths_cache_purge_interval.is_zero() {
                return Err(ConfigError::Invalid(
                    "write.paths_cache_purge_interval must be positive when the paths cache is enabled"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}
