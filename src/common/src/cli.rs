use clap::Parser;
use std::path::PathBuf;

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        help = "Enable quiet mode (minimal output)"
    )]
    pub quiet: bool,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level selected by the CLI flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments; `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new(log_level(args)),
        };

        // A subscriber may already be installed (tests, embedding), keep it.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Graphite bridge configuration:");
            println!("==============================");
            println!("Default prefix: {:?}", config.default_prefix);
            let format = if config.openmetrics {
                "openmetrics"
            } else if config.enable_tags {
                "tags"
            } else {
                "carbon"
            };
            println!("Path format: {format}");

            if config.write.enable_paths_cache {
                println!(
                    "Paths cache: ttl {:?}, purge every {:?}",
                    config.write.paths_cache_ttl, config.write.paths_cache_purge_interval
                );
            } else {
                println!("Paths cache: disabled");
            }

            println!("Template data keys: {}", config.write.template_data.len());
            println!("Rules: {}", config.write.rules.len());
            for (idx, rule) in config.write.rules.iter().enumerate() {
                println!(
                    "  #{idx}: match={:?} match_re={:?} template={:?} continue={}",
                    rule.match_labels, rule.match_re, rule.template, rule.continue_on_match
                );
            }

            if config.read.max_point_delta.is_zero() {
                println!("Read interpolation: disabled");
            } else {
                println!(
                    "Read interpolation: every {:?}",
                    config.read.max_point_delta
                );
            }
        }
        Ok(())
    }
}
