use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, utils};
use graphite_bridge::{exposition, unittest};
use paths::{TemplateEngine, Translator, parse_path};
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "bridgetool")]
#[command(about = "Inspect and test Prometheus to Graphite path translation")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a configuration to input samples and compare with expected lines
    Unittest {
        /// Unit-test description file
        #[arg(long = "test-file", visible_alias = "test.file")]
        test_file: PathBuf,
    },
    /// Print the plaintext lines produced for samples read from stdin
    Render {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured prefix
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Print the labels recovered from dotted paths
    Parse {
        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print the effective configuration
    Config {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    match cli.command {
        Command::Unittest { test_file } => run_unittest(&test_file),
        Command::Render { config, prefix } => render(config.as_ref(), prefix.as_deref()).await,
        Command::Parse { prefix, paths } => parse(&prefix, &paths),
        Command::Config { config, json } => {
            let config = utils::load_config(config.as_ref())?;
            utils::display_config(&config, json)
        }
    }
}

fn run_unittest(path: &Path) -> Result<()> {
    let test_file = unittest::load_test_file(path)?;
    let outcomes = unittest::run(&test_file, now_ms())?;

    println!("# Testing {}", test_file.config_file.display());
    let mut failed = 0;
    for outcome in &outcomes {
        println!("## {}", outcome.name);
        if outcome.passed() {
            println!("OK");
            continue;
        }
        failed += 1;
        println!("Unexpected output:");
        for line in &outcome.missing {
            println!("-{line}");
        }
        for line in &outcome.extra {
            println!("+{line}");
        }
    }

    if failed > 0 {
        bail!("{failed} of {} test case(s) failed", outcomes.len());
    }
    Ok(())
}

async fn render(config: Option<&PathBuf>, prefix: Option<&str>) -> Result<()> {
    let config = utils::load_config(config)?;
    let translator = Translator::from_config(&config, &TemplateEngine::new())
        .context("Failed to compile rules")?;
    let purge = translator.start_cache_purge();

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read samples from stdin")?;
    let samples = exposition::parse_samples(&input, now_ms())?;

    for buffer in translator.encode_batch(&samples, prefix, None) {
        print!("{buffer}");
    }

    let stats = translator.stats();
    tracing::debug!(
        samples = samples.len(),
        ignored = stats.ignored_samples(),
        template_failures = stats.template_failures(),
        "Rendered samples"
    );

    if let Some(handle) = purge {
        handle.abort();
    }
    Ok(())
}

fn parse(prefix: &str, paths: &[String]) -> Result<()> {
    let mut failed = 0;
    for path in paths {
        match parse_path(path, prefix) {
            Ok(metric) => println!("{metric}"),
            Err(err) => {
                eprintln!("{path}: {err}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} path(s) could not be parsed");
    }
    Ok(())
}
