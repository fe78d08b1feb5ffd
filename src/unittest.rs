//! Offline checks of a rule configuration
//!
//! A test file names a configuration file (relative to the test file) and a
//! list of cases, each made of exposition-format input and the expected
//! plaintext lines. Lines are compared without regard to order.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::config::Configuration;
use paths::{PathConfig, TemplateEngine, Translator};
use serde::Deserialize;

use crate::exposition;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestFile {
    pub config_file: PathBuf,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub name: String,
    /// Expected lines that were not produced
    pub missing: Vec<String>,
    /// Produced lines that were not expected
    pub extra: Vec<String>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Read a test file; `config_file` is resolved against the file's directory.
pub fn load_test_file(path: &Path) -> Result<TestFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read test file {}", path.display()))?;
    let mut test_file: TestFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse test file {}", path.display()))?;

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    test_file.config_file = dir.join(&test_file.config_file);
    Ok(test_file)
}

/// Run every case of `test_file` against its configuration.
pub fn run(test_file: &TestFile, now_ms: i64) -> Result<Vec<TestOutcome>> {
    let config = Configuration::load_from_path(&test_file.config_file).with_context(|| {
        format!(
            "Failed to load configuration {}",
            test_file.config_file.display()
        )
    })?;
    let paths_config = PathConfig::from_config(&config, &TemplateEngine::new())
        .context("Failed to compile rules")?;
    let translator = Translator::new(paths_config, None);

    test_file
        .tests
        .iter()
        .map(|case| {
            let samples = exposition::parse_samples(&case.input, now_ms)
                .with_context(|| format!("Invalid input in test case {:?}", case.name))?;
            let produced = translator.encode_batch(&samples, None, None).concat();
            Ok(compare(&case.name, &case.output, &produced))
        })
        .collect()
}

fn sorted_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

fn compare(name: &str, expected: &str, produced: &str) -> TestOutcome {
    let mut missing = sorted_lines(expected);
    let mut extra = Vec::new();
    for line in sorted_lines(produced) {
        match missing.iter().position(|candidate| *candidate == line) {
            Some(idx) => {
                missing.remove(idx);
            }
            None => extra.push(line),
        }
    }
    TestOutcome {
        name: name.to_string(),
        missing,
        extra,
    }
}
