use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;

/// Compiled regular expressions used by `replaceRegex`, keyed by pattern.
///
/// Shared by every template compiled from the same engine, so a pattern is
/// compiled once no matter how many rules or samples use it.
#[derive(Debug, Default)]
pub struct RegexCache {
    patterns: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled pattern, compiling and storing it on first use.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Some(regex) = self.patterns.read().get(pattern) {
            return Ok(regex.clone());
        }

        let regex = Regex::new(pattern)?;
        self.patterns
            .write()
            .entry(pattern.to_string())
            .or_insert_with(|| regex.clone());
        Ok(regex)
    }

    /// Number of distinct patterns compiled so far
    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
