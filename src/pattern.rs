//! File name filtering with full-match regular expressions

use regex::Regex;

use crate::error::Result;

/// A file name filter.
///
/// A non-empty expression must match the *whole* base name: `report`
/// accepts `report` but rejects `report.csv`. The empty expression accepts
/// every name without touching the regex engine.
#[derive(Debug, Clone)]
pub struct FileNamePattern {
    source: String,
    regex: Option<Regex>,
}

impl FileNamePattern {
    /// Compile a pattern, failing on invalid regex syntax
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Ok(Self::match_all());
        }

        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex: Some(regex),
        })
    }

    /// A pattern accepting every file name
    pub fn match_all() -> Self {
        Self {
            source: String::new(),
            regex: None,
        }
    }

    /// Whether this pattern accepts every name
    pub fn is_match_all(&self) -> bool {
        self.regex.is_none()
    }

    /// Check a base name against the pattern
    pub fn matches(&self, file_name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(file_name),
            None => true,
        }
    }

    /// The expression as supplied by the user (empty for match-all)
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for FileNamePattern {
    fn default() -> Self {
        Self::match_all()
    }
}
