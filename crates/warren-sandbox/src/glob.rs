//! Glob pattern matching for sandbox policies and overlay exclusions.
//!
//! Semantics: `*` matches any run of non-`/` characters (one path segment),
//! `**` matches anything including `/`, every other character is literal.
//! Patterns and paths are both normalized to a leading `/` before matching,
//! and the match is anchored to the whole path.

use std::borrow::Cow;

use regex::Regex;

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let normalized = with_leading_slash(pattern);
        let mut source = String::with_capacity(normalized.len() + 8);
        source.push('^');

        let mut chars = normalized.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    source.push_str(".*");
                } else {
                    source.push_str("[^/]*");
                }
            } else {
                source.push_str(&regex::escape(&c.to_string()));
            }
        }
        source.push('$');

        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&source)?,
        })
    }

    /// The pattern as originally written.
    pub fn pattern(&self) -> &str {
        &self.raw
    }

    /// Whether `path` matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(&with_leading_slash(path))
    }
}

/// Compile a list of patterns, dropping any that fail to compile.
pub fn compile_all(patterns: &[String]) -> Vec<PathPattern> {
    patterns
        .iter()
        .filter_map(|p| PathPattern::new(p).ok())
        .collect()
}

pub(crate) fn with_leading_slash(s: &str) -> Cow<'_, str> {
    if s.starts_with('/') {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("/{s}"))
    }
}
