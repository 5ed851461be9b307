use glob::MatchOptions;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RenameError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    #[default]
    Glob,
    Regex,
}

#[derive(Debug, Clone)]
enum Compiled {
    Everything,
    Glob(glob::Pattern),
    Regex(Regex),
}

/// An inclusion pattern evaluated against a bare file name.
///
/// The pattern is compiled once in the constructor, so a malformed pattern is
/// reported there and [`Pattern::matches`] cannot fail.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    mode: PatternMode,
    case_insensitive: bool,
    compiled: Compiled,
}

impl Pattern {
    pub fn new(source: &str, mode: PatternMode, case_insensitive: bool) -> Result<Self> {
        let compiled = if source.is_empty() {
            Compiled::Everything
        } else {
            match mode {
                PatternMode::Glob => glob::Pattern::new(source)
                    .map(Compiled::Glob)
                    .map_err(|e| RenameError::InvalidPatternSyntax {
                        pattern: source.to_string(),
                        message: e.msg.to_string(),
                    })?,
                PatternMode::Regex => RegexBuilder::new(source)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map(Compiled::Regex)
                    .map_err(|e| RenameError::InvalidPatternSyntax {
                        pattern: source.to_string(),
                        message: e.to_string(),
                    })?,
            }
        };
        debug!("Compiled {:?} pattern: '{}'", mode, source);
        Ok(Self {
            source: source.to_string(),
            mode,
            case_insensitive,
            compiled,
        })
    }

    pub fn glob(source: &str) -> Result<Self> {
        Self::new(source, PatternMode::Glob, false)
    }

    pub fn regex(source: &str) -> Result<Self> {
        Self::new(source, PatternMode::Regex, false)
    }

    pub fn everything() -> Self {
        Self {
            source: String::new(),
            mode: PatternMode::Glob,
            case_insensitive: false,
            compiled: Compiled::Everything,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mode(&self) -> PatternMode {
        self.mode
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Regex patterns search anywhere in the name; anchor with `^...$` for a
    /// full match. Glob patterns always match the whole name.
    pub fn matches(&self, name: &str) -> bool {
        match &self.compiled {
            Compiled::Everything => true,
            Compiled::Glob(pattern) => pattern.matches_with(
                name,
                MatchOptions {
                    case_sensitive: !self.case_insensitive,
                    require_literal_separator: true,
                    require_literal_leading_dot: false,
                },
            ),
            Compiled::Regex(regex) => regex.is_match(name),
        }
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::everything()
    }
}
