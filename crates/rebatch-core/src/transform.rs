use convert_case::{Case, Casing};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RenameError, Result};
use crate::walker::EntryKind;

const DEFAULT_ARTICLES: [&str; 3] = ["A", "An", "The"];

const MINOR_WORDS: [&str; 16] = [
    "a", "an", "and", "as", "at", "but", "by", "for", "in", "nor", "of", "on", "or", "the", "to",
    "with",
];

/// Characters removed by [`TransformRule::Sanitize`].
const UNSAFE_CHARS: [char; 15] = [
    '\\', '/', ';', ':', '\'', '"', '`', '%', '$', '#', '@', '!', '*', '+', '=',
];

#[cfg(windows)]
const RESERVED_CHARS: &[char] = &['/', '\\', '\0', '<', '>', ':', '"', '|', '?', '*'];
#[cfg(not(windows))]
const RESERVED_CHARS: &[char] = &['/', '\0'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseMode {
    Lower,
    Upper,
    Title,
    Sentence,
    Snake,
    Kebab,
    Camel,
    Pascal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberPosition {
    Prefix,
    Suffix,
    /// The number becomes the whole name; a file keeps its extension.
    Replace,
}

/// One step of a naming recipe. Rules are plain values and never look at the
/// filesystem; a chain of them is applied left to right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformRule {
    AddPrefix(String),
    AddSuffix {
        text: String,
        include_extension: bool,
    },
    CaseChange {
        mode: CaseMode,
        include_extension: bool,
    },
    SequenceNumber {
        start: u64,
        width: usize,
        position: NumberPosition,
        separator: String,
        include_extension: bool,
    },
    FindReplace {
        pattern: String,
        replacement: String,
        use_regex: bool,
    },
    /// `The Matrix` becomes `Matrix, The`.
    MoveArticle { articles: Vec<String> },
    Sanitize,
}

impl TransformRule {
    pub fn prefix(text: &str) -> Self {
        Self::AddPrefix(text.to_string())
    }

    pub fn suffix(text: &str) -> Self {
        Self::AddSuffix {
            text: text.to_string(),
            include_extension: false,
        }
    }

    pub fn case(mode: CaseMode) -> Self {
        Self::CaseChange {
            mode,
            include_extension: false,
        }
    }

    pub fn sequence(start: u64, width: usize, position: NumberPosition) -> Self {
        Self::SequenceNumber {
            start,
            width,
            position,
            separator: "_".to_string(),
            include_extension: false,
        }
    }

    pub fn replace(pattern: &str, replacement: &str) -> Self {
        Self::FindReplace {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            use_regex: false,
        }
    }

    pub fn regex_replace(pattern: &str, replacement: &str) -> Self {
        Self::FindReplace {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            use_regex: true,
        }
    }

    pub fn move_article() -> Self {
        Self::MoveArticle {
            articles: DEFAULT_ARTICLES.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Same rule, but operating on the full name including any extension.
    pub fn with_full_name(self) -> Self {
        match self {
            Self::AddSuffix { text, .. } => Self::AddSuffix {
                text,
                include_extension: true,
            },
            Self::CaseChange { mode, .. } => Self::CaseChange {
                mode,
                include_extension: true,
            },
            Self::SequenceNumber {
                start,
                width,
                position,
                separator,
                ..
            } => Self::SequenceNumber {
                start,
                width,
                position,
                separator,
                include_extension: true,
            },
            other => other,
        }
    }

    fn compile(&self) -> Result<Option<Regex>> {
        match self {
            Self::FindReplace {
                pattern,
                use_regex: true,
                ..
            } => Regex::new(pattern)
                .map(Some)
                .map_err(|e| RenameError::InvalidPatternSyntax {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                }),
            _ => Ok(None),
        }
    }
}

/// What the transformer knows about the entry being renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameContext {
    pub kind: EntryKind,
    /// 0-based position of the entry among all planned candidates.
    pub index: usize,
}

impl NameContext {
    pub fn file(index: usize) -> Self {
        Self {
            kind: EntryKind::File,
            index,
        }
    }

    pub fn dir(index: usize) -> Self {
        Self {
            kind: EntryKind::Directory,
            index,
        }
    }
}

/// Apply a single rule to `name`.
pub fn apply(rule: &TransformRule, name: &str, context: NameContext) -> Result<String> {
    let regex = rule.compile()?;
    apply_compiled(rule, regex.as_ref(), name, context)
}

/// An ordered rule chain with its regular expressions compiled up front.
#[derive(Debug, Clone)]
pub struct Transformer {
    rules: Vec<(TransformRule, Option<Regex>)>,
}

impl Transformer {
    pub fn new(rules: &[TransformRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| rule.compile().map(|regex| (rule.clone(), regex)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> impl Iterator<Item = &TransformRule> {
        self.rules.iter().map(|(rule, _)| rule)
    }

    pub fn apply(&self, name: &str, context: NameContext) -> Result<String> {
        let mut current = name.to_string();
        for (rule, regex) in &self.rules {
            current = apply_compiled(rule, regex.as_ref(), &current, context)?;
        }
        if current != name {
            debug!("Name transform: '{}' -> '{}'", name, current);
        }
        Ok(current)
    }
}

fn apply_compiled(
    rule: &TransformRule,
    regex: Option<&Regex>,
    name: &str,
    context: NameContext,
) -> Result<String> {
    let result = match rule {
        TransformRule::AddPrefix(text) => format!("{}{}", text, name),
        TransformRule::AddSuffix {
            text,
            include_extension,
        } => {
            let (stem, ext) = split_name(name, context.kind, *include_extension);
            format!("{}{}{}", stem, text, ext)
        }
        TransformRule::CaseChange {
            mode,
            include_extension,
        } => {
            let (stem, ext) = split_name(name, context.kind, *include_extension);
            format!("{}{}", change_case(stem, *mode), ext)
        }
        TransformRule::SequenceNumber {
            start,
            width,
            position,
            separator,
            include_extension,
        } => {
            let value = start
                .checked_add(context.index as u64)
                .ok_or_else(|| RenameError::InvalidResultingName {
                    name: name.to_string(),
                    reason: format!("sequence number {} + {} overflows", start, context.index),
                })?;
            let number = format!("{:0width$}", value, width = *width);
            match position {
                NumberPosition::Prefix => format!("{}{}{}", number, separator, name),
                NumberPosition::Suffix => {
                    let (stem, ext) = split_name(name, context.kind, *include_extension);
                    format!("{}{}{}{}", stem, separator, number, ext)
                }
                NumberPosition::Replace => {
                    let (_, ext) = split_name(name, context.kind, *include_extension);
                    format!("{}{}", number, ext)
                }
            }
        }
        TransformRule::FindReplace {
            pattern,
            replacement,
            ..
        } => match regex {
            Some(regex) => regex.replace_all(name, replacement.as_str()).into_owned(),
            None if pattern.is_empty() => name.to_string(),
            None => name.replace(pattern.as_str(), replacement),
        },
        TransformRule::MoveArticle { articles } => {
            let (stem, ext) = split_name(name, context.kind, false);
            match stem.split_once(' ') {
                Some((first, rest))
                    if !rest.trim().is_empty() && articles.iter().any(|a| a == first) =>
                {
                    format!("{}, {}{}", rest.trim(), first, ext)
                }
                _ => name.to_string(),
            }
        }
        TransformRule::Sanitize => {
            let (stem, ext) = split_name(name, context.kind, false);
            let stem: String = stem.chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect();
            format!("{}{}", stem, ext)
        }
    };

    validate_name(&result)?;
    Ok(result)
}

/// Split a name into stem and extension (with its dot). Directories and
/// dot-files have no extension; `include_extension` keeps the name whole.
pub fn split_name(name: &str, kind: EntryKind, include_extension: bool) -> (&str, &str) {
    if include_extension || kind == EntryKind::Directory {
        return (name, "");
    }
    let leading_dots = name.len() - name.trim_start_matches('.').len();
    match name[leading_dots..].rfind('.') {
        Some(pos) if pos > 0 => name.split_at(leading_dots + pos),
        _ => (name, ""),
    }
}

fn change_case(text: &str, mode: CaseMode) -> String {
    match mode {
        CaseMode::Lower => text.to_lowercase(),
        CaseMode::Upper => text.to_uppercase(),
        CaseMode::Title => title_case(text),
        CaseMode::Sentence => sentence_case(text),
        CaseMode::Snake => text.to_case(Case::Snake),
        CaseMode::Kebab => text.to_case(Case::Kebab),
        CaseMode::Camel => text.to_case(Case::Camel),
        CaseMode::Pascal => text.to_case(Case::Pascal),
    }
}

fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut word = String::new();
    let mut word_index = 0;

    let mut flush = |word: &mut String, result: &mut String| {
        if word.is_empty() {
            return;
        }
        let lower = word.to_lowercase();
        if word_index > 0 && MINOR_WORDS.contains(&lower.as_str()) {
            result.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                result.extend(first.to_uppercase());
                result.push_str(chars.as_str());
            }
        }
        word_index += 1;
        word.clear();
    };

    for c in text.chars() {
        if c.is_alphanumeric() || c == '\'' {
            word.push(c);
        } else {
            flush(&mut word, &mut result);
            result.push(c);
        }
    }
    flush(&mut word, &mut result);
    result
}

fn sentence_case(text: &str) -> String {
    let lower = text.to_lowercase();
    match lower.char_indices().find(|(_, c)| c.is_alphabetic()) {
        Some((pos, c)) => {
            let mut result = String::with_capacity(lower.len());
            result.push_str(&lower[..pos]);
            result.extend(c.to_uppercase());
            result.push_str(&lower[pos + c.len_utf8()..]);
            result
        }
        None => lower,
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty".to_string())
    } else if name == "." || name == ".." {
        Some("name is a relative path component".to_string())
    } else {
        name.chars()
            .find(|c| RESERVED_CHARS.contains(c))
            .map(|c| format!("contains reserved character {:?}", c))
    };

    match reason {
        Some(reason) => Err(RenameError::InvalidResultingName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
