use clap::{Args, Parser, Subcommand};
use rebatch_core::{CaseMode, NumberPosition, TransformRule};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rebatch")]
#[command(version)]
#[command(about = "Batch rename files and directories")]
#[command(long_about = "A CLI tool that selects entries in a directory tree with a glob or regex pattern, \
computes new names with an ordered chain of rename rules, checks the whole plan for collisions and only then \
renames anything.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Show the renames that would be made without touching anything")]
    Plan {
        #[command(flatten)]
        args: RenameArgs,
    },

    #[command(about = "Plan the renames and apply them")]
    Apply {
        #[command(flatten)]
        args: RenameArgs,

        #[arg(long, help = "Stop at the first failed rename and skip the rest")]
        stop_on_error: bool,

        #[arg(short, long, help = "Interactive mode - show the plan and confirm before renaming")]
        interactive: bool,
    },
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    #[arg(default_value = ".", help = "Root directory (defaults to current directory)")]
    pub root: PathBuf,

    #[arg(
        long = "rule",
        value_name = "KIND[:ARGS]",
        value_parser = parse_rule,
        required = true,
        help = "Rename rule, applied in the order given: prefix:TEXT, suffix:TEXT, case:MODE, \
number:START:WIDTH:POSITION, replace:FIND:WITH, regex:PATTERN:WITH, article, sanitize"
    )]
    pub rules: Vec<TransformRule>,

    #[arg(long, help = "Case, suffix and number rules operate on the full name, extension included")]
    pub full_name: bool,

    #[arg(long, conflicts_with = "regex", help = "Only rename entries whose name matches this glob")]
    pub glob: Option<String>,

    #[arg(long, help = "Only rename entries whose name contains a match for this regex")]
    pub regex: Option<String>,

    #[arg(long, help = "Match the glob or regex case-insensitively")]
    pub ignore_case: bool,

    #[arg(short, long, help = "Descend into subdirectories")]
    pub recursive: bool,

    #[arg(long, help = "Rename directories as well as files")]
    pub dirs: bool,

    #[arg(long, requires = "dirs", help = "Do not rename files (use with --dirs)")]
    pub no_files: bool,

    #[arg(long, help = "Descend into directories reached through symlinks")]
    pub follow_symlinks: bool,

    #[arg(long, default_value_t = 1, help = "Threads used to read the tree")]
    pub threads: usize,

    #[arg(long, help = "Allow renames onto existing entries that are not part of the batch")]
    pub overwrite: bool,

    #[arg(long, conflicts_with = "case_sensitive", help = "Treat names differing only in case as colliding")]
    pub case_insensitive: bool,

    #[arg(long, help = "Treat names differing only in case as distinct")]
    pub case_sensitive: bool,

    #[arg(long, value_name = "FILE", help = "Write the plan and outcome as JSON to this file")]
    pub report: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl RenameArgs {
    pub fn transform_rules(&self) -> Vec<TransformRule> {
        self.rules
            .iter()
            .cloned()
            .map(|rule| if self.full_name { rule.with_full_name() } else { rule })
            .collect()
    }
}

fn parse_rule(value: &str) -> Result<TransformRule, String> {
    let (kind, args) = match value.split_once(':') {
        Some((kind, args)) => (kind, Some(args)),
        None => (value, None),
    };

    match (kind, args) {
        ("prefix", Some(text)) if !text.is_empty() => Ok(TransformRule::prefix(text)),
        ("suffix", Some(text)) if !text.is_empty() => Ok(TransformRule::suffix(text)),
        ("case", Some(mode)) => parse_case_mode(mode).map(TransformRule::case),
        ("number", args) => parse_number(args.unwrap_or_default()),
        ("replace", Some(args)) => {
            let (find, with) = split_replacement(args)?;
            Ok(TransformRule::replace(find, with))
        }
        ("regex", Some(args)) => {
            let (pattern, with) = split_replacement(args)?;
            Ok(TransformRule::regex_replace(pattern, with))
        }
        ("article", None) => Ok(TransformRule::move_article()),
        ("sanitize", None) => Ok(TransformRule::Sanitize),
        ("prefix" | "suffix" | "case" | "replace" | "regex", _) => Err(format!("rule '{}' needs an argument", kind)),
        ("article" | "sanitize", Some(_)) => Err(format!("rule '{}' takes no argument", kind)),
        _ => Err(format!("unknown rule kind '{}'", kind)),
    }
}

// The replacement is everything after the last ':' so patterns may contain colons.
fn split_replacement(args: &str) -> Result<(&str, &str), String> {
    args.rsplit_once(':')
        .ok_or_else(|| format!("expected FIND:WITH, got '{}'", args))
}

fn parse_case_mode(mode: &str) -> Result<CaseMode, String> {
    match mode.to_lowercase().as_str() {
        "lower" => Ok(CaseMode::Lower),
        "upper" => Ok(CaseMode::Upper),
        "title" => Ok(CaseMode::Title),
        "sentence" => Ok(CaseMode::Sentence),
        "snake" => Ok(CaseMode::Snake),
        "kebab" => Ok(CaseMode::Kebab),
        "camel" => Ok(CaseMode::Camel),
        "pascal" => Ok(CaseMode::Pascal),
        other => Err(format!(
            "unknown case mode '{}' (lower, upper, title, sentence, snake, kebab, camel, pascal)",
            other
        )),
    }
}

// number[:START[:WIDTH[:POSITION]]], defaulting to 1, 3 and prefix.
fn parse_number(args: &str) -> Result<TransformRule, String> {
    let mut parts = args.split(':').filter(|p| !p.is_empty());
    let start = match parts.next() {
        Some(start) => start.parse::<u64>().map_err(|e| format!("invalid START '{}': {}", start, e))?,
        None => 1,
    };
    let width = match parts.next() {
        Some(width) => width.parse::<usize>().map_err(|e| format!("invalid WIDTH '{}': {}", width, e))?,
        None => 3,
    };
    let position = match parts.next() {
        None | Some("prefix") => NumberPosition::Prefix,
        Some("suffix") => NumberPosition::Suffix,
        Some("replace") => NumberPosition::Replace,
        Some(other) => return Err(format!("unknown POSITION '{}' (prefix, suffix, replace)", other)),
    };
    if let Some(extra) = parts.next() {
        return Err(format!("unexpected number argument '{}'", extra));
    }
    Ok(TransformRule::sequence(start, width, position))
}
