use anyhow::Result;
use inquire::Confirm;
use rebatch_core::{Collision, CollisionKind, ExecutionResult, PlanStep, RenamePlan, StepOutcome, StepPhase};
use similar::{ChangeTag, TextDiff};
use std::fmt::Write;
use std::path::Path;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Colors the characters removed from `old` red and those added in `new` green.
pub fn highlight_rename(old: &str, new: &str) -> Result<(String, String)> {
    let diff = TextDiff::from_chars(old, new);
    let mut before = String::new();
    let mut after = String::new();

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                before.push_str(change.value());
                after.push_str(change.value());
            }
            ChangeTag::Delete => write!(before, "{}{}{}", RED, change.value(), RESET)?,
            ChangeTag::Insert => write!(after, "{}{}{}", GREEN, change.value(), RESET)?,
        }
    }

    Ok((before, after))
}

fn relative<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

fn describe_step(root: &Path, step: &PlanStep) -> Result<String> {
    let old_name = step.source.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let new_name = step.target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let (before, after) = highlight_rename(&old_name, &new_name)?;

    let mut line = String::new();
    let icon = if step.entry.is_dir() { "📁" } else { "📝" };
    write!(line, "  {} ", icon)?;
    if let Some(parent) = step.source.parent() {
        let parent = relative(root, parent);
        if !parent.as_os_str().is_empty() {
            write!(line, "{}{}/{}", DIM, parent.display(), RESET)?;
        }
    }
    write!(line, "{} -> {}", before, after)?;
    match step.phase {
        StepPhase::Direct => {}
        StepPhase::Staging => write!(line, " {}(staging){}", DIM, RESET)?,
        StepPhase::Final => write!(line, " {}(from staging){}", DIM, RESET)?,
    }
    if step.overwrite {
        write!(line, " {}(overwrites){}", RED, RESET)?;
    }
    Ok(line)
}

fn describe_collision(root: &Path, collision: &Collision) -> String {
    let reason = match collision.kind {
        CollisionKind::DuplicateTarget => "claimed by more than one entry",
        CollisionKind::ExistingEntry => "already exists",
    };
    let sources: Vec<String> = collision
        .sources
        .iter()
        .map(|s| relative(root, s).display().to_string())
        .collect();
    format!(
        "  {}{}{} {}: {}",
        RED,
        relative(root, &collision.target).display(),
        RESET,
        reason,
        sources.join(", ")
    )
}

pub fn show_plan(root: &Path, plan: &RenamePlan) -> Result<()> {
    if !plan.is_valid() {
        println!("\n⚠️  Plan is {}:", plan.status());
        for collision in plan.collisions() {
            println!("{}", describe_collision(root, collision));
        }
        return Ok(());
    }

    println!("\n📋 {} rename(s) planned under {}:", plan.len(), root.display());
    for step in plan.steps() {
        println!("{}", describe_step(root, step)?);
    }
    Ok(())
}

pub fn confirm_plan(plan: &RenamePlan) -> Result<bool> {
    let apply_plan = Confirm::new(&format!("Apply these {} rename(s)?", plan.len()))
        .with_default(true)
        .prompt()?;

    Ok(apply_plan)
}

pub fn show_failures(root: &Path, result: &ExecutionResult) {
    for report in result.reports() {
        if let StepOutcome::Failed(failure) = &report.outcome {
            println!(
                "  {}✗{} {}: {}",
                RED,
                RESET,
                relative(root, &report.step.source).display(),
                failure
            );
        }
    }
}
