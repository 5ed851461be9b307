use std::path::{Path, PathBuf};

use tracing::info;

pub mod error;
pub mod execute;
pub mod pattern;
pub mod plan;
pub mod transform;
pub mod walker;

pub use error::{RenameError, Result};
pub use execute::{
    execute, execute_with_progress, CancelToken, ExecuteOptions, ExecutionResult, ExecutionStatus, SkipReason,
    StepFailure, StepOutcome, StepReport,
};
pub use pattern::{Pattern, PatternMode};
pub use plan::{build_plan, Collision, CollisionKind, PlanOptions, PlanStatus, PlanStep, RenamePlan, StepPhase};
pub use transform::{apply, CaseMode, NameContext, NumberPosition, TransformRule, Transformer};
pub use walker::{walk, Entry, EntryKind, TreeWalker, Walk, WalkOptions, WalkOutput, WalkWarning};

/// Everything needed to rename one tree.
#[derive(Debug, Clone)]
pub struct RenameRequest {
    pub root: PathBuf,
    pub pattern: Pattern,
    pub walk: WalkOptions,
    pub rules: Vec<TransformRule>,
    pub plan: PlanOptions,
}

impl RenameRequest {
    pub fn new(root: impl AsRef<Path>, rules: Vec<TransformRule>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pattern: Pattern::everything(),
            walk: WalkOptions::default(),
            rules,
            plan: PlanOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct RenameOutcome {
    pub plan: RenamePlan,
    pub warnings: Vec<WalkWarning>,
    /// `None` when nothing was executed: a preview, or a plan that did not validate.
    pub execution: Option<ExecutionResult>,
}

/// Walk and plan without touching the tree. The returned plan is a dry run and cannot be executed.
pub fn preview_directory(request: &RenameRequest) -> Result<RenameOutcome> {
    info!("Previewing renames under {:?}", request.root);
    let (plan, warnings) = walk_and_plan(request, true)?;
    Ok(RenameOutcome {
        plan,
        warnings,
        execution: None,
    })
}

/// Walk and plan, leaving execution to the caller (for example after a confirmation prompt).
pub fn plan_directory(request: &RenameRequest) -> Result<RenameOutcome> {
    info!("Planning renames under {:?}", request.root);
    let (plan, warnings) = walk_and_plan(request, false)?;
    Ok(RenameOutcome {
        plan,
        warnings,
        execution: None,
    })
}

/// Walk, plan and, when the plan validates, execute it.
pub fn rename_directory(request: &RenameRequest, options: &ExecuteOptions) -> Result<RenameOutcome> {
    info!("Renaming entries under {:?}", request.root);
    let (plan, warnings) = walk_and_plan(request, false)?;
    let execution = if plan.is_valid() {
        Some(execute(&plan, options)?)
    } else {
        info!("Plan is {}, nothing executed", plan.status());
        None
    };
    Ok(RenameOutcome {
        plan,
        warnings,
        execution,
    })
}

fn walk_and_plan(request: &RenameRequest, dry_run: bool) -> Result<(RenamePlan, Vec<WalkWarning>)> {
    // Compile the rule chain before reading the tree.
    Transformer::new(&request.rules)?;

    let output = TreeWalker::new(&request.root, request.walk.clone())
        .with_pattern(request.pattern.clone())
        .collect()?;
    info!(
        "Walk complete: {} candidate(s), {} warning(s)",
        output.entries.len(),
        output.warnings.len()
    );

    let options = PlanOptions {
        recursive: request.walk.recursive,
        dry_run,
        ..request.plan.clone()
    };
    let plan = build_plan(output.entries, &request.rules, &options)?;
    Ok((plan, output.warnings))
}
