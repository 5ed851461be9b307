use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RenameError, Result};
use crate::plan::{PlanStep, RenamePlan, StepPhase};

/// Cooperative cancellation, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub stop_on_first_error: bool,
    /// Replace existing targets even when the plan did not mark them.
    pub allow_overwrite: bool,
    pub cancel: Option<CancelToken>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepFailure {
    #[error("source no longer exists")]
    SourceMissing,
    #[error("target already exists")]
    TargetExists,
    #[error("target is a hard link to the source")]
    TargetIsHardLink,
    #[error("{kind}: {message}")]
    Io { kind: String, message: String },
}

impl StepFailure {
    fn from_io(e: &std::io::Error) -> Self {
        Self::Io {
            kind: format!("{:?}", e.kind()),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    StoppedAfterError,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Failed(StepFailure),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: PlanStep,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    AllApplied,
    PartiallyApplied,
    AllFailed,
    Cancelled,
}

/// What happened to every step of an executed plan, in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    reports: Vec<StepReport>,
    status: ExecutionStatus,
}

impl ExecutionResult {
    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn applied(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Applied))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Skipped(_)))
    }

    fn count(&self, predicate: impl Fn(&StepOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.outcome)).count()
    }

    /// A plan that undoes the applied steps: each one inverted, newest first.
    /// Executing it is up to the caller; nothing is rolled back on its own.
    pub fn compensation_plan(&self) -> RenamePlan {
        let steps = self
            .reports
            .iter()
            .rev()
            .filter(|report| report.outcome == StepOutcome::Applied)
            .map(|report| PlanStep {
                source: report.step.target.clone(),
                target: report.step.source.clone(),
                entry: report.step.entry.clone(),
                overwrite: false,
                phase: StepPhase::Direct,
            })
            .collect();
        RenamePlan::from_ordered_steps(steps)
    }
}

/// Apply a valid plan in its stored order. Step failures are recorded and,
/// unless `stop_on_first_error` is set, the remaining steps still run.
pub fn execute(plan: &RenamePlan, options: &ExecuteOptions) -> Result<ExecutionResult> {
    execute_with_progress(plan, options, |_| {})
}

/// Like [`execute`], calling `on_step` with each report as soon as it is recorded.
pub fn execute_with_progress(
    plan: &RenamePlan,
    options: &ExecuteOptions,
    mut on_step: impl FnMut(&StepReport),
) -> Result<ExecutionResult> {
    if !plan.is_valid() {
        return Err(RenameError::PlanNotValid(plan.status().clone()));
    }
    if plan.is_dry_run() {
        return Err(RenameError::PreviewPlan);
    }

    info!("Executing rename plan with {} step(s)", plan.len());

    let mut reports = Vec::with_capacity(plan.len());
    let mut halted: Option<SkipReason> = None;

    for step in plan.steps() {
        if halted.is_none() && options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            info!("Cancellation requested, leaving remaining steps untouched");
            halted = Some(SkipReason::Cancelled);
        }

        let outcome = match halted {
            Some(reason) => StepOutcome::Skipped(reason),
            None => match apply_step(step, options.allow_overwrite) {
                Ok(()) => {
                    info!("Renamed {:?} -> {:?}", step.source, step.target);
                    StepOutcome::Applied
                }
                Err(failure) => {
                    warn!("Failed to rename {:?} -> {:?}: {}", step.source, step.target, failure);
                    if options.stop_on_first_error {
                        halted = Some(SkipReason::StoppedAfterError);
                    }
                    StepOutcome::Failed(failure)
                }
            },
        };

        let report = StepReport {
            step: step.clone(),
            outcome,
        };
        on_step(&report);
        reports.push(report);
    }

    let applied = reports.iter().filter(|r| r.outcome == StepOutcome::Applied).count();
    let status = if halted == Some(SkipReason::Cancelled) {
        ExecutionStatus::Cancelled
    } else if applied == reports.len() {
        ExecutionStatus::AllApplied
    } else if applied == 0 {
        ExecutionStatus::AllFailed
    } else {
        ExecutionStatus::PartiallyApplied
    };

    info!(
        "Execution finished: {:?}, {} of {} step(s) applied",
        status,
        applied,
        reports.len()
    );
    Ok(ExecutionResult { reports, status })
}

fn apply_step(step: &PlanStep, allow_overwrite: bool) -> std::result::Result<(), StepFailure> {
    debug!("Applying step {:?} -> {:?}", step.source, step.target);

    match fs::symlink_metadata(&step.source) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(StepFailure::SourceMissing),
        Err(e) => return Err(StepFailure::from_io(&e)),
    }

    let case_only = differs_only_in_case(&step.source, &step.target);
    if fs::symlink_metadata(&step.target).is_ok()
        && !(case_only && is_same_entry(&step.source, &step.target))
        && !(step.overwrite || allow_overwrite)
    {
        return Err(StepFailure::TargetExists);
    }

    // Source and target share a parent, so this is a single rename(2) call.
    fs::rename(&step.source, &step.target).map_err(|e| StepFailure::from_io(&e))?;

    // rename(2) between two links to the same inode succeeds without doing anything.
    if !case_only && fs::symlink_metadata(&step.source).is_ok() {
        return Err(StepFailure::TargetIsHardLink);
    }
    Ok(())
}

fn differs_only_in_case(source: &Path, target: &Path) -> bool {
    let folded = |path: &Path| path.file_name().map(|name| name.to_string_lossy().to_lowercase());
    source.parent() == target.parent() && folded(source) == folded(target)
}

/// True when `target` resolves to the source itself, as with a case-only
/// rename on a case-insensitive filesystem.
#[cfg(unix)]
fn is_same_entry(source: &Path, target: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::symlink_metadata(source), fs::symlink_metadata(target)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_same_entry(_source: &Path, _target: &Path) -> bool {
    true
}
