use std::fs;
use std::path::Path;

use rebatch_core::{
    build_plan, execute, plan_directory, preview_directory, rename_directory, CaseMode, CollisionKind, ExecuteOptions,
    ExecutionStatus, NumberPosition, Pattern, PlanOptions, PlanStatus, RenameRequest, StepFailure, StepOutcome,
    TransformRule, TreeWalker, WalkOptions,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// ```text
/// tmp/
///   a.pdf
///   b.pdf
///   c.txt
///   Thesis/
///     Chapter One/
///       Intro.tex
///     Notes.tex
/// ```
fn setup_test_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    fs::write(root.join("a.pdf"), "a").unwrap();
    fs::write(root.join("b.pdf"), "b").unwrap();
    fs::write(root.join("c.txt"), "c").unwrap();
    fs::create_dir_all(root.join("Thesis/Chapter One")).unwrap();
    fs::write(root.join("Thesis/Chapter One/Intro.tex"), "intro").unwrap();
    fs::write(root.join("Thesis/Notes.tex"), "notes").unwrap();

    dir
}

fn case_sensitive() -> PlanOptions {
    PlanOptions {
        case_insensitive: false,
        ..PlanOptions::default()
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_prefix_pdfs_only() {
    let dir = setup_test_dir();
    let mut request = RenameRequest::new(dir.path(), vec![TransformRule::prefix("doc_")]);
    request.pattern = Pattern::glob("*.pdf").unwrap();
    request.plan = case_sensitive();

    let preview = preview_directory(&request).unwrap();
    assert!(preview.plan.is_valid());
    assert!(preview.plan.is_dry_run());
    let steps: Vec<(&str, String)> = preview
        .plan
        .steps()
        .iter()
        .map(|s| (s.entry.name.as_str(), s.target.file_name().unwrap().to_string_lossy().into_owned()))
        .collect();
    assert_eq!(steps, vec![("a.pdf", "doc_a.pdf".to_string()), ("b.pdf", "doc_b.pdf".to_string())]);
    assert!(dir.path().join("a.pdf").exists());

    let outcome = rename_directory(&request, &ExecuteOptions::default()).unwrap();
    assert_eq!(outcome.execution.unwrap().status(), ExecutionStatus::AllApplied);
    assert_eq!(file_names(dir.path()), vec!["Thesis", "c.txt", "doc_a.pdf", "doc_b.pdf"]);
}

#[test]
fn test_lowercase_then_number() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Beta.TXT"), "b").unwrap();
    fs::write(dir.path().join("Alpha.txt"), "a").unwrap();

    let mut request = RenameRequest::new(
        dir.path(),
        vec![
            TransformRule::case(CaseMode::Lower),
            TransformRule::sequence(1, 3, NumberPosition::Prefix),
        ],
    );
    request.plan = case_sensitive();

    let outcome = rename_directory(&request, &ExecuteOptions::default()).unwrap();
    assert_eq!(outcome.execution.unwrap().status(), ExecutionStatus::AllApplied);
    assert_eq!(file_names(dir.path()), vec!["001_alpha.txt", "002_beta.TXT"]);
}

#[test]
fn test_existing_target_blocks_plan() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("report.txt"), "draft").unwrap();
    fs::write(dir.path().join("report_final.txt"), "final").unwrap();

    let mut request = RenameRequest::new(dir.path(), vec![TransformRule::suffix("_final")]);
    request.pattern = Pattern::glob("report.txt").unwrap();
    request.plan = case_sensitive();

    let outcome = rename_directory(&request, &ExecuteOptions::default()).unwrap();
    assert!(outcome.execution.is_none());
    match outcome.plan.status() {
        PlanStatus::InvalidCollisions(collisions) => {
            assert_eq!(collisions[0].kind, CollisionKind::ExistingEntry);
        }
        other => panic!("Expected collisions, got {:?}", other),
    }
    assert_eq!(fs::read_to_string(dir.path().join("report_final.txt")).unwrap(), "final");
}

#[test]
fn test_nested_directories_and_files_renamed_together() {
    let dir = setup_test_dir();
    let mut request = RenameRequest::new(dir.path(), vec![TransformRule::case(CaseMode::Snake)]);
    request.walk = WalkOptions {
        recursive: true,
        include_dirs: true,
        ..WalkOptions::default()
    };
    request.pattern = Pattern::regex(r"^[A-Z]").unwrap();
    request.plan = case_sensitive();

    let outcome = rename_directory(&request, &ExecuteOptions::default()).unwrap();
    let execution = outcome.execution.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::AllApplied);

    // Every directory step comes after the steps for entries beneath it.
    let steps = outcome.plan.steps();
    for (i, step) in steps.iter().enumerate() {
        if step.entry.is_dir() {
            assert!(steps[i + 1..].iter().all(|later| !later.source.starts_with(&step.source)));
        }
    }

    assert!(dir.path().join("thesis/chapter_one/intro.tex").exists());
    assert!(dir.path().join("thesis/notes.tex").exists());
}

#[test]
fn test_partial_failure_is_transparent() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["one.md", "two.md", "three.md"] {
        fs::write(dir.path().join(name), name).unwrap();
    }
    let entries = TreeWalker::new(dir.path(), WalkOptions::default()).collect().unwrap().entries;
    let plan = build_plan(entries, &[TransformRule::case(CaseMode::Upper)], &case_sensitive()).unwrap();

    // Walker order is one.md, three.md, two.md; break the middle step.
    fs::remove_file(dir.path().join("three.md")).unwrap();
    let result = execute(&plan, &ExecuteOptions::default()).unwrap();

    assert_eq!(result.status(), ExecutionStatus::PartiallyApplied);
    assert_eq!(result.reports()[0].outcome, StepOutcome::Applied);
    assert_eq!(result.reports()[1].outcome, StepOutcome::Failed(StepFailure::SourceMissing));
    assert_eq!(result.reports()[2].outcome, StepOutcome::Applied);
    assert_eq!(file_names(dir.path()), vec!["ONE.md", "TWO.md"]);
}

#[test]
fn test_plans_are_reproducible() {
    let dir = setup_test_dir();
    let mut request = RenameRequest::new(
        dir.path(),
        vec![
            TransformRule::replace(" ", "-"),
            TransformRule::sequence(7, 2, NumberPosition::Suffix),
        ],
    );
    request.walk = WalkOptions {
        recursive: true,
        include_dirs: true,
        threads: 3,
        ..WalkOptions::default()
    };
    request.plan = case_sensitive();

    let first = serde_json::to_string(&preview_directory(&request).unwrap().plan).unwrap();
    let second = serde_json::to_string(&preview_directory(&request).unwrap().plan).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_invalid_rule_touches_nothing() {
    let dir = setup_test_dir();
    let request = RenameRequest::new(dir.path(), vec![TransformRule::regex_replace("(", "")]);

    let result = rename_directory(&request, &ExecuteOptions::default());
    assert!(result.is_err_and(|e| e.is_configuration()));
    assert_eq!(file_names(dir.path()), vec!["Thesis", "a.pdf", "b.pdf", "c.txt"]);
}

#[test]
fn test_sequence_overflow_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "a").unwrap();
    fs::write(dir.path().join("b.txt"), "b").unwrap();

    let request = RenameRequest::new(dir.path(), vec![TransformRule::sequence(u64::MAX, 1, NumberPosition::Prefix)]);
    let result = preview_directory(&request);
    assert!(result.is_err_and(|e| e.is_configuration()));
    assert_eq!(file_names(dir.path()), vec!["a.txt", "b.txt"]);
}

#[test]
fn test_swap_names_through_staging() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("1.txt"), "first").unwrap();
    fs::write(dir.path().join("2.txt"), "second").unwrap();

    let mut request = RenameRequest::new(dir.path(), vec![TransformRule::regex_replace(r"^1\.", "x.")]);
    request.rules.push(TransformRule::regex_replace(r"^2\.", "1."));
    request.rules.push(TransformRule::regex_replace(r"^x\.", "2."));
    request.plan = case_sensitive();

    let outcome = rename_directory(&request, &ExecuteOptions::default()).unwrap();
    assert_eq!(outcome.plan.len(), 3);
    assert_eq!(outcome.execution.unwrap().status(), ExecutionStatus::AllApplied);
    assert_eq!(fs::read_to_string(dir.path().join("1.txt")).unwrap(), "second");
    assert_eq!(fs::read_to_string(dir.path().join("2.txt")).unwrap(), "first");
    assert_eq!(file_names(dir.path()), vec!["1.txt", "2.txt"]);
}

#[test]
fn test_compensation_plan_undoes_a_run() {
    let dir = setup_test_dir();
    let mut request = RenameRequest::new(dir.path(), vec![TransformRule::move_article(), TransformRule::Sanitize]);
    request.walk = WalkOptions {
        recursive: true,
        include_dirs: true,
        ..WalkOptions::default()
    };
    request.rules.insert(0, TransformRule::replace("Chapter One", "The Chapter!"));
    request.plan = case_sensitive();

    let outcome = plan_directory(&request).unwrap();
    assert!(!outcome.plan.is_dry_run());
    assert!(outcome.execution.is_none());

    let result = execute(&outcome.plan, &ExecuteOptions::default()).unwrap();
    assert_eq!(result.status(), ExecutionStatus::AllApplied);
    assert!(dir.path().join("Thesis/Chapter, The").is_dir());

    let undo = result.compensation_plan();
    assert!(undo.is_valid());
    let undone = execute(&undo, &ExecuteOptions::default()).unwrap();
    assert_eq!(undone.status(), ExecutionStatus::AllApplied);
    assert!(dir.path().join("Thesis/Chapter One/Intro.tex").exists());
}
