mod cli;
mod preview;

use anyhow::Result;
use cli::{Cli, Commands, RenameArgs};
use rebatch_core::{
    execute, plan_directory, preview_directory, ExecuteOptions, ExecutionResult, ExecutionStatus, Pattern,
    PatternMode, PlanOptions, RenameOutcome, RenamePlan, RenameRequest, WalkOptions, WalkWarning,
};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    setup_logging(&cli)?;

    info!("Starting rebatch");

    match cli.command {
        Commands::Plan { args } => handle_plan_command(args)?,
        Commands::Apply {
            args,
            stop_on_error,
            interactive,
        } => handle_apply_command(args, stop_on_error, interactive)?,
    }

    info!("Rebatch completed successfully");
    Ok(())
}

fn build_request(args: &RenameArgs) -> Result<RenameRequest> {
    if !args.root.exists() {
        anyhow::bail!("Root directory does not exist: {:?}", args.root);
    }

    if !args.root.is_dir() {
        anyhow::bail!("Root must be a directory: {:?}", args.root);
    }

    let pattern = match (&args.glob, &args.regex) {
        (Some(glob), _) => Pattern::new(glob, PatternMode::Glob, args.ignore_case)?,
        (None, Some(regex)) => Pattern::new(regex, PatternMode::Regex, args.ignore_case)?,
        (None, None) => Pattern::everything(),
    };

    let mut plan = PlanOptions {
        overwrite_existing: args.overwrite,
        ..PlanOptions::default()
    };
    if args.case_insensitive {
        plan.case_insensitive = true;
    } else if args.case_sensitive {
        plan.case_insensitive = false;
    }

    let request = RenameRequest {
        root: args.root.clone(),
        pattern,
        walk: WalkOptions {
            recursive: args.recursive,
            include_files: !args.no_files,
            include_dirs: args.dirs,
            follow_symlinks: args.follow_symlinks,
            threads: args.threads.max(1),
        },
        rules: args.transform_rules(),
        plan,
    };

    info!("Root directory: {:?}", request.root);
    info!("Rules: {:?}", request.rules);
    info!("Recursive: {}", request.walk.recursive);
    Ok(request)
}

fn handle_plan_command(args: RenameArgs) -> Result<()> {
    let request = build_request(&args)?;

    warn!("Plan mode - no changes will be made");

    let outcome = preview_directory(&request)?;
    preview::show_plan(&request.root, &outcome.plan)?;
    write_report(args.report.as_deref(), &outcome)?;

    if !outcome.plan.is_valid() {
        anyhow::bail!("Plan is {}", outcome.plan.status());
    }

    println!("\nPlanning complete!");
    println!("  Renames planned: {}", outcome.plan.len());
    println!("  Walk warnings: {}", outcome.warnings.len());

    Ok(())
}

fn handle_apply_command(args: RenameArgs, stop_on_error: bool, interactive: bool) -> Result<()> {
    let request = build_request(&args)?;

    info!("Interactive mode: {}", interactive);

    let mut outcome = plan_directory(&request)?;

    if !outcome.plan.is_valid() {
        preview::show_plan(&request.root, &outcome.plan)?;
        write_report(args.report.as_deref(), &outcome)?;
        anyhow::bail!("Plan is {}, nothing was renamed", outcome.plan.status());
    }

    if interactive {
        preview::show_plan(&request.root, &outcome.plan)?;
        if !preview::confirm_plan(&outcome.plan)? {
            println!("Aborted, nothing was renamed.");
            return Ok(());
        }
    }

    let options = ExecuteOptions {
        stop_on_first_error: stop_on_error,
        allow_overwrite: args.overwrite,
        cancel: None,
    };
    let result = execute(&outcome.plan, &options)?;
    print_summary(&request.root, &result);
    let status = result.status();
    outcome.execution = Some(result);
    write_report(args.report.as_deref(), &outcome)?;

    if status != ExecutionStatus::AllApplied {
        anyhow::bail!("Renaming finished with status {:?}", status);
    }

    Ok(())
}

fn print_summary(root: &Path, result: &ExecutionResult) {
    preview::show_failures(root, result);

    println!("\nRenaming complete!");
    println!("  Renamed: {}", result.applied());
    println!("  Failed: {}", result.failed());
    println!("  Skipped: {}", result.skipped());
}

/// The `--report` document.
#[derive(Serialize)]
struct Report<'a> {
    plan: &'a RenamePlan,
    warnings: &'a [WalkWarning],
    execution: Option<&'a ExecutionResult>,
}

impl<'a> From<&'a RenameOutcome> for Report<'a> {
    fn from(outcome: &'a RenameOutcome) -> Self {
        Self {
            plan: &outcome.plan,
            warnings: &outcome.warnings,
            execution: outcome.execution.as_ref(),
        }
    }
}

fn render_report(outcome: &RenameOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(&Report::from(outcome))?)
}

fn write_report(path: Option<&Path>, outcome: &RenameOutcome) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    fs::write(path, render_report(outcome)?)?;
    info!("Report written to {:?}", path);

    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .with(filter)
        .init();

    Ok(())
}
