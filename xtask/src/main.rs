use std::process;

use anyhow::Result;
use clap::{ArgMatches, Command};

const BIN_NAME: &str = "rebatch";

fn main() -> Result<()> {
    let args = clap::command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("install").about("Install the rebatch binary locally"))
        .subcommand(
            Command::new("run")
                .about("Build and run rebatch with arguments")
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .arg(
                    clap::Arg::new("args")
                        .help("Arguments to pass to rebatch")
                        .action(clap::ArgAction::Append)
                        .num_args(0..),
                ),
        )
        .subcommand(
            Command::new("test")
                .about("Test Operations")
                .subcommand(Command::new("all").about("Run every test suite in the workspace"))
                .subcommand(Command::new("core").about("Run tests for rebatch-core"))
                .subcommand(Command::new("bin").about("Run tests for rebatch-bin"))
                .subcommand(Command::new("integration").about("Run the rename scenarios and CLI smoke checks")),
        )
        .get_matches();

    match args.subcommand() {
        Some(("install", _)) => install(),
        Some(("run", args)) => run(args),
        Some(("test", args)) => handle_test_commands(args),
        Some((command, _)) => anyhow::bail!("Unexpected command: {command}"),
        None => anyhow::bail!("Expected subcommand"),
    }
}

fn cargo(args: &[&str], failure: &str) -> Result<()> {
    let status = process::Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{failure}");
    }
    Ok(())
}

fn install() -> Result<()> {
    println!("Installing {BIN_NAME}...");
    cargo(&["install", "--path", "crates/rebatch-bin"], "Failed to install rebatch")?;
    println!("✓ {BIN_NAME} installed successfully");
    Ok(())
}

fn run(args: &ArgMatches) -> Result<()> {
    let run_args: Vec<&str> = args
        .get_many::<String>("args")
        .map_or(Vec::new(), |vals| vals.map(String::as_str).collect());

    let mut command = vec!["run", "--bin", BIN_NAME, "--"];
    command.extend(run_args);
    cargo(&command, "Failed to run rebatch")
}

fn handle_test_commands(args: &ArgMatches) -> Result<()> {
    match args.subcommand() {
        Some(("all", _)) => test_all(),
        Some(("core", _)) => test_core(),
        Some(("bin", _)) => test_bin(),
        Some(("integration", _)) => test_integration(),
        _ => {
            println!("Available test commands:");
            println!("  all          - Run every test suite in the workspace");
            println!("  core         - Run tests for rebatch-core");
            println!("  bin          - Run tests for rebatch-bin");
            println!("  integration  - Run the rename scenarios and CLI smoke checks");
            Ok(())
        }
    }
}

fn test_all() -> Result<()> {
    println!("🧪 Running all tests for rebatch...\n");

    let suites: [(&str, fn() -> Result<()>); 4] = [
        ("rebatch-core", test_core),
        ("rebatch-bin", test_bin),
        ("documentation", test_docs),
        ("integration", test_integration),
    ];

    let mut failed = Vec::new();
    for (name, suite) in suites {
        match suite() {
            Ok(()) => println!("✅ {name} tests passed\n"),
            Err(e) => {
                println!("❌ {name} tests failed: {e}\n");
                failed.push(name);
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("Test suite failed: {}", failed.join(", "));
    }
    println!("🎉 All tests passed successfully!");
    Ok(())
}

fn test_core() -> Result<()> {
    println!("🧪 Running rebatch-core tests...");
    cargo(&["test", "--package", "rebatch-core", "--lib"], "Core tests failed")
}

fn test_bin() -> Result<()> {
    println!("🧪 Running rebatch-bin tests...");
    cargo(&["test", "--package", "rebatch-bin"], "Binary tests failed")
}

fn test_docs() -> Result<()> {
    println!("📖 Running documentation tests...");
    cargo(&["test", "--doc", "--package", "rebatch-core"], "Documentation tests failed")
}

fn test_integration() -> Result<()> {
    println!("🔗 Running integration tests...");
    cargo(
        &["test", "--package", "rebatch-core", "--test", "rename_scenarios"],
        "Rename scenario tests failed",
    )?;
    cargo(&["run", "--bin", BIN_NAME, "--", "--help"], "CLI help command failed")?;
    cargo(&["run", "--bin", BIN_NAME, "--", "plan", "--help"], "CLI plan help command failed")?;
    cargo(&["run", "--bin", BIN_NAME, "--", "--version"], "CLI version command failed")
}
