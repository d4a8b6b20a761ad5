//! # expub
//!
//! **expub** publishes an exercise folder to GitHub.
//!
//! Run it from the exercise folder; the folder name is the repository name.
//! - `expub publish [OWNER]` creates or updates the repository, protects the
//!   default branch, files the tracking issue, grants teams, then syncs
//!   every branch folder
//! - `expub sync [OWNER]` only syncs the branch folders into an existing
//!   repository
//! - `expub instructions` explains how to provide a GitHub token
//!
//! This CLI is built with [clap](https://docs.rs/clap).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use expub::{
    ConfigError, Overrides, Settings, SyncMode, cmd_instructions, cmd_publish, cmd_sync,
    read_token,
};
use std::env;
use std::process::ExitCode;

/// Command-line interface definition.
#[derive(Parser, Debug)]
#[command(
    name = "expub",
    version,
    about = "expub - publish exercise folders as GitHub branches",
    arg_required_else_help = true
)]
struct Cli {
    /// More log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create or update the repository, then sync every branch folder
    Publish(RunArgs),
    /// Sync the branch folders into an existing repository
    Sync(RunArgs),
    /// Explain how to set up a GitHub access token
    Instructions,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Organization or user owning the repository
    owner: Option<String>,
    /// Make the repository private
    #[arg(long, conflicts_with = "public")]
    private: bool,
    /// Make the repository public
    #[arg(long)]
    public: bool,
    /// Commit message; `{branch}` is replaced by the branch name
    #[arg(short, long)]
    message: Option<String>,
    /// Whether files deleted locally are kept on the branch
    #[arg(long, value_enum)]
    mode: Option<SyncMode>,
    /// Sync against an in-memory repository and print the resulting trees
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    fn overrides(self) -> Overrides {
        let private = match (self.private, self.public) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Overrides {
            owner: self.owner,
            private,
            message: self.message,
            mode: self.mode,
            dry_run: self.dry_run,
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn settings(args: RunArgs) -> Result<Settings> {
    let root = env::current_dir().context("cannot determine the current directory")?;
    Ok(Settings::resolve(&root, args.overrides(), read_token())?)
}

fn run(cmd: Cmd) -> Result<()> {
    match cmd {
        Cmd::Publish(args) => cmd_publish(&settings(args)?),
        Cmd::Sync(args) => cmd_sync(&settings(args)?),
        Cmd::Instructions => cmd_instructions(),
    }
}

/// CLI entry point.
///
/// Exits non-zero when the command fails; a missing token also prints the
/// setup instructions.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(ConfigError::MissingCredential) = e.downcast_ref::<ConfigError>() {
                let _ = cmd_instructions();
                eprintln!();
            }
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
