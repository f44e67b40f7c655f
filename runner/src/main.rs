//! Worker entry point.
//!
//! Runs one bounded batch, or repeats batches in watch mode until the
//! completion signal arrives or the process is interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use tracing::info;

use issue_runner::exit_codes;
use issue_runner::io::agent::{AgentKind, CommandAgent};
use issue_runner::io::config::load_config;
use issue_runner::io::github::GhTracker;
use issue_runner::io::identity::new_worker_id;
use issue_runner::io::local::LocalTracker;
use issue_runner::io::sleep::{CancelToken, ThreadSleeper};
use issue_runner::io::tracker::Tracker;
use issue_runner::iteration::IterationDriver;
use issue_runner::logging;
use issue_runner::looping::{BatchStop, run_batch, run_watch};

const STATE_DIR: &str = ".issue-runner";

/// Where work items come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    /// GitHub issues through the `gh` CLI.
    Github,
    /// A local JSON issues file.
    Local,
}

#[derive(Parser, Debug)]
#[command(
    name = "issue-runner",
    version,
    about = "Coordinate coding-agent workers over a shared issue tracker"
)]
struct Cli {
    /// Coding-agent tool to invoke for each claimed item.
    #[arg(long, value_enum, default_value_t = AgentKind::Claude)]
    agent: AgentKind,

    /// Work source.
    #[arg(long, value_enum, default_value_t = Source::Github)]
    source: Source,

    /// Issues file for `--source local` (default: .issue-runner/issues.json).
    #[arg(long, value_name = "PATH")]
    issues_file: Option<PathBuf>,

    /// Repository for `--source github` (default: the current checkout).
    #[arg(long, value_name = "OWNER/NAME")]
    repo: Option<String>,

    /// Config file (default: .issue-runner/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keep polling for work after each batch until interrupted.
    #[arg(long)]
    watch: bool,

    /// Idle poll interval in watch mode.
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    poll_interval: u32,

    /// Maximum iterations per batch.
    #[arg(
        value_name = "MAX_ITERATIONS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_iterations: u32,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::OK,
                _ => exit_codes::INVALID,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    logging::init();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let state_dir = workdir.join(STATE_DIR);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| state_dir.join("config.toml"));
    let cfg = load_config(&config_path)?;

    let tracker: Box<dyn Tracker> = match cli.source {
        Source::Github => Box::new(GhTracker::new(&workdir, cli.repo.clone())),
        Source::Local => {
            let path = cli
                .issues_file
                .clone()
                .unwrap_or_else(|| state_dir.join("issues.json"));
            let tracker = LocalTracker::new(path);
            tracker.load()?;
            Box::new(tracker)
        }
    };
    let agent = CommandAgent::new(cli.agent, cfg.agent.command.as_deref());
    let sleeper = ThreadSleeper;
    let worker = new_worker_id();
    info!(%worker, agent = ?cli.agent, source = ?cli.source, "worker started");

    let driver = IterationDriver::new(tracker.as_ref(), &agent, &sleeper, &cfg, &worker, &workdir);
    let cancel = CancelToken::new();

    if cli.watch {
        let handler = cancel.clone();
        ctrlc::set_handler(move || handler.cancel()).context("install interrupt handler")?;
        let outcome = run_watch(
            &driver,
            cli.max_iterations,
            Duration::from_secs(u64::from(cli.poll_interval)),
            &cancel,
        )?;
        println!(
            "watch stopped after {} batch(es): {:?}",
            outcome.batches, outcome.stop
        );
        return Ok(exit_codes::OK);
    }

    let outcome = run_batch(&driver, 1, cli.max_iterations, &cancel)?;
    println!(
        "batch finished after {} iteration(s): {:?}",
        outcome.state.iterations_run, outcome.stop
    );
    Ok(match outcome.stop {
        BatchStop::Terminated | BatchStop::NoWork | BatchStop::Cancelled => exit_codes::OK,
        BatchStop::IterationLimit => exit_codes::ITERATION_LIMIT,
    })
}
