//! `prd-loop`: drive a coding agent through the user stories of a PRD.
//!
//! Project files live in `.prd/` (config, loop state, hourly call window,
//! PRDs and session logs). The loop resumes from `.prd/state.json`, so an
//! interrupted run can be continued with `prd-loop run --resume`.

use std::env;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use prd_loop::core::types::LoopStatus;
use prd_loop::exit_codes;
use prd_loop::interrupt::StopFlag;
use prd_loop::io::agent::ClaudeAgent;
use prd_loop::io::paths::init_project;
use prd_loop::io::rate_limiter::SystemClock;
use prd_loop::logging;
use prd_loop::looping::{LoopEvent, LoopReport, LoopRequest, run_loop};
use prd_loop::start::{RunOverrides, ensure_agent_installed, locate_project, prepare_run};
use prd_loop::status::{StatusReport, collect_status, reset_state};

#[derive(Parser)]
#[command(
    name = "prd-loop",
    version,
    about = "Drive a coding agent through the user stories of a PRD"
)]
struct Cli {
    /// Log loop diagnostics to stderr (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.prd/` (specs, prds, logs and a default config.toml) here.
    Init,
    /// Implement pending stories until the PRD is complete or the loop stops.
    Run(RunArgs),
    /// Show loop state, hourly call budget and PRD progress.
    Status,
    /// Reset loop state so a fresh run can start.
    Reset,
}

#[derive(Args)]
struct RunArgs {
    /// PRD file: a path, or a file name inside `.prd/prds/`. Defaults to the
    /// most recently modified PRD.
    #[arg(long)]
    prd: Option<PathBuf>,

    /// Stop after this many iterations (counted across resumed runs).
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Kill the agent after this many minutes without output.
    #[arg(long, value_name = "MINUTES")]
    timeout: Option<u64>,

    /// Model passed to the agent (e.g. sonnet, opus).
    #[arg(long)]
    model: Option<String>,

    /// Consecutive failed iterations before giving up.
    #[arg(long)]
    no_progress_threshold: Option<u32>,

    /// Continue the previous loop's counters instead of starting fresh.
    #[arg(long)]
    resume: bool,
}

impl RunArgs {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            max_iterations: self.max_iterations,
            timeout_minutes: self.timeout,
            model: self.model.clone(),
            no_progress_threshold: self.no_progress_threshold,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INCOMPLETE);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cwd = env::current_dir().context("read current directory")?;
    match cli.command {
        Command::Init => {
            let paths = init_project(&cwd)?;
            println!("Initialized {}", paths.prd_dir.display());
            println!("Put PRD files in {}", paths.prds_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Run(args) => cmd_run(&cwd, &args),
        Command::Status => {
            let paths = locate_project(&cwd)?;
            print_status(&collect_status(&paths, SystemClock)?);
            Ok(exit_codes::OK)
        }
        Command::Reset => {
            let paths = locate_project(&cwd)?;
            reset_state(&paths)?;
            println!("Loop state reset ({})", paths.state_path.display());
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(cwd: &std::path::Path, args: &RunArgs) -> Result<i32> {
    let prepared = prepare_run(cwd, args.prd.as_deref(), &args.overrides())?;
    let agent = ClaudeAgent::new(prepared.config.agent.program.clone());
    if prepared.pending_stories > 0 {
        ensure_agent_installed(&agent)?;
    }

    let stop = StopFlag::new();
    stop.install_handler()?;

    let report = run_loop(
        &LoopRequest {
            paths: &prepared.paths,
            config: &prepared.config,
            prd_path: &prepared.prd_path,
            resume: args.resume,
        },
        &agent,
        SystemClock,
        &stop,
        print_event,
    )?;
    print_report(&report);

    Ok(if report.is_complete() {
        exit_codes::OK
    } else {
        exit_codes::INCOMPLETE
    })
}

fn print_event(event: LoopEvent<'_>) {
    match event {
        LoopEvent::Started {
            prd,
            state,
            session_dir,
        } => {
            let (completed, total) = prd.progress();
            println!("Project: {}", prd.project);
            println!("Stories: {completed}/{total} complete");
            if state.loop_count > 0 {
                println!("Resuming at loop #{}", state.loop_count + 1);
            }
            println!("Session log: {}", session_dir.display());
        }
        LoopEvent::RateLimited { wait_secs } => {
            println!(
                "Hourly call limit reached; waiting {:02}:{:02} for the next window (Ctrl+C to stop)",
                wait_secs / 60,
                wait_secs % 60
            );
        }
        LoopEvent::IterationStarted { loop_num, story } => {
            println!();
            println!("=== Loop #{loop_num}: {} - {} ===", story.id, story.title);
        }
        LoopEvent::AgentText(text) => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        LoopEvent::IterationFinished {
            record,
            failure,
            breaker,
        } => {
            println!();
            match failure {
                None => println!(
                    "Loop #{} passed {} in {:.0}s",
                    record.loop_num, record.story_id, record.duration_seconds
                ),
                Some(reason) => println!(
                    "Loop #{} failed: {reason} ({}/{} consecutive failures)",
                    record.loop_num, breaker.consecutive_failures, breaker.max_failures
                ),
            }
        }
    }
}

fn print_report(report: &LoopReport) {
    println!();
    println!(
        "Loop finished: {} (status {})",
        report.exit_reason, report.status
    );
    println!(
        "Stories: {}/{} complete, {} iterations this run, {} agent calls total",
        report.stories_completed,
        report.total_stories,
        report.iterations_run,
        report.total_api_calls
    );
    if report.breaker.should_stop {
        println!("{}", report.breaker.reason);
    }
    if report.status == LoopStatus::Paused {
        println!("Continue with: prd-loop run --resume");
    }
    println!("Session log: {}", report.session_dir.display());
}

fn print_status(report: &StatusReport) {
    let state = &report.state;
    println!("Status: {}", state.status);
    if !state.current_prd.is_empty() {
        println!("Current PRD: {}", state.current_prd);
    }
    if !state.current_story_id.is_empty() {
        println!("Current story: {}", state.current_story_id);
    }
    println!("Loops: {}", state.loop_count);
    println!("Agent calls: {}", state.total_api_calls);
    println!("Consecutive failures: {}", state.consecutive_failures);
    if let Some(last_run) = &state.last_run {
        println!("Last run: {last_run}");
    }
    if !state.session_id.is_empty() {
        println!("Agent session: {}", state.session_id);
    }

    let rate = &report.rate_limit;
    println!(
        "Hourly calls: {}/{} used ({} remaining)",
        rate.call_count, rate.max_calls, rate.remaining
    );
    if rate.wait_seconds > 0 {
        println!("Next window in {}s", rate.wait_seconds);
    }

    match &report.prd {
        Some(prd) => {
            println!("PRD: {} ({})", prd.project, prd.path.display());
            println!("Stories: {}/{} complete", prd.completed, prd.total);
            if let Some((id, title)) = &prd.next_story {
                println!("Next story: {id} - {title}");
            }
        }
        None => println!("PRD: none found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "prd-loop",
            "run",
            "--prd",
            "auth.json",
            "--max-iterations",
            "7",
            "--timeout",
            "5",
            "--model",
            "opus",
            "--no-progress-threshold",
            "2",
            "--resume",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.prd.as_deref(), Some(std::path::Path::new("auth.json")));
        assert!(args.resume);
        assert_eq!(
            args.overrides(),
            RunOverrides {
                max_iterations: Some(7),
                timeout_minutes: Some(5),
                model: Some("opus".to_string()),
                no_progress_threshold: Some(2),
            }
        );
    }

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["prd-loop", "run"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(!args.resume);
        assert_eq!(args.overrides(), RunOverrides::default());
    }

    #[test]
    fn parse_global_verbose_after_subcommand() {
        let cli = Cli::parse_from(["prd-loop", "status", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Status));
    }
}
