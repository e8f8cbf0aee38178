//! The implementation loop behind `prd-loop run`.
//!
//! Each iteration checks its gates in a fixed order (stop request, iteration
//! ceiling, hourly budget, circuit breaker, pending work), hands the next
//! story to the agent, and then judges the result by reloading the PRD from
//! disk: only a story that the agent actually flipped to `passes = true`
//! counts as progress.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::{debug, info, instrument, warn};

use crate::core::circuit_breaker::{BreakerStatus, CircuitBreaker};
use crate::core::types::{ExitReason, FailureReason, LoopStatus};
use crate::interrupt::StopFlag;
use crate::io::agent::{AgentRequest, AgentRunner};
use crate::io::config::LoopConfig;
use crate::io::loop_state::{LoopState, load_loop_state, write_loop_state};
use crate::io::paths::PrdPaths;
use crate::io::prd_store::load_prd;
use crate::io::process::{ExecutionResult, StreamTaps};
use crate::io::prompt::PromptBuilder;
use crate::io::rate_limiter::{Clock, RateLimiter};
use crate::io::session_log::{LoopOutcome, LoopRecord, SessionLog, SessionTotals};
use crate::prd::{Prd, Story, timestamp_now};

/// How often an exhausted hourly budget is re-checked while waiting.
const RATE_LIMIT_POLL: Duration = Duration::from_secs(1);

/// What to run.
#[derive(Debug, Clone)]
pub struct LoopRequest<'a> {
    pub paths: &'a PrdPaths,
    pub config: &'a LoopConfig,
    pub prd_path: &'a Path,
    /// Continue counters from the persisted loop state.
    pub resume: bool,
}

/// Progress notifications for the caller (console output, tests).
#[derive(Debug)]
pub enum LoopEvent<'e> {
    Started {
        prd: &'e Prd,
        state: &'e LoopState,
        session_dir: &'e Path,
    },
    /// The hourly budget is spent; the loop waits for the next window.
    RateLimited { wait_secs: u64 },
    IterationStarted { loop_num: u32, story: &'e Story },
    /// Text decoded from the agent stream, as it arrives.
    AgentText(&'e str),
    IterationFinished {
        record: &'e LoopRecord,
        failure: Option<FailureReason>,
        breaker: &'e BreakerStatus,
    },
}

/// Summary of a finished loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub exit_reason: ExitReason,
    pub status: LoopStatus,
    /// Iterations started by this invocation.
    pub iterations_run: u32,
    /// Iterations started overall, including resumed runs.
    pub loop_count: u32,
    pub total_api_calls: u64,
    pub stories_completed: usize,
    pub total_stories: usize,
    pub breaker: BreakerStatus,
    pub session_dir: PathBuf,
}

impl LoopReport {
    pub fn is_complete(&self) -> bool {
        self.exit_reason == ExitReason::Complete
    }
}

/// Run the loop until the PRD is complete or a stop condition is reached.
///
/// Setup problems (unreadable or empty PRD, an active loop without
/// `resume`) are errors. Iteration failures are not: they feed the circuit
/// breaker, which ends the loop with [`ExitReason::CircuitBreaker`].
#[instrument(skip_all, fields(prd = %request.prd_path.display(), resume = request.resume))]
pub fn run_loop<A, C, F>(
    request: &LoopRequest<'_>,
    agent: &A,
    clock: C,
    stop: &StopFlag,
    mut on_event: F,
) -> Result<LoopReport>
where
    A: AgentRunner,
    C: Clock,
    F: FnMut(LoopEvent<'_>),
{
    let LoopRequest {
        paths,
        config,
        prd_path,
        resume,
    } = *request;

    let mut prd = load_prd(prd_path)?;
    if prd.user_stories.is_empty() {
        bail!("PRD {} has no user stories", prd_path.display());
    }

    let mut state = prepare_state(paths, prd_path, resume)?;
    let starting_count = state.loop_count;
    state.current_prd = prd_path.display().to_string();
    state.status = LoopStatus::Running;
    write_loop_state(&paths.state_path, &state)?;

    let mut limiter =
        RateLimiter::with_clock(&paths.rate_limit_path, config.max_calls_per_hour, clock)
            .context("open rate limiter")?;
    let mut breaker = CircuitBreaker::new(config.max_consecutive_failures);
    let prompts = PromptBuilder::new()?;

    let mut session = SessionLog::create(&paths.logs_dir, Local::now())?;
    session.save_config(config)?;
    session.save_prd_snapshot(&prd)?;
    info!(
        session = %session.session_id(),
        loop_count = state.loop_count,
        "loop started"
    );
    on_event(LoopEvent::Started {
        prd: &prd,
        state: &state,
        session_dir: session.dir(),
    });

    let exit_reason = loop {
        if stop.is_requested() {
            break ExitReason::UserInterrupt;
        }
        if state.loop_count >= config.max_iterations {
            break ExitReason::MaxIterations;
        }
        if !limiter.can_call()? {
            let wait_secs = limiter.seconds_until_reset();
            info!(wait_secs, "hourly call budget exhausted, waiting");
            on_event(LoopEvent::RateLimited { wait_secs });
            while !limiter.can_call()? {
                if !stop.sleep(RATE_LIMIT_POLL) {
                    break;
                }
            }
            continue;
        }
        if breaker.should_stop() {
            break ExitReason::CircuitBreaker;
        }
        let Some(story) = prd.next_pending_story().cloned() else {
            break ExitReason::Complete;
        };

        state.loop_count += 1;
        state.current_story_id = story.id.clone();
        let loop_num = state.loop_count;
        info!(loop_num, story_id = %story.id, "iteration started");
        on_event(LoopEvent::IterationStarted {
            loop_num,
            story: &story,
        });

        let mut loop_log = session.start_loop(loop_num, &story)?;
        let agent_request = AgentRequest {
            prompt: prompts.render(&prd, &story, prd_path)?,
            workdir: Some(paths.root.clone()),
            idle_timeout: config.idle_timeout(),
            allowed_tools: config.allowed_tools.clone(),
            model: Some(config.model.clone()),
        };
        let result = {
            let mut on_text = |text: &str| on_event(LoopEvent::AgentText(text));
            agent.invoke(
                &agent_request,
                StreamTaps {
                    raw: Some(loop_log.sink()),
                    on_text: Some(&mut on_text),
                },
            )
        };

        // Every invocation counts against the budget, whatever its outcome.
        limiter.record_call()?;
        state.total_api_calls += 1;
        if !result.session_id.is_empty() {
            state.session_id = result.session_id.clone();
        }

        let failure = judge_iteration(&result, &story, prd_path, &mut prd);
        match failure {
            Some(reason) => {
                warn!(loop_num, story_id = %story.id, reason = %reason, "iteration failed");
                breaker.record_failure(reason.to_string());
            }
            None => {
                info!(loop_num, story_id = %story.id, "story passed");
                breaker.record_success();
            }
        }

        state.consecutive_failures = breaker.consecutive_failures();
        state.last_run = Some(timestamp_now());
        write_loop_state(&paths.state_path, &state)?;

        let record = session.end_loop(
            loop_log,
            &LoopOutcome {
                success: failure.is_none(),
                story_passed: story_passes(&prd, &story.id),
                timeout: result.timeout,
                error: failure.map(|reason| reason.to_string()).unwrap_or_default(),
                api_duration: result.duration,
            },
        );
        on_event(LoopEvent::IterationFinished {
            record: &record,
            failure,
            breaker: &breaker.status(),
        });

        if prd.is_complete() {
            break ExitReason::Complete;
        }
        stop.sleep(config.iteration_pause());
    };

    state.status = exit_reason.terminal_status();
    write_loop_state(&paths.state_path, &state)?;

    let session_dir = session.dir().to_path_buf();
    let summary = session.finalize(&SessionTotals {
        exit_reason,
        total_api_calls: state.total_api_calls,
        prd: &prd,
        prd_file: prd_path,
    })?;
    info!(
        exit_reason = %exit_reason,
        status = %state.status,
        loops = summary.total_loops,
        "loop finished"
    );

    let (stories_completed, total_stories) = prd.progress();
    Ok(LoopReport {
        exit_reason,
        status: state.status,
        iterations_run: state.loop_count - starting_count,
        loop_count: state.loop_count,
        total_api_calls: state.total_api_calls,
        stories_completed,
        total_stories,
        breaker: breaker.status(),
        session_dir,
    })
}

/// Load the persisted state and decide whether this run may proceed.
fn prepare_state(paths: &PrdPaths, prd_path: &Path, resume: bool) -> Result<LoopState> {
    let persisted = load_loop_state(&paths.state_path)?;
    if resume {
        if !persisted.current_prd.is_empty() && Path::new(&persisted.current_prd) != prd_path {
            warn!(
                previous = %persisted.current_prd,
                current = %prd_path.display(),
                "resuming with a different PRD"
            );
        }
        debug!(loop_count = persisted.loop_count, "resuming loop state");
        return Ok(persisted);
    }
    if persisted.status.is_active() && persisted.loop_count > 0 {
        bail!(
            "a loop is already {} on {} after {} iterations; pass --resume to continue it or run `prd-loop reset` to start over",
            persisted.status,
            persisted.current_prd,
            persisted.loop_count
        );
    }
    Ok(LoopState::default())
}

/// Decide whether the iteration made progress on `story`.
///
/// The PRD is reloaded into `prd` after every invocation, whatever its
/// outcome, so the next selection sees what the agent left on disk. A PRD
/// that no longer loads leaves `prd` untouched. Timeouts and non-zero exits
/// are failures even when the story was flipped.
fn judge_iteration(
    result: &ExecutionResult,
    story: &Story,
    prd_path: &Path,
    prd: &mut Prd,
) -> Option<FailureReason> {
    let reloaded = match load_prd(prd_path) {
        Ok(reloaded) => {
            *prd = reloaded;
            true
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "PRD failed to reload after agent run");
            false
        }
    };
    if result.timeout {
        return Some(FailureReason::Timeout);
    }
    if !result.success {
        return Some(FailureReason::ExitCode(result.exit_code));
    }
    if !reloaded {
        return Some(FailureReason::InvalidPrd);
    }
    if story_passes(prd, &story.id) {
        None
    } else {
        Some(FailureReason::NoProgress)
    }
}

fn story_passes(prd: &Prd, story_id: &str) -> bool {
    prd.find_story(story_id).is_some_and(|story| story.passes)
}
