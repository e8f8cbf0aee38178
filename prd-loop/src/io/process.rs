//! Monitored execution of a child process that streams line-delimited events.
//!
//! Stdout and stderr are drained on reader threads that forward each line to
//! a channel, so the two pipes form one combined stream. The monitoring loop
//! waits on that channel with a short poll interval and tracks when the last
//! line arrived. A child that stays silent for longer than the idle timeout is
//! killed along with its process group. The call ends when the child exits,
//! even if something it left in the background still holds the pipes. Total
//! runtime is not bounded: a process that keeps producing output may run
//! indefinitely.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::events::{decode_line, extract_session_id, session_id_of};
use crate::core::types::TimeoutReason;

/// Exit code reported when the process did not exit on its own.
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    /// Kill the process after this long without any output line.
    pub idle_timeout: Duration,
    /// How often the idle timer is checked while no output arrives.
    pub poll_interval: Duration,
}

impl MonitorOptions {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Optional consumers of the stream while it is being read.
#[derive(Default)]
pub struct StreamTaps<'a> {
    /// Receives every raw line exactly as read, for audit logs.
    pub raw: Option<&'a mut dyn Write>,
    /// Receives rendered text as soon as it is decoded.
    pub on_text: Option<&'a mut dyn FnMut(&str)>,
}

/// Outcome of one monitored invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    /// Text extracted from the event stream (or an error description when
    /// the process could not be started).
    pub output: String,
    pub session_id: String,
    pub duration: Duration,
    pub exit_code: i32,
    pub timeout: bool,
    pub timeout_reason: Option<TimeoutReason>,
}

impl ExecutionResult {
    /// A call that never got a running process.
    pub fn failed_to_start(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output: message.into(),
            session_id: String::new(),
            duration,
            exit_code: SYNTHETIC_EXIT_CODE,
            timeout: false,
            timeout_reason: None,
        }
    }
}

enum StreamMsg {
    Line(Vec<u8>),
    ReadError(String),
    Closed,
}

/// Accumulates decoded text and the events that carry a session id.
#[derive(Debug, Default)]
struct Transcript {
    text: String,
    session_events: Vec<Value>,
}

impl Transcript {
    fn push_line(&mut self, line: &str, on_text: &mut Option<&mut dyn FnMut(&str)>) {
        let Some(decoded) = decode_line(line) else {
            return;
        };
        if let Some(value) = decoded.value {
            if session_id_of(&value).is_some() {
                self.session_events.push(value);
            }
        }
        if let Some(rendered) = decoded.event.render() {
            if let Some(callback) = on_text.as_mut() {
                callback(&rendered);
            }
            self.text.push_str(&rendered);
        }
    }
}

/// Run `cmd` to completion or idle timeout, decoding its output stream.
///
/// Never returns an error: spawn failures (including a missing executable)
/// are reported as failed results with a descriptive `output`.
#[instrument(skip_all, fields(idle_timeout_secs = options.idle_timeout.as_secs()))]
pub fn run_monitored(
    mut cmd: Command,
    options: &MonitorOptions,
    taps: StreamTaps<'_>,
) -> ExecutionResult {
    let start = Instant::now();
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!(program = %program, "spawning agent process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            error!(program = %program, "agent executable not found");
            return ExecutionResult::failed_to_start(
                format!("Error: '{program}' command not found. Is it installed and on PATH?"),
                start.elapsed(),
            );
        }
        Err(err) => {
            error!(program = %program, err = %err, "failed to spawn agent");
            return ExecutionResult::failed_to_start(
                format!("Error executing '{program}': {err}"),
                start.elapsed(),
            );
        }
    };

    let (tx, rx) = mpsc::channel();
    let mut open_streams = 0usize;
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, tx.clone());
        open_streams += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, tx.clone());
        open_streams += 1;
    }
    drop(tx);

    let StreamTaps { mut raw, mut on_text } = taps;
    let mut transcript = Transcript::default();
    let mut handle_line = |bytes: &[u8]| {
        if let Some(sink) = raw.as_mut() {
            tee_line(&mut **sink, bytes);
        }
        transcript.push_line(&String::from_utf8_lossy(bytes), &mut on_text);
    };
    let mut last_activity = Instant::now();
    let mut timed_out = false;
    let mut exited = None;

    while open_streams > 0 {
        match rx.recv_timeout(options.poll_interval) {
            Ok(StreamMsg::Line(bytes)) => {
                last_activity = Instant::now();
                handle_line(&bytes);
            }
            Ok(StreamMsg::ReadError(err)) => warn!(err = %err, "failed to read agent output"),
            Ok(StreamMsg::Closed) => open_streams -= 1,
            Err(RecvTimeoutError::Timeout) => {
                // A process it left running in the background can keep the
                // pipes open after the agent itself has exited.
                if let Ok(Some(status)) = child.try_wait() {
                    debug!("agent exited with its output still open");
                    exited = Some(status);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if last_activity.elapsed() > options.idle_timeout {
            warn!(
                idle_secs = last_activity.elapsed().as_secs(),
                "no agent output within idle timeout, killing"
            );
            timed_out = true;
            break;
        }
    }

    if exited.is_some() {
        // Read what the agent wrote before exiting until the stream goes
        // quiet. The reader threads are left to finish on their own once the
        // background holders close the pipes.
        let drain_deadline = Instant::now() + options.idle_timeout;
        while open_streams > 0 && Instant::now() < drain_deadline {
            match rx.recv_timeout(options.poll_interval) {
                Ok(StreamMsg::Line(bytes)) => handle_line(&bytes),
                Ok(StreamMsg::ReadError(err)) => warn!(err = %err, "failed to read agent output"),
                Ok(StreamMsg::Closed) => open_streams -= 1,
                Err(_) => break,
            }
        }
    }

    let exit_code = if timed_out {
        kill_and_reap(&mut child);
        SYNTHETIC_EXIT_CODE
    } else if let Some(status) = exited {
        status.code().unwrap_or(SYNTHETIC_EXIT_CODE)
    } else {
        // Both pipes are closed; the process should be exiting. Give it one
        // more idle window before treating it as hung.
        match child.wait_timeout(options.idle_timeout) {
            Ok(Some(status)) => status.code().unwrap_or(SYNTHETIC_EXIT_CODE),
            Ok(None) => {
                warn!("agent closed its output but did not exit, killing");
                timed_out = true;
                kill_and_reap(&mut child);
                SYNTHETIC_EXIT_CODE
            }
            Err(err) => {
                error!(err = %err, "failed to wait for agent");
                kill_and_reap(&mut child);
                SYNTHETIC_EXIT_CODE
            }
        }
    };

    let duration = start.elapsed();
    let session_id = extract_session_id(&transcript.session_events);
    debug!(exit_code, timed_out, session_id = %session_id, "agent process finished");
    ExecutionResult {
        success: !timed_out && exit_code == 0,
        output: transcript.text,
        session_id,
        duration,
        exit_code,
        timeout: timed_out,
        timeout_reason: timed_out.then_some(TimeoutReason::OutputTimeout),
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(reader: R, tx: Sender<StreamMsg>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(StreamMsg::Line(line)).is_err() {
                        // Monitor gave up on this process.
                        return;
                    }
                }
                Err(err) => {
                    let _ = tx.send(StreamMsg::ReadError(err.to_string()));
                    break;
                }
            }
        }
        let _ = tx.send(StreamMsg::Closed);
    });
}

fn tee_line(sink: &mut dyn Write, line: &[u8]) {
    // Write and flush immediately so the log is useful while the agent runs.
    if let Err(err) = sink.write_all(line) {
        warn!(err = %err, "failed to write raw stream log");
    } else if let Err(err) = sink.flush() {
        warn!(err = %err, "failed to flush raw stream log");
    }
}

/// Start the child in a process group of its own, so a terminal Ctrl+C
/// reaches only the loop and the whole group can be killed on timeout.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(pgid, err = %err, "kill agent process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn kill_and_reap(child: &mut Child) {
    kill_process_group(child);
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill agent process");
    }
    if let Err(err) = child.wait() {
        warn!(err = %err, "reap agent process");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn fast(idle_timeout: Duration) -> MonitorOptions {
        MonitorOptions {
            idle_timeout,
            poll_interval: Duration::from_millis(50),
        }
    }

    #[test]
    fn decodes_events_and_tees_raw_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let events = concat!(
            r#"{"type":"system","subtype":"init","session_id":"sess-1"}"#,
            "\n",
            r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hello"}}}"#,
            "\n",
            r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#,
            "\n",
            r#"{"type":"stream_event","event":{"type":"content_block_start","content_block":{"type":"tool_use","name":"Bash"}}}"#,
            "\n",
            "plain text line\n",
            r#"{"type":"result","subtype":"success","session_id":"sess-2"}"#,
            "\n",
        );
        let events_path = temp.path().join("events.jsonl");
        fs::write(&events_path, events).expect("write events");

        let mut cmd = Command::new("cat");
        cmd.arg(&events_path);
        let mut raw = Vec::new();
        let mut live = String::new();
        let mut on_text = |text: &str| live.push_str(text);
        let result = run_monitored(
            cmd,
            &fast(Duration::from_secs(5)),
            StreamTaps {
                raw: Some(&mut raw),
                on_text: Some(&mut on_text),
            },
        );

        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(!result.timeout);
        assert_eq!(result.output, "Hello\n\n[Tool: Bash]\nplain text line\n");
        assert_eq!(live, result.output);
        assert_eq!(result.session_id, "sess-2");
        assert_eq!(String::from_utf8(raw).expect("utf8"), events);
    }

    #[test]
    fn idle_gap_kills_process_and_reports_output_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pid_path = temp.path().join("pid");
        let script = format!(
            "echo $$ > '{}'; echo started; exec sleep 30",
            pid_path.display()
        );

        let result = run_monitored(
            sh(&script),
            &fast(Duration::from_millis(500)),
            StreamTaps::default(),
        );

        assert!(result.timeout);
        assert_eq!(result.timeout_reason, Some(TimeoutReason::OutputTimeout));
        assert_eq!(result.timeout_reason.map(TimeoutReason::as_str), Some("output_timeout"));
        assert!(!result.success);
        assert_eq!(result.exit_code, SYNTHETIC_EXIT_CODE);
        assert_eq!(result.output, "started\n");
        assert!(result.duration < Duration::from_secs(10));

        let pid = fs::read_to_string(&pid_path).expect("pid file");
        let alive = Command::new("kill")
            .arg("-0")
            .arg(pid.trim())
            .stderr(Stdio::null())
            .status()
            .expect("run kill -0");
        assert!(!alive.success(), "agent process should be gone");
    }

    #[test]
    fn exit_is_detected_while_background_child_holds_output() {
        let result = run_monitored(
            sh("sleep 5 & echo done; exit 0"),
            &fast(Duration::from_secs(2)),
            StreamTaps::default(),
        );

        assert!(!result.timeout, "exited agent must not be reported as hung");
        assert_eq!(result.timeout_reason, None);
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "done\n");
        assert!(result.duration < Duration::from_secs(2));
    }

    #[test]
    fn exit_code_survives_background_child() {
        let result = run_monitored(
            sh("sleep 5 & exit 7"),
            &fast(Duration::from_secs(2)),
            StreamTaps::default(),
        );

        assert!(!result.timeout);
        assert!(!result.success);
        assert_eq!(result.exit_code, 7);
    }

    #[test]
    fn idle_timeout_kills_background_children_too() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bg_pid_path = temp.path().join("bg_pid");
        let script = format!(
            "sleep 30 & echo $! > '{}'; echo started; wait",
            bg_pid_path.display()
        );

        let result = run_monitored(
            sh(&script),
            &fast(Duration::from_millis(500)),
            StreamTaps::default(),
        );
        assert!(result.timeout);

        let pid = fs::read_to_string(&bg_pid_path).expect("bg pid file");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !process_gone(pid.trim()) {
            assert!(Instant::now() < deadline, "background child should be killed");
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// True once `pid` no longer runs (exited, or a zombie nobody reaped yet).
    fn process_gone(pid: &str) -> bool {
        if let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) {
            if stat.contains(") Z ") {
                return true;
            }
        }
        !Command::new("kill")
            .arg("-0")
            .arg(pid)
            .stderr(Stdio::null())
            .status()
            .expect("run kill -0")
            .success()
    }

    #[test]
    fn steady_output_outlives_idle_timeout() {
        let script = "for i in 1 2 3 4 5 6; do echo \"tick $i\"; sleep 0.2; done";
        let result = run_monitored(
            sh(script),
            &fast(Duration::from_millis(800)),
            StreamTaps::default(),
        );

        assert!(!result.timeout, "trickling output must not trip the idle timer");
        assert!(result.success);
        assert!(result.duration > Duration::from_millis(800));
        assert!(result.output.ends_with("tick 6\n"));
    }

    #[test]
    fn non_zero_exit_is_failure_with_code() {
        let result = run_monitored(
            sh("echo oops; exit 3"),
            &fast(Duration::from_secs(5)),
            StreamTaps::default(),
        );

        assert!(!result.success);
        assert!(!result.timeout);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.output, "oops\n");
    }

    #[test]
    fn stderr_lines_join_the_stream() {
        let result = run_monitored(
            sh("echo to-stderr 1>&2"),
            &fast(Duration::from_secs(5)),
            StreamTaps::default(),
        );

        assert!(result.success);
        assert_eq!(result.output, "to-stderr\n");
    }

    #[test]
    fn missing_binary_is_reported_not_raised() {
        let cmd = Command::new("prd-loop-definitely-missing-agent");
        let result = run_monitored(cmd, &fast(Duration::from_secs(5)), StreamTaps::default());

        assert!(!result.success);
        assert!(!result.timeout);
        assert_eq!(result.exit_code, SYNTHETIC_EXIT_CODE);
        assert!(result.output.contains("command not found"));
    }
}
