//! Stream Collector: runs the child and fills the ledger.
//!
//! stdout and stderr are drained concurrently by one reader thread each, so
//! the child can never block on a full pipe the supervisor is not reading.
//! Readers record each line into the shared [`Capture`]: the sequence number
//! is assigned under its lock, which makes ledger order the observed arrival
//! order across both streams, and the text goes to that stream's spill file.
//!
//! Everything else (pipe EOF, child exit, termination requests) arrives as a
//! [`Transition`] on one channel consumed by [`RunningChild::wait`], which
//! drives the `Running -> Aborting -> Aborted` / `Running -> Exited` state
//! machine.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::ledger::{abort_payload, escalation_payload, exit_payload, late_abort_payload};
use crate::core::types::{Channel, ChildExit, Invocation, TermSignal, Termination};
use crate::errors::{IoFailure, LaunchError, UsageError};
use crate::io::capture::{Capture, Captured, SharedCapture, lock};
use crate::io::signals;

/// Collector knobs that are not driven by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    /// Echo child output to our own stdout/stderr as it is read.
    pub passthrough: bool,
    /// How long a forwarded signal may go unanswered before SIGKILL.
    pub kill_grace: Duration,
    /// How long to keep reading after the child exits, for descendants that
    /// still hold the pipes open.
    pub drain_grace: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            passthrough: true,
            kill_grace: Duration::from_secs(2),
            drain_grace: Duration::from_secs(5),
        }
    }
}

/// Input to the supervisor loop.
#[derive(Debug)]
enum Transition {
    StreamClosed(Channel),
    ChildExited(io::Result<ChildExit>),
    Abort(TermSignal),
}

/// Requests an abort of the supervised run from any thread.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Sender<Transition>,
}

impl AbortHandle {
    /// Returns `false` once the collector has gone away.
    pub fn abort(&self, signal: TermSignal) -> bool {
        self.tx.send(Transition::Abort(signal)).is_ok()
    }
}

/// A finished run: everything captured plus how it ended.
#[derive(Debug)]
pub struct Collected {
    pub captured: Captured,
    pub termination: Termination,
    pub child_pid: u32,
}

/// Collector before the child exists.
///
/// Splitting construction from spawning lets callers hand out an
/// [`AbortHandle`] (e.g. to a signal watcher) before the child starts;
/// aborts requested in between are honoured as soon as the child is running.
pub struct Collector {
    options: CollectOptions,
    tx: Sender<Transition>,
    rx: Receiver<Transition>,
}

impl Collector {
    pub fn new(options: CollectOptions) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { options, tx, rx }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.tx.clone(),
        }
    }

    /// Start the child with stdin inherited and both output streams piped.
    ///
    /// A spawn failure is a [`LaunchError`]; its capture is discarded
    /// unrendered.
    #[instrument(skip_all, fields(program = ?invocation.argv.first()))]
    pub fn spawn(self, invocation: &Invocation) -> Result<RunningChild> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or_else(|| UsageError::new("empty command"))?;
        let capture = Capture::create(&invocation.argv, invocation.snippet_lines)
            .map_err(|err| IoFailure::new("prepare output capture", err))?
            .into_shared();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning child process");
        let mut child = cmd
            .spawn()
            .map_err(|err| LaunchError::from_spawn(program, err))?;
        let pid = child.id();
        debug!(pid, "child started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let passthrough = self.options.passthrough;
        let readers = vec![
            spawn_reader(stdout, Channel::Stdout, &capture, &self.tx, passthrough),
            spawn_reader(stderr, Channel::Stderr, &capture, &self.tx, passthrough),
        ];
        spawn_waiter(child, &self.tx);

        Ok(RunningChild {
            pid,
            capture,
            readers,
            options: self.options,
            tx: self.tx,
            rx: self.rx,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// `deadline` is when to escalate to SIGKILL; `None` once escalated.
    Aborting {
        signal: TermSignal,
        deadline: Option<Instant>,
    },
}

/// A child being supervised.
pub struct RunningChild {
    pid: u32,
    capture: SharedCapture,
    readers: Vec<JoinHandle<()>>,
    options: CollectOptions,
    tx: Sender<Transition>,
    rx: Receiver<Transition>,
}

impl RunningChild {
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.tx.clone(),
        }
    }

    /// Live view of the capture while the child runs.
    pub fn capture_handle(&self) -> SharedCapture {
        SharedCapture::clone(&self.capture)
    }

    /// Drive the run to completion and return the sealed capture.
    #[instrument(skip_all, fields(pid = self.pid))]
    pub fn wait(self) -> Result<Collected> {
        let mut phase = Phase::Running;
        let mut open_streams = 2usize;

        let exit = loop {
            let transition = match phase {
                Phase::Aborting {
                    deadline: Some(deadline),
                    ..
                } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(remaining) {
                        Ok(transition) => transition,
                        Err(RecvTimeoutError::Timeout) => {
                            phase = self.escalate(phase);
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(anyhow!("supervisor channel closed"));
                        }
                    }
                }
                _ => self
                    .rx
                    .recv()
                    .map_err(|_| anyhow!("supervisor channel closed"))?,
            };

            match transition {
                Transition::StreamClosed(channel) => {
                    debug!(%channel, "stream closed");
                    open_streams = open_streams.saturating_sub(1);
                }
                Transition::ChildExited(result) => break result.context("wait for child")?,
                Transition::Abort(signal) => phase = self.on_abort(phase, signal),
            }
        };
        debug!(?exit, "child exited");

        let mut aborted = match phase {
            Phase::Running => None,
            Phase::Aborting { signal, .. } => Some(signal),
        };
        self.drain(open_streams, &mut aborted);

        let termination = match aborted {
            Some(signal) => Termination::Aborted {
                signal,
                child: Some(exit),
            },
            None => Termination::Exited(exit),
        };
        let captured = lock(&self.capture)
            .finish(exit_payload(termination.exit_code(), Some(exit), aborted))
            .map_err(|err| IoFailure::new("capture child output", err))?;

        // Readers still blocked on a pipe held open by a descendant are left
        // detached; anything they read now lands in the sealed husk.
        for reader in self.readers {
            if reader.is_finished() && reader.join().is_err() {
                warn!("output reader thread panicked");
            }
        }

        Ok(Collected {
            captured,
            termination,
            child_pid: self.pid,
        })
    }

    fn on_abort(&self, phase: Phase, signal: TermSignal) -> Phase {
        match phase {
            Phase::Running => {
                warn!(signal = signal.name(), pid = self.pid, "forwarding signal to child");
                lock(&self.capture).record_meta(abort_payload(signal, self.pid));
                if let Err(err) = signals::forward(self.pid, signal) {
                    warn!(err = %err, "failed to forward signal");
                }
                Phase::Aborting {
                    signal,
                    deadline: Some(Instant::now() + self.options.kill_grace),
                }
            }
            Phase::Aborting {
                deadline: Some(_), ..
            } => self.escalate(phase),
            Phase::Aborting { deadline: None, .. } => phase,
        }
    }

    fn escalate(&self, phase: Phase) -> Phase {
        let Phase::Aborting { signal, .. } = phase else {
            return phase;
        };
        warn!(pid = self.pid, "child did not stop, sending SIGKILL");
        lock(&self.capture).record_meta(escalation_payload(self.pid));
        if let Err(err) = signals::kill_hard(self.pid) {
            warn!(err = %err, "failed to kill child");
        }
        Phase::Aborting {
            signal,
            deadline: None,
        }
    }

    /// Wait, bounded by the drain grace, for both pipes to reach EOF.
    ///
    /// A termination request that arrives in the meantime, or is already
    /// queued when draining ends, stops the wait and marks the run aborted.
    fn drain(&self, mut open_streams: usize, aborted: &mut Option<TermSignal>) {
        let deadline = Instant::now() + self.options.drain_grace;
        while open_streams > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(Transition::StreamClosed(_)) => open_streams -= 1,
                Ok(Transition::Abort(signal)) => {
                    self.late_abort(signal, aborted);
                    return;
                }
                Ok(Transition::ChildExited(_)) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        open_streams,
                        drain_grace = ?self.options.drain_grace,
                        "output still open after child exit, finalizing"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
        while let Ok(transition) = self.rx.try_recv() {
            if let Transition::Abort(signal) = transition {
                self.late_abort(signal, aborted);
            }
        }
    }

    fn late_abort(&self, signal: TermSignal, aborted: &mut Option<TermSignal>) {
        if aborted.is_some() {
            return;
        }
        warn!(signal = signal.name(), "termination signal after child exit");
        lock(&self.capture).record_meta(late_abort_payload(signal));
        *aborted = Some(signal);
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    channel: Channel,
    capture: &SharedCapture,
    tx: &Sender<Transition>,
    passthrough: bool,
) -> JoinHandle<()> {
    let capture = SharedCapture::clone(capture);
    let tx = tx.clone();
    thread::spawn(move || {
        if let Err(err) = drain_lines(stream, channel, &capture, passthrough) {
            warn!(%channel, err = %err, "output reader stopped early");
        }
        let _ = tx.send(Transition::StreamClosed(channel));
    })
}

fn spawn_waiter(mut child: Child, tx: &Sender<Transition>) {
    let tx = tx.clone();
    thread::spawn(move || {
        let result = child.wait().map(child_exit);
        let _ = tx.send(Transition::ChildExited(result));
    });
}

/// Read `stream` line by line into the capture until EOF.
fn drain_lines<R: Read>(
    stream: R,
    channel: Channel,
    capture: &SharedCapture,
    passthrough: bool,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut echo = passthrough;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(());
        }
        lock(capture).record_line(channel, &decode_line(&line));
        if echo && let Err(err) = echo_raw(channel, &line) {
            debug!(%channel, err = %err, "passthrough disabled");
            echo = false;
        }
    }
}

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily.
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn echo_raw(channel: Channel, bytes: &[u8]) -> io::Result<()> {
    match channel {
        Channel::Stderr => {
            let mut err = io::stderr().lock();
            err.write_all(bytes)?;
            err.flush()
        }
        Channel::Stdout | Channel::Meta => {
            let mut out = io::stdout().lock();
            out.write_all(bytes)?;
            out.flush()
        }
    }
}

#[cfg(unix)]
fn child_exit(status: ExitStatus) -> ChildExit {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ChildExit::Code(code),
        (None, Some(signo)) => ChildExit::Signal(signo),
        (None, None) => ChildExit::Code(1),
    }
}

#[cfg(not(unix))]
fn child_exit(status: ExitStatus) -> ChildExit {
    ChildExit::Code(status.code().unwrap_or(1))
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    use super::*;
    use crate::errors::exit_code_for;
    use crate::exit_codes;
    use crate::test_support::{invocation, read_lines, wait_for_lines};

    fn quiet() -> CollectOptions {
        CollectOptions {
            passthrough: false,
            kill_grace: Duration::from_millis(300),
            drain_grace: Duration::from_millis(300),
        }
    }

    fn collect(script: &str) -> Collected {
        let invocation = invocation(Path::new("/tmp"), &["sh", "-c", script]);
        Collector::new(quiet())
            .spawn(&invocation)
            .expect("spawn")
            .wait()
            .expect("wait")
    }

    fn stdout_lines(collected: &Collected) -> Vec<String> {
        read_lines(&collected.captured, Channel::Stdout).expect("read stdout")
    }

    fn last_payload(collected: &Collected) -> String {
        let last = collected.captured.ledger.events().last().expect("exit event");
        assert_eq!(last.channel, Channel::Meta);
        last.payload.expect("meta payload").to_string()
    }

    /// Start a script whose first stdout line is its own pid and return that pid.
    fn start_echoing_pid(script: &str, options: CollectOptions) -> (RunningChild, i32) {
        let mut invocation = invocation(Path::new("/tmp"), &["sh", "-c", script]);
        invocation.snippet_lines = 1;
        let running = Collector::new(options).spawn(&invocation).expect("spawn");
        let capture = running.capture_handle();
        assert!(wait_for_lines(
            &capture,
            Channel::Stdout,
            1,
            Duration::from_secs(10)
        ));
        let pid = lock(&capture)
            .ledger()
            .output_tail(1)
            .next()
            .and_then(|line| line.parse::<i32>().ok())
            .expect("pid line");
        (running, pid)
    }

    fn wait_until_reaped(pid: i32) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while kill(Pid::from_raw(pid), None).is_ok() {
            assert!(Instant::now() < deadline, "child {pid} was never reaped");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let collected = collect("echo out; echo err >&2; exit 4");

        assert_eq!(
            collected.termination,
            Termination::Exited(ChildExit::Code(4))
        );
        assert_eq!(stdout_lines(&collected), vec!["out"]);
        assert_eq!(
            read_lines(&collected.captured, Channel::Stderr).expect("read stderr"),
            vec!["err"]
        );
        let ledger = &collected.captured.ledger;
        assert_eq!(
            ledger.events().next().and_then(|event| event.payload),
            Some("safe-run start: cmd=\"sh -c 'echo out; echo err >&2; exit 4'\"")
        );
        assert_eq!(last_payload(&collected), "safe-run exit: code=4");
        assert!(ledger.is_sealed());
    }

    #[test]
    fn keeps_unterminated_last_line_and_strips_carriage_returns() {
        let collected = collect("printf 'a\\r\\nb'");

        assert_eq!(stdout_lines(&collected), vec!["a", "b"]);
        assert_eq!(
            collected.termination,
            Termination::Exited(ChildExit::Code(0))
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let collected = collect("printf 'ok\\377\\n'");
        assert_eq!(stdout_lines(&collected), vec!["ok\u{FFFD}"]);
    }

    #[test]
    fn many_lines_are_all_captured_in_order() {
        let collected = collect("i=0; while [ $i -lt 5000 ]; do echo $i; i=$((i+1)); done; exit 3");

        let lines = stdout_lines(&collected);
        assert_eq!(lines.len(), 5_000);
        assert_eq!(lines.first().map(String::as_str), Some("0"));
        assert_eq!(lines.last().map(String::as_str), Some("4999"));
        assert_eq!(collected.captured.ledger.line_count(Channel::Stdout), 5_000);
    }

    #[test]
    fn child_killed_by_foreign_signal_is_a_plain_failure() {
        let collected = collect("kill -9 $$");

        assert_eq!(
            collected.termination,
            Termination::Exited(ChildExit::Signal(9))
        );
        assert_eq!(collected.termination.exit_code(), 137);
        assert_eq!(last_payload(&collected), "safe-run exit: code=137 signal=9");
    }

    #[test]
    fn abort_forwards_signal_and_keeps_partial_output() {
        let invocation = invocation(
            Path::new("/tmp"),
            &["sh", "-c", "echo ready; echo partial >&2; exec sleep 30"],
        );
        let running = Collector::new(quiet()).spawn(&invocation).expect("spawn");
        assert!(wait_for_lines(
            &running.capture_handle(),
            Channel::Stdout,
            1,
            Duration::from_secs(10)
        ));
        assert!(running.abort_handle().abort(TermSignal::Terminate));

        let collected = running.wait().expect("wait");
        assert_eq!(
            collected.termination,
            Termination::Aborted {
                signal: TermSignal::Terminate,
                child: Some(ChildExit::Signal(15)),
            }
        );
        assert_eq!(collected.termination.exit_code(), exit_codes::ABORTED_SIGTERM);
        assert_eq!(stdout_lines(&collected), vec!["ready"]);
        let abort_line = abort_payload(TermSignal::Terminate, collected.child_pid);
        assert!(collected.captured.ledger.contains_meta(&abort_line));
        assert_eq!(
            last_payload(&collected),
            "safe-run exit: code=143 signal=15 aborted=SIGTERM"
        );
    }

    #[test]
    fn abort_escalates_to_sigkill_when_child_ignores_signal() {
        let invocation = invocation(
            Path::new("/tmp"),
            &["sh", "-c", "trap '' TERM; echo armed; exec sleep 30"],
        );
        let running = Collector::new(quiet()).spawn(&invocation).expect("spawn");
        assert!(wait_for_lines(
            &running.capture_handle(),
            Channel::Stdout,
            1,
            Duration::from_secs(10)
        ));
        running.abort_handle().abort(TermSignal::Terminate);

        let collected = running.wait().expect("wait");
        assert_eq!(
            collected.termination,
            Termination::Aborted {
                signal: TermSignal::Terminate,
                child: Some(ChildExit::Signal(9)),
            }
        );
        let escalation = escalation_payload(collected.child_pid);
        assert!(collected.captured.ledger.contains_meta(&escalation));
        assert_eq!(collected.termination.exit_code(), exit_codes::ABORTED_SIGTERM);
    }

    #[test]
    fn descendant_holding_pipes_open_does_not_hang_finalization() {
        let started = Instant::now();
        let collected = collect("sleep 5 & echo bye");

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(stdout_lines(&collected), vec!["bye"]);
        assert_eq!(
            collected.termination,
            Termination::Exited(ChildExit::Code(0))
        );
    }

    #[test]
    fn abort_while_draining_after_child_exit_is_recorded_as_late() {
        let options = CollectOptions {
            drain_grace: Duration::from_secs(30),
            ..quiet()
        };
        let started = Instant::now();
        let (running, pid) = start_echoing_pid("sleep 5 & echo $$", options);
        wait_until_reaped(pid);

        assert!(running.abort_handle().abort(TermSignal::Terminate));
        let collected = running.wait().expect("wait");

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(
            collected.termination,
            Termination::Aborted {
                signal: TermSignal::Terminate,
                child: Some(ChildExit::Code(0)),
            }
        );
        let ledger = &collected.captured.ledger;
        assert!(ledger.contains_meta(&late_abort_payload(TermSignal::Terminate)));
        assert!(!ledger.contains_meta(&abort_payload(TermSignal::Terminate, collected.child_pid)));
        assert_eq!(last_payload(&collected), "safe-run exit: code=143 aborted=SIGTERM");
    }

    #[test]
    fn abort_queued_behind_child_exit_is_not_lost() {
        let (running, pid) = start_echoing_pid("echo $$", quiet());
        wait_until_reaped(pid);
        // Give both readers time to hit EOF so nothing is left to drain.
        thread::sleep(Duration::from_millis(100));

        assert!(running.abort_handle().abort(TermSignal::Interrupt));
        let collected = running.wait().expect("wait");

        assert_eq!(
            collected.termination,
            Termination::Aborted {
                signal: TermSignal::Interrupt,
                child: Some(ChildExit::Code(0)),
            }
        );
        assert!(
            collected
                .captured
                .ledger
                .contains_meta(&late_abort_payload(TermSignal::Interrupt))
        );
        assert_eq!(collected.termination.exit_code(), exit_codes::ABORTED_SIGINT);
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let invocation = invocation(Path::new("/tmp"), &["definitely-not-a-real-binary-xyz"]);
        let err = Collector::new(quiet())
            .spawn(&invocation)
            .err()
            .expect("spawn should fail");
        assert_eq!(exit_code_for(&err), exit_codes::COMMAND_NOT_FOUND);
    }

    #[test]
    fn decode_line_handles_terminators() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"tail"), "tail");
        assert_eq!(decode_line(b"\n"), "");
    }
}
