use std::collections::VecDeque;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::command::CaptureCommand;
use crate::hub::FrameHub;

/// Lines of stderr kept for the exit report.
const DIAGNOSTIC_LINES: usize = 20;
const NO_DIAGNOSTICS: &str = "<no diagnostic output captured>";
/// How long stderr is still read after the process has exited.
const STDERR_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Starting,
    Running,
    Restarting,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn capture process: {0}")]
    Spawn(std::io::Error),
    #[error("failed to wait for capture process: {0}")]
    Wait(std::io::Error),
}

/// How one run of the capture process ended.
#[derive(Debug)]
pub enum ExitCause {
    Exited(ExitStatus),
    Failed(CaptureError),
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Exited(status) => write!(f, "{status}"),
            ExitCause::Failed(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug)]
pub struct ExitReport {
    pub cause: ExitCause,
    pub diagnostics: Option<String>,
}

/// Rolling window over the most recent stderr lines.
#[derive(Debug)]
struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn text(&self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
        }
    }
}

fn lock_tail(tail: &Mutex<DiagnosticTail>) -> MutexGuard<'_, DiagnosticTail> {
    tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read stderr line by line until EOF. Bytes that are not UTF-8 are replaced,
/// never treated as the end of the stream.
async fn collect_stderr(stderr: ChildStderr, tail: Arc<Mutex<DiagnosticTail>>) {
    let mut lines = BufReader::new(stderr).split(b'\n');
    loop {
        match lines.next_segment().await {
            Ok(Some(raw)) => {
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                trace!(line = %line, "capture stderr");
                lock_tail(&tail).push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "failed to read capture stderr");
                break;
            }
        }
    }
}

/// Keeps exactly one capture process alive, forever.
///
/// Starting → Running → Restarting → Starting → … Every exit, whatever its
/// cause, reverts viewers to the fallback frame and schedules a restart after
/// the fixed delay.
pub struct CaptureSupervisor {
    hub: Arc<FrameHub>,
    command: CaptureCommand,
    restart_delay: Duration,
    state: watch::Sender<CaptureState>,
    launches: AtomicU64,
}

impl CaptureSupervisor {
    pub fn new(hub: Arc<FrameHub>, command: CaptureCommand, restart_delay: Duration) -> Self {
        let (state, _) = watch::channel(CaptureState::Starting);
        Self {
            hub,
            command,
            restart_delay,
            state,
            launches: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// Number of spawn attempts so far.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    pub async fn run(&self) {
        loop {
            self.state.send_replace(CaptureState::Starting);
            let report = self.run_once().await;
            self.handle_exit(&report);
            tokio::time::sleep(self.restart_delay).await;
        }
    }

    /// Spawn the process and wait for it to end, collecting its stderr tail.
    async fn run_once(&self) -> ExitReport {
        let attempt = self.launches.fetch_add(1, Ordering::Relaxed) + 1;
        info!(attempt, command = %self.command.display(), "starting capture process");

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExitReport {
                    cause: ExitCause::Failed(e),
                    diagnostics: None,
                }
            }
        };
        self.state.send_replace(CaptureState::Running);
        info!(pid = ?child.id(), attempt, "capture process running");

        let tail = Arc::new(Mutex::new(DiagnosticTail::new(DIAGNOSTIC_LINES)));
        let drain = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, Arc::clone(&tail))));

        let cause = match child.wait().await {
            Ok(status) => ExitCause::Exited(status),
            Err(e) => ExitCause::Failed(CaptureError::Wait(e)),
        };
        if let Some(mut drain) = drain {
            // Descendants that inherited stderr can keep the pipe open.
            if tokio::time::timeout(STDERR_GRACE, &mut drain).await.is_err() {
                debug!("capture stderr still open after exit, no longer reading it");
                drain.abort();
            }
        }

        let diagnostics = lock_tail(&tail).text();
        ExitReport { cause, diagnostics }
    }

    fn spawn(&self) -> Result<Child, CaptureError> {
        Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CaptureError::Spawn)
    }

    /// Transition into Restarting: viewers fall back and the exit is logged.
    pub fn handle_exit(&self, report: &ExitReport) {
        self.state.send_replace(CaptureState::Restarting);
        let notified = self.hub.revert_to_fallback();
        warn!(
            cause = %report.cause,
            restart_in_ms = self.restart_delay.as_millis() as u64,
            viewers_notified = notified,
            diagnostics = report.diagnostics.as_deref().unwrap_or(NO_DIAGNOSTICS),
            "capture process exited"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::channel::testing::RecordingChannel;
    use bytes::Bytes;
    use frame_relay_common::frame::Frame;

    fn frame(fill: u8) -> Frame {
        Frame::parse(Bytes::from(vec![0xFF, 0xD8, fill, fill, 0xFF, 0xD9])).unwrap()
    }

    fn shell(script: &str) -> CaptureCommand {
        CaptureCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[test]
    fn tail_keeps_latest_lines() {
        let mut tail = DiagnosticTail::new(2);
        assert!(tail.text().is_none());
        tail.push("one".into());
        tail.push("   ".into());
        tail.push("two".into());
        tail.push("three".into());
        assert_eq!(tail.text().as_deref(), Some("two\nthree"));
    }

    #[test]
    fn exit_reverts_viewers_to_fallback() {
        let fallback = frame(0x01);
        let hub = Arc::new(FrameHub::new(Some(fallback.clone())));
        let channel = RecordingChannel::new();
        let id = hub.connect(Box::new(channel.clone()));
        hub.publish(frame(0x02));

        let supervisor = CaptureSupervisor::new(
            Arc::clone(&hub),
            shell("true"),
            Duration::from_millis(10),
        );
        supervisor.handle_exit(&ExitReport {
            cause: ExitCause::Failed(CaptureError::Spawn(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            ))),
            diagnostics: None,
        });

        assert_eq!(supervisor.state(), CaptureState::Restarting);
        assert_eq!(hub.current(), Some(fallback.clone()));
        assert_eq!(hub.frames_sent(id), Some(3));
        let last = channel.received().pop().unwrap();
        assert!(last.ends_with(fallback.as_bytes()));
    }

    #[tokio::test]
    async fn run_once_collects_stderr_and_status() {
        let hub = Arc::new(FrameHub::new(None));
        let supervisor = CaptureSupervisor::new(
            hub,
            shell("echo 'device busy' >&2; exit 3"),
            Duration::from_millis(10),
        );

        let report = supervisor.run_once().await;
        match report.cause {
            ExitCause::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected exit cause: {other}"),
        }
        assert_eq!(report.diagnostics.as_deref(), Some("device busy"));
        assert_eq!(supervisor.launches(), 1);
    }

    #[tokio::test]
    async fn invalid_utf8_on_stderr_does_not_end_collection() {
        let hub = Arc::new(FrameHub::new(None));
        let supervisor = CaptureSupervisor::new(
            hub,
            shell("printf 'bad \\377\\376\\n' >&2; sleep 0.3; echo 'real failure' >&2; exit 0"),
            Duration::from_millis(10),
        );

        let report = supervisor.run_once().await;
        match report.cause {
            ExitCause::Exited(status) => assert_eq!(status.code(), Some(0)),
            other => panic!("unexpected exit cause: {other}"),
        }
        let diagnostics = report.diagnostics.expect("stderr was captured");
        let lines: Vec<_> = diagnostics.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("bad "));
        assert_eq!(lines[1], "real failure");
    }

    #[tokio::test]
    async fn exit_is_seen_while_a_descendant_holds_stderr() {
        let hub = Arc::new(FrameHub::new(None));
        let supervisor = CaptureSupervisor::new(
            hub,
            shell("echo 'wrapper gave up' >&2; sleep 3 & exit 1"),
            Duration::from_millis(10),
        );

        let started = std::time::Instant::now();
        let report = supervisor.run_once().await;
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "exit observed only after {:?}",
            started.elapsed()
        );
        match report.cause {
            ExitCause::Exited(status) => assert_eq!(status.code(), Some(1)),
            other => panic!("unexpected exit cause: {other}"),
        }
        assert_eq!(report.diagnostics.as_deref(), Some("wrapper gave up"));
    }

    #[tokio::test]
    async fn missing_program_is_reported_as_spawn_failure() {
        let hub = Arc::new(FrameHub::new(None));
        let supervisor = CaptureSupervisor::new(
            hub,
            CaptureCommand {
                program: "/nonexistent/capture-binary".into(),
                args: Vec::new(),
            },
            Duration::from_millis(10),
        );

        let report = supervisor.run_once().await;
        assert!(matches!(
            report.cause,
            ExitCause::Failed(CaptureError::Spawn(_))
        ));
        assert!(report.diagnostics.is_none());
    }

    #[tokio::test]
    async fn run_restarts_after_every_exit() {
        let fallback = frame(0x07);
        let hub = Arc::new(FrameHub::new(Some(fallback.clone())));
        hub.publish(frame(0x08));

        let supervisor = Arc::new(CaptureSupervisor::new(
            Arc::clone(&hub),
            shell("exit 0"),
            Duration::from_millis(20),
        ));
        let task = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while supervisor.launches() < 3 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "supervisor stopped restarting"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert_eq!(hub.current(), Some(fallback));
    }

    #[tokio::test]
    async fn state_changes_are_observable() {
        let hub = Arc::new(FrameHub::new(None));
        let supervisor = Arc::new(CaptureSupervisor::new(
            hub,
            shell("sleep 0.2"),
            Duration::from_millis(20),
        ));
        let mut states = supervisor.subscribe();
        assert_eq!(*states.borrow(), CaptureState::Starting);

        let task = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });

        tokio::time::timeout(
            Duration::from_secs(10),
            states.wait_for(|s| *s == CaptureState::Running),
        )
        .await
        .expect("never reached running")
        .unwrap();
        tokio::time::timeout(
            Duration::from_secs(10),
            states.wait_for(|s| *s == CaptureState::Restarting),
        )
        .await
        .expect("never reached restarting")
        .unwrap();

        task.abort();
    }
}
