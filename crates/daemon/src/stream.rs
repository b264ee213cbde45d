//! Transcoder supervision: at most one ffmpeg session at a time
//!
//! The supervisor owns the external transcoding process exclusively.
//! Control flows through `start`/`stop`; observation flows through a
//! shared snapshot that never blocks on process I/O.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use lookout_config::CaptureConfig;

use crate::clock;
use crate::ffmpeg::{self, pipeline};
use crate::paths::{self, StoragePaths};
use crate::source::{CaptureSource, SourceError};

/// How often the monitor checks whether the process is still alive.
const MONITOR_POLL: Duration = Duration::from_millis(250);

/// Wait this long after the quit command before escalating to kill.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Error type for stream session control
#[derive(Debug, Error)]
pub enum StreamError {
    /// start() while a session is active
    #[error("stream already running")]
    AlreadyRunning,
    /// stop() with no active session
    #[error("no active stream")]
    NotRunning,
    #[error(transparent)]
    InvalidSource(#[from] SourceError),
    #[error("failed to launch transcoder: {0}")]
    Launch(#[from] std::io::Error),
}

/// Session state visible on the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Exit information from the last transcoder process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Point-in-time view of the stream session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub running: bool,
    pub source: Option<String>,
    pub started_at_unix_ms: Option<u64>,
    /// Most recent stderr line from the transcoder; a single line is
    /// retained so a chatty process cannot grow memory without bound.
    pub last_error: Option<String>,
    pub last_exit: Option<ExitInfo>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            running: false,
            source: None,
            started_at_unix_ms: None,
            last_error: None,
            last_exit: None,
        }
    }
}

/// Shared session state for concurrent access across daemon components
pub type SharedSession = Arc<RwLock<SessionSnapshot>>;

struct Slot {
    phase: SessionState,
    child: Option<Child>,
    /// Bumped per session so a stale monitor task never touches a
    /// process it did not start.
    generation: u64,
}

/// Owns the single transcoder process.
pub struct StreamSupervisor {
    paths: StoragePaths,
    capture: CaptureConfig,
    program: String,
    stop_grace: Duration,
    slot: Arc<Mutex<Slot>>,
    snapshot: SharedSession,
}

impl StreamSupervisor {
    pub fn new(paths: StoragePaths, capture: CaptureConfig) -> Self {
        Self {
            paths,
            capture,
            program: ffmpeg::FFMPEG_BIN.to_string(),
            stop_grace: DEFAULT_STOP_GRACE,
            slot: Arc::new(Mutex::new(Slot {
                phase: SessionState::Idle,
                child: None,
                generation: 0,
            })),
            snapshot: Arc::new(RwLock::new(SessionSnapshot::default())),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    #[cfg(test)]
    pub(crate) fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Start a transcoding session for `source`.
    ///
    /// Arguments are validated and directories prepared before anything
    /// is spawned; a conflict leaves the running session untouched.
    pub async fn start(&self, source: CaptureSource) -> Result<(), StreamError> {
        let mut slot = self.slot.lock().await;
        if slot.phase != SessionState::Idle {
            return Err(StreamError::AlreadyRunning);
        }

        let args = pipeline::build_transcode_args(
            &source,
            &self.capture,
            &self.paths.buffer_dir(),
            &self.paths.live_dir(),
        )?;

        // Leftovers from a previous session must not leak into clips or
        // the live playlist.
        let _ = paths::clear_directory(&self.paths.buffer_dir());
        let _ = paths::clear_directory(&self.paths.live_dir());
        self.paths.ensure_directories()?;

        // Reset before the stderr reader exists, so output from a
        // process that fails instantly is never wiped.
        {
            let mut snap = self.snapshot.write().await;
            snap.last_error = None;
            snap.last_exit = None;
        }

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        info!(source = %source, pid = child.id(), "transcoder started");

        if let Some(stderr) = child.stderr.take() {
            let snapshot = Arc::clone(&self.snapshot);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    snapshot.write().await.last_error = Some(line);
                }
            });
        }

        slot.generation += 1;
        let generation = slot.generation;
        slot.child = Some(child);
        slot.phase = SessionState::Running;
        drop(slot);

        {
            let mut snap = self.snapshot.write().await;
            snap.state = SessionState::Running;
            snap.running = true;
            snap.source = Some(source.to_string());
            snap.started_at_unix_ms = Some(clock::unix_millis());
        }

        self.spawn_monitor(generation);
        Ok(())
    }

    /// Stop the running session.
    ///
    /// ffmpeg's `q` quit command flushes the muxers before exit, which a
    /// hard kill would not; only after the grace period does the
    /// supervisor escalate. Directories are cleared once the process is
    /// gone so the muxer cannot recreate files behind the cleanup.
    pub async fn stop(&self) -> Result<(), StreamError> {
        let mut child = {
            let mut slot = self.slot.lock().await;
            if slot.phase != SessionState::Running {
                return Err(StreamError::NotRunning);
            }
            match slot.child.take() {
                Some(child) => {
                    slot.phase = SessionState::Stopping;
                    child
                }
                None => {
                    slot.phase = SessionState::Idle;
                    return Err(StreamError::NotRunning);
                }
            }
        };
        self.snapshot.write().await.state = SessionState::Stopping;

        if let Some(stdin) = child.stdin.as_mut() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.shutdown().await;
        }

        let status = match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(error = %e, "waiting for transcoder failed");
                let _ = child.kill().await;
                None
            }
            Err(_) => {
                warn!("transcoder ignored quit command, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill transcoder");
                }
                child.wait().await.ok()
            }
        };

        let _ = paths::clear_directory(&self.paths.live_dir());
        let _ = paths::clear_directory(&self.paths.buffer_dir());

        self.slot.lock().await.phase = SessionState::Idle;
        {
            let mut snap = self.snapshot.write().await;
            snap.state = SessionState::Idle;
            snap.running = false;
            snap.source = None;
            snap.started_at_unix_ms = None;
            snap.last_exit = status.map(ExitInfo::from_status);
        }

        info!("stream stopped");
        Ok(())
    }

    /// Non-blocking view of the session. Never touches process I/O.
    pub async fn health(&self) -> SessionSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Watches for the process exiting on its own (crash, source gone,
    /// external kill). A voluntary `stop` empties the slot first, which
    /// ends the watch.
    fn spawn_monitor(&self, generation: u64) {
        let slot = Arc::clone(&self.slot);
        let snapshot = Arc::clone(&self.snapshot);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(MONITOR_POLL).await;

                let mut guard = slot.lock().await;
                if guard.generation != generation || guard.phase != SessionState::Running {
                    return;
                }
                let Some(child) = guard.child.as_mut() else {
                    return;
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let exit = ExitInfo::from_status(status);
                        guard.child = None;
                        guard.phase = SessionState::Idle;
                        drop(guard);

                        warn!(
                            code = ?exit.code,
                            signal = ?exit.signal,
                            "transcoder exited unexpectedly"
                        );
                        let mut snap = snapshot.write().await;
                        snap.state = SessionState::Idle;
                        snap.running = false;
                        snap.source = None;
                        snap.started_at_unix_ms = None;
                        snap.last_exit = Some(exit);
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "failed to poll transcoder"),
                }
            }
        });
    }
}
