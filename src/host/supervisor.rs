//! Process Supervisor
//!
//! Spawns the miner with merged, captured output and stops it cooperatively.
//! Each child gets one reader thread per pipe plus a watcher thread that
//! observes the exit and publishes exactly one terminal status to the relay.
//! On unix the child leads its own process group, so a terminal Ctrl-C
//! reaches only the launcher.

use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::ansi::LineDecoder;
use super::relay::RelaySender;

/// How long a cooperative stop waits before giving up
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long readers get to flush after the exit before the status is published
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The OS refused to start the process
    #[error("Failed to launch process: {0}")]
    Spawn(String),

    #[error("Failed to capture process output")]
    OutputUnavailable,

    /// Cooperative termination timed out; the caller decides whether to escalate
    #[error("Process did not exit within {0:?} of the stop request")]
    ForceKillRequired(Duration),

    #[error("Failed to signal process: {0}")]
    Signal(String),
}

/// Lifecycle of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    /// A stop was requested; the next observed exit is intentional
    Stopping,
    Terminated,
    Exited,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Terminated | ProcessState::Exited)
    }

    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    /// Exit observed after a stop request
    Terminated { code: Option<i32> },
    /// Exit on its own
    Exited { code: Option<i32> },
}

impl TerminalStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            TerminalStatus::Terminated { code } | TerminalStatus::Exited { code } => *code,
        }
    }

    /// A non-zero exit that nobody asked for
    pub fn is_unexpected(&self) -> bool {
        matches!(self, TerminalStatus::Exited { code } if *code != Some(0))
    }

    /// Operational error text for unexpected exits
    pub fn report(&self) -> Option<String> {
        if !self.is_unexpected() {
            return None;
        }
        Some(match self.code() {
            Some(code) => format!("Process exited with return code {}", code),
            None => "Process exited after being killed by a signal".to_string(),
        })
    }
}

struct Shared {
    child: Mutex<Child>,
    state: Mutex<ProcessState>,
    state_changed: Condvar,
    /// Cleared when the terminal status is published; later output is dropped
    output_open: Mutex<bool>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ProcessState> {
        lock(&self.state)
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        lock(&self.child)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Launches supervised child processes
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Spawn `executable` with `args`, streaming merged output into `relay`
    pub fn start(
        executable: &Path,
        args: &[String],
        relay: RelaySender,
    ) -> Result<ProcessHandle, SupervisorError> {
        let mut cmd = Command::new(executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            cmd.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            use windows::Win32::System::Threading::CREATE_NO_WINDOW;

            cmd.creation_flags(CREATE_NO_WINDOW.0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {}", executable.display(), e)))?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr) = match (stdout, stderr) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SupervisorError::OutputUnavailable);
            }
        };

        let shared = Arc::new(Shared {
            child: Mutex::new(child),
            state: Mutex::new(ProcessState::Starting),
            state_changed: Condvar::new(),
            output_open: Mutex::new(true),
        });

        if let Err(e) = spawn_threads(&shared, stdout, stderr, relay) {
            let mut child = shared.child();
            let _ = child.kill();
            let _ = child.wait();
            return Err(SupervisorError::Spawn(format!("reader thread: {}", e)));
        }

        *shared.state() = ProcessState::Running;
        tracing::info!("Started {} (pid {})", executable.display(), pid);

        Ok(ProcessHandle { shared, pid })
    }
}

fn spawn_threads(
    shared: &Arc<Shared>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    relay: RelaySender,
) -> std::io::Result<()> {
    let out_reader = spawn_reader("hcc-miner-stdout", stdout, shared, relay.clone())?;
    let err_reader = spawn_reader("hcc-miner-stderr", stderr, shared, relay.clone())?;

    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name("hcc-miner-watch".to_string())
        .spawn(move || watch_exit(&shared, vec![out_reader, err_reader], &relay))?;

    Ok(())
}

fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    mut pipe: R,
    shared: &Arc<Shared>,
    relay: RelaySender,
) -> std::io::Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut decoder = LineDecoder::new();
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in decoder.feed(&buf[..n]) {
                            forward_line(&shared, &relay, line);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!("Output pipe read failed: {}", e);
                        break;
                    }
                }
            }
            if let Some(line) = decoder.finish() {
                forward_line(&shared, &relay, line);
            }
        })
}

fn forward_line(shared: &Shared, relay: &RelaySender, line: String) {
    let open = lock(&shared.output_open);
    if *open {
        relay.push(line);
    } else {
        tracing::trace!("Dropping output after exit: {}", line);
    }
}

/// Wait for readers to hit EOF, up to `timeout`.
///
/// A descendant that inherited the pipes can keep them open past the exit;
/// such readers are left detached.
fn join_readers(readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while readers.iter().any(|r| !r.is_finished()) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    for reader in readers {
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            tracing::debug!("Output pipe still held by a descendant after exit");
        }
    }
}

/// Runs on the watcher thread: reap the child, record the state, let the
/// readers flush, then publish the terminal status
fn watch_exit(shared: &Shared, readers: Vec<JoinHandle<()>>, relay: &RelaySender) {
    let exit = loop {
        let polled = shared.child().try_wait();
        match polled {
            Ok(Some(status)) => break Some(status),
            Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
            Err(e) => {
                tracing::warn!("Failed to query process status: {}", e);
                break None;
            }
        }
    };
    let code = exit.as_ref().and_then(ExitStatus::code);

    // Consume the stop request, if any, in the same critical section that
    // publishes the terminal state.
    let status = {
        let mut state = shared.state();
        let status = if *state == ProcessState::Stopping {
            *state = ProcessState::Terminated;
            TerminalStatus::Terminated { code }
        } else {
            *state = ProcessState::Exited;
            TerminalStatus::Exited { code }
        };
        shared.state_changed.notify_all();
        status
    };

    if status.is_unexpected() {
        tracing::warn!("Miner exited unexpectedly: {:?}", code);
    } else {
        tracing::info!("Miner finished: {:?}", status);
    }

    join_readers(readers, READER_DRAIN_TIMEOUT);

    // Closing the gate under its lock keeps Finished the last relay item
    let mut open = lock(&shared.output_open);
    *open = false;
    relay.finish(status);
}

/// Handle to a running (or finished) supervised process
pub struct ProcessHandle {
    shared: Arc<Shared>,
    pid: u32,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.shared.state()
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    /// Mark the coming exit as intentional without signalling yet.
    ///
    /// Any exit observed from here on is reported as `Terminated`.
    /// Returns false when the process had already finished.
    pub fn begin_stop(&self) -> bool {
        let mut state = self.shared.state();
        match *state {
            ProcessState::Starting | ProcessState::Running => {
                *state = ProcessState::Stopping;
                true
            }
            ProcessState::Stopping => true,
            ProcessState::Terminated | ProcessState::Exited => false,
        }
    }

    /// Mark the coming exit as intentional and send the cooperative signal.
    ///
    /// Returns false when the process had already finished.
    pub fn request_stop(&self) -> Result<bool, SupervisorError> {
        if !self.begin_stop() {
            return Ok(false);
        }
        self.terminate()?;
        Ok(true)
    }

    /// Cooperative stop: signal, then wait up to `timeout` for the exit.
    pub fn stop(&self, timeout: Duration) -> Result<(), SupervisorError> {
        if !self.request_stop()? {
            return Ok(());
        }

        if self.wait_for_exit(timeout).is_some() {
            Ok(())
        } else {
            tracing::warn!("pid {} ignored termination for {:?}", self.pid, timeout);
            Err(SupervisorError::ForceKillRequired(timeout))
        }
    }

    /// Kill without waiting for cooperation
    pub fn force_kill(&self) -> Result<(), SupervisorError> {
        {
            let mut state = self.shared.state();
            if state.is_terminal() {
                return Ok(());
            }
            *state = ProcessState::Stopping;
        }

        let mut child = self.shared.child();
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        tracing::warn!("Force killing pid {}", self.pid);
        child
            .kill()
            .map_err(|e| SupervisorError::Signal(e.to_string()))
    }

    /// Block until the watcher has recorded a terminal state or `timeout` passes
    pub fn wait_for_exit(&self, timeout: Duration) -> Option<ProcessState> {
        let state = self.shared.state();
        let (state, result) = self
            .shared
            .state_changed
            .wait_timeout_while(state, timeout, |s| !s.is_terminal())
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.is_terminal() {
            Some(*state)
        } else {
            tracing::trace!("wait_for_exit timed out: {}", result.timed_out());
            None
        }
    }

    #[cfg(unix)]
    fn terminate(&self) -> Result<(), SupervisorError> {
        // Holding the child lock keeps the watcher from reaping the pid under us
        let mut child = self.shared.child();
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }

        let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            tracing::debug!("Sent SIGTERM to pid {}", self.pid);
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(SupervisorError::Signal(err.to_string()))
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> Result<(), SupervisorError> {
        let mut child = self.shared.child();
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        child
            .kill()
            .map_err(|e| SupervisorError::Signal(e.to_string()))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.request_stop();
        }
    }
}
