//! Mining session control
//!
//! Ties the updater and the process supervisor together: validates input,
//! provisions the miner, starts it, and stops it on request.

pub mod cancel;
pub mod command;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::host::{ProcessHandle, ProcessSupervisor, RelaySender, SupervisorError, DEFAULT_STOP_TIMEOUT};
use crate::logging::redact_sensitive_args;
use crate::settings::MinerConfig;
use crate::updater::{self, BinaryCache, GitHubReleaseSource};

pub use command::{build_miner_args, resolve_executable};

/// Errors surfaced when starting or stopping a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Please enter your private key")]
    MissingCredential,

    #[error("Miner executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("A mining session is already running")]
    AlreadyRunning,

    #[error("Invalid API endpoint: {0}")]
    InvalidEndpoint(String),

    #[error(transparent)]
    Spawn(#[from] SupervisorError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl SessionError {
    /// Status line for the display sink
    pub fn status_text(&self) -> String {
        match self {
            SessionError::MissingCredential => "Error: Missing private key".to_string(),
            SessionError::ExecutableNotFound(_) => "Error: Missing miner executable".to_string(),
            SessionError::AlreadyRunning => SessionStatus::Mining.to_string(),
            SessionError::InvalidEndpoint(_) => "Error: Invalid API endpoint".to_string(),
            SessionError::Spawn(e) => format!("Exception: {}", e),
            SessionError::Task(e) => format!("Exception: {}", e),
        }
    }
}

/// Coarse status shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Mining,
    NotMining,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Mining => write!(f, "Status: Mining"),
            SessionStatus::NotMining => write!(f, "Status: Not Mining"),
        }
    }
}

/// Whether a status or output string should be shown as an error
pub fn is_error_text(text: &str) -> bool {
    text.contains("Error:") || text.contains("Exception:") || text.contains("Process exited")
}

/// Launcher-level options that are not part of a profile
#[derive(Debug, Clone)]
pub struct LauncherOptions {
    /// Cooperative stop wait before escalating
    pub stop_timeout: Duration,
    /// Directory searched for local miner binaries
    pub launcher_dir: Option<PathBuf>,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            launcher_dir: command::launcher_dir(),
        }
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No process was active
    NotRunning,
    /// The miner honored the termination request
    Stopped,
    /// The miner ignored it and was killed
    Killed,
}

/// The single active mining run
pub struct MiningSession {
    pub executable: PathBuf,
    pub api_url: String,
    credential: String,
    pub workers: u32,
    pub extreme: bool,
    pub started_at: DateTime<Local>,
    handle: ProcessHandle,
}

impl MiningSession {
    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

/// Orchestrates auto-update, path resolution, start and stop
pub struct SessionController {
    options: LauncherOptions,
    relay: RelaySender,
    cache: Option<BinaryCache>,
    client: reqwest::Client,
    session: Option<MiningSession>,
}

impl SessionController {
    /// Controller using the GitHub release feed and the default cache location
    pub fn new(options: LauncherOptions, relay: RelaySender) -> Self {
        let cache = match GitHubReleaseSource::new() {
            Ok(source) => BinaryCache::with_default_root(Arc::new(source)),
            Err(e) => {
                tracing::warn!("Auto-download unavailable: {}", e);
                None
            }
        };

        Self {
            options,
            relay,
            cache,
            client: reqwest::Client::builder()
                .user_agent("hcc-miner")
                .build()
                .unwrap_or_default(),
            session: None,
        }
    }

    /// Replace the binary cache (custom root or release source)
    pub fn with_cache(mut self, cache: BinaryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_running() {
            SessionStatus::Mining
        } else {
            SessionStatus::NotMining
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(MiningSession::is_alive)
    }

    pub fn session(&self) -> Option<&MiningSession> {
        self.session.as_ref()
    }

    /// Start mining with `config`.
    ///
    /// Auto-update failures are reported to the display sink and otherwise
    /// ignored; path resolution then falls through to local/PATH lookups.
    pub async fn start_session(&mut self, config: &MinerConfig) -> Result<(), SessionError> {
        if self.is_running() {
            return Err(SessionError::AlreadyRunning);
        }
        // The previous process has exited; its session is finished
        self.session = None;

        let credential = config.credential.trim();
        if credential.is_empty() {
            self.relay.notice("ERROR: Please enter your private key.");
            return Err(SessionError::MissingCredential);
        }

        let api_url = config.api_url.trim();
        if url::Url::parse(api_url).is_err() {
            self.relay
                .notice(format!("ERROR: Invalid API endpoint: {}", api_url));
            return Err(SessionError::InvalidEndpoint(api_url.to_string()));
        }

        let downloaded = self.auto_update(config).await;

        let executable = resolve_executable(
            config.miner_path.as_deref(),
            self.options.launcher_dir.as_deref(),
            downloaded.as_deref(),
        );
        if executable.is_absolute() && !executable.exists() {
            self.relay.notice(format!(
                "ERROR: Miner executable not found: {}",
                executable.display()
            ));
            return Err(SessionError::ExecutableNotFound(executable));
        }

        let args = build_miner_args(config);
        tracing::info!(
            "Executing: {} {}",
            executable.display(),
            redact_sensitive_args(&args).join(" ")
        );

        let handle = match ProcessSupervisor::start(&executable, &args, self.relay.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.relay.notice(format!("Exception: {}", e));
                return Err(e.into());
            }
        };

        self.session = Some(MiningSession {
            executable,
            api_url: api_url.to_string(),
            credential: credential.to_string(),
            workers: config.workers,
            extreme: config.extreme,
            started_at: Local::now(),
            handle,
        });
        Ok(())
    }

    /// Provision the miner when auto-download applies; `None` on skip or failure
    async fn auto_update(&self, config: &MinerConfig) -> Option<PathBuf> {
        if !config.auto_download || config.miner_path.is_some() {
            return None;
        }
        if let Some(local) = command::local_candidate(self.options.launcher_dir.as_deref()) {
            self.relay.notice(format!(
                "[*] Using local miner {}, auto-download skipped",
                local.display()
            ));
            return None;
        }

        let Some(cache) = self.cache.as_ref() else {
            self.relay
                .notice("[!] Auto-download failed: no data directory for the miner cache");
            return None;
        };

        let relay = self.relay.clone();
        let log = move |msg: String| relay.notice(msg);
        match updater::ensure_latest_miner(cache, &log).await {
            Ok(cached) => Some(cached.path),
            Err(e) => {
                tracing::warn!("Auto-download failed: {}", e);
                self.relay.notice(format!("[!] Auto-download failed: {}", e));
                None
            }
        }
    }

    /// Stop the active session. A no-op when nothing is running.
    pub async fn stop_session(&mut self) -> Result<StopOutcome, SessionError> {
        self.terminate(true).await
    }

    /// Stop without notifying the faucet, for launcher shutdown
    pub async fn shutdown(&mut self) -> Result<StopOutcome, SessionError> {
        self.terminate(false).await
    }

    async fn terminate(&mut self, notify_remote: bool) -> Result<StopOutcome, SessionError> {
        let Some(session) = self.session.take() else {
            return Ok(StopOutcome::NotRunning);
        };
        // Marked before the cancel round-trip so an exit inside it is intentional
        if !session.handle.begin_stop() {
            return Ok(StopOutcome::NotRunning);
        }

        if notify_remote {
            cancel::notify_cancel(&self.client, &session.api_url, &session.credential).await;
        }

        let timeout = self.options.stop_timeout;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = session.handle.stop(timeout);
            (session, result)
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))?;

        let outcome = match result {
            Ok(()) => StopOutcome::Stopped,
            Err(SupervisorError::ForceKillRequired(waited)) => {
                self.relay.notice(format!(
                    "[!] Miner did not exit within {}s, killing it",
                    waited.as_secs_f32()
                ));
                session.handle.force_kill()?;
                StopOutcome::Killed
            }
            Err(e) => return Err(e.into()),
        };

        let elapsed = Local::now().signed_duration_since(session.started_at);
        tracing::info!(
            "Stopped miner pid {} ({}, workers={}, extreme={}) after {}s",
            session.pid(),
            session.executable.display(),
            session.workers,
            session.extreme,
            elapsed.num_seconds()
        );
        self.relay.notice("Mining stopped.");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::relay::{channel, OutputRelay, RelayItem};
    use crate::host::TerminalStatus;
    use crate::updater::release::{Release, ReleaseAsset, ReleaseSource};
    use crate::updater::UpdateError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingSource {
        payload: Vec<u8>,
        downloads: AtomicUsize,
        offline: bool,
    }

    #[async_trait]
    impl ReleaseSource for CountingSource {
        async fn latest_release(&self) -> Result<Release, UpdateError> {
            if self.offline {
                return Err(UpdateError::Network("offline".to_string()));
            }
            let platform = updater::resolve_platform()?;
            Ok(Release {
                tag: "v9.9.9".to_string(),
                assets: vec![ReleaseAsset {
                    name: platform.asset_name(updater::release::MINER_BINARY_NAME, "9.9.9"),
                    download_url: "https://dl/miner".to_string(),
                    size_bytes: Some(self.payload.len() as u64),
                }],
            })
        }

        async fn download_to(&self, _asset: &ReleaseAsset, dest: &Path) -> Result<u64, UpdateError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, &self.payload).await?;
            Ok(self.payload.len() as u64)
        }
    }

    fn controller(
        launcher_dir: &Path,
        source: Arc<CountingSource>,
        cache_dir: &Path,
    ) -> (SessionController, OutputRelay) {
        let (tx, relay) = channel();
        let options = LauncherOptions {
            stop_timeout: Duration::from_secs(5),
            launcher_dir: Some(launcher_dir.to_path_buf()),
        };
        let controller =
            SessionController::new(options, tx).with_cache(BinaryCache::new(cache_dir, source));
        (controller, relay)
    }

    fn source(payload: &[u8], offline: bool) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            payload: payload.to_vec(),
            downloads: AtomicUsize::new(0),
            offline,
        })
    }

    fn base_config() -> MinerConfig {
        MinerConfig {
            api_url: "http://127.0.0.1:9/api".to_string(),
            miner_path: None,
            credential: "abc".to_string(),
            workers: 4,
            auto_download: false,
            extreme: true,
        }
    }

    fn texts(items: &[RelayItem]) -> Vec<String> {
        items.iter().filter_map(RelayItem::display_text).collect()
    }

    async fn collect_until_finished(relay: &OutputRelay) -> Vec<RelayItem> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut items = Vec::new();
        while Instant::now() < deadline {
            while let Some(item) = relay.drain_one() {
                let done = matches!(item, RelayItem::Finished(_));
                items.push(item);
                if done {
                    return items;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        items
    }

    #[tokio::test]
    async fn test_missing_credential_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(b"", false);
        let (mut controller, relay) = controller(dir.path(), src.clone(), dir.path());
        let mut config = base_config();
        config.credential = "   ".to_string();
        config.auto_download = true;

        let err = controller.start_session(&config).await.unwrap_err();
        assert!(matches!(err, SessionError::MissingCredential));
        assert_eq!(err.status_text(), "Error: Missing private key");
        assert_eq!(src.downloads.load(Ordering::SeqCst), 0);
        assert_eq!(controller.status(), SessionStatus::NotMining);
        assert!(texts(&relay.drain_all())
            .contains(&"ERROR: Please enter your private key.".to_string()));
    }

    #[tokio::test]
    async fn test_missing_absolute_executable() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, relay) = controller(dir.path(), source(b"", false), dir.path());
        let missing = dir.path().join("nowhere").join("hhc_miner");
        let mut config = base_config();
        config.miner_path = Some(missing.clone());

        let err = controller.start_session(&config).await.unwrap_err();
        assert!(matches!(err, SessionError::ExecutableNotFound(ref p) if *p == missing));
        assert!(is_error_text(&err.status_text()));
        assert!(texts(&relay.drain_all())[0].starts_with("ERROR: Miner executable not found:"));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _relay) = controller(dir.path(), source(b"", false), dir.path());
        let mut config = base_config();
        config.api_url = "faucet".to_string();

        assert!(matches!(
            controller.start_session(&config).await,
            Err(SessionError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, relay) = controller(dir.path(), source(b"", false), dir.path());

        assert_eq!(controller.stop_session().await.unwrap(), StopOutcome::NotRunning);
        assert_eq!(controller.stop_session().await.unwrap(), StopOutcome::NotRunning);
        assert_eq!(controller.status(), SessionStatus::NotMining);
        assert!(controller.session().is_none());
        assert!(relay.drain_all().is_empty());
    }

    #[test]
    fn test_error_classification() {
        assert!(is_error_text("Error: Missing private key"));
        assert!(is_error_text("Exception: boom"));
        assert!(is_error_text("Process exited with return code 1"));
        assert!(!is_error_text("Status: Mining"));
        assert!(!is_error_text(&SessionStatus::NotMining.to_string()));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        /// `/bin/echo` prints its arguments, which makes the argv visible
        #[tokio::test]
        async fn test_explicit_path_skips_download() {
            let dir = tempfile::tempdir().unwrap();
            let src = source(b"unused", false);
            let (mut controller, relay) = controller(dir.path(), src.clone(), dir.path());
            let mut config = base_config();
            config.miner_path = Some(PathBuf::from("/bin/echo"));
            config.auto_download = true;

            controller.start_session(&config).await.unwrap();
            let items = collect_until_finished(&relay).await;

            assert_eq!(src.downloads.load(Ordering::SeqCst), 0);
            assert!(texts(&items).contains(
                &"-url http://127.0.0.1:9/api -key abc -workers 4 -progress=true -progress-interval=2 -extreme"
                    .to_string()
            ));
            assert_eq!(
                items.last(),
                Some(&RelayItem::Finished(TerminalStatus::Exited { code: Some(0) }))
            );
            assert_eq!(controller.status(), SessionStatus::NotMining);
        }

        #[tokio::test]
        async fn test_download_failure_falls_through() {
            let dir = tempfile::tempdir().unwrap();
            let src = source(b"", true);
            let (mut controller, relay) = controller(dir.path(), src, dir.path());
            let mut config = base_config();
            config.auto_download = true;

            let result = controller.start_session(&config).await;
            let notices = texts(&relay.drain_all());
            assert!(notices
                .iter()
                .any(|n| n.starts_with("[!] Auto-download failed: Network error")));

            // Unless hhc_miner happens to be on PATH, the bare name fails to spawn
            if let Err(e) = result {
                assert!(matches!(e, SessionError::Spawn(_)));
                assert!(e.status_text().starts_with("Exception:"));
            } else {
                controller.shutdown().await.unwrap();
            }
        }

        /// Start, retrying while a freshly written executable is ETXTBSY:
        /// another test thread may be forking with the write fd still open.
        async fn start_with_retry(controller: &mut SessionController, config: &MinerConfig) {
            let mut attempt = 0;
            loop {
                match controller.start_session(config).await {
                    Ok(()) => return,
                    Err(SessionError::Spawn(e)) if attempt < 5 && e.to_string().contains("busy") => {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => panic!("start failed: {}", e),
                }
            }
        }

        fn write_script(dir: &Path, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;

            let path = dir.join("fake_miner.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_downloaded_miner_runs() {
            let dir = tempfile::tempdir().unwrap();
            let cache_dir = dir.path().join("cache");
            let launcher_dir = dir.path().join("launcher");
            std::fs::create_dir_all(&launcher_dir).unwrap();

            let src = source(b"#!/bin/sh\necho \"mined $4\"\n", false);
            let (mut controller, relay) = controller(&launcher_dir, src.clone(), &cache_dir);
            let mut config = base_config();
            config.auto_download = true;

            start_with_retry(&mut controller, &config).await;

            let session = controller.session().unwrap();
            assert!(session.executable.starts_with(cache_dir.join("bin").join("v9.9.9")));

            let items = collect_until_finished(&relay).await;
            let lines = texts(&items);
            assert!(lines.iter().any(|l| l.starts_with("[+] Miner ready:")));
            assert!(lines.contains(&"mined abc".to_string()));
            assert_eq!(src.downloads.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_rejects_second_start_while_running() {
            let dir = tempfile::tempdir().unwrap();
            let (mut controller, relay) = controller(dir.path(), source(b"", false), dir.path());
            let mut config = base_config();
            config.miner_path = Some(write_script(dir.path(), "echo started\nexec sleep 30"));

            start_with_retry(&mut controller, &config).await;
            assert_eq!(controller.status(), SessionStatus::Mining);

            assert!(matches!(
                controller.start_session(&config).await,
                Err(SessionError::AlreadyRunning)
            ));

            let outcome = controller.stop_session().await.unwrap();
            assert_eq!(outcome, StopOutcome::Stopped);
            assert_eq!(controller.status(), SessionStatus::NotMining);
            assert_eq!(controller.stop_session().await.unwrap(), StopOutcome::NotRunning);

            // The only terminal status must be the intentional stop
            let deadline = Instant::now() + Duration::from_secs(10);
            let mut last = None;
            while Instant::now() < deadline {
                let batch = relay.drain_all();
                if let Some(item) = batch
                    .iter()
                    .rev()
                    .find(|i| matches!(i, RelayItem::Finished(_)))
                {
                    last = Some(item.clone());
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(matches!(
                last,
                Some(RelayItem::Finished(TerminalStatus::Terminated { .. }))
            ));
        }

        #[tokio::test]
        async fn test_local_candidate_reported_and_download_skipped() {
            use std::os::unix::fs::PermissionsExt;

            let dir = tempfile::tempdir().unwrap();
            let local = dir.path().join("hhc_miner");
            std::fs::write(&local, "#!/bin/sh\necho local miner\n").unwrap();
            std::fs::set_permissions(&local, std::fs::Permissions::from_mode(0o755)).unwrap();

            let src = source(b"unused", false);
            let cache_dir = dir.path().join("cache");
            let (mut controller, relay) = controller(dir.path(), src.clone(), &cache_dir);
            let mut config = base_config();
            config.auto_download = true;

            start_with_retry(&mut controller, &config).await;
            let lines = texts(&collect_until_finished(&relay).await);

            assert_eq!(src.downloads.load(Ordering::SeqCst), 0);
            assert!(lines.contains(&format!(
                "[*] Using local miner {}, auto-download skipped",
                local.display()
            )));
            assert!(lines.contains(&"local miner".to_string()));
        }

        /// The miner dies (SIGINT) while the cancel request is still in flight
        #[tokio::test]
        async fn test_exit_during_cancel_counts_as_stop() {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            use tokio::net::TcpListener;

            let dir = tempfile::tempdir().unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            let (mut controller, relay) = controller(dir.path(), source(b"", false), dir.path());
            let mut config = base_config();
            config.api_url = format!("http://{}/api", addr);
            config.miner_path = Some(write_script(dir.path(), "echo started\nexec sleep 30"));
            start_with_retry(&mut controller, &config).await;
            let pid = controller.session().unwrap().pid();

            let server = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGINT);
                }
                tokio::time::sleep(Duration::from_millis(300)).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            });

            assert_eq!(controller.stop_session().await.unwrap(), StopOutcome::Stopped);
            server.await.unwrap();

            let items = collect_until_finished(&relay).await;
            let statuses: Vec<_> = items
                .iter()
                .filter_map(|i| match i {
                    RelayItem::Finished(s) => Some(*s),
                    _ => None,
                })
                .collect();
            assert_eq!(statuses.len(), 1);
            assert!(matches!(statuses[0], TerminalStatus::Terminated { .. }));
            assert!(!texts(&items).iter().any(|t| t.starts_with("Process exited")));
        }
    }
}
