//! `mine` command: start a session and stream its output

use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use super::{load_settings, ProfileOverrides, ProfileSelector};
use crate::host::{self, DrainMode, RelayItem, RelayPoller, DEFAULT_STOP_TIMEOUT, POLL_INTERVAL};
use crate::session::{
    is_error_text, LauncherOptions, SessionController, StopOutcome,
};
use crate::updater::{BinaryCache, GitHubReleaseSource};

#[derive(Debug, Clone, Args)]
pub struct MineArgs {
    #[command(flatten)]
    pub selector: ProfileSelector,

    #[command(flatten)]
    pub overrides: ProfileOverrides,

    /// Show all queued output each tick instead of one line per tick
    #[arg(long)]
    pub eager: bool,

    /// Seconds to wait for the miner to exit before killing it
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub stop_timeout: u64,

    /// Directory for downloaded miner binaries
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for MineArgs {
    fn default() -> Self {
        Self {
            selector: ProfileSelector::default(),
            overrides: ProfileOverrides::default(),
            eager: false,
            stop_timeout: DEFAULT_STOP_TIMEOUT.as_secs(),
            cache_dir: None,
        }
    }
}

/// Run the miner until it exits or Ctrl-C stops it
pub async fn run(args: MineArgs, config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config.as_ref())?;
    let mut profile = settings.profile(&args.selector.profile);
    args.overrides.apply(&mut profile);
    let miner_config = profile.to_config();

    let (sender, relay) = host::relay::channel();
    let options = LauncherOptions {
        stop_timeout: Duration::from_secs(args.stop_timeout),
        ..LauncherOptions::default()
    };
    let mut controller = SessionController::new(options, sender);
    if let Some(dir) = args.cache_dir {
        let source = GitHubReleaseSource::new().context("Failed to set up release feed")?;
        controller = controller.with_cache(BinaryCache::new(dir, Arc::new(source)));
    }

    let mode = if args.eager {
        DrainMode::Eager
    } else {
        DrainMode::Paced
    };
    let mut poller = RelayPoller::new(relay, mode, POLL_INTERVAL);

    // Download progress is relayed while the start is in flight
    let started = {
        let start = controller.start_session(&miner_config);
        tokio::pin!(start);
        loop {
            tokio::select! {
                result = &mut start => break result,
                items = poller.tick() => show_items(&items),
            }
        }
    };

    if let Err(e) = started {
        show_items(&poller.relay().drain_all());
        eprintln!("{}", e.status_text());
        return Err(e.into());
    }
    if let Some(session) = controller.session() {
        tracing::debug!(
            "Mining with {} (pid {}) since {}",
            session.executable.display(),
            session.pid(),
            session.started_at.format("%H:%M:%S")
        );
    }
    println!("{}", controller.status());

    let exit_status = stream_until_finished(&mut controller, &mut poller).await;

    controller.shutdown().await?;
    show_items(&poller.relay().drain_all());
    println!("{}", controller.status());

    match exit_status {
        Some(status) if status.is_unexpected() => {
            anyhow::bail!("Miner exited unexpectedly (code {:?})", status.code())
        }
        _ => Ok(()),
    }
}

/// Display loop: one poll per tick until the process reports its exit
async fn stream_until_finished(
    controller: &mut SessionController,
    poller: &mut RelayPoller,
) -> Option<host::TerminalStatus> {
    let stop_requested = Cell::new(false);
    let stop = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
        stop_requested.set(true);
        eprintln!("Stopping miner...");
        controller.stop_session().await
    };
    tokio::pin!(stop);

    let mut stop_done = false;
    let mut finished = None;

    loop {
        tokio::select! {
            items = poller.tick() => {
                show_items(&items);
                if finished.is_none() {
                    finished = items.iter().find_map(|item| match item {
                        RelayItem::Finished(status) => Some(*status),
                        _ => None,
                    });
                }
            }
            outcome = &mut stop, if !stop_done => {
                stop_done = true;
                match outcome {
                    Ok(StopOutcome::Killed) => tracing::warn!("Miner was killed after the stop timeout"),
                    Ok(outcome) => tracing::debug!("Stop finished: {:?}", outcome),
                    Err(e) => {
                        eprintln!("{}", e.status_text());
                        break;
                    }
                }
            }
        }

        // A stop in flight still owes its final notice
        if finished.is_some() && (!stop_requested.get() || stop_done) {
            break;
        }
    }

    finished
}

fn show_items(items: &[RelayItem]) {
    for item in items {
        let Some(text) = item.display_text() else {
            continue;
        };
        if is_error_text(&text) {
            eprintln!("{}", text);
        } else {
            println!("{}", text);
        }
    }
}
