//! Output relay between the child-process readers and the display loop
//!
//! Readers push decoded lines without blocking; the display loop polls on a
//! fixed cadence and never waits on process I/O.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tokio::time::{Interval, MissedTickBehavior};

use super::supervisor::TerminalStatus;

/// Poll cadence of the display loop
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One item delivered to the display sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayItem {
    /// A line of child output with control sequences removed
    Line(String),
    /// A message from the launcher itself (download progress, stop notices)
    Notice(String),
    /// The child process is gone; always the last item of a session
    Finished(TerminalStatus),
}

impl RelayItem {
    /// Text to show for this item, if any
    pub fn display_text(&self) -> Option<String> {
        match self {
            RelayItem::Line(line) | RelayItem::Notice(line) => Some(line.clone()),
            RelayItem::Finished(status) => status.report(),
        }
    }
}

/// Producer side, cloned into each reader thread
#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: Sender<RelayItem>,
}

impl RelaySender {
    /// Enqueue a line of child output. Never blocks.
    pub fn push(&self, line: String) {
        self.send(RelayItem::Line(line));
    }

    /// Enqueue a launcher message
    pub fn notice(&self, message: impl Into<String>) {
        self.send(RelayItem::Notice(message.into()));
    }

    pub(crate) fn finish(&self, status: TerminalStatus) {
        self.send(RelayItem::Finished(status));
    }

    fn send(&self, item: RelayItem) {
        // The consumer going away just means nobody is watching anymore
        if self.tx.send(item).is_err() {
            tracing::trace!("Output relay consumer dropped");
        }
    }
}

/// Consumer side of the relay
#[derive(Debug)]
pub struct OutputRelay {
    rx: Receiver<RelayItem>,
}

impl OutputRelay {
    /// Take at most one queued item
    pub fn drain_one(&self) -> Option<RelayItem> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take everything currently queued
    pub fn drain_all(&self) -> Vec<RelayItem> {
        self.rx.try_iter().collect()
    }
}

/// Create a connected sender/relay pair
pub fn channel() -> (RelaySender, OutputRelay) {
    let (tx, rx) = unbounded();
    (RelaySender { tx }, OutputRelay { rx })
}

/// How many items the display loop takes per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainMode {
    /// At most one item per tick
    #[default]
    Paced,
    /// Everything available per tick
    Eager,
}

/// Fixed-cadence consumer for a cooperative display loop
pub struct RelayPoller {
    relay: OutputRelay,
    mode: DrainMode,
    interval: Interval,
}

impl RelayPoller {
    /// Must be created inside a tokio runtime
    pub fn new(relay: OutputRelay, mode: DrainMode, period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            relay,
            mode,
            interval,
        }
    }

    /// Wait for the next tick, then drain according to the mode
    pub async fn tick(&mut self) -> Vec<RelayItem> {
        self.interval.tick().await;
        self.drain()
    }

    /// Drain without waiting
    pub fn drain(&mut self) -> Vec<RelayItem> {
        match self.mode {
            DrainMode::Paced => self.relay.drain_one().into_iter().collect(),
            DrainMode::Eager => self.relay.drain_all(),
        }
    }

    pub fn relay(&self) -> &OutputRelay {
        &self.relay
    }
}
