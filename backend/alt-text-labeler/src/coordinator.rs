//! Stream Coordinator
//!
//! Owns the connection state and the in-memory cursor, and ties the event
//! source, classifier, applier and cursor store together. Events arrive on a
//! channel and are handled one at a time in arrival order. The checkpoint
//! ticker and the shutdown future are multiplexed with the channel, so they
//! only run between events, never in the middle of one.

use crate::applier::{ApplyOutcome, LabelApplier};
use crate::classifier::classify;
use crate::cursor::{CursorStore, SharedCursor};
use crate::firehose::StreamEvent;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

/// Counters reported when the coordinator stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub events: u64,
    pub qualified: u64,
    pub labeled: u64,
    pub duplicates_skipped: u64,
    pub label_failures: u64,
    pub checkpoints: u64,
    pub checkpoint_failures: u64,
}

pub struct StreamCoordinator {
    state: ConnectionState,
    cursor: SharedCursor,
    store: Arc<dyn CursorStore>,
    applier: LabelApplier,
    target_did: String,
    checkpoint_interval: Duration,
    close_signal: Option<watch::Sender<bool>>,
    stats: CoordinatorStats,
}

impl StreamCoordinator {
    /// # Arguments
    ///
    /// * `cursor` - In-memory cursor, shared with the event source
    /// * `store` - Where checkpoints are written
    /// * `applier` - Labels qualifying posts
    /// * `target_did` - The only account whose posts are labeled
    /// * `checkpoint_interval` - Checkpoint period while connected
    pub fn new(
        cursor: SharedCursor,
        store: Arc<dyn CursorStore>,
        applier: LabelApplier,
        target_did: impl Into<String>,
        checkpoint_interval: Duration,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            cursor,
            store,
            applier,
            target_did: target_did.into(),
            checkpoint_interval,
            close_signal: None,
            stats: CoordinatorStats::default(),
        }
    }

    /// Signal sent to the event source once the cursor has been flushed
    pub fn with_close_signal(mut self, close: watch::Sender<bool>) -> Self {
        self.close_signal = Some(close);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.get()
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == ConnectionState::ShuttingDown || self.state == next {
            return;
        }
        debug!(from = ?self.state, to = ?next, "Connection state changed");
        self.state = next;
    }

    /// Apply one event to the coordinator state
    ///
    /// Posts and progress events advance the cursor after they are handled,
    /// whether or not labeling succeeded.
    pub async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connecting { cursor } => {
                info!(cursor = cursor, "Connecting to firehose");
                self.transition(ConnectionState::Connecting);
            }
            StreamEvent::Open { cursor } => {
                info!(cursor = cursor, "Firehose stream open");
                self.transition(ConnectionState::Connected);
            }
            StreamEvent::Post(post) => {
                self.stats.events += 1;
                if classify(&post, &self.target_did) {
                    self.stats.qualified += 1;
                    match self.applier.apply(&post).await {
                        Ok(ApplyOutcome::Labeled) => self.stats.labeled += 1,
                        Ok(ApplyOutcome::AlreadyLabeled) => self.stats.duplicates_skipped += 1,
                        // Logged by the applier
                        Err(_) => self.stats.label_failures += 1,
                    }
                }
                self.cursor.advance(post.time_us);
            }
            StreamEvent::Progress { time_us } => {
                self.stats.events += 1;
                self.cursor.advance(time_us);
            }
            StreamEvent::Close => {
                info!(cursor = self.cursor.get(), "Firehose connection closed");
                self.transition(ConnectionState::Disconnected);
            }
            StreamEvent::Error(message) => {
                warn!(error = %message, cursor = self.cursor.get(), "Firehose connection error");
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    /// Persist the in-memory cursor; returns whether a write succeeded
    ///
    /// A zero cursor is never written.
    pub async fn checkpoint(&mut self) -> bool {
        let cursor = self.cursor.get();
        if cursor == 0 {
            debug!("Cursor unset, skipping checkpoint");
            return false;
        }

        match self.store.save(cursor).await {
            Ok(()) => {
                self.stats.checkpoints += 1;
                debug!(cursor = cursor, "Cursor checkpointed");
                true
            }
            Err(e) => {
                self.stats.checkpoint_failures += 1;
                error!(error = %e, cursor = cursor, "Failed to checkpoint cursor");
                false
            }
        }
    }

    /// Consume events until `shutdown` resolves or the channel closes, then
    /// flush the cursor and signal the event source to close.
    pub async fn run<F>(mut self, mut events: mpsc::Receiver<StreamEvent>, shutdown: F) -> CoordinatorStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Event source stopped");
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => {
                    self.checkpoint().await;
                }
            }

            match (self.state == ConnectionState::Connected, ticker.is_some()) {
                (true, false) => ticker = Some(checkpoint_ticker(self.checkpoint_interval)),
                (false, true) => {
                    debug!("Checkpoint timer stopped");
                    ticker = None;
                }
                _ => {}
            }
        }

        self.shutdown().await
    }

    async fn shutdown(mut self) -> CoordinatorStats {
        self.state = ConnectionState::ShuttingDown;
        info!(cursor = self.cursor.get(), "Flushing cursor before exit");
        self.checkpoint().await;

        if let Some(close) = self.close_signal.take() {
            let _ = close.send(true);
        }

        info!(stats = ?self.stats, "Stream coordinator stopped");
        self.stats
    }
}

/// First tick one full interval after connecting
fn checkpoint_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
