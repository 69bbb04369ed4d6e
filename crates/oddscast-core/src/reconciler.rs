// State reconciler: the view model behind the match board.
//
// A single actor task owns the match list and odds map. It merges the initial
// snapshot from a `MatchSource` with streamed updates from an `OddsFeed`, and
// republishes the feed's connection state. Observers read through watch
// channels (latest value) and a lossless connection-state subscription.

use std::sync::Arc;

use futures_util::future::try_join;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::feed::OddsFeed;
use crate::model::{odds_map_from, sort_by_start_desc, ConnectionState, Match, Odds, OddsMap};
use crate::publish::Broadcaster;
use crate::source::{MatchSource, SourceError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Outcome of an initial load. Failures are logged by the reconciler and
/// only reported here as a status; prior state stays visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded { matches: usize, odds: usize },
    Failed,
    /// Fetched, but a later load had already been applied, so the result
    /// was discarded.
    Superseded,
}

enum Command {
    LoadInitial { reply: oneshot::Sender<LoadStatus> },
    Shutdown,
}

/// Result of a fetch running off the actor, delivered back into it.
struct LoadDone {
    seq: u64,
    result: Result<(Vec<Match>, Vec<Odds>), SourceError>,
    reply: oneshot::Sender<LoadStatus>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Client side of a running reconciler.
pub struct ReconcilerHandle {
    cmd_tx: mpsc::Sender<Command>,
    matches_rx: watch::Receiver<Vec<Match>>,
    odds_rx: watch::Receiver<OddsMap>,
    connection_rx: watch::Receiver<ConnectionState>,
    connection: Broadcaster<ConnectionState>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Fetch matches and odds and replace the current state with them.
    pub async fn load_initial(&self) -> LoadStatus {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::LoadInitial { reply }).await.is_err() {
            warn!("load_initial called after the reconciler stopped");
            return LoadStatus::Failed;
        }
        rx.await.unwrap_or(LoadStatus::Failed)
    }

    /// Matches sorted by start time, latest first.
    pub fn matches(&self) -> watch::Receiver<Vec<Match>> {
        self.matches_rx.clone()
    }

    pub fn odds(&self) -> watch::Receiver<OddsMap> {
        self.odds_rx.clone()
    }

    /// Every connection-state transition from now on, in order.
    pub fn subscribe_connection(&self) -> mpsc::UnboundedReceiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Last connection state republished by the reconciler.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_rx.borrow()
    }

    /// Tear down the feed and stop the actor.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Reconciler task ended abnormally: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub struct Reconciler {
    source: Arc<dyn MatchSource>,
    feed: Arc<dyn OddsFeed>,
    matches_tx: watch::Sender<Vec<Match>>,
    odds_tx: watch::Sender<OddsMap>,
    connection_tx: watch::Sender<ConnectionState>,
    connection: Broadcaster<ConnectionState>,
    /// Sequence number handed to the most recently issued load.
    issued_loads: u64,
    /// Sequence number of the most recently applied load.
    applied_load: u64,
}

impl Reconciler {
    /// Subscribe to the feed, start it, and run the reconciler on a new task.
    pub fn spawn(source: Arc<dyn MatchSource>, feed: Arc<dyn OddsFeed>) -> ReconcilerHandle {
        let odds_events = feed.subscribe_odds();
        let state_events = feed.subscribe_state();

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (matches_tx, matches_rx) = watch::channel(Vec::new());
        let (odds_tx, odds_rx) = watch::channel(OddsMap::new());
        let (connection_tx, connection_rx) = watch::channel(feed.state());
        let connection = Broadcaster::new();

        let reconciler = Reconciler {
            source,
            feed: Arc::clone(&feed),
            matches_tx,
            odds_tx,
            connection_tx,
            connection: connection.clone(),
            issued_loads: 0,
            applied_load: 0,
        };
        let task = tokio::spawn(reconciler.run(cmd_rx, odds_events, state_events));

        feed.start();

        ReconcilerHandle {
            cmd_tx,
            matches_rx,
            odds_rx,
            connection_rx,
            connection,
            task,
        }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut odds_events: broadcast::Receiver<Odds>,
        mut state_events: mpsc::UnboundedReceiver<ConnectionState>,
    ) {
        info!("Reconciler started");

        let (loaded_tx, mut loaded_rx) = mpsc::channel::<LoadDone>(4);

        // Closed streams are parked so select! does not spin on them.
        let mut odds_open = true;
        let mut state_open = true;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::LoadInitial { reply }) => {
                            self.begin_load(loaded_tx.clone(), reply);
                        }
                        Some(Command::Shutdown) => {
                            info!("Reconciler shutdown requested");
                            break;
                        }
                        None => {
                            info!("All reconciler handles dropped, shutting down");
                            break;
                        }
                    }
                }

                Some(done) = loaded_rx.recv() => {
                    self.finish_load(done);
                }

                event = odds_events.recv(), if odds_open => {
                    match event {
                        Ok(odds) => self.apply_odds(odds),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Reconciler fell behind the odds feed, {} updates dropped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("Odds stream closed");
                            odds_open = false;
                        }
                    }
                }

                state = state_events.recv(), if state_open => {
                    match state {
                        Some(state) => self.apply_connection(state),
                        None => {
                            info!("Connection-state stream closed");
                            state_open = false;
                        }
                    }
                }
            }
        }

        self.feed.shutdown();
        // Deliver the teardown transition before exiting.
        while let Ok(state) = state_events.try_recv() {
            self.apply_connection(state);
        }
        info!("Reconciler exiting");
    }

    fn begin_load(&mut self, loaded_tx: mpsc::Sender<LoadDone>, reply: oneshot::Sender<LoadStatus>) {
        self.issued_loads += 1;
        let seq = self.issued_loads;
        info!("Fetching initial matches and odds (load #{})", seq);
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            let result = try_join(source.fetch_matches(), source.fetch_odds()).await;
            let _ = loaded_tx.send(LoadDone { seq, result, reply }).await;
        });
    }

    fn finish_load(&mut self, done: LoadDone) {
        let status = match done.result {
            Ok(_) if done.seq < self.applied_load => {
                warn!(
                    "Discarding load #{}, load #{} was already applied",
                    done.seq, self.applied_load
                );
                LoadStatus::Superseded
            }
            Ok((mut matches, odds)) => {
                self.applied_load = done.seq;
                sort_by_start_desc(&mut matches);
                let odds = odds_map_from(odds);
                let status = LoadStatus::Loaded {
                    matches: matches.len(),
                    odds: odds.len(),
                };
                info!(
                    "Initial load complete: {} matches, {} odds",
                    matches.len(),
                    odds.len()
                );
                self.matches_tx.send_replace(matches);
                self.odds_tx.send_replace(odds);
                status
            }
            Err(e) => {
                error!("Initial fetch failed, keeping current state: {}", e);
                LoadStatus::Failed
            }
        };
        let _ = done.reply.send(status);
    }

    fn apply_odds(&self, odds: Odds) {
        debug!(
            "Odds update for match {}: {:.2} / {:.2}",
            odds.match_id, odds.team_a, odds.team_b
        );
        self.odds_tx.send_modify(|map| {
            map.insert(odds.match_id, odds);
        });
    }

    fn apply_connection(&self, state: ConnectionState) {
        info!("Feed connection state: {}", state);
        self.connection_tx.send_replace(state);
        self.connection.publish(state);
    }
}
