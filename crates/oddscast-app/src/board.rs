// Headless match board.
//
// Subscribes to a running reconciler and writes a plain-text rendering of the
// match list to any `Write` sink: a status line on every connection change,
// the full list whenever it is reloaded, and only the rows whose odds changed
// on every odds update.

use std::future::Future;
use std::io::Write;

use anyhow::Context;
use oddscast_core::diff::OddsTracker;
use oddscast_core::model::{ConnectionState, Match, Odds, OddsMap};
use oddscast_core::reconciler::{LoadStatus, ReconcilerHandle};
use tracing::{info, warn};

pub struct Board<W: Write> {
    out: W,
    max_rows: usize,
    matches: Vec<Match>,
    tracker: OddsTracker,
    connection: Option<ConnectionState>,
}

impl<W: Write> Board<W> {
    pub fn new(out: W, max_rows: usize) -> Self {
        Board {
            out,
            max_rows,
            matches: Vec::new(),
            tracker: OddsTracker::new(),
            connection: None,
        }
    }

    /// Print the status line if the state differs from the last one shown.
    pub fn on_connection(&mut self, state: ConnectionState) -> std::io::Result<()> {
        if self.connection == Some(state) {
            return Ok(());
        }
        self.connection = Some(state);
        writeln!(self.out, "== feed {state} ==")
    }

    /// Replace the list and print it. Odds already shown here do not flash on
    /// the next update.
    pub fn on_matches(&mut self, matches: Vec<Match>, odds: &OddsMap) -> std::io::Result<()> {
        self.matches = matches;
        self.tracker = OddsTracker::with_baseline(odds.clone());

        writeln!(self.out, "-- {} matches --", self.matches.len())?;
        for m in self.matches.iter().take(self.max_rows) {
            writeln!(self.out, "  {}", format_row(m, odds.get(&m.match_id)))?;
        }
        if self.matches.len() > self.max_rows {
            writeln!(self.out, "  ... {} more", self.matches.len() - self.max_rows)?;
        }
        Ok(())
    }

    /// Print the listed matches whose odds changed. Returns how many rows
    /// were flashed.
    pub fn on_odds(&mut self, odds: &OddsMap) -> std::io::Result<usize> {
        let changed = self.tracker.observe(odds);
        let mut flashed = 0;
        for m in self.matches.iter().filter(|m| changed.contains(&m.match_id)) {
            writeln!(self.out, "* {}", format_row(m, odds.get(&m.match_id)))?;
            flashed += 1;
        }
        Ok(flashed)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// `id  start teamA vs teamB  a / b`, with `-` for matches without odds.
pub fn format_row(m: &Match, odds: Option<&Odds>) -> String {
    let quotes = match odds {
        Some(o) => format!("{:.2} / {:.2}", o.team_a, o.team_b),
        None => "- / -".to_string(),
    };
    format!(
        "{:>5}  {} {} vs {}  {}",
        m.match_id,
        m.start_time.format("%m-%d %H:%M"),
        m.team_a,
        m.team_b,
        quotes
    )
}

/// Drive `board` from the reconciler until `shutdown` resolves or the
/// reconciler goes away, then tear the reconciler down.
pub async fn run<W, F>(handle: ReconcilerHandle, mut board: Board<W>, shutdown: F) -> anyhow::Result<Board<W>>
where
    W: Write,
    F: Future<Output = ()>,
{
    let mut connection = handle.subscribe_connection();
    let mut matches_rx = handle.matches();
    let mut odds_rx = handle.odds();

    board
        .on_connection(handle.connection_state())
        .context("failed to write board")?;

    match handle.load_initial().await {
        LoadStatus::Loaded { matches, odds } => {
            info!("Board loaded {} matches with {} odds", matches, odds);
        }
        LoadStatus::Failed => {
            warn!("Initial load failed, board shows live updates only");
        }
        LoadStatus::Superseded => {
            info!("Initial load superseded by a newer one");
        }
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }

            Some(state) = connection.recv() => {
                board.on_connection(state).context("failed to write board")?;
            }

            changed = matches_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let matches = matches_rx.borrow_and_update().clone();
                let odds = odds_rx.borrow_and_update().clone();
                board.on_matches(matches, &odds).context("failed to write board")?;
            }

            changed = odds_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let odds = odds_rx.borrow_and_update().clone();
                board.on_odds(&odds).context("failed to write board")?;
            }
        }
    }

    handle.shutdown().await;
    Ok(board)
}
