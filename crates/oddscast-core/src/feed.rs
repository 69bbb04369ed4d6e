// Simulated live-odds push feed.
//
// A periodic task emits randomized odds for a random subset of known matches
// on every tick. Occasionally a tick simulates a dropped connection instead:
// the feed goes to `Reconnecting` and a deferred one-shot task restarts it
// after a fixed delay.

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::model::{ConnectionState, MatchId, Odds};
use crate::publish::Broadcaster;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_ID_POOL: RangeInclusive<MatchId> = 1001..=1100;
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);
pub const DEFAULT_DISCONNECT_PROBABILITY: f64 = 1.0 / 30.0;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_ODDS_MIN: f64 = 1.70;
pub const DEFAULT_ODDS_MAX: f64 = 2.20;
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Capacity of the odds broadcast buffer. Receivers that fall further behind
/// lose the oldest events.
pub const DEFAULT_ODDS_BUFFER: usize = 1024;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum FeedConfigError {
    #[error("invalid feed setting `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

fn invalid(field: &'static str, message: impl Into<String>) -> FeedConfigError {
    FeedConfigError::Invalid {
        field,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Candidate match identifiers, inclusive on both ends.
    pub id_pool: RangeInclusive<MatchId>,
    pub tick_period: Duration,
    /// Chance per tick that the tick simulates a disconnect instead.
    pub disconnect_probability: f64,
    pub reconnect_delay: Duration,
    pub odds_min: f64,
    pub odds_max: f64,
    /// Distinct matches updated per tick.
    pub sample_size: usize,
    pub odds_buffer: usize,
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// When set, `stop()` also cancels a pending automatic reconnect.
    pub cancel_reconnect_on_stop: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            id_pool: DEFAULT_ID_POOL,
            tick_period: DEFAULT_TICK_PERIOD,
            disconnect_probability: DEFAULT_DISCONNECT_PROBABILITY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            odds_min: DEFAULT_ODDS_MIN,
            odds_max: DEFAULT_ODDS_MAX,
            sample_size: DEFAULT_SAMPLE_SIZE,
            odds_buffer: DEFAULT_ODDS_BUFFER,
            seed: None,
            cancel_reconnect_on_stop: false,
        }
    }
}

impl FeedConfig {
    /// Number of identifiers in the candidate pool.
    pub fn pool_size(&self) -> usize {
        let (start, end) = (*self.id_pool.start(), *self.id_pool.end());
        if start > end {
            0
        } else {
            usize::try_from(end - start).map_or(usize::MAX, |n| n.saturating_add(1))
        }
    }

    pub fn validate(&self) -> Result<(), FeedConfigError> {
        let pool = self.pool_size();
        if pool == 0 {
            return Err(invalid(
                "id_pool",
                format!(
                    "range {}..={} is empty",
                    self.id_pool.start(),
                    self.id_pool.end()
                ),
            ));
        }
        if self.sample_size == 0 || self.sample_size > pool {
            return Err(invalid(
                "sample_size",
                format!("must be between 1 and the pool size {pool}, got {}", self.sample_size),
            ));
        }
        let p = self.disconnect_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(invalid(
                "disconnect_probability",
                format!("must be between 0.0 and 1.0 inclusive, got {p}"),
            ));
        }
        if !(self.odds_min.is_finite() && self.odds_min > 0.0) {
            return Err(invalid(
                "odds_min",
                format!("must be a positive number, got {}", self.odds_min),
            ));
        }
        if !self.odds_max.is_finite() || self.odds_max < self.odds_min {
            return Err(invalid(
                "odds_max",
                format!("must be >= odds_min ({}), got {}", self.odds_min, self.odds_max),
            ));
        }
        if self.tick_period.is_zero() {
            return Err(invalid("tick_period", "must be greater than 0"));
        }
        if self.reconnect_delay.is_zero() {
            return Err(invalid("reconnect_delay", "must be greater than 0"));
        }
        if self.odds_buffer == 0 {
            return Err(invalid("odds_buffer", "must be greater than 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Feed trait
// ---------------------------------------------------------------------------

/// A push channel of odds updates with an observable connection state.
pub trait OddsFeed: Send + Sync + 'static {
    /// Connect and begin emitting. No-op while already connected.
    fn start(&self);

    /// Disconnect. Emits `Disconnected` only if the feed was connected.
    fn stop(&self);

    /// Stop and cancel any pending automatic reconnect.
    fn shutdown(&self);

    fn state(&self) -> ConnectionState;

    fn subscribe_odds(&self) -> broadcast::Receiver<Odds>;

    fn subscribe_state(&self) -> mpsc::UnboundedReceiver<ConnectionState>;
}

// ---------------------------------------------------------------------------
// SimulatedFeed
// ---------------------------------------------------------------------------

/// Timer-driven feed producing random odds with simulated disconnects.
///
/// `start()` spawns onto the current tokio runtime and must be called from
/// within one. Dropping the last handle aborts the periodic and reconnect
/// tasks.
pub struct SimulatedFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    config: FeedConfig,
    pool: Vec<MatchId>,
    odds_tx: broadcast::Sender<Odds>,
    states: Broadcaster<ConnectionState>,
    core: Mutex<FeedCore>,
}

struct FeedCore {
    state: ConnectionState,
    /// Bumped whenever the running tick stream is invalidated. A tick whose
    /// generation is stale exits without emitting.
    generation: u64,
    ticker: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    rng: ChaCha8Rng,
}

impl SimulatedFeed {
    pub fn new(config: FeedConfig) -> Result<Self, FeedConfigError> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let (odds_tx, _) = broadcast::channel(config.odds_buffer);
        let pool: Vec<MatchId> = config.id_pool.clone().collect();

        Ok(SimulatedFeed {
            inner: Arc::new(FeedInner {
                config,
                pool,
                odds_tx,
                states: Broadcaster::new(),
                core: Mutex::new(FeedCore {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    ticker: None,
                    reconnect: None,
                    rng,
                }),
            }),
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    /// True while an automatic reconnect is scheduled but has not fired.
    pub fn reconnect_pending(&self) -> bool {
        self.inner
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl OddsFeed for SimulatedFeed {
    fn start(&self) {
        self.inner.start();
    }

    fn stop(&self) {
        self.inner.stop(self.inner.config.cancel_reconnect_on_stop);
    }

    fn shutdown(&self) {
        self.inner.stop(true);
    }

    fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn subscribe_odds(&self) -> broadcast::Receiver<Odds> {
        self.inner.odds_tx.subscribe()
    }

    fn subscribe_state(&self) -> mpsc::UnboundedReceiver<ConnectionState> {
        self.inner.states.subscribe()
    }
}

impl FeedInner {
    fn lock(&self) -> MutexGuard<'_, FeedCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transition to `Connected` and spawn the periodic tick.
    fn start(self: &Arc<Self>) {
        let mut core = self.lock();
        if core.state == ConnectionState::Connected {
            return;
        }

        core.generation += 1;
        core.state = ConnectionState::Connected;
        self.states.publish(ConnectionState::Connected);
        info!("Odds feed connected");

        if let Some(stale) = core.ticker.take() {
            stale.abort();
        }
        let generation = core.generation;
        let period = self.config.tick_period;
        let feed = Arc::downgrade(self);
        core.ticker = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(feed) = feed.upgrade() else {
                    break;
                };
                if !feed.tick(generation) {
                    break;
                }
            }
        }));
    }

    /// Cancel the periodic tick. A pending reconnect survives unless
    /// `cancel_reconnect` is set.
    fn stop(&self, cancel_reconnect: bool) {
        let mut core = self.lock();
        if let Some(ticker) = core.ticker.take() {
            ticker.abort();
        }
        core.generation += 1;

        if cancel_reconnect {
            if let Some(reconnect) = core.reconnect.take() {
                reconnect.abort();
            }
        }

        let was_reconnecting = core.state == ConnectionState::Reconnecting;
        if core.state == ConnectionState::Connected || (was_reconnecting && cancel_reconnect) {
            core.state = ConnectionState::Disconnected;
            self.states.publish(ConnectionState::Disconnected);
            info!("Odds feed disconnected");
        }
    }

    /// Run one tick. Returns false when the tick stream should end.
    fn tick(self: &Arc<Self>, generation: u64) -> bool {
        let mut core = self.lock();
        if core.generation != generation || core.state != ConnectionState::Connected {
            return false;
        }

        if core.rng.gen_bool(self.config.disconnect_probability) {
            self.simulate_disconnect(&mut core);
            return false;
        }

        let selected: Vec<MatchId> = self
            .pool
            .choose_multiple(&mut core.rng, self.config.sample_size)
            .copied()
            .collect();
        for match_id in selected {
            let team_a = core.rng.gen_range(self.config.odds_min..=self.config.odds_max);
            let team_b = core.rng.gen_range(self.config.odds_min..=self.config.odds_max);
            // No receivers is fine; the event is simply not observed.
            let _ = self.odds_tx.send(Odds::new(match_id, team_a, team_b));
        }
        debug!("Feed tick emitted {} odds updates", self.config.sample_size);
        true
    }

    /// Goes straight from `Connected` to `Reconnecting`; no `Disconnected` is
    /// emitted in between.
    fn simulate_disconnect(self: &Arc<Self>, core: &mut FeedCore) {
        if let Some(ticker) = core.ticker.take() {
            ticker.abort();
        }
        core.generation += 1;
        core.state = ConnectionState::Reconnecting;
        self.states.publish(ConnectionState::Reconnecting);

        let delay = self.config.reconnect_delay;
        warn!("Simulated odds feed disconnect, reconnecting in {:?}", delay);

        if let Some(previous) = core.reconnect.take() {
            previous.abort();
        }
        let feed = Arc::downgrade(self);
        core.reconnect = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(feed) = feed.upgrade() {
                info!("Automatic reconnect firing");
                feed.start();
            }
        }));
    }
}

impl Drop for FeedInner {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(ticker) = core.ticker.take() {
            ticker.abort();
        }
        if let Some(reconnect) = core.reconnect.take() {
            reconnect.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn quiet_config() -> FeedConfig {
        FeedConfig {
            disconnect_probability: 0.0,
            seed: Some(7),
            ..FeedConfig::default()
        }
    }

    fn always_drop_config() -> FeedConfig {
        FeedConfig {
            disconnect_probability: 1.0,
            seed: Some(7),
            ..FeedConfig::default()
        }
    }

    fn drain_odds(rx: &mut broadcast::Receiver<Odds>) -> Vec<Odds> {
        let mut out = Vec::new();
        while let Ok(odds) = rx.try_recv() {
            out.push(odds);
        }
        out
    }

    fn drain_states(rx: &mut mpsc::UnboundedReceiver<ConnectionState>) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(state) = rx.try_recv() {
            out.push(state);
        }
        out
    }

    // -- configuration --

    #[test]
    fn default_config_matches_documented_surface() {
        let config = FeedConfig::default();
        assert_eq!(config.id_pool, 1001..=1100);
        assert_eq!(config.pool_size(), 100);
        assert_eq!(config.tick_period, Duration::from_secs(1));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert!((config.disconnect_probability - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(config.sample_size, 10);
        assert_eq!((config.odds_min, config.odds_max), (1.70, 2.20));
        assert!(!config.cancel_reconnect_on_stop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_sample_larger_than_pool() {
        let config = FeedConfig {
            id_pool: 1..=5,
            sample_size: 6,
            ..FeedConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FeedConfigError::Invalid { field: "sample_size", .. })
        ));
    }

    #[test]
    fn rejects_empty_pool() {
        let config = FeedConfig {
            id_pool: 10..=9,
            ..FeedConfig::default()
        };
        assert_eq!(config.pool_size(), 0);
        assert!(matches!(
            config.validate(),
            Err(FeedConfigError::Invalid { field: "id_pool", .. })
        ));
    }

    #[test]
    fn rejects_probability_out_of_range() {
        let config = FeedConfig {
            disconnect_probability: 1.5,
            ..FeedConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FeedConfigError::Invalid { field: "disconnect_probability", .. })
        ));
    }

    #[test]
    fn rejects_inverted_or_non_positive_odds_range() {
        let inverted = FeedConfig {
            odds_min: 2.2,
            odds_max: 1.7,
            ..FeedConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(FeedConfigError::Invalid { field: "odds_max", .. })
        ));

        let zero = FeedConfig {
            odds_min: 0.0,
            ..FeedConfig::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(FeedConfigError::Invalid { field: "odds_min", .. })
        ));
    }

    #[test]
    fn rejects_zero_periods() {
        let config = FeedConfig {
            tick_period: Duration::ZERO,
            ..FeedConfig::default()
        };
        assert!(SimulatedFeed::new(config).is_err());
    }

    // -- state machine --

    #[tokio::test(start_paused = true)]
    async fn start_twice_emits_one_connected_and_one_tick_stream() {
        let feed = SimulatedFeed::new(quiet_config()).unwrap();
        let mut states = feed.subscribe_state();
        let mut odds = feed.subscribe_odds();

        feed.start();
        feed.start();
        assert_eq!(drain_states(&mut states), vec![ConnectionState::Connected]);

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain_odds(&mut odds).len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let feed = SimulatedFeed::new(quiet_config()).unwrap();
        let mut odds = feed.subscribe_odds();

        feed.start();
        time::sleep(Duration::from_millis(900)).await;
        assert!(drain_odds(&mut odds).is_empty());

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(drain_odds(&mut odds).len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_emits_distinct_ids_within_range() {
        let feed = SimulatedFeed::new(quiet_config()).unwrap();
        let mut odds = feed.subscribe_odds();

        feed.start();
        // Sample between ticks rather than on the tick instant.
        time::sleep(Duration::from_millis(500)).await;
        for _ in 0..5 {
            time::sleep(Duration::from_secs(1)).await;
            let batch = drain_odds(&mut odds);
            assert_eq!(batch.len(), 10);

            let ids: HashSet<MatchId> = batch.iter().map(|o| o.match_id).collect();
            assert_eq!(ids.len(), 10, "identifiers within a tick must be distinct");
            for quote in &batch {
                assert!((1001..=1100).contains(&quote.match_id));
                assert!((1.70..=2.20).contains(&quote.team_a));
                assert!((1.70..=2.20).contains(&quote.team_b));
            }
        }
    }

    #[tokio::test]
    async fn stop_while_disconnected_is_silent() {
        let feed = SimulatedFeed::new(quiet_config()).unwrap();
        let mut states = feed.subscribe_state();

        feed.stop();
        feed.stop();
        assert!(drain_states(&mut states).is_empty());
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_connected_emits_once_and_halts_ticks() {
        let feed = SimulatedFeed::new(quiet_config()).unwrap();
        let mut states = feed.subscribe_state();
        let mut odds = feed.subscribe_odds();

        feed.start();
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain_odds(&mut odds).len(), 10);

        feed.stop();
        feed.stop();
        assert_eq!(
            drain_states(&mut states),
            vec![ConnectionState::Connected, ConnectionState::Disconnected]
        );

        time::sleep(Duration::from_secs(5)).await;
        assert!(drain_odds(&mut odds).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_reconnects() {
        let feed = SimulatedFeed::new(quiet_config()).unwrap();
        let mut states = feed.subscribe_state();
        let mut odds = feed.subscribe_odds();

        feed.start();
        feed.stop();
        feed.start();
        assert_eq!(
            drain_states(&mut states),
            vec![
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Connected,
            ]
        );

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain_odds(&mut odds).len(), 10);
    }

    // -- simulated disconnect --

    #[tokio::test(start_paused = true)]
    async fn simulated_disconnect_reconnects_after_delay() {
        let feed = SimulatedFeed::new(always_drop_config()).unwrap();
        let mut states = feed.subscribe_state();
        let mut odds = feed.subscribe_odds();

        feed.start();
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            drain_states(&mut states),
            vec![ConnectionState::Connected, ConnectionState::Reconnecting]
        );
        assert_eq!(feed.state(), ConnectionState::Reconnecting);
        assert!(feed.reconnect_pending());
        assert!(drain_odds(&mut odds).is_empty());

        // Reconnect fires at t=3s.
        time::sleep(Duration::from_secs(1)).await;
        assert!(drain_states(&mut states).is_empty());

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain_states(&mut states), vec![ConnectionState::Connected]);
        assert_eq!(feed.state(), ConnectionState::Connected);

        feed.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_does_not_cancel_pending_reconnect_by_default() {
        let feed = SimulatedFeed::new(always_drop_config()).unwrap();
        let mut states = feed.subscribe_state();

        feed.start();
        time::sleep(Duration::from_millis(1500)).await;
        drain_states(&mut states);

        feed.stop();
        assert!(drain_states(&mut states).is_empty());
        assert_eq!(feed.state(), ConnectionState::Reconnecting);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain_states(&mut states), vec![ConnectionState::Connected]);

        feed.stop();
        assert_eq!(drain_states(&mut states), vec![ConnectionState::Disconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_reconnect_when_configured() {
        let feed = SimulatedFeed::new(FeedConfig {
            cancel_reconnect_on_stop: true,
            ..always_drop_config()
        })
        .unwrap();
        let mut states = feed.subscribe_state();

        feed.start();
        time::sleep(Duration::from_millis(1500)).await;
        drain_states(&mut states);

        feed.stop();
        assert_eq!(drain_states(&mut states), vec![ConnectionState::Disconnected]);
        assert!(!feed.reconnect_pending());

        time::sleep(Duration::from_secs(5)).await;
        assert!(drain_states(&mut states).is_empty());
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reconnect() {
        let feed = SimulatedFeed::new(always_drop_config()).unwrap();
        let mut states = feed.subscribe_state();

        feed.start();
        time::sleep(Duration::from_millis(1500)).await;
        drain_states(&mut states);

        feed.shutdown();
        assert_eq!(drain_states(&mut states), vec![ConnectionState::Disconnected]);

        time::sleep(Duration::from_secs(5)).await;
        assert!(drain_states(&mut states).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_feeds_are_reproducible() {
        let first = SimulatedFeed::new(quiet_config()).unwrap();
        let second = SimulatedFeed::new(quiet_config()).unwrap();
        let mut rx_first = first.subscribe_odds();
        let mut rx_second = second.subscribe_odds();

        first.start();
        second.start();
        time::sleep(Duration::from_millis(2500)).await;

        let a = drain_odds(&mut rx_first);
        let b = drain_odds(&mut rx_second);
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
    }
}
