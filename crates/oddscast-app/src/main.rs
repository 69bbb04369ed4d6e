// oddscast entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout carries the board)
// 2. Load config
// 3. Build the match source and the simulated odds feed
// 4. Spawn the reconciler (starts the feed)
// 5. Run the board until Ctrl+C
// 6. Tear down the reconciler and feed

use std::sync::Arc;

use anyhow::Context;
use oddscast_app::board::{self, Board};
use oddscast_app::config;
use oddscast_core::feed::SimulatedFeed;
use oddscast_core::reconciler::Reconciler;
use oddscast_core::source::{BundledSource, LiveSource, MatchSource, SourceKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("oddscast starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: source={:?}, {} candidate matches, tick {:?}",
        config.source.kind,
        config.feed.pool_size(),
        config.feed.tick_period
    );

    // 3. Build collaborators
    let source: Arc<dyn MatchSource> = match config.source.kind {
        SourceKind::Bundled => {
            info!("Using bundled dataset at {}", config.source.dataset.display());
            Arc::new(BundledSource::new(&config.source.dataset))
        }
        SourceKind::Live => {
            info!("Using live match API");
            Arc::new(LiveSource)
        }
    };
    let feed = Arc::new(
        SimulatedFeed::new(config.feed.clone()).context("invalid feed configuration")?,
    );

    // 4. Spawn the reconciler
    let handle = Reconciler::spawn(source, feed);

    // 5. Run the board
    let board = Board::new(std::io::stdout(), config.board.max_rows);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    board::run(handle, board, shutdown)
        .await
        .context("board stopped with an error")?;

    // 6. board::run already shut the reconciler down
    info!("oddscast shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (stdout is used by the board).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("oddscast.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("oddscast=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
