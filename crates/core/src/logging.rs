//! Unified logging integration
//!
//! Every crate in the workspace logs through `tracing`. The default sink is
//! a fmt subscriber filtered by `RUST_LOG`; the `ftlog` feature routes
//! records through ftlog's bounded background writer instead.

use std::sync::Once;
#[cfg(not(feature = "ftlog"))]
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Install the process-wide log sink. Safe to call more than once.
pub fn init_logging() {
    INIT.call_once(|| {
        #[cfg(feature = "ftlog")]
        init_ftlog();

        #[cfg(not(feature = "ftlog"))]
        init_tracing();
    });
}

#[cfg(feature = "ftlog")]
fn init_ftlog() {
    match ftlog::builder()
        .max_log_level(ftlog::LevelFilter::Debug)
        .bounded(100_000, false)
        .utc()
        .try_init()
    {
        Ok(guard) => {
            // ftlog flushes when the guard drops; keep it for the process lifetime
            Box::leak(Box::new(guard));
            tracing::info!("📝 Initialized ftlog unified logging");
        }
        Err(e) => eprintln!("ftlog initialisation failed: {e}"),
    }
}

#[cfg(not(feature = "ftlog"))]
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    // A test harness may already have installed a subscriber
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::debug!("📝 Initialized tracing logging");
    }
}

/// Log an operation latency, switching to milliseconds above 1ms
#[macro_export]
macro_rules! log_latency {
    ($operation:expr, $duration_micros:expr) => {
        if $duration_micros < 1000 {
            tracing::debug!("⚡ {} completed in {}μs", $operation, $duration_micros);
        } else {
            tracing::info!("⚡ {} completed in {:.3}ms", $operation, $duration_micros as f64 / 1000.0);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($operation:expr, $error:expr) => {
        tracing::error!("❌ {} failed: {}", $operation, $error);
    };
}
