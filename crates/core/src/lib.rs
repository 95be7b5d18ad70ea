//! # SriQuant.ai Core
//!
//! Runtime, timing and numeric building blocks shared by the streaming
//! engine.
//!
//! ## Architecture Principles
//!
//! 1. **Single-threaded async with monoio** - one thread owns all client state
//! 2. **Nanosecond timing** - latency tracking with `PerfTimer`
//! 3. **Exact decimals** - prices and sizes never pass through `f64`
//! 4. **Unified logging** - `tracing` everywhere, optional ftlog sink

pub mod runtime;
pub mod timing;
pub mod fixed;
pub mod logging;

pub use runtime::{RuntimeConfig, SriQuantRuntime, run_sriquant};
pub use timing::{iso8601, milliseconds, nanos, PerfTimer, Timestamp};
pub use fixed::{Fixed, FixedError};
pub use logging::init_logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::runtime::{RuntimeConfig, SriQuantRuntime, run_sriquant};
    pub use crate::timing::{iso8601, milliseconds, nanos, PerfTimer, Timestamp};
    pub use crate::fixed::{Fixed, FixedError};
    pub use crate::logging::init_logging;

    pub use monoio;
    pub use serde::{Deserialize, Serialize};
    pub use chrono::{DateTime, Utc};
}
