//! Single-threaded monoio runtime for streaming workloads
//!
//! - One thread drives every connection, timer and dispatch task
//! - io_uring when the kernel supports it, epoll otherwise (fusion driver)
//! - Timers are always enabled; keepalive and connection timeouts need them

use monoio::{FusionDriver, RuntimeBuilder};
use tracing::info;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Label used in log lines
    pub thread_name: String,
    /// io_uring submission queue size
    pub entries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "sriquant-main".to_string(),
            entries: 1024,
        }
    }
}

/// SriQuant.ai runtime
pub struct SriQuantRuntime {
    config: RuntimeConfig,
}

impl SriQuantRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Build a fresh runtime and drive `f()` to completion on this thread
    pub fn start<F, Fut>(self, f: F) -> std::io::Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future,
    {
        let mut runtime = RuntimeBuilder::<FusionDriver>::new()
            .with_entries(self.config.entries)
            .enable_timer()
            .build()?;

        info!("▶️  Starting SriQuant runtime ({})", self.config.thread_name);
        let result = runtime.block_on(f());
        info!("⏹️  SriQuant runtime stopped ({})", self.config.thread_name);
        Ok(result)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Default for SriQuantRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f()` on a default-configured runtime
pub fn run_sriquant<F, Fut>(f: F) -> std::io::Result<Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future,
{
    SriQuantRuntime::new().start(f)
}
