//! Structured logging setup
//!
//! Every turn gets a `trace_id` span field so log lines from the model
//! call, the sandbox dispatch and the store writes of one turn can be
//! correlated.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subsystem.
///
/// Log levels come from `RUST_LOG`; without it the default keeps this
/// crate at debug and everything else at info.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sandbot=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
