use std::io;
/// Structured logging for buildlineage runs
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::constants::DEFAULT_LOG_FILTER;

/// Initialize structured logging with optional JSON output
pub fn init_logging(json_output: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = Registry::default().with(env_filter);

    if json_output {
        // JSON output for log aggregation
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        // stdout carries the report, so logs go to stderr
        registry
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    }

    Ok(())
}

#[macro_export]
macro_rules! log_size_cache_hit {
    ($kind:expr, $key:expr, $size:expr) => {
        tracing::debug!(
            cache = $kind,
            key = %$key,
            size_bytes = $size,
            "Size cache hit"
        );
    };
}

#[macro_export]
macro_rules! log_registry_lookup {
    ($repo:expr, $id:expr) => {
        tracing::debug!(
            repo = %$repo,
            layer = %$id.chars().take(12).collect::<String>(),
            "Registry lookup"
        );
    };
}
