//! # Structured Logging Module
//!
//! Environment-aware structured logging for long-running calibration requests.
//! `RUST_LOG` always wins over the configured level.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging. Safe to call more than once.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
        };

        let console = if config.json {
            fmt::layer()
                .with_target(config.with_target)
                .with_thread_ids(true)
                .json()
                .with_filter(filter())
                .boxed()
        } else {
            fmt::layer()
                .with_target(config.with_target)
                .with_thread_ids(true)
                .with_ansi(config.ansi)
                .with_filter(filter())
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            level = %config.level,
            json = config.json,
            "STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log one node lifecycle transition
pub fn log_node_operation(
    operation: &str,
    node_id: &str,
    fingerprint: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        node_id = %node_id,
        fingerprint = %fingerprint,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "NODE_OPERATION"
    );
}

/// Log the start or end of a whole request
pub fn log_request_operation(
    operation: &str,
    request_id: &str,
    target: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        request_id = %request_id,
        target = %target,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "REQUEST_OPERATION"
    );
}
