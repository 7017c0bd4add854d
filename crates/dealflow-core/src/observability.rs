//! Observability infrastructure for dealflow.
//!
//! Structured logging with consistent spans across the three services.
//! Webhook handlers and job handlers each get a span constructor so log
//! lines correlate by tenant and job.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for local development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at service startup. Safe to call multiple times; subsequent
/// calls are no-ops. The `service` tag is attached to every line so the
/// three processes can share a log sink.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `dealflow_flow=debug`)
pub fn init_logging(format: LogFormat, service: &str) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }

        tracing::info!(service = service, "logging initialized");
    });
}

/// Creates a span for webhook ingress operations.
#[must_use]
pub fn webhook_span(source: &str, tenant: &str) -> Span {
    tracing::info_span!(
        "webhook",
        source = source,
        tenant = tenant,
    )
}

/// Creates a span for worker job handling.
#[must_use]
pub fn job_span(job_type: &str, tenant: &str) -> Span {
    tracing::info_span!(
        "job",
        job_type = job_type,
        tenant = tenant,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty, "test");
        init_logging(LogFormat::Json, "test");
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = webhook_span("calendar", "tenant-a");
        let _guard = span.enter();
        tracing::info!("message in webhook span");

        let span = job_span("CALENDAR_SYNC", "tenant-a");
        let _guard = span.enter();
        tracing::info!("message in job span");
    }
}
