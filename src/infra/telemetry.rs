use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Fails when a global subscriber is already installed.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the crate emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "stencil_cache_hit_total",
            Unit::Count,
            "Total number of artifact cache hits."
        );
        describe_counter!(
            "stencil_cache_miss_total",
            Unit::Count,
            "Total number of artifact cache misses."
        );
        describe_counter!(
            "stencil_cache_invalidate_total",
            Unit::Count,
            "Total number of artifact cache entries removed by invalidation."
        );
        describe_counter!(
            "stencil_invalidation_nodes_total",
            Unit::Count,
            "Total number of nodes visited by invalidation walks."
        );
        describe_counter!(
            "stencil_invalidation_failures_total",
            Unit::Count,
            "Total number of repository failures skipped during invalidation."
        );
        describe_histogram!(
            "stencil_invalidation_ms",
            Unit::Milliseconds,
            "Save-event invalidation latency in milliseconds."
        );
    });
}
