use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::AppError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), AppError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| AppError::telemetry(format!("failed to install tracing subscriber: {err}")))
}

/// Register descriptions for every metric the overlay emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "verbatim_bypass_write_total",
            Unit::Count,
            "Total number of results stored as bypass entries."
        );
        describe_counter!(
            "verbatim_bypass_hit_total",
            Unit::Count,
            "Total number of reads and diffs served from a bypass entry."
        );
        describe_counter!(
            "verbatim_bypass_miss_total",
            Unit::Count,
            "Total number of reads and diffs of registered queries without a matching entry."
        );
        describe_counter!(
            "verbatim_passthrough_total",
            Unit::Count,
            "Total number of operations delegated to the normalized store."
        );
        describe_counter!(
            "verbatim_change_event_dropped_total",
            Unit::Count,
            "Total number of change events dropped due to queue overflow."
        );
        describe_gauge!(
            "verbatim_bypass_entries",
            Unit::Count,
            "Current number of stored bypass entries."
        );
    });
}
