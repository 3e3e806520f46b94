use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct ResearchMetrics {
    searches: Counter<u64>,
    fetch_failures: Counter<u64>,
    cache_lookups: Counter<u64>,
    sessions: Counter<u64>,
}

static METRICS: OnceCell<ResearchMetrics> = OnceCell::new();

fn handles() -> &'static ResearchMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepsearch.research");
        ResearchMetrics {
            searches: meter
                .u64_counter("search_requests_total")
                .with_description("Web searches issued by status")
                .init(),
            fetch_failures: meter
                .u64_counter("page_fetch_failures_total")
                .with_description("Page fetches that degraded to an error placeholder")
                .init(),
            cache_lookups: meter
                .u64_counter("summary_cache_lookups_total")
                .with_description("Summary cache lookups by outcome")
                .init(),
            sessions: meter
                .u64_counter("research_sessions_total")
                .with_description("Completed research loops by answer mode")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("DEEPSEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "DEEPSEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export research metrics."
        );
    }
    Ok(())
}

pub fn record_search(status: &str, results: usize) {
    handles().searches.add(
        1,
        &[
            KeyValue::new("status", status.to_string()),
            KeyValue::new("results", results as i64),
        ],
    );
}

pub fn record_fetch_failures(count: usize) {
    if count > 0 {
        handles().fetch_failures.add(count as u64, &[]);
    }
}

pub fn record_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    handles()
        .cache_lookups
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

/// Record a finished loop (no-op if no provider installed).
pub fn record_session(forced: bool, steps: u32) {
    let mode = if forced { "forced" } else { "voluntary" };
    handles().sessions.add(
        1,
        &[
            KeyValue::new("mode", mode),
            KeyValue::new("steps", steps as i64),
        ],
    );
}
