//! # Metrics
//!
//! Counters emitted by the coordination primitives. Emission is fire-and-forget:
//! an implementation must not block and has no way to fail the operation that
//! reported the counter.

/// Receives counter increments tagged with key/value pairs.
pub trait MetricsSink: Send + Sync {
    fn incr(&self, name: &str, tags: &[(&str, &str)]);
}

/// Emits every counter as a `tracing` event on the `metrics` target.
///
/// Pair it with a subscriber filter such as `metrics=debug` to ship counters
/// alongside the regular logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn incr(&self, name: &str, tags: &[(&str, &str)]) {
        tracing::debug!(
            target: "metrics",
            metric = name,
            tags = %format_tags(tags),
            "counter incremented"
        );
    }
}

/// Drops every counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _name: &str, _tags: &[(&str, &str)]) {}
}

/// Renders tags as `k1=v1,k2=v2` in the order given.
pub fn format_tags(tags: &[(&str, &str)]) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
