//! Metric helpers over the `metrics` facade.
//!
//! Without an installed recorder these are no-ops, so library users that do
//! not care about metrics pay nothing.

/// Record the outcome of a quota gate (`allowed`, `rejected`, `fail_open`).
pub(crate) fn record_quota_check(result: &'static str) {
    metrics::counter!("filequota_quota_checks_total", "result" => result).increment(1);
}

/// Record a quota notification (`warning`, `exceeded`).
pub(crate) fn record_quota_event(kind: &'static str) {
    metrics::counter!("filequota_quota_events_total", "kind" => kind).increment(1);
}

/// Record a completed file lifecycle operation.
pub(crate) fn record_file_operation(op: &'static str) {
    metrics::counter!("filequota_file_operations_total", "op" => op).increment(1);
}

/// Record a best-effort cleanup that did not succeed.
pub(crate) fn record_cleanup_failure() {
    metrics::counter!("filequota_cleanup_failures_total").increment(1);
}

/// Publish the recomputed usage of a tenant.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn set_tenant_usage(tenant: &str, bytes: i64) {
    metrics::gauge!("filequota_tenant_usage_bytes", "tenant" => tenant.to_string())
        .set(bytes as f64);
}
