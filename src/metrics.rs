// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `docsync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: find_document, get_document, create_document, update_properties, list_child_blocks
//! - `direction`: push, pull
//! - `result`: ok, rate_limited, transient, not_found, permanent

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE API - Call outcomes and latency per operation
// ═══════════════════════════════════════════════════════════════════════════

/// Record a remote API call outcome
pub fn record_remote_call(operation: &str, result: &str) {
    counter!(
        "docsync_remote_calls_total",
        "operation" => operation.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record remote API call latency
pub fn record_remote_latency(operation: &str, duration: Duration) {
    histogram!(
        "docsync_remote_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// TASK EXECUTION - Worker throughput and failure modes
// ═══════════════════════════════════════════════════════════════════════════

/// Record a completed task attempt with its outcome
pub fn record_task(direction: &str, outcome: &str) {
    counter!(
        "docsync_tasks_total",
        "direction" => direction.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record end-to-end task execution time
pub fn record_task_duration(direction: &str, duration: Duration) {
    histogram!(
        "docsync_task_seconds",
        "direction" => direction.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a retry being scheduled
pub fn record_retry_scheduled() {
    counter!("docsync_retries_scheduled_total").increment(1);
}

/// Record an entity reaching the dead-letter state
pub fn record_dead_letter() {
    counter!("docsync_dead_letters_total").increment(1);
}

/// Record a resolved edit conflict; `winner` is local, remote, or tie
pub fn record_conflict(winner: &str) {
    counter!(
        "docsync_conflicts_total",
        "winner" => winner.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// WEBHOOK INGESTION - Receipt outcomes for provider-side debugging
// ═══════════════════════════════════════════════════════════════════════════

/// Record a webhook receipt outcome
pub fn record_webhook(result: &str) {
    counter!(
        "docsync_webhook_events_total",
        "result" => result.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// RECONCILIATION - Scan runs and detected drift
// ═══════════════════════════════════════════════════════════════════════════

/// Record a detected discrepancy and how it was resolved
pub fn record_discrepancy(resolution: &str) {
    counter!(
        "docsync_discrepancies_total",
        "resolution" => resolution.to_string()
    )
    .increment(1);
}

/// Record a completed (or interrupted) reconciliation scan
pub fn record_scan(duration: Duration, checked: u64) {
    histogram!("docsync_scan_seconds").record(duration.as_secs_f64());
    histogram!("docsync_scan_entities_checked").record(checked as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE DEPTHS - Pending work
// ═══════════════════════════════════════════════════════════════════════════

/// Set the number of tasks waiting to run (ready + parked)
pub fn set_queue_depth(count: usize) {
    gauge!("docsync_queue_depth").set(count as f64);
}

/// Set the number of tasks currently executing
pub fn set_in_flight(count: usize) {
    gauge!("docsync_in_flight_tasks").set(count as f64);
}

/// Set the number of tasks waiting on a backoff delay
pub fn set_scheduled_retries(count: usize) {
    gauge!("docsync_scheduled_retries").set(count as f64);
}

/// Set the entity count for one sync status
pub fn set_status_count(status: &str, count: u64) {
    gauge!(
        "docsync_entities",
        "status" => status.to_string()
    )
    .set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests verify the API compiles and doesn't panic.
    // In production, you'd use metrics-util's Recorder for assertions.

    #[test]
    fn test_remote_metrics() {
        record_remote_call("find_document", "ok");
        record_remote_call("update_properties", "rate_limited");
        record_remote_latency("get_document", Duration::from_millis(120));
    }

    #[test]
    fn test_task_metrics() {
        record_task("push", "done");
        record_task("pull", "retry");
        record_task_duration("push", Duration::from_millis(40));
        record_retry_scheduled();
        record_dead_letter();
        record_conflict("local");
        record_conflict("tie");
    }

    #[test]
    fn test_webhook_and_scan_metrics() {
        record_webhook("accepted");
        record_webhook("duplicate");
        record_webhook("unauthorized");
        record_discrepancy("push");
        record_scan(Duration::from_secs(2), 150);
    }

    #[test]
    fn test_gauges() {
        set_queue_depth(12);
        set_in_flight(4);
        set_scheduled_retries(3);
        set_status_count("synced", 240);
        set_status_count("dead", 1);
    }
}
