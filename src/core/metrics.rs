// src/core/metrics.rs

//! Defines and registers Prometheus metrics for connection lifecycle monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of client connections whose transport session is still open.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("spindle_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of dedicated per-connection workers currently running.
    pub static ref ACTIVE_WORKERS: Gauge =
        register_gauge!("spindle_active_workers", "Number of dedicated connection workers currently running.").unwrap();
    /// The number of drivers tracked by the connection registry.
    pub static ref REGISTERED_SESSIONS: Gauge =
        register_gauge!("spindle_registered_sessions", "Number of sessions tracked by the connection registry.").unwrap();


    // --- Server-wide Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("spindle_connections_received_total", "Total number of connections received.").unwrap();
    /// The total number of connections refused because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("spindle_connections_rejected_total", "Total number of connections refused at the connection limit.").unwrap();
    /// The total number of sessions asked to terminate by the server.
    pub static ref SESSIONS_TERMINATED_TOTAL: Counter =
        register_counter!("spindle_sessions_terminated_total", "Total number of sessions terminated by the server.").unwrap();
    /// The total number of requests processed by all connection drivers.
    pub static ref REQUESTS_PROCESSED_TOTAL: Counter =
        register_counter!("spindle_requests_processed_total", "Total number of requests processed.").unwrap();


    // --- Executor Counters ---
    pub static ref EXECUTOR_TASKS_SCHEDULED_TOTAL: Counter =
        register_counter!("spindle_executor_tasks_scheduled_total", "Total number of tasks scheduled on the service executor.").unwrap();
    pub static ref EXECUTOR_TASKS_EXECUTED_TOTAL: Counter =
        register_counter!("spindle_executor_tasks_executed_total", "Total number of tasks executed by the service executor.").unwrap();
    /// Tasks scheduled on the service executor that have not finished yet.
    pub static ref EXECUTOR_OUTSTANDING_TASKS: Gauge =
        register_gauge!("spindle_executor_outstanding_tasks", "Number of service executor tasks scheduled but not yet finished.").unwrap();


    // --- Histograms ---
    /// A histogram of request handling latencies.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("spindle_request_latency_seconds", "Latency of request processing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
