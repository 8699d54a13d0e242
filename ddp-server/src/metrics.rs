//! Server metrics definitions.
//!
//! OpenTelemetry instruments for monitoring a running DDP server, exported
//! the same way as the rest of the observability stack: periodically to
//! whatever OTLP endpoint [`ddp_core::observability`] was configured to use.
//! All metrics are prefixed `ddp.server.*`.
//!
//! # Metrics Collected
//!
//! - **connections_active**: current live WebSocket connections (gauge)
//! - **connections_total**: connections accepted since startup (counter)
//! - **subscriptions_active**: live subscriptions, by publication (gauge)
//! - **methods_total**: method invocations, by method and outcome (counter)
//! - **method_duration**: method handler latency (histogram)
//! - **mergebox_duration**: `mergebox::unique` query latency (histogram)
//! - **notify_chunks_sent**: NOTIFY chunks published (counter)
//! - **notify_chunks_reassembled**: NOTIFY chunks consumed by the listener
//!   before a full message is reassembled (counter)
//! - **errors_total**: errors surfaced to a client, by wire status (counter)

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Metrics instruments for a running server.
pub struct ServerMetrics {
    pub connections_active: Gauge<i64>,
    pub connections_total: Counter<u64>,
    pub subscriptions_active: Gauge<i64>,
    pub methods_total: Counter<u64>,
    pub method_duration: Histogram<f64>,
    pub mergebox_duration: Histogram<f64>,
    pub notify_chunks_sent: Counter<u64>,
    pub notify_chunks_reassembled: Counter<u64>,
    pub errors_total: Counter<u64>,
}

impl ServerMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connections_active: meter
                .i64_gauge("ddp.server.connections.active")
                .with_description("Number of live WebSocket connections")
                .build(),
            connections_total: meter
                .u64_counter("ddp.server.connections.total")
                .with_description("Total number of connections accepted")
                .build(),
            subscriptions_active: meter
                .i64_gauge("ddp.server.subscriptions.active")
                .with_description("Number of live subscriptions for a publication")
                .build(),
            methods_total: meter
                .u64_counter("ddp.server.methods.total")
                .with_description("Total number of method invocations")
                .build(),
            method_duration: meter
                .f64_histogram("ddp.server.method.duration")
                .with_description("Method handler latency in seconds")
                .build(),
            mergebox_duration: meter
                .f64_histogram("ddp.server.mergebox.duration")
                .with_description("mergebox::unique query latency in seconds")
                .build(),
            notify_chunks_sent: meter
                .u64_counter("ddp.server.notify.chunks_sent")
                .with_description("Total NOTIFY chunks published")
                .build(),
            notify_chunks_reassembled: meter
                .u64_counter("ddp.server.notify.chunks_reassembled")
                .with_description("Total NOTIFY chunks consumed by the listener")
                .build(),
            errors_total: meter
                .u64_counter("ddp.server.errors.total")
                .with_description("Total errors surfaced to a client, by wire status")
                .build(),
        }
    }

    pub fn record_connection(&self, active: i64) {
        self.connections_active.record(active, &[]);
        self.connections_total.add(1, &[]);
    }

    pub fn record_disconnection(&self, active: i64) {
        self.connections_active.record(active, &[]);
    }

    pub fn update_subscriptions(&self, publication: &str, count: i64) {
        let attributes = &[KeyValue::new("publication", publication.to_string())];
        self.subscriptions_active.record(count, attributes);
    }

    pub fn record_method(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.methods_total.add(1, attributes);
        self.method_duration.record(duration_secs, attributes);
    }

    pub fn record_mergebox_query(&self, duration_secs: f64) {
        self.mergebox_duration.record(duration_secs, &[]);
    }

    pub fn record_notify_chunks_sent(&self, count: u64) {
        self.notify_chunks_sent.add(count, &[]);
    }

    pub fn record_notify_chunk_reassembled(&self) {
        self.notify_chunks_reassembled.add(1, &[]);
    }

    pub fn record_error(&self, wire_status: u16) {
        let attributes = &[KeyValue::new("status", wire_status.to_string())];
        self.errors_total.add(1, attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_can_be_created_and_recorded_without_panicking() {
        let metrics = ServerMetrics::new("test-ddp-server");
        metrics.record_connection(1);
        metrics.update_subscriptions("tasks", 3);
        metrics.record_method("tasks.add", "success", 0.01);
        metrics.record_mergebox_query(0.002);
        metrics.record_notify_chunks_sent(2);
        metrics.record_notify_chunk_reassembled();
        metrics.record_error(404);
        metrics.record_disconnection(0);
    }

    #[test]
    fn connection_gauge_tracks_accept_and_disconnect() {
        let metrics = ServerMetrics::new("test-ddp-server-conn");
        metrics.record_connection(1);
        metrics.record_connection(2);
        metrics.record_disconnection(1);
        metrics.record_disconnection(0);
    }
}
