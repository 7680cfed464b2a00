//! Prometheus metrics for the invitation consumer

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};

/// Consumer metrics
pub struct ConsumerMetrics {
    /// Deliveries received from the broker
    pub deliveries_received: CounterVec,

    /// Deliveries acknowledged after a successful upsert
    pub deliveries_acked: CounterVec,

    /// Deliveries returned to the queue
    pub deliveries_requeued: CounterVec,

    /// Deliveries rejected without requeue (dead-lettered)
    pub deliveries_rejected: CounterVec,

    /// Active consumers gauge
    pub active_consumers: GaugeVec,

    /// Time from delivery to ack/nack decision
    pub processing_latency: HistogramVec,
}

lazy_static! {
    pub static ref CONSUMER_METRICS: ConsumerMetrics = ConsumerMetrics {
        deliveries_received: register_counter_vec!(
            "invitation_consumer_deliveries_received_total",
            "Total number of deliveries received",
            &["queue"]
        )
        .unwrap(),

        deliveries_acked: register_counter_vec!(
            "invitation_consumer_deliveries_acked_total",
            "Total number of deliveries acknowledged",
            &["queue"]
        )
        .unwrap(),

        deliveries_requeued: register_counter_vec!(
            "invitation_consumer_deliveries_requeued_total",
            "Total number of deliveries negatively acknowledged with requeue",
            &["queue", "error"]
        )
        .unwrap(),

        deliveries_rejected: register_counter_vec!(
            "invitation_consumer_deliveries_rejected_total",
            "Total number of deliveries rejected without requeue",
            &["queue", "error"]
        )
        .unwrap(),

        active_consumers: register_gauge_vec!(
            "invitation_consumer_active_consumers",
            "Number of active broker consumers",
            &["backend"]
        )
        .unwrap(),

        processing_latency: register_histogram_vec!(
            "invitation_consumer_processing_latency_seconds",
            "Invitation processing latency in seconds",
            &["queue"]
        )
        .unwrap(),
    };
}

/// Initialize consumer metrics
pub fn init_consumer_metrics() {
    lazy_static::initialize(&CONSUMER_METRICS);
}

/// Encode every registered metric in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
