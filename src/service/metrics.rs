use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tracing::error;

use crate::service::Service;

const QUEUE_LABELS: &[&str] = &["queue_name", "environment", "region"];
const EXCHANGE_LABELS: &[&str] = &["exchange_name", "environment", "region"];

/// Registry adapter for everything the exporter publishes.
///
/// All families are registered once at startup; updates go through
/// `with_label_values`, which upserts the child for a label set on first use
/// and only sets the value afterwards.
pub struct ExporterMetrics {
    registry: Registry,

    pub queue_messages_in_queue: IntGaugeVec,
    pub queue_messages_in_flight: IntGaugeVec,
    pub queue_messages_sent: IntGaugeVec,
    pub queue_messages_received: IntGaugeVec,
    pub queue_messages_acked: IntGaugeVec,
    pub queue_size_bytes: GaugeVec,
    pub queue_info: IntGaugeVec,

    pub exchange_messages_published: IntGaugeVec,
    pub exchange_messages_delivered: IntGaugeVec,

    pub scrape_duration_seconds: Histogram,
    pub scrape_errors_total: IntCounterVec,
    pub last_scrape_timestamp_seconds: IntGauge,

    pub monitor_evaluations_total: IntCounter,
    pub monitor_triggered: IntGaugeVec,
    pub monitor_last_triggered_timestamp: IntGaugeVec,
    pub queue_health_score: GaugeVec,

    pub notifications_total: IntCounterVec,
    pub notifications_failed_total: IntCounterVec,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queue_messages_in_queue = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_queue_messages_in_queue",
                "Messages waiting in queue",
            ),
            QUEUE_LABELS,
        )?;
        let queue_messages_in_flight = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_queue_messages_in_flight",
                "Messages currently being processed",
            ),
            QUEUE_LABELS,
        )?;
        let queue_messages_sent = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_queue_messages_sent_total",
                "Messages sent to queue during the stats period",
            ),
            QUEUE_LABELS,
        )?;
        let queue_messages_received = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_queue_messages_received_total",
                "Messages received from queue during the stats period",
            ),
            QUEUE_LABELS,
        )?;
        let queue_messages_acked = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_queue_messages_acked_total",
                "Messages acknowledged during the stats period",
            ),
            QUEUE_LABELS,
        )?;
        let queue_size_bytes = GaugeVec::new(
            Opts::new("anypoint_mq_queue_size_bytes", "Queue size in bytes"),
            QUEUE_LABELS,
        )?;
        let queue_info = IntGaugeVec::new(
            Opts::new("anypoint_mq_queue", "Queue metadata information"),
            &[
                "queue_name",
                "environment",
                "region",
                "is_fifo",
                "is_dlq",
                "max_deliveries",
                "ttl",
            ],
        )?;

        let exchange_messages_published = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_exchange_messages_published_total",
                "Messages published to exchange during the stats period",
            ),
            EXCHANGE_LABELS,
        )?;
        let exchange_messages_delivered = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_exchange_messages_delivered_total",
                "Messages delivered from exchange during the stats period",
            ),
            EXCHANGE_LABELS,
        )?;

        let scrape_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "anypoint_mq_scrape_duration_seconds",
            "Time spent scraping Anypoint MQ metrics",
        ))?;
        let scrape_errors_total = IntCounterVec::new(
            Opts::new(
                "anypoint_mq_scrape_errors_total",
                "Total number of scrape errors",
            ),
            &["cause"],
        )?;
        let last_scrape_timestamp_seconds = IntGauge::with_opts(Opts::new(
            "anypoint_mq_last_scrape_timestamp_seconds",
            "Unix timestamp of the last successful scrape",
        ))?;

        let monitor_evaluations_total = IntCounter::with_opts(Opts::new(
            "anypoint_mq_monitor_evaluations_total",
            "Total number of monitor evaluations",
        ))?;
        let monitor_triggered = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_monitor_triggered",
                "Monitor trigger status (1 if triggered, 0 if OK)",
            ),
            &[
                "monitor_name",
                "queue_name",
                "environment",
                "region",
                "severity",
            ],
        )?;
        let monitor_last_triggered_timestamp = IntGaugeVec::new(
            Opts::new(
                "anypoint_mq_monitor_last_triggered_timestamp",
                "Unix timestamp when monitor was last triggered",
            ),
            &["monitor_name"],
        )?;
        let queue_health_score = GaugeVec::new(
            Opts::new("anypoint_mq_queue_health_score", "Queue health score (0-1)"),
            QUEUE_LABELS,
        )?;

        let notifications_total = IntCounterVec::new(
            Opts::new(
                "anypoint_mq_monitor_notifications_total",
                "Total number of notifications sent",
            ),
            &["monitor_name", "channel", "channel_type", "status"],
        )?;
        let notifications_failed_total = IntCounterVec::new(
            Opts::new(
                "anypoint_mq_monitor_notifications_failed_total",
                "Total number of failed notifications",
            ),
            &["monitor_name", "channel", "channel_type", "error"],
        )?;

        registry.register(Box::new(queue_messages_in_queue.clone()))?;
        registry.register(Box::new(queue_messages_in_flight.clone()))?;
        registry.register(Box::new(queue_messages_sent.clone()))?;
        registry.register(Box::new(queue_messages_received.clone()))?;
        registry.register(Box::new(queue_messages_acked.clone()))?;
        registry.register(Box::new(queue_size_bytes.clone()))?;
        registry.register(Box::new(queue_info.clone()))?;
        registry.register(Box::new(exchange_messages_published.clone()))?;
        registry.register(Box::new(exchange_messages_delivered.clone()))?;
        registry.register(Box::new(scrape_duration_seconds.clone()))?;
        registry.register(Box::new(scrape_errors_total.clone()))?;
        registry.register(Box::new(last_scrape_timestamp_seconds.clone()))?;
        registry.register(Box::new(monitor_evaluations_total.clone()))?;
        registry.register(Box::new(monitor_triggered.clone()))?;
        registry.register(Box::new(monitor_last_triggered_timestamp.clone()))?;
        registry.register(Box::new(queue_health_score.clone()))?;
        registry.register(Box::new(notifications_total.clone()))?;
        registry.register(Box::new(notifications_failed_total.clone()))?;

        Ok(Self {
            registry,
            queue_messages_in_queue,
            queue_messages_in_flight,
            queue_messages_sent,
            queue_messages_received,
            queue_messages_acked,
            queue_size_bytes,
            queue_info,
            exchange_messages_published,
            exchange_messages_delivered,
            scrape_duration_seconds,
            scrape_errors_total,
            last_scrape_timestamp_seconds,
            monitor_evaluations_total,
            monitor_triggered,
            monitor_last_triggered_timestamp,
            queue_health_score,
            notifications_total,
            notifications_failed_total,
        })
    }

    pub fn scrape_error(&self, cause: &str) {
        self.scrape_errors_total.with_label_values(&[cause]).inc();
    }

    /// Prometheus text encoding of every registered family.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| {
            prometheus::Error::Msg(format!("invalid UTF-8 in encoded metrics: {err}"))
        })
    }
}

pub async fn metrics_get(State(service): State<Service>) -> impl IntoResponse {
    match service.metrics.render() {
        Ok(body) => {
            let headers = HeaderMap::from_iter([(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )]);
            (StatusCode::OK, headers, body).into_response()
        }
        Err(err) => {
            error!(?err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
