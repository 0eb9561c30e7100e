//! Prometheus counters for the ingestion pipeline and publish path,
//! served at `GET /metrics`.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

static MESSAGES_CONSUMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "message_service_messages_consumed_total",
            "Deliveries handled by the ingestion pipeline, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create message_service_messages_consumed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register message_service_messages_consumed_total");
    counter
});

static DUPLICATES_SKIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "message_service_duplicates_skipped_total",
        "Deliveries absorbed by the deduplication gate",
    )
    .expect("failed to create message_service_duplicates_skipped_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register message_service_duplicates_skipped_total");
    counter
});

static RETRIES_ROUTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "message_service_retries_routed_total",
            "Failed deliveries routed to a retry tier, by tier index",
        ),
        &["tier"],
    )
    .expect("failed to create message_service_retries_routed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register message_service_retries_routed_total");
    counter
});

static DEAD_LETTERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "message_service_dead_lettered_total",
        "Deliveries parked on the dead-letter topic after retry exhaustion",
    )
    .expect("failed to create message_service_dead_lettered_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register message_service_dead_lettered_total");
    counter
});

static MESSAGES_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "message_service_messages_published_total",
            "Publish-path events, by result",
        ),
        &["result"],
    )
    .expect("failed to create message_service_messages_published_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register message_service_messages_published_total");
    counter
});

pub fn record_consumed(outcome: &str) {
    MESSAGES_CONSUMED_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_duplicate() {
    DUPLICATES_SKIPPED_TOTAL.inc();
}

pub fn record_retry_routed(tier: u32) {
    RETRIES_ROUTED_TOTAL
        .with_label_values(&[&tier.to_string()])
        .inc();
}

pub fn record_dead_lettered() {
    DEAD_LETTERED_TOTAL.inc();
}

pub fn record_publish(result: &str) {
    MESSAGES_PUBLISHED_TOTAL.with_label_values(&[result]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
