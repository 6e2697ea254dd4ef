use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::{error, info};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("station_readings_total", "Raw readings appended to a sensor buffer"),
        &["sensor"]
    )
    .unwrap();
    pub static ref READ_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("station_read_failures_total", "Sensor read attempts that failed"),
        &["sensor"]
    )
    .unwrap();
    pub static ref SUBMISSIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("station_submissions_total", "Measurements dispatched, by transport and outcome"),
        &["transport", "outcome"]
    )
    .unwrap();
    pub static ref LOGINS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "station_logins_total",
        "Login calls made to obtain a bearer token"
    ))
    .unwrap();
    pub static ref CYCLE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "station_cycle_seconds",
            "Time taken to average and dispatch one cycle"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READ_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SUBMISSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LOGINS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_submission(transport: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "failed" };
    SUBMISSIONS_TOTAL.with_label_values(&[transport, outcome]).inc();
}

/// Serves `GET /metrics` until the listener fails.
pub async fn serve(addr: String) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind metrics endpoint to {}: {}", addr, e);
            return;
        }
    };

    info!("Metrics endpoint listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}

async fn metrics_handler() -> String {
    gather_metrics()
}
