//! Prometheus metrics for the Skiff services.
//!
//! Every instrumented router counts its requests by status code and method,
//! observes latency and body sizes, and tracks requests in flight. The change
//! broker of the process is exported alongside. Each [`Metrics`] owns its own
//! registry, so several servers can share a process.

use axum::{
    Router,
    body::HttpBody,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use skiff_core::ChangeBroker;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

pub const METRICS_PATH: &str = "/metrics";

const LABELS: &[&str] = &["code", "method"];

struct MetricsInner {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    in_flight: IntGauge,
    request_size: HistogramVec,
    response_size: HistogramVec,
    broker: ChangeBroker,
    broker_subscribers: IntGauge,
    broker_publishes: IntCounter,
    // Serializes the catch-up of `broker_publishes` between scrapes
    scrape: Mutex<()>,
}

/// HTTP and broker metrics of one service
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl Metrics {
    /// Create and register all metrics in a fresh registry
    pub fn new(broker: ChangeBroker) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Count of all HTTP requests"),
            LABELS,
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Histogram of latencies for HTTP requests",
            ),
            LABELS,
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "Current number of requests being served",
        ))?;
        registry.register(Box::new(in_flight.clone()))?;

        let size_buckets = prometheus::exponential_buckets(100.0, 10.0, 7)?;
        let request_size = HistogramVec::new(
            HistogramOpts::new("http_request_size_bytes", "Histogram of HTTP request size")
                .buckets(size_buckets.clone()),
            LABELS,
        )?;
        registry.register(Box::new(request_size.clone()))?;

        let response_size = HistogramVec::new(
            HistogramOpts::new(
                "http_response_size_bytes",
                "Histogram of response size for HTTP requests",
            )
            .buckets(size_buckets),
            LABELS,
        )?;
        registry.register(Box::new(response_size.clone()))?;

        let broker_subscribers = IntGauge::with_opts(Opts::new(
            "skiff_broker_subscribers",
            "Subscriptions currently registered with the change broker",
        ))?;
        registry.register(Box::new(broker_subscribers.clone()))?;

        let broker_publishes = IntCounter::with_opts(Opts::new(
            "skiff_broker_publishes_total",
            "Changes published on the change broker",
        ))?;
        registry.register(Box::new(broker_publishes.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                requests_total,
                request_duration,
                in_flight,
                request_size,
                response_size,
                broker,
                broker_subscribers,
                broker_publishes,
                scrape: Mutex::new(()),
            }),
        })
    }

    /// Current values in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let inner = &self.inner;
        {
            let _scrape = inner.scrape.lock();
            inner
                .broker_subscribers
                .set(inner.broker.subscriber_count() as i64);
            let published = inner.broker.published();
            let seen = inner.broker_publishes.get();
            if published > seen {
                inner.broker_publishes.inc_by(published - seen);
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&inner.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn observe(
        &self,
        method: &str,
        status: StatusCode,
        started: Instant,
        sizes: (f64, Option<f64>),
    ) {
        let inner = &self.inner;
        let code = status.as_u16().to_string();
        let labels = [code.as_str(), method];

        inner.requests_total.with_label_values(&labels).inc();
        inner
            .request_duration
            .with_label_values(&labels)
            .observe(started.elapsed().as_secs_f64());
        inner.request_size.with_label_values(&labels).observe(sizes.0);
        if let Some(size) = sizes.1 {
            inner.response_size.with_label_values(&labels).observe(size);
        }
    }
}

/// Decrements the in-flight gauge even when the request future is dropped
struct InFlight(IntGauge);

impl InFlight {
    fn enter(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.dec();
    }
}

fn content_length(headers: &axum::http::HeaderMap) -> Option<f64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|v| v as f64)
}

/// Middleware recording request metrics; install with
/// `axum::middleware::from_fn_with_state(metrics, track_http)`
pub async fn track_http(
    State(metrics): State<Metrics>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let request_size = content_length(request.headers()).unwrap_or(0.0);
    let started = Instant::now();

    let response = {
        let _in_flight = InFlight::enter(&metrics.inner.in_flight);
        next.run(request).await
    };

    let response_size = response
        .body()
        .size_hint()
        .exact()
        .map(|v| v as f64)
        .or_else(|| content_length(response.headers()));
    metrics.observe(&method, response.status(), started, (request_size, response_size));
    response
}

/// Create the `GET /metrics` route
pub fn metrics_routes(metrics: Metrics) -> Router {
    Router::new()
        .route(METRICS_PATH, get(scrape))
        .with_state(metrics)
}

async fn scrape(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn_with_state;
    use tower::ServiceExt;

    fn instrumented(metrics: &Metrics) -> Router {
        Router::new()
            .route("/hello", get(|| async { "hello" }))
            .layer(from_fn_with_state(metrics.clone(), track_http))
    }

    #[tokio::test]
    async fn test_requests_are_counted() {
        let metrics = Metrics::new(ChangeBroker::new()).unwrap();
        let app = instrumented(&metrics);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"http_requests_total{code="200",method="GET"} 2"#));
        assert!(text.contains(r#"http_requests_total{code="404",method="GET"} 1"#));
        assert!(
            text.contains(r#"http_request_duration_seconds_count{code="200",method="GET"} 2"#)
        );
        assert!(text.contains(r#"http_response_size_bytes_sum{code="200",method="GET"} 10"#));
        assert!(text.contains("http_requests_in_flight 0"));
    }

    #[tokio::test]
    async fn test_broker_is_exported() {
        let broker = ChangeBroker::new();
        let metrics = Metrics::new(broker.clone()).unwrap();
        let _first = broker.subscribe();
        let _second = broker.subscribe();
        broker.publish();
        broker.publish();
        broker.publish();

        let text = metrics.render().unwrap();
        assert!(text.contains("skiff_broker_subscribers 2"));
        assert!(text.contains("skiff_broker_publishes_total 3"));

        // Scrapes do not double count
        broker.publish();
        let text = metrics.render().unwrap();
        assert!(text.contains("skiff_broker_publishes_total 4"));
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = Metrics::new(ChangeBroker::new()).unwrap();
        let response = metrics_routes(metrics)
            .oneshot(Request::get(METRICS_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
