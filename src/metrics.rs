//! Prometheus export of the server's connection gauge.
//!
//! The recorder is built locally rather than installed globally, so every
//! server (and every test) owns its own registry.

use std::{future::IntoFuture, io, time::Duration};

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use metrics::Gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Name of the gauge tracking open server connections.
pub const WS_CONNECTIONS: &str = "websocket_connections";

#[derive(Clone)]
pub struct Metrics {
    active: Gauge,
    handle: PrometheusHandle,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let active = metrics::with_local_recorder(&recorder, || {
            metrics::describe_gauge!(WS_CONNECTIONS, "Number of active WebSocket connections");
            metrics::gauge!(WS_CONNECTIONS)
        });
        Self { active, handle }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn set_active(&self, count: usize) { self.active.set(count as f64); }

    /// Current state in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String { self.handle.render() }
}

impl Default for Metrics {
    fn default() -> Self { Self::new() }
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// Serves `/metrics` on `listener` until `cancel` fires, then allows
/// in-flight scrapes up to `grace` to finish.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Metrics,
    cancel: CancellationToken,
    grace: Duration,
) -> io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "metrics server listening");
    let server = axum::serve(listener, router(metrics))
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        res = &mut server => return res,
        () = cancel.cancelled() => {}
    }
    if let Ok(res) = tokio::time::timeout(grace, server).await {
        res
    } else {
        tracing::warn!(grace_secs = grace.as_secs(), "metrics server shutdown timed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;

    fn gauge_value(text: &str) -> Option<f64> {
        text.lines()
            .find_map(|l| l.strip_prefix("websocket_connections "))
            .and_then(|v| v.trim().parse().ok())
    }

    #[test]
    fn gauge_renders_current_count() {
        let metrics = Metrics::new();
        metrics.set_active(3);
        assert_eq!(gauge_value(&metrics.render()), Some(3.0));
        metrics.set_active(0);
        assert_eq!(gauge_value(&metrics.render()), Some(0.0));
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.set_active(7);
        b.set_active(1);
        assert_eq!(gauge_value(&a.render()), Some(7.0));
        assert_eq!(gauge_value(&b.render()), Some(1.0));
    }

    #[tokio::test]
    async fn endpoint_serves_prometheus_text() {
        let metrics = Metrics::new();
        metrics.set_active(2);

        let resp = router(metrics)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("# TYPE websocket_connections gauge"));
        assert_eq!(gauge_value(&text), Some(2.0));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let resp = router(Metrics::new())
            .oneshot(Request::builder().uri("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn server_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve_metrics(
            listener,
            Metrics::new(),
            cancel.clone(),
            Duration::from_secs(5),
        ));
        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
