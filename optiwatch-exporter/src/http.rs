//! HTTP server: probe endpoint, merged metrics endpoint, health check.

use std::collections::HashMap;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::catalogue::render_catalogue;
use crate::registry::SessionRegistry;

const TEXT_EXPOSITION: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<SessionRegistry>,
}

/// Create the HTTP router.
pub fn create_router(registry: Arc<SessionRegistry>) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/probe", get(probe_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for `/probe?target=<address>`: a single-target scrape scoped to
/// one device session. An unknown target is not an error; the response just
/// carries `probe_success 0`.
async fn probe_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let target = params.get("target").map(String::as_str).unwrap_or("");
    if target.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "target parameter missing or empty\n",
        )
            .into_response();
    }

    let mut body = String::new();
    match state.registry.lookup(target) {
        Some(store) => {
            debug!(target = %target, "probe succeeded");
            write_probe_success(&mut body, 1);
            body.push_str(&store.render());
        }
        None => {
            info!(target = %target, "probe found no dial-out telemetry for target");
            write_probe_success(&mut body, 0);
        }
    }

    (StatusCode::OK, [("content-type", TEXT_EXPOSITION)], body).into_response()
}

/// Handler for `/metrics`: the full local catalogue across every live
/// session, plus the exporter's own gauges.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let stores = state.registry.stores();
    let mut body = render_catalogue(&stores);

    writeln!(
        body,
        "# HELP optiwatch_sessions_active Number of live dial-out sessions."
    )
    .ok();
    writeln!(body, "# TYPE optiwatch_sessions_active gauge").ok();
    writeln!(body, "optiwatch_sessions_active {}", stores.len()).ok();

    (StatusCode::OK, [("content-type", TEXT_EXPOSITION)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

fn write_probe_success(out: &mut String, value: u8) {
    writeln!(out, "# HELP probe_success Whether or not the probe succeeded.").ok();
    writeln!(out, "# TYPE probe_success gauge").ok();
    writeln!(out, "probe_success {}", value).ok();
}

/// HTTP server configuration.
pub struct HttpServer {
    registry: Arc<SessionRegistry>,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(registry: Arc<SessionRegistry>, listen_addr: SocketAddr) -> Self {
        Self {
            registry,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.registry);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_probe_missing_target_is_client_error() {
        let registry = Arc::new(SessionRegistry::new());
        let router = create_router(registry);

        let response = router
            .oneshot(Request::get("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_probe_empty_target_is_client_error() {
        let registry = Arc::new(SessionRegistry::new());
        let router = create_router(registry);

        let response = router
            .oneshot(Request::get("/probe?target=").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_probe_unknown_target_reports_failure_only() {
        let registry = Arc::new(SessionRegistry::new());
        let router = create_router(registry);

        let response = router
            .oneshot(
                Request::get("/probe?target=10.0.0.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("probe_success 0"));
        assert!(!body.contains("optiwatch_"));
    }

    #[tokio::test]
    async fn test_probe_registered_target_includes_series() {
        let registry = Arc::new(SessionRegistry::new());
        let store = registry.register("10.0.0.1").unwrap();
        store.fan_rpm.set(&["FAN-1-33"], 11820.0);

        let router = create_router(registry);
        let response = router
            .oneshot(
                Request::get("/probe?target=10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = body_string(response).await;
        assert!(body.contains("probe_success 1"));
        assert!(body.contains("optiwatch_fan_rpm{device=\"FAN-1-33\"} 11820"));
    }

    #[tokio::test]
    async fn test_probe_does_not_leak_other_devices() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.register("10.0.0.1").unwrap();
        let b = registry.register("10.0.0.2").unwrap();
        a.fan_rpm.set(&["FAN-A"], 1.0);
        b.fan_rpm.set(&["FAN-B"], 2.0);

        let router = create_router(registry);
        let response = router
            .oneshot(
                Request::get("/probe?target=10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_string(response).await;
        assert!(body.contains("FAN-A"));
        assert!(!body.contains("FAN-B"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_merges_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.register("10.0.0.1").unwrap();
        a.fan_rpm.set(&["FAN-A"], 1.0);

        let router = create_router(registry);
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("optiwatch_fan_rpm{device=\"FAN-A\",target=\"10.0.0.1\"} 1"));
        assert!(body.contains("optiwatch_sessions_active 1"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let registry = Arc::new(SessionRegistry::new());
        let router = create_router(registry);

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
