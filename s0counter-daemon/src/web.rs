// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! HTTP status service

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use s0counter::{MeterRegistry, Reading};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::metrics::{encode_metrics, update_meter_metrics};
use crate::settings::Webservices;

const MODULE: &str = "s0counter";

/// State shared across handlers.
pub struct WebState {
    pub registry: Arc<MeterRegistry>,
    pub started: Instant,
}

/// Build the router with the enabled routes only.
pub fn router(state: Arc<WebState>, services: Webservices) -> Router {
    let mut app = Router::new();
    if services.version {
        app = app.route("/version", get(version_handler));
    }
    if services.health {
        app = app.route("/health", get(health_handler));
    }
    if services.currentdata {
        app = app.route("/currentdata", get(currentdata_handler));
    }
    if services.metrics {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(listener: TcpListener, app: Router, cancel: CancellationToken) {
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
    if let Err(e) = result {
        error!(error = %e, "http server failed");
    }
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    description: &'static str,
    about: String,
}

async fn version_handler() -> Json<VersionResponse> {
    debug!("web request version");
    Json(VersionResponse {
        version: s0counter::VERSION,
        description: MODULE,
        about: format!("{} V{}", MODULE, s0counter::VERSION),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    meters: usize,
}

async fn health_handler(State(state): State<Arc<WebState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
        meters: state.registry.len(),
    })
}

/// Current reading of every meter, computed at request time.
async fn currentdata_handler(
    State(state): State<Arc<WebState>>,
) -> Json<BTreeMap<String, Reading>> {
    debug!("web request currentdata");
    Json(state.registry.current_data(Utc::now()))
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<WebState>>) -> Response {
    update_meter_metrics(&state.registry, Utc::now());
    match encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            metrics,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s0counter::MeterConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn state() -> Arc<WebState> {
        let registry = MeterRegistry::new(vec![MeterConfig::new("web_power", 17, 1000.0)
            .with_units("kWh", "kW")])
        .unwrap();
        Arc::new(WebState {
            registry: Arc::new(registry),
            started: Instant::now(),
        })
    }

    async fn get_path(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_currentdata_handler() {
        let state = state();
        state.registry.on_logical_edge(17, Utc::now());

        let Json(data) = currentdata_handler(State(state)).await;
        assert_eq!(data["web_power"].counter, 0.001);
        assert_eq!(data["web_power"].unit_gauge, "kW");
    }

    #[tokio::test]
    async fn test_routes_follow_toggles() {
        let services = Webservices {
            metrics: false,
            ..Webservices::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, router(state(), services), cancel.clone()));

        let version = get_path(addr, "/version").await;
        assert!(version.starts_with("HTTP/1.1 200"));
        assert!(version.contains("\"description\":\"s0counter\""));

        let data = get_path(addr, "/currentdata").await;
        assert!(data.contains("\"UnitCounter\":\"kWh\""));

        let metrics = get_path(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 404"));

        cancel.cancel();
        server.await.unwrap();
    }
}
