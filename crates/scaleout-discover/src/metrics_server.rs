//! HTTP endpoint serving the Prometheus text exposition.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{DiscoverError, Result};

/// Default scrape path.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Parses a literal bind address, `ip:port` or `:port` for all IPv4
/// addresses. Host names are rejected.
pub fn parse_bind_address(addr: &str) -> Result<SocketAddr> {
    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| DiscoverError::config(format!("invalid metrics port in '{addr}'")))?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    addr.parse::<SocketAddr>()
        .map_err(|e| DiscoverError::config(format!("invalid metrics bind address '{addr}': {e}")))
}

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Listen address.
    pub listen_addr: SocketAddr,
    /// Scrape path, e.g. `/metrics`.
    pub path: String,
}

impl MetricsServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            path: DEFAULT_METRICS_PATH.to_string(),
        }
    }

    /// Overrides the scrape path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    let gathered = tokio::task::spawn_blocking(move || {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map(|()| buffer)
    })
    .await;

    match gathered {
        Ok(Ok(body)) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "Metrics task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Builds the router serving `registry` at `path`.
pub fn router(registry: Arc<Registry>, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(registry)
}

/// Metrics HTTP server.
pub struct MetricsServer {
    pub config: MetricsServerConfig,
    registry: Arc<Registry>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    /// Serves until the listener fails.
    pub async fn start(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        info!(
            addr = %self.config.listen_addr,
            path = %self.config.path,
            "Enabled metrics endpoint"
        );

        axum::serve(listener, router(self.registry, &self.config.path)).await?;
        Ok(())
    }
}

/// Starts the metrics server in a background task.
pub fn spawn_metrics_server(
    config: MetricsServerConfig,
    registry: Arc<Registry>,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(MetricsServer::new(config, registry).start())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    #[test]
    fn test_parse_bind_address() {
        assert_eq!(
            parse_bind_address(":9100").unwrap(),
            "0.0.0.0:9100".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_address("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_address("[::1]:9090").unwrap().to_string(),
            "[::1]:9090"
        );
        assert!(parse_bind_address(":notaport").is_err());
        assert!(parse_bind_address(":70000").is_err());
        assert!(parse_bind_address("no-port").is_err());
        assert!(matches!(
            parse_bind_address("localhost:9100"),
            Err(DiscoverError::Config(_))
        ));
    }

    #[test]
    fn test_config_path() {
        let config = MetricsServerConfig::new(parse_bind_address(":9100").unwrap());
        assert_eq!(config.path, "/metrics");
        assert_eq!(config.with_path("/stats").path, "/stats");
    }

    #[tokio::test]
    async fn test_serve_metrics() {
        let registry = Registry::new();
        let counter = IntCounter::new("scaleout_test_total", "Test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc_by(42);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(registry), "/metrics");
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let body = http_get(addr, "/metrics").await;
        assert!(body.starts_with("HTTP/1.1 200"), "{body}");
        assert!(body.contains("scaleout_test_total 42"), "{body}");

        let body = http_get(addr, "/other").await;
        assert!(body.starts_with("HTTP/1.1 404"), "{body}");

        server.abort();
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }
}
