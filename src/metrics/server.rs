//! Metrics exposition server.
//!
//! Serves the sink on `/metrics` in the Prometheus text format, plus a
//! `/healthz` liveness endpoint for the process itself.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::metrics::MetricSink;

/// Conventional exposition address.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9101";

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Route one request against the sink.
pub fn handle(sink: &MetricSink, method: &Method, path: &str) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match path {
        "/metrics" => match sink.render() {
            Ok(body) => {
                let mut response = text_response(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(prometheus::TEXT_FORMAT),
                );
                response
            }
            Err(e) => {
                error!("Failed to render metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        },
        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Bind `addr` and serve until `shutdown` fires.
pub async fn run_metrics_server(
    addr: &str,
    sink: MetricSink,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    serve(listener, sink, shutdown).await
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(listener: TcpListener, sink: MetricSink, shutdown: CancellationToken) -> Result<()> {
    info!("Metrics server listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Metrics server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?,
        };

        debug!(peer = %peer, "Scrape connection accepted");
        let io = TokioIo::new(stream);
        let sink = sink.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = handle(&sink, req.method(), req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServiceLabels;
    use http_body_util::BodyExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let sink = MetricSink::new().unwrap();
        sink.record(&ServiceLabels::new("db1", "db", 3306, "mysql"), true);

        let response = handle(&sink, &Method::GET, "/metrics");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );
        assert!(body_text(response).await.contains(r#"name="db1""#));
    }

    #[tokio::test]
    async fn test_other_routes() {
        let sink = MetricSink::new().unwrap();

        assert_eq!(handle(&sink, &Method::GET, "/healthz").status(), StatusCode::OK);
        assert_eq!(
            handle(&sink, &Method::GET, "/nope").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            handle(&sink, &Method::POST, "/metrics").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let sink = MetricSink::new().unwrap();
        let result = run_metrics_server("not an address", sink, CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_scrape_over_tcp() {
        let sink = MetricSink::new().unwrap();
        sink.set_thread_count(4);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, sink, shutdown.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.contains("plus_monitoring_thread_count 4"));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
