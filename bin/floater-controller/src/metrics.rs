//! Prometheus metrics and the HTTP endpoint serving them

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use floater_core::{CoreError, ReconcileOutcome};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Counters describing reconciliation outcomes
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Reconciliations by outcome
    pub reconcile_total: IntCounterVec,
    /// Failed reconciliations by error kind
    pub reconcile_errors_total: IntCounterVec,
    registry: Arc<Registry>,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconcile_total = IntCounterVec::new(
            Opts::new("floater_reconcile_total", "Reconciliations by outcome"),
            &["outcome"],
        )?;

        let reconcile_errors_total = IntCounterVec::new(
            Opts::new(
                "floater_reconcile_errors_total",
                "Failed reconciliations by error kind",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;

        Ok(Self {
            reconcile_total,
            reconcile_errors_total,
            registry,
        })
    }

    pub fn observe_outcome(&self, outcome: &ReconcileOutcome) {
        self.reconcile_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn observe_error(&self, error: &CoreError) {
        self.reconcile_total.with_label_values(&["error"]).inc();
        self.reconcile_errors_total
            .with_label_values(&[error.kind().as_str()])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Serve `/metrics` and `/healthz` until the listener fails
pub async fn serve(addr: SocketAddr, metrics: ReconcileMetrics) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle_request(req, &metrics)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn handle_request(req: Request<Incoming>, metrics: &ReconcileMetrics) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => {
                let mut response = Response::new(Full::new(Bytes::from(text)));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}\n", e),
            ),
        },
        (_, "/healthz") => text_response(StatusCode::OK, "OK\n".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found\n".to_string()),
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
