use const_format::concatcp;
use http_body_util::Full;
use hyper::{
    Request, Response,
    body::{Bytes, Incoming},
    header,
    service::service_fn,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use lazy_static::lazy_static;
use owo_colors::OwoColorize;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, TextEncoder};

use super::colors::FG2;

const NAMESPACE: &str = "redis_operator";
const SERVER_IDENT: &str = concatcp!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

lazy_static! {
    /// 1ms up to ~8s; reads are cache hits, writes wait on the apiserver.
    static ref LATENCY_BUCKETS: Vec<f64> =
        prometheus::exponential_buckets(0.001, 2.0, 14).expect("bucket layout");
}

/// Per-controller reconcile instrumentation. Registration errors are
/// ignored so a controller restart within the same process is harmless.
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(controller: &str) -> Self {
        let reconcile_counter = IntCounterVec::new(
            Opts::new("reconcile_total", "Total reconcile passes")
                .namespace(NAMESPACE)
                .subsystem(controller),
            &["name", "namespace"],
        )
        .expect("reconcile counter opts");
        prometheus::register(Box::new(reconcile_counter.clone())).ok();

        let action_counter = IntCounterVec::new(
            Opts::new("action_total", "Actions taken, by kind")
                .namespace(NAMESPACE)
                .subsystem(controller),
            &["name", "namespace", "action"],
        )
        .expect("action counter opts");
        prometheus::register(Box::new(action_counter.clone())).ok();

        let read_histogram = HistogramVec::new(
            HistogramOpts::new("read_seconds", "Read-phase duration")
                .namespace(NAMESPACE)
                .subsystem(controller)
                .buckets(LATENCY_BUCKETS.clone()),
            &["name", "namespace", "action"],
        )
        .expect("read histogram opts");
        prometheus::register(Box::new(read_histogram.clone())).ok();

        let write_histogram = HistogramVec::new(
            HistogramOpts::new("write_seconds", "Write-phase duration")
                .namespace(NAMESPACE)
                .subsystem(controller)
                .buckets(LATENCY_BUCKETS.clone()),
            &["name", "namespace", "action"],
        )
        .expect("write histogram opts");
        prometheus::register(Box::new(write_histogram.clone())).ok();

        ControllerMetrics {
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
        }
    }
}

/// Serves `/metrics`, `/healthz` and `/readyz` until the process exits.
pub async fn serve(port: u16) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("{}", format!("🛑 failed to bind metrics server to {addr}: {e}").red());
            return;
        }
    };
    println!("{}", format!("📈 serving /metrics on {addr}").color(FG2));
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => continue,
        };
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service_fn(route))
                .await;
        });
    }
}

async fn route(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let (status, content_type, body) = match req.uri().path() {
        "/metrics" => {
            let families = prometheus::gather();
            let encoder = TextEncoder::new();
            let mut buf = Vec::new();
            match encoder.encode(&families, &mut buf) {
                Ok(()) => (
                    hyper::StatusCode::OK,
                    encoder.format_type().to_string(),
                    Bytes::from(buf),
                ),
                Err(_) => (
                    hyper::StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain".to_string(),
                    Bytes::from_static(b"encode error"),
                ),
            }
        }
        "/healthz" | "/readyz" => (
            hyper::StatusCode::OK,
            "text/plain".to_string(),
            Bytes::from_static(b"ok"),
        ),
        _ => (
            hyper::StatusCode::NOT_FOUND,
            "text/plain".to_string(),
            Bytes::from_static(b"not found"),
        ),
    };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = SERVER_IDENT.parse() {
        response.headers_mut().insert(header::SERVER, value);
    }
    Ok(response)
}
