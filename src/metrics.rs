//! Prometheus metrics for the forwarder.
//!
//! Exposes:
//! - `channel_forwarder_forwards_total` (counter with status: ok, error, skipped)
//! - `channel_forwarder_commands_total` (counter with command and status)
//! - `channel_forwarder_cursor` (gauge, last forwarded message id)
//! - `channel_forwarder_running` (gauge, 1 while the loop may run)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec,
    IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::progress::MessageId;

pub const FORWARD_OK: &str = "ok";
pub const FORWARD_FAILED: &str = "error";
pub const FORWARD_SKIPPED: &str = "skipped";

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static FORWARDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "channel_forwarder_forwards_total",
        "Source messages handled by the forward loop, by status",
        &["status"]
    )
    .expect("failed to register forwards counter")
});

static COMMANDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "channel_forwarder_commands_total",
        "Operator commands by command and status",
        &["command", "status"]
    )
    .expect("failed to register commands counter")
});

static CURSOR: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "channel_forwarder_cursor",
        "Last successfully forwarded message id"
    )
    .expect("failed to register cursor gauge")
});

static RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "channel_forwarder_running",
        "1 while the forward loop is allowed to run"
    )
    .expect("failed to register running gauge")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&FORWARDS_TOTAL);
    Lazy::force(&COMMANDS_TOTAL);
    Lazy::force(&CURSOR);
    Lazy::force(&RUNNING);
}

/// Count one handled source message.
pub fn record_forward(status: &'static str) {
    FORWARDS_TOTAL.with_label_values(&[status]).inc();
}

/// Count one operator command.
pub fn record_command(command: &'static str, success: bool) {
    COMMANDS_TOTAL
        .with_label_values(&[command, if success { "ok" } else { "error" }])
        .inc();
}

pub fn set_cursor(cursor: MessageId) {
    CURSOR.set(i64::from(cursor));
}

pub fn set_running(running: bool) {
    RUNNING.set(i64::from(running));
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::from("encode error"))
            .unwrap());
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, encoder.format_type())
        .body(Full::from(buffer))
        .unwrap())
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap()),
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
