//! Exposes `GET /health`, the endpoint the Consul agent polls to decide
//! whether this node's registration passes. Built directly on `hyper`
//! 0.14's `make_service_fn`/`service_fn` — no web framework dependency.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tracing::{error, info};

use crate::handler::AppHandler;

/// Serves `GET /health` on `addr` until the process exits. Any other path
/// returns `500` with an "Unsupported endpoint" body — by design, so
/// misconfigured probes visibly fail rather than silently 404.
pub async fn serve(addr: SocketAddr, handler: Arc<dyn AppHandler>) {
    let make_svc = make_service_fn(move |_conn| {
        let handler = handler.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, hyper::Error>(handle(req, handler).await) }
            }))
        }
    });

    // AddrIncoming binds with SO_REUSEADDR so a restarted agent can
    // rebind the port while a previous socket is still in TIME_WAIT.
    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind health API server");
            return;
        }
    };

    info!(addr = %addr, "Health API server listening — GET /health");

    // Never let a client disconnect mid-response take the server down;
    // hyper already treats individual connection errors as non-fatal to
    // the listener, so simply logging here matches that contract.
    if let Err(e) = server.await {
        error!(error = %e, "Health API server error");
    }
}

async fn handle(req: Request<Body>, handler: Arc<dyn AppHandler>) -> Response<Body> {
    if req.uri().path() != "/health" {
        return respond(StatusCode::INTERNAL_SERVER_ERROR, "Unsupported endpoint");
    }

    // A panicking handler must not take the probe endpoint down with it —
    // a failure here is reported as an unhealthy verdict instead.
    let verdict = match AssertUnwindSafe(handler.health()).catch_unwind().await {
        Ok(verdict) => verdict,
        Err(_) => {
            error!("Handler health() panicked");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, "Handler health() panicked");
        }
    };

    let status = if verdict.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    respond(status, &verdict.message)
}

fn respond(status: StatusCode, message: &str) -> Response<Body> {
    let body = match serde_json::to_string(message) {
        Ok(json) => format!("{json}\n"),
        Err(_) => format!("{message}\n"),
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::from(body)))
}
