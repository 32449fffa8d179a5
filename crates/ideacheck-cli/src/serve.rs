use std::io::Read;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use ideacheck_engine::client::GenerationService;
use ideacheck_engine::{handle_refine_body, Reconciler};
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{info, warn};

pub const REFINE_PATH: &str = "/api/refine";
pub const HEALTH_PATH: &str = "/healthz";

/// Binds `addr` and answers requests on `workers` threads until the process
/// exits. Workers share only the reconciler.
pub fn serve<S>(addr: &str, workers: usize, reconciler: Arc<Reconciler<S>>) -> Result<()>
where
    S: GenerationService + 'static,
{
    let server =
        Server::http(addr).map_err(|err| anyhow!("failed to bind {addr}: {err}"))?;
    let server = Arc::new(server);
    info!(addr = %server.server_addr(), workers, "serving refine requests");

    let handles: Vec<_> = (0..workers.max(1))
        .map(|worker| {
            let server = Arc::clone(&server);
            let reconciler = Arc::clone(&reconciler);
            thread::spawn(move || loop {
                match server.recv() {
                    Ok(request) => handle_request(&reconciler, request),
                    Err(err) => {
                        warn!(worker, error = %err, "accept failed; worker stopping");
                        break;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        if handle.join().is_err() {
            warn!("server worker panicked");
        }
    }
    Ok(())
}

fn handle_request<S: GenerationService>(reconciler: &Reconciler<S>, mut request: Request) {
    let method = request.method().clone();
    let path = request.url().split('?').next().unwrap_or_default().to_string();
    let (status, body) = match (&method, path.as_str()) {
        (Method::Post, REFINE_PATH) => {
            let mut raw = String::new();
            if request.as_reader().read_to_string(&mut raw).is_err() {
                raw.clear();
            }
            let (status, envelope) = handle_refine_body(reconciler, &raw);
            let body = serde_json::to_value(&envelope)
                .unwrap_or_else(|_| json!({ "ok": false, "error": "serialization failed" }));
            (status, body)
        }
        (Method::Get, HEALTH_PATH) => (200, json!({ "ok": true })),
        (_, REFINE_PATH) | (_, HEALTH_PATH) => {
            (405, json!({ "ok": false, "error": "Method not allowed" }))
        }
        _ => (404, json!({ "ok": false, "error": "Not found" })),
    };
    info!(method = %method, path = %path, status, "request handled");
    if let Err(err) = request.respond(json_response(status, &body)) {
        warn!(error = %err, "failed to write response");
    }
}

fn json_response(status: u16, body: &Value) -> Response<std::io::Cursor<Vec<u8>>> {
    let response = Response::from_data(body.to_string().into_bytes())
        .with_status_code(StatusCode(status));
    match Header::from_bytes("Content-Type", "application/json") {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}
