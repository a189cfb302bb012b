use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response};

use crate::network::metrics::{self, ScrapeStats};
use crate::operations::{self, error::Stage, AdminCommandRunner, CollectContext, CollectError};

/// Everything a request handler needs; cloned cheaply per connection.
#[derive(Clone)]
pub struct AdminState {
    pub runner: Arc<dyn AdminCommandRunner>,
    pub namespace: String,
    pub collect_timeout: Duration,
    pub stats: Arc<ScrapeStats>,
}

impl AdminState {
    pub fn new(runner: Arc<dyn AdminCommandRunner>, namespace: &str, collect_timeout: Duration) -> Self {
        Self {
            runner,
            namespace: namespace.to_string(),
            collect_timeout,
            stats: Arc::new(ScrapeStats::default()),
        }
    }
}

pub async fn run_http_admin(addr: SocketAddr, state: AdminState) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                async move { handle(req, state).await }
            }))
        }
    });

    log::info!("HTTP admin listening on {addr}");
    hyper::Server::bind(&addr).serve(make_svc).await
}

fn respond(status: u16, content_type: &str, body: String) -> Response<Body> {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::OK);
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        resp.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    resp
}

async fn handle(req: Request<Body>, state: AdminState) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = build_metrics(&state).await;
            respond(200, "text/plain; version=0.0.4", body)
        }
        (&Method::GET, "/health") => match check_health(&state).await {
            Ok(()) => respond(200, "application/json", "{\"status\":\"ok\"}".to_string()),
            Err(e) => {
                log::warn!("health check failed: {e}");
                let body = serde_json::json!({ "status": "unavailable", "error": e.to_string() });
                respond(503, "application/json", body.to_string())
            }
        },
        _ => respond(404, "text/plain", String::new()),
    };

    Ok(response)
}

/// Runs one collection cycle and renders it.
pub async fn build_metrics(state: &AdminState) -> String {
    let ctx = CollectContext::with_timeout(state.collect_timeout);
    let status = operations::get_operations_status(state.runner.as_ref(), &ctx).await;
    state.stats.record(status.is_some());
    metrics::render(&state.namespace, status.as_ref(), &state.stats)
}

async fn check_health(state: &AdminState) -> Result<(), CollectError> {
    let ctx = CollectContext::with_timeout(state.collect_timeout);
    let runner = Arc::clone(&state.runner);
    ctx.run(Stage::Ping, async move {
        runner
            .run_admin_command(operations::query::ping_command())
            .await
            .map(|_| ())
            .map_err(|e| CollectError::command(Stage::Ping, e.to_string()))
    })
    .await
}
