//! HTTP server handle
//!
//! Wraps an `axum::Router` behind the script-visible `http_server(opts)`
//! handle: `.route()`, `.start()`, `.stop()`, state machine
//! `created → starting → running → draining → stopped` (`spec.md` §4.E).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use indexmap::IndexMap;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

use crate::context::ContextPayload;
use crate::datastore::DatastoreRegistry;
use crate::interpreter::evaluator::Evaluator;
use crate::runtime::http::request::{RequestContext, ScriptResponse};
use crate::runtime::process::ProcessRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Draining = 3,
    Stopped = 4,
}

impl From<u8> for ServerState {
    fn from(v: u8) -> Self {
        match v {
            0 => ServerState::Created,
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Draining,
            _ => ServerState::Stopped,
        }
    }
}

struct Route {
    method: Method,
    prefix: String,
    handler_path: String,
}

pub struct HttpServerHandle {
    pub id: String,
    pub port: u16,
    pub max_connections: Option<usize>,
    pub request_timeout: Option<Duration>,
    routes: tokio::sync::RwLock<Vec<Route>>,
    state: AtomicU8,
    shutdown: Notify,
    on_shutdown: Option<String>,
    datastores: Arc<DatastoreRegistry>,
    processes: Arc<ProcessRegistry>,
    http_servers: Arc<super::HttpServerRegistry>,
}

impl HttpServerHandle {
    pub fn new(
        id: String,
        port: u16,
        max_connections: Option<usize>,
        request_timeout: Option<Duration>,
        on_shutdown: Option<String>,
        datastores: Arc<DatastoreRegistry>,
        processes: Arc<ProcessRegistry>,
        http_servers: Arc<super::HttpServerRegistry>,
    ) -> Self {
        Self {
            id,
            port,
            max_connections,
            request_timeout,
            routes: tokio::sync::RwLock::new(Vec::new()),
            state: AtomicU8::new(ServerState::Created as u8),
            shutdown: Notify::new(),
            on_shutdown,
            datastores,
            processes,
            http_servers,
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from(self.state.load(Ordering::SeqCst))
    }

    pub async fn add_route(&self, method: &str, pattern: &str, handler_path: String) {
        let Ok(method) = Method::try_from(method.to_uppercase().as_str()) else {
            warn!(method, "ignoring route with unrecognized HTTP method");
            return;
        };
        self.routes.write().await.push(Route { method, prefix: pattern.to_string(), handler_path });
    }

    /// Longest-prefix-wins match among routes whose method equals the
    /// request's (`spec.md` §4.E dispatch rule).
    async fn resolve(&self, method: &Method, path: &str) -> Option<String> {
        let routes = self.routes.read().await;
        routes
            .iter()
            .filter(|r| &r.method == method && path.starts_with(r.prefix.as_str()))
            .max_by_key(|r| r.prefix.len())
            .map(|r| r.handler_path.clone())
    }

    /// Blocks serving requests until `.stop()`/SIGINT/SIGTERM (`spec.md`
    /// §4.E `.start()`).
    pub async fn start(self: Arc<Self>) -> Result<(), String> {
        if self.state() != ServerState::Created {
            return Err("server handle is not reusable once started".to_string());
        }
        self.state.store(ServerState::Starting as u8, Ordering::SeqCst);

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| e.to_string())?;

        let mut app = Router::new().fallback(handle_request).with_state(self.clone());
        if let Some(max) = self.max_connections {
            // `load_shed` turns requests the concurrency limit would otherwise
            // queue into an immediate rejection, which `HandleErrorLayer`
            // maps to a 503 (`spec.md` §4.E "Exceeding max_connections").
            app = app.layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(|_: axum::BoxError| async {
                        (StatusCode::SERVICE_UNAVAILABLE, "server is over capacity")
                    }))
                    .load_shed()
                    .concurrency_limit(max),
            );
        }

        self.state.store(ServerState::Running as u8, Ordering::SeqCst);
        info!(port = self.port, "http server listening");

        let shutdown_handle = self.clone();
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                shutdown_handle.wait_for_shutdown_signal().await;
            })
            .await
            .map_err(|e| e.to_string())?;

        self.state.store(ServerState::Stopped as u8, Ordering::SeqCst);
        info!(port = self.port, "http server stopped");
        Ok(())
    }

    async fn wait_for_shutdown_signal(&self) {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            sig.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = self.shutdown.notified() => {}
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        self.state.store(ServerState::Draining as u8, Ordering::SeqCst);
        if let Some(path) = &self.on_shutdown {
            if let Err(e) = run_shutdown_hook(self, path.clone()).await {
                warn!(error = %e, "on_shutdown handler failed");
            }
        }
    }

    /// Requests a graceful shutdown (`spec.md` §4.E `.stop()`).
    pub fn stop(&self) {
        self.state.store(ServerState::Draining as u8, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}

async fn handle_request(
    State(handle): State<Arc<HttpServerHandle>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if handle.state() == ServerState::Draining {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is draining").into_response();
    }

    let path = uri.path().to_string();
    let Some(handler_path) = handle.resolve(&method, &path).await else {
        return (StatusCode::NOT_FOUND, "no matching route").into_response();
    };

    let mut query = IndexMap::new();
    if let Some(q) = uri.query() {
        for pair in q.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                query.insert(k.to_string(), v.to_string());
            } else if !pair.is_empty() {
                query.insert(pair.to_string(), String::new());
            }
        }
    }
    let mut header_map = IndexMap::new();
    for (name, value) in headers.iter() {
        header_map.insert(name.as_str().to_lowercase(), value.to_str().unwrap_or("").to_string());
    }
    let request_ctx = RequestContext {
        method: method.to_string(),
        path,
        query,
        headers: header_map,
        body: String::from_utf8_lossy(&body).to_string(),
    };

    let outcome = run_handler(&handle, handler_path, request_ctx).await;
    match outcome {
        Ok(script_response) => {
            let mut builder = Response::builder().status(script_response.status);
            for (k, v) in &script_response.headers {
                builder = builder.header(k, v);
            }
            builder.body(axum::body::Body::from(script_response.body)).unwrap_or_else(|_| {
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
            })
        }
        Err(message) => {
            error!(error = %message, "http handler error");
            let resp = ScriptResponse::error(500, &message);
            let mut builder = Response::builder().status(resp.status);
            for (k, v) in &resp.headers {
                builder = builder.header(k, v);
            }
            builder.body(axum::body::Body::from(resp.body)).unwrap_or_else(|_| {
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            })
        }
    }
}

/// Runs the `on_shutdown` handler script, if any, once during the
/// `running → draining` transition (`spec.md` §4.E `http_server(opts)`).
async fn run_shutdown_hook(handle: &HttpServerHandle, path: String) -> Result<(), String> {
    let source = tokio::fs::read_to_string(&path).await.map_err(|e| format!("cannot read on_shutdown handler: {}", e))?;
    let program = crate::parser::parse(&source).map_err(|e| format!("parse error: {}", e))?;
    let mut child = Evaluator::spawn_child_full(
        path,
        handle.datastores.clone(),
        handle.processes.clone(),
        handle.http_servers.clone(),
        None,
    )
    .await;
    match child.run_program(&program).await {
        Ok(_) => Ok(()),
        Err(crate::interpreter::error::Flow::Error(re)) => Err(re.message()),
        Err(other) => Err(format!("{:?}", other)),
    }
}

async fn run_handler(
    handle: &HttpServerHandle,
    handler_path: String,
    request_ctx: RequestContext,
) -> Result<ScriptResponse, String> {
    let source = tokio::fs::read_to_string(&handler_path).await.map_err(|e| format!("cannot read handler: {}", e))?;
    let program = crate::parser::parse(&source).map_err(|e| format!("parse error: {}", e))?;

    let mut child = Evaluator::spawn_child_full(
        handler_path.clone(),
        handle.datastores.clone(),
        handle.processes.clone(),
        handle.http_servers.clone(),
        Some(ContextPayload::Request(request_ctx)),
    )
    .await;

    let run = child.run_program(&program);
    let result = match handle.request_timeout {
        Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| "handler timed out".to_string())?,
        None => run.await,
    };

    match result {
        Ok(value) => Ok(ScriptResponse::from_value(&value).await),
        Err(flow) => Err(match flow {
            crate::interpreter::error::Flow::Error(re) => re.message(),
            other => format!("{:?}", other),
        }),
    }
}
