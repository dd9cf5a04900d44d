//! HTTP Server Lifecycle
//!
//! Turns a single request handler into a managed server: bind, accept on a
//! background task, wait for a termination signal or an explicit shutdown
//! request, then drain in-flight requests within a deadline.
//!
//! ```text
//! Created ──bind──► Listening ──signal/trigger──► ShuttingDown ──drained──► Stopped
//!    │                  │                              │
//!    └──bind error──────┴──serve error─────────────────┴──────────────────► Failed
//! ```

use crate::error::{HttpError, RuntimeError, RuntimeResult};
use crate::handler::{CONTENT_TYPE_JSON, Handler, Request, ResponseWriter};
use crate::shutdown::{ShutdownHandle, TerminationSignals, spawn_signal_watcher};
use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Time a client has to send the full request head
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Time in-flight requests get to finish after shutdown starts
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest request body handed to a handler
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Environment variables read by [`ServerConfig::from_env`]
pub const ENV_ADDR: &str = "FAST_TS_ADDR";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "FAST_TS_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_HEADER_READ_TIMEOUT: &str = "FAST_TS_HEADER_READ_TIMEOUT_SECS";
pub const ENV_BODY_LIMIT: &str = "FAST_TS_BODY_LIMIT";

/// Pause after the process runs out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, `host:port` or `:port`
    pub address: String,
    /// Per-connection limit for reading request headers
    pub header_read_timeout: Duration,
    /// Drain deadline once shutdown starts
    pub shutdown_timeout: Duration,
    /// Request body size limit (bytes)
    pub body_limit: usize,
    /// Listen for SIGINT/SIGTERM
    pub handle_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ":3000".to_string(),
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            body_limit: DEFAULT_BODY_LIMIT,
            handle_signals: true,
        }
    }
}

impl ServerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self::default().with_address(address)
    }

    pub fn for_port(port: u16) -> Self {
        Self::default().with_port(port)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.address = format!(":{}", port);
        self
    }

    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Defaults overridden by `FAST_TS_*` environment variables
    pub fn from_env() -> RuntimeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> RuntimeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(address) = lookup(ENV_ADDR) {
            config.address = address;
        }
        if let Some(value) = lookup(ENV_SHUTDOWN_TIMEOUT) {
            config.shutdown_timeout = Duration::from_secs(parse_var(ENV_SHUTDOWN_TIMEOUT, &value)?);
        }
        if let Some(value) = lookup(ENV_HEADER_READ_TIMEOUT) {
            config.header_read_timeout =
                Duration::from_secs(parse_var(ENV_HEADER_READ_TIMEOUT, &value)?);
        }
        if let Some(value) = lookup(ENV_BODY_LIMIT) {
            config.body_limit = parse_var(ENV_BODY_LIMIT, &value)?;
        }

        Ok(config)
    }

    /// Address handed to the OS; `:port` means every interface
    pub fn bind_address(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> RuntimeResult<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RuntimeError::config(format!("{}={:?}: {}", key, value, e)))
}

/// Running/stopping status of one bound listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Listening => "listening",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bound server, ready to [`run`](Server::run)
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn Handler>,
    shutdown: ShutdownHandle,
    signals: Option<TerminationSignals>,
    state: watch::Sender<LifecycleState>,
}

impl Server {
    /// Bind the listener and, if enabled, the signal handlers.
    pub async fn bind<H: Handler>(config: ServerConfig, handler: H) -> RuntimeResult<Self> {
        let (state, _) = watch::channel(LifecycleState::Created);
        let address = config.bind_address();

        let bound = TcpListener::bind(&address)
            .await
            .and_then(|listener| listener.local_addr().map(|addr| (listener, addr)));
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                state.send_replace(LifecycleState::Failed);
                error!(address = %config.address, error = %e, "Failed to bind");
                return Err(RuntimeError::bind(&config.address, e));
            }
        };

        let signals = if config.handle_signals {
            let installed = TerminationSignals::install().map_err(|e| {
                RuntimeError::serve_with_source("Failed to install signal handlers", e.into())
            })?;
            Some(installed)
        } else {
            None
        };

        state.send_replace(LifecycleState::Listening);
        info!(address = %local_addr, "fast-ts server listening on {}", local_addr);

        Ok(Self {
            config,
            listener,
            local_addr,
            handler: Arc::new(handler),
            shutdown: ShutdownHandle::new(),
            signals,
            state,
        })
    }

    /// Actual bound address (resolves `:0` to the chosen port)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle that stops this server when triggered
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition, including after `run`
    /// consumed the server
    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Serve until shutdown is requested, then drain.
    ///
    /// Returns the first error encountered: an unexpected serve failure or
    /// the shutdown deadline elapsing.
    pub async fn run(self) -> RuntimeResult<()> {
        let Server {
            config,
            listener,
            local_addr,
            handler,
            shutdown,
            signals,
            state,
        } = self;

        let watcher = signals.map(|signals| spawn_signal_watcher(signals, shutdown.clone()));
        let app = build_router(handler, &config);
        let mut accept_task = tokio::spawn(accept_loop(listener, app, config, shutdown.clone()));

        let early_exit = tokio::select! {
            _ = shutdown.cancelled() => None,
            joined = &mut accept_task => Some(flatten(joined)),
        };

        let drained = match early_exit {
            Some(Err(err)) => {
                state.send_replace(LifecycleState::Failed);
                error!(address = %local_addr, error = %err, "Server failed");
                shutdown.trigger();
                if let Some(watcher) = watcher {
                    watcher.abort();
                }
                return Err(err);
            }
            // The accept loop only returns cleanly after a shutdown request
            Some(Ok(())) => {
                state.send_replace(LifecycleState::ShuttingDown);
                Ok(())
            }
            None => {
                state.send_replace(LifecycleState::ShuttingDown);
                flatten(accept_task.await)
            }
        };

        if let Some(watcher) = watcher {
            watcher.abort();
        }

        match drained {
            Ok(()) => {
                state.send_replace(LifecycleState::Stopped);
                info!(address = %local_addr, "Server stopped");
                Ok(())
            }
            Err(err @ RuntimeError::ShutdownTimeout { .. }) => {
                state.send_replace(LifecycleState::Stopped);
                warn!(address = %local_addr, error = %err, "Server stopped after forced close");
                Err(err)
            }
            Err(err) => {
                state.send_replace(LifecycleState::Failed);
                error!(address = %local_addr, error = %err, "Server failed during shutdown");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Serve `handler` on `address` until SIGINT/SIGTERM, then shut down gracefully
pub async fn serve<H: Handler>(address: impl Into<String>, handler: H) -> RuntimeResult<()> {
    serve_with_config(ServerConfig::new(address), handler).await
}

/// [`serve`] on `:port`
pub async fn serve_port<H: Handler>(port: u16, handler: H) -> RuntimeResult<()> {
    serve_with_config(ServerConfig::for_port(port), handler).await
}

pub async fn serve_with_config<H: Handler>(config: ServerConfig, handler: H) -> RuntimeResult<()> {
    Server::bind(config, handler).await?.run().await
}

/// [`serve`] for callers that are not already inside a Tokio runtime
pub fn serve_blocking<H: Handler>(address: impl Into<String>, handler: H) -> RuntimeResult<()> {
    serve_blocking_with_config(ServerConfig::new(address), handler)
}

/// [`serve_with_config`] on a runtime owned by this call.
///
/// Returns as soon as the server stops. Handlers abandoned at the shutdown
/// deadline keep their blocking threads but are not waited for.
pub fn serve_blocking_with_config<H: Handler>(config: ServerConfig, handler: H) -> RuntimeResult<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve_with_config(config, handler));
    runtime.shutdown_background();
    result
}

fn flatten(joined: Result<RuntimeResult<()>, JoinError>) -> RuntimeResult<()> {
    joined.unwrap_or_else(|e| Err(RuntimeError::serve_with_source("Accept loop task failed", e.into())))
}

/// Accept connections until shutdown is requested, then drain them
async fn accept_loop(
    listener: TcpListener,
    app: Router,
    config: ServerConfig,
    shutdown: ShutdownHandle,
) -> RuntimeResult<()> {
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(config.header_read_timeout);

    let cancelled = shutdown.cancelled();
    tokio::pin!(cancelled);

    loop {
        tokio::select! {
            _ = &mut cancelled => break,

            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => match classify_accept_error(&e) {
                        AcceptError::Transient => {
                            debug!(error = %e, "Transient accept error");
                            continue;
                        }
                        AcceptError::Exhausted => {
                            warn!(error = %e, "Accept failed, backing off");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                        AcceptError::Fatal => {
                            return Err(RuntimeError::serve_with_source(
                                "Failed to accept connection",
                                e.into(),
                            ));
                        }
                    },
                };

                let app = app.clone();
                let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
                    request.extensions_mut().insert(ConnectInfo(remote_addr));
                    app.clone().oneshot(request)
                });

                let conn = graceful.watch(builder.serve_connection(TokioIo::new(stream), service));
                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(peer = %remote_addr, error = %e, "Connection closed with error");
                    }
                });
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    info!(connections = connections.len(), "shutting down...");

    match tokio::time::timeout(config.shutdown_timeout, graceful.shutdown()).await {
        Ok(()) => Ok(()),
        Err(_) => {
            warn!(
                timeout = ?config.shutdown_timeout,
                remaining = connections.len(),
                "Shutdown deadline elapsed, closing remaining connections"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
            Err(RuntimeError::shutdown_timeout(config.shutdown_timeout))
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum AcceptError {
    /// A single connection failed; keep accepting
    Transient,
    /// Out of descriptors or memory; retry after a pause
    Exhausted,
    Fatal,
}

fn classify_accept_error(e: &io::Error) -> AcceptError {
    use io::ErrorKind::*;

    match e.kind() {
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock
        | TimedOut => AcceptError::Transient,
        OutOfMemory => AcceptError::Exhausted,
        _ if is_descriptor_exhaustion(e) => AcceptError::Exhausted,
        _ => AcceptError::Fatal,
    }
}

#[cfg(unix)]
fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_e: &io::Error) -> bool {
    false
}

/// State shared by every dispatched request
#[derive(Clone)]
struct DispatchState {
    handler: Arc<dyn Handler>,
    body_limit: usize,
}

/// Build the Axum router with middleware
fn build_router(handler: Arc<dyn Handler>, config: &ServerConfig) -> Router {
    let state = DispatchState {
        handler,
        body_limit: config.body_limit,
    };

    Router::new()
        // Every path and method goes to the single handler
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Buffer the request and run the handler on the blocking pool
async fn dispatch(State(state): State<DispatchState>, request: axum::extract::Request) -> Response {
    let (parts, body) = request.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    debug!(method = %parts.method, uri = %parts.uri, "Incoming request");

    let body = match Limited::new(body, state.body_limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return error_response(
                HttpError::payload_too_large("Request body too large")
                    .with_details(serde_json::json!({ "limit": state.body_limit })),
            );
        }
        Err(e) => {
            return error_response(HttpError::bad_request(format!(
                "Failed to read request body: {}",
                e
            )));
        }
    };

    let mut request = Request::new(parts.method, parts.uri, parts.headers, body);
    if let Some(addr) = remote_addr {
        request = request.with_remote_addr(addr);
    }

    let handler = Arc::clone(&state.handler);
    let outcome = tokio::task::spawn_blocking(move || {
        let mut writer = ResponseWriter::new();
        handler.serve_http(&mut writer, &request);
        writer
    })
    .await;

    match outcome {
        Ok(writer) => {
            debug!(status = writer.status().as_u16(), bytes = writer.body().len(), "Handler returned");
            writer.into_response()
        }
        Err(e) => {
            error!(error = %e, "Handler panicked");
            error_response(HttpError::internal_error("Handler failed"))
        }
    }
}

fn error_response(err: HttpError) -> Response {
    let status = StatusCode::from_u16(err.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(err.to_json().to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_JSON),
    );
    response
}
