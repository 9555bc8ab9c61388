// Copyright 2025 Oxide Computer Company
//! Listener state shared by every connection of an open endpoint, TLS
//! material loading, and the per-request pipeline: maintenance check, CORS,
//! routing, interceptors, handler, error rendering.

use crate::connect::CredentialParams;
use crate::cors::CorsPolicy;
use crate::error::ApplicationError;
use crate::handler::InterceptedHandler;
use crate::handler::Interceptor;
use crate::handler::RequestContext;
use crate::handler::RequestInfo;
use crate::http_util::http_read_body;
use crate::http_util::query_pairs;
use crate::http_util::CORRELATION_ID;
use crate::http_util::HEADER_REQUEST_ID;
use crate::operations::server_unavailable;
use crate::router::RouteTable;
use crate::Body;

use camino::Utf8PathBuf;
use http::header;
use http::HeaderMap;
use http::HeaderValue;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper::Request;
use hyper::Response;
use hyper_util::rt::TokioIo;
use regex::Regex;
use scopeguard::guard;
use scopeguard::ScopeGuard;
use slog::Logger;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

/// Seconds a client is asked to wait while the endpoint is in maintenance.
const MAINTENANCE_RETRY_AFTER: &str = "3600";

/// Everything a running endpoint needs to serve requests.  Built once at
/// open time and shared read-only by every connection, except for the
/// maintenance flag, which can be toggled while serving.
#[derive(Debug)]
pub(crate) struct ServerState {
    pub routes: RouteTable,
    pub interceptors: Vec<RegisteredInterceptor>,
    pub cors: Arc<CorsPolicy>,
    pub maintenance: Arc<AtomicBool>,
    pub local_addr: SocketAddr,
    pub https: bool,
    pub request_max_size: usize,
    pub file_max_size: usize,
    pub protocol_upgrade_enabled: bool,
    pub connect_timeout: Duration,
    pub debug: bool,
    pub log: Logger,
}

/// An interceptor installed with `register_interceptor`.
pub(crate) struct RegisteredInterceptor {
    pub pattern: Option<Regex>,
    pub interceptor: Arc<dyn Interceptor>,
}

impl std::fmt::Debug for RegisteredInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredInterceptor")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Accepts connections until `shutdown` fires, then waits for the
/// connections to finish their in-flight requests.
pub(crate) async fn serve_connections(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    server: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let mut connections = JoinSet::new();
    let mut result = Ok(());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(server.log, "received request to begin graceful shutdown");
                break;
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accept_result = listener.accept() => {
                let (stream, remote_addr) = match accept_result {
                    Ok(v) => v,
                    Err(e) if e.kind() == std::io::ErrorKind::ConnectionAborted => {
                        continue;
                    }
                    // The other errors that can be returned under POSIX are
                    // programming errors or resource exhaustion.  Stop
                    // accepting and let close() report it.
                    Err(e) => {
                        error!(server.log, "failed to accept connection";
                            "err" => %e);
                        result = Err(e);
                        break;
                    }
                };
                connections.spawn(serve_connection(
                    stream,
                    remote_addr,
                    tls_acceptor.clone(),
                    Arc::clone(&server),
                    shutdown.clone(),
                ));
            }
        }
    }

    std::mem::drop(listener);
    while connections.join_next().await.is_some() {}
    result
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    server: Arc<ServerState>,
    shutdown: watch::Receiver<bool>,
) {
    info!(server.log, "accepted connection"; "remote_addr" => %remote_addr);
    let Some(acceptor) = tls_acceptor else {
        drive_connection(TokioIo::new(stream), remote_addr, server, shutdown)
            .await;
        return;
    };

    match tokio::time::timeout(server.connect_timeout, acceptor.accept(stream))
        .await
    {
        Ok(Ok(tls_stream)) => {
            drive_connection(
                TokioIo::new(tls_stream),
                remote_addr,
                server,
                shutdown,
            )
            .await
        }
        // TLS failures are the client's problem (a fatal alert, a
        // disconnect during negotiation); log them and move on.
        Ok(Err(e)) => warn!(server.log, "tls accept err: {}", e;
            "remote_addr" => %remote_addr),
        Err(_) => warn!(server.log, "tls handshake timed out";
            "remote_addr" => %remote_addr),
    }
}

/// Polls the connection `conn` to completion, asking it to finish its
/// in-flight requests and close once `shutdown` fires.
macro_rules! serve_until_shutdown {
    ($conn:expr, $shutdown:expr) => {{
        let conn = $conn;
        tokio::pin!(conn);
        let mut shutting_down = false;
        loop {
            tokio::select! {
                result = conn.as_mut() => break result,
                _ = $shutdown.changed(), if !shutting_down => {
                    shutting_down = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }};
}

async fn drive_connection<I>(
    io: I,
    remote_addr: SocketAddr,
    server: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let log = server.log.clone();
    let upgrades = server.protocol_upgrade_enabled;
    let service = hyper::service::service_fn(move |request| {
        let server = Arc::clone(&server);
        async move {
            Ok::<_, Infallible>(
                http_request_handle_wrap(server, remote_addr, request).await,
            )
        }
    });

    let builder = hyper::server::conn::http1::Builder::new();
    let result = if upgrades {
        serve_until_shutdown!(
            builder.serve_connection(io, service).with_upgrades(),
            shutdown
        )
    } else {
        serve_until_shutdown!(builder.serve_connection(io, service), shutdown)
    };
    if let Err(e) = result {
        debug!(log, "connection closed with error: {}", e;
            "remote_addr" => %remote_addr);
    }
}

/// Hyper's service function.  Every outcome, including errors and panics,
/// leaves here as an HTTP response carrying the request id.
async fn http_request_handle_wrap(
    server: Arc<ServerState>,
    remote_addr: SocketAddr,
    request: Request<Incoming>,
) -> Response<Body> {
    // Errors from the pipeline itself render the same way as handler errors.
    let start_time = std::time::Instant::now();
    let request_id = generate_request_id();

    let request_log = server.log.new(o!(
        "remote_addr" => remote_addr,
        "req_id" => request_id.clone(),
        "method" => request.method().as_str().to_string(),
        "uri" => format!("{}", request.uri()),
    ));
    trace!(request_log, "incoming request");

    // Fires only if hyper drops this future because the client went away.
    let on_disconnect = guard((), |_| {
        let latency_us = start_time.elapsed().as_micros();
        warn!(request_log, "request handling cancelled (client disconnected)";
            "latency_us" => latency_us,
        );
    });

    let request_headers = request.headers().clone();
    let maybe_response = http_request_handle(
        Arc::clone(&server),
        request,
        &request_id,
        request_log.new(o!()),
        remote_addr,
    )
    .await;

    // Completed, so not cancelled.
    let _ = ScopeGuard::into_inner(on_disconnect);

    let latency_us = start_time.elapsed().as_micros();
    let mut response = match maybe_response {
        Err(mut error) => {
            if !server.debug {
                error.cause = None;
            }
            info!(request_log, "request completed";
                "response_code" => error.status,
                "latency_us" => latency_us,
                "error_code" => error.code.clone(),
                "error_message" => error.message.clone(),
            );
            let unavailable =
                error.status_code() == http::StatusCode::SERVICE_UNAVAILABLE;
            let mut response = error.into_response(&request_id);
            if unavailable {
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from_static(MAINTENANCE_RETRY_AFTER),
                );
            }
            response
        }

        Ok(response) => {
            info!(request_log, "request completed";
                "response_code" => response.status().as_str(),
                "latency_us" => latency_us,
            );
            response
        }
    };

    server.cors.decorate(&request_headers, &mut response);
    add_no_cache_headers(&mut response);
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }
    response
}

async fn http_request_handle(
    server: Arc<ServerState>,
    mut request: Request<Incoming>,
    request_id: &str,
    request_log: Logger,
    remote_addr: SocketAddr,
) -> Result<Response<Body>, ApplicationError> {
    if let Some(response) =
        server.cors.preflight(request.method(), request.headers())
    {
        return Ok(response);
    }

    if server.maintenance.load(Ordering::SeqCst) {
        return Err(server_unavailable(
            correlation_id_of(&request).as_deref(),
            "service is down for maintenance",
        ));
    }

    let route = server.routes.find(request.method(), request.uri().path())?;
    let info =
        RequestInfo::new(&request, remote_addr, server.local_addr, server.https);
    let upgrade = if server.protocol_upgrade_enabled {
        request.extensions_mut().remove::<OnUpgrade>()
    } else {
        None
    };
    let body_max_size = if is_file_upload(request.headers()) {
        server.file_max_size
    } else {
        server.request_max_size
    };
    let body = http_read_body(request.into_body(), body_max_size).await?;
    let mut rqctx = RequestContext::new(
        info,
        route.path_params,
        body,
        request_id.to_string(),
        request_log.clone(),
    );
    if let Some(upgrade) = upgrade {
        rqctx.extensions_mut().insert(upgrade);
    }

    // Interceptors registered first run first, so they wrap outermost.
    let mut handler = route.handler;
    for registered in server.interceptors.iter().rev() {
        handler = Arc::new(InterceptedHandler::new(
            Arc::clone(&registered.interceptor),
            registered.pattern.clone(),
            handler,
        ));
    }

    // Spawn the handler so that it runs to completion even if the client
    // goes away, and so that a panic surfaces as a `JoinError` rather than
    // tearing down the connection.
    let correlation_id = rqctx.correlation_id().map(str::to_string);
    let handler_task =
        tokio::spawn(async move { handler.handle_request(rqctx).await });
    match handler_task.await {
        Ok(result) => result,
        Err(join_error) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "handler task was cancelled".to_string()
            };
            error!(request_log, "http handler panics with error";
                "panic" => message.clone());
            Err(ApplicationError::internal("INTERNAL", message)
                .with_correlation_id(correlation_id.as_deref()))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Whether the body is a file upload, which is held to `file_max_size`
/// instead of `request_max_size`.
fn is_file_upload(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase())
        .is_some_and(|v| {
            v.starts_with("multipart/form-data")
                || v.starts_with("application/octet-stream")
        })
}

/// Correlation id of a request that never reached a handler.
fn correlation_id_of<B>(request: &Request<B>) -> Option<String> {
    query_pairs(request.uri().query())
        .into_iter()
        .find(|(name, value)| name == CORRELATION_ID && !value.is_empty())
        .map(|(_, value)| value)
        .or_else(|| {
            request
                .headers()
                .get(CORRELATION_ID)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
}

/// Forces clients and proxies not to cache anything served by an endpoint.
fn add_no_cache_headers(response: &mut Response<Body>) {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}

fn generate_request_id() -> String {
    format!("{}", Uuid::new_v4())
}

/// Failures while loading TLS material for an https endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("credential has no {0}")]
    Missing(&'static str),
    #[error("failed to open {path}: {source}")]
    Open { path: Utf8PathBuf, source: std::io::Error },
    #[error("failed to load certificate: {0}")]
    Certificate(std::io::Error),
    #[error("failed to load private key: {0}")]
    PrivateKey(std::io::Error),
    #[error("expected a single private key")]
    KeyCount,
    #[error("bad certificate/key: {0}")]
    Rustls(#[from] rustls::Error),
}

impl From<TlsConfigError> for ApplicationError {
    fn from(error: TlsConfigError) -> Self {
        ApplicationError::config("CANNOT_LOAD_CREDENTIALS", error.to_string())
    }
}

fn open_pem(
    path: Option<&Utf8PathBuf>,
    what: &'static str,
) -> Result<std::io::BufReader<std::fs::File>, TlsConfigError> {
    let path = path.ok_or(TlsConfigError::Missing(what))?;
    let file = std::fs::File::open(path)
        .map_err(|source| TlsConfigError::Open { path: path.clone(), source })?;
    Ok(std::io::BufReader::new(file))
}

/// Builds the rustls configuration for an https endpoint from PEM files.  The
/// certificates of an optional CA file are appended to the served chain.
pub(crate) fn tls_server_config(
    credential: &CredentialParams,
) -> Result<rustls::ServerConfig, TlsConfigError> {
    let mut cert_reader =
        open_pem(credential.ssl_crt_file.as_ref(), "ssl_crt_file")?;
    let mut certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsConfigError::Certificate)?;
    if credential.ssl_ca_file.is_some() {
        let mut ca_reader =
            open_pem(credential.ssl_ca_file.as_ref(), "ssl_ca_file")?;
        let ca_certs = rustls_pemfile::certs(&mut ca_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(TlsConfigError::Certificate)?;
        certs.extend(ca_certs);
    }

    let mut key_reader =
        open_pem(credential.ssl_key_file.as_ref(), "ssl_key_file")?;
    let keys = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsConfigError::PrivateKey)?;
    let mut keys_iter = keys.into_iter();
    let (Some(private_key), None) = (keys_iter.next(), keys_iter.next()) else {
        return Err(TlsConfigError::KeyCount);
    };

    let mut cfg = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key.into())?;
    cfg.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(cfg)
}
