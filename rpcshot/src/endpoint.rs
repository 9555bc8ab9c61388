// Copyright 2025 Oxide Computer Company
//! Shared HTTP endpoint hosting the routes of many services
//!
//! An [`HttpEndpoint`] owns one listener.  Services implement
//! [`Registrable`] and are queued with [`HttpEndpoint::register`]; when the
//! endpoint opens it asks each of them, in order, to install its routes and
//! interceptors.  The routing table is fixed from then on: registrations made
//! while the endpoint is open take effect the next time it opens.

use crate::config::ConfigEndpoint;
use crate::connect::Discovery;
use crate::connect::HttpConnectionResolver;
use crate::cors::CorsBuilder;
use crate::error::ApplicationError;
use crate::handler::HandlerResult;
use crate::handler::HttpRouteHandler;
use crate::handler::InterceptedHandler;
use crate::handler::Interceptor;
use crate::handler::RequestContext;
use crate::handler::RouteHandler;
use crate::handler::ValidatedHandler;
use crate::logging::component_logger;
use crate::router::RouteTable;
use crate::schema::ObjectSchema;
use crate::server::RegisteredInterceptor;
use crate::server::ServerState;
use crate::server::serve_connections;
use crate::server::tls_server_config;

use http::Method;
use regex::Regex;
use slog::Logger;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// How long `close()` waits for in-flight requests before giving up on them.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Something that installs routes on an endpoint while it opens.
pub trait Registrable: Send + Sync {
    fn register(&self, endpoint: &HttpEndpoint) -> Result<(), ApplicationError>;
}

/// [`Registrable`] implemented by a closure.
pub struct RegistrationFn<F>(F);

impl<F> Registrable for RegistrationFn<F>
where
    F: Fn(&HttpEndpoint) -> Result<(), ApplicationError> + Send + Sync,
{
    fn register(&self, endpoint: &HttpEndpoint) -> Result<(), ApplicationError> {
        (self.0)(endpoint)
    }
}

/// Wraps a closure into a shareable [`Registrable`].
pub fn registration_fn<F>(f: F) -> Arc<dyn Registrable>
where
    F: Fn(&HttpEndpoint) -> Result<(), ApplicationError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(RegistrationFn(f))
}

fn same_registration(a: &Arc<dyn Registrable>, b: &Arc<dyn Registrable>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Routes collected during the registration pass of `open()`.
#[derive(Default)]
struct PendingRoutes {
    routes: RouteTable,
    interceptors: Vec<RegisteredInterceptor>,
}

struct RunningServer {
    local_addr: SocketAddr,
    uri: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<std::io::Result<()>>,
}

#[derive(Default)]
struct EndpointState {
    registrations: Vec<Arc<dyn Registrable>>,
    /// `Some` only while registrations are being performed
    pending: Option<PendingRoutes>,
    cors: CorsBuilder,
    running: Option<RunningServer>,
}

/// An HTTP(S) listener shared by any number of services.
pub struct HttpEndpoint {
    config: ConfigEndpoint,
    log: Logger,
    resolver: HttpConnectionResolver,
    maintenance: Arc<AtomicBool>,
    state: Mutex<EndpointState>,
    /// serializes open() and close()
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl HttpEndpoint {
    pub fn new(config: ConfigEndpoint, log: &Logger) -> Self {
        let resolver = HttpConnectionResolver::new(
            config.connection.clone(),
            config.credential.clone(),
        );
        let cors = CorsBuilder::new(&config.cors_headers, &config.cors_origins);
        let maintenance =
            Arc::new(AtomicBool::new(config.options.maintenance_enabled));
        HttpEndpoint {
            log: component_logger(log, "HttpEndpoint"),
            resolver,
            maintenance,
            state: Mutex::new(EndpointState { cors, ..Default::default() }),
            lifecycle: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Publishes the endpoint address to `discovery` once it is listening.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.resolver.set_discovery(Some(discovery));
        self
    }

    fn state(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn is_open(&self) -> bool {
        self.state().running.is_some()
    }

    /// Address the listener is bound to, while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().running.as_ref().map(|r| r.local_addr)
    }

    /// `protocol://host:port` of the open endpoint, using the bound port.
    pub fn uri(&self) -> Option<String> {
        self.state().running.as_ref().map(|r| r.uri.clone())
    }

    pub fn is_maintenance_enabled(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    /// Turns maintenance mode on or off.  Takes effect immediately, even
    /// while open.
    pub fn set_maintenance_enabled(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::SeqCst);
    }

    /// Allows an extra header and/or origin in cross-origin requests.  Only
    /// possible while the endpoint is closed.
    pub fn add_cors_header(
        &self,
        header: &str,
        origin: &str,
    ) -> Result<(), ApplicationError> {
        self.state().cors.add(header, origin)
    }

    /// Queues `registration` to install its routes when the endpoint opens.
    /// Registering the same object twice has no effect.
    pub fn register(&self, registration: Arc<dyn Registrable>) {
        let mut state = self.state();
        if state
            .registrations
            .iter()
            .any(|r| same_registration(r, &registration))
        {
            return;
        }
        if state.running.is_some() {
            warn!(self.log, "registration added while open; its routes \
                will be installed on the next open");
        }
        state.registrations.push(registration);
    }

    /// Removes `registration` from the queue.
    pub fn unregister(&self, registration: &Arc<dyn Registrable>) {
        let mut state = self.state();
        if let Some(index) = state
            .registrations
            .iter()
            .position(|r| same_registration(r, registration))
        {
            state.registrations.remove(index);
        }
    }

    /// Installs a route.  Only valid from [`Registrable::register`].
    ///
    /// `method` is case-insensitive (`"del"` is accepted for `"delete"`) and
    /// `route` gets a leading `/` if it lacks one.  With a `schema`, the
    /// merged query/path/body parameters are validated before `handler`
    /// runs.
    pub fn register_route<F, Fut>(
        &self,
        method: &str,
        route: &str,
        schema: Option<ObjectSchema>,
        handler: F,
    ) -> Result<(), ApplicationError>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let method = parse_method(method)?;
        let route = normalize_route(route);
        let handler = route_handler(&method, &route, schema, handler);
        self.install_route(&method, &route, handler)
    }

    /// Like [`HttpEndpoint::register_route`], but `authorize` runs first and
    /// must call `next` for the request to reach the handler.
    pub fn register_route_with_auth<F, Fut>(
        &self,
        method: &str,
        route: &str,
        schema: Option<ObjectSchema>,
        authorize: Arc<dyn Interceptor>,
        handler: F,
    ) -> Result<(), ApplicationError>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let method = parse_method(method)?;
        let route = normalize_route(route);
        let inner = route_handler(&method, &route, schema, handler);
        let handler: Arc<dyn RouteHandler> =
            Arc::new(InterceptedHandler::new(authorize, None, inner));
        self.install_route(&method, &route, handler)
    }

    /// Runs `interceptor` ahead of every route whose request path matches the
    /// regular expression `route_pattern` (every route when it's empty).
    /// Only valid from [`Registrable::register`].
    pub fn register_interceptor(
        &self,
        route_pattern: &str,
        interceptor: Arc<dyn Interceptor>,
    ) -> Result<(), ApplicationError> {
        let pattern = if route_pattern.is_empty() {
            None
        } else {
            Some(Regex::new(route_pattern).map_err(|e| {
                ApplicationError::config(
                    "INVALID_ROUTE_PATTERN",
                    format!("bad interceptor pattern \"{}\"", route_pattern),
                )
                .with_cause(e)
            })?)
        };
        let mut state = self.state();
        let pending = state.pending.as_mut().ok_or_else(not_registering)?;
        pending.interceptors.push(RegisteredInterceptor { pattern, interceptor });
        Ok(())
    }

    fn install_route(
        &self,
        method: &Method,
        route: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), ApplicationError> {
        let mut state = self.state();
        let pending = state.pending.as_mut().ok_or_else(not_registering)?;
        pending.routes.insert(method, route, handler)?;
        debug!(self.log, "registered route"; "method" => %method,
            "route" => route);
        Ok(())
    }

    /// Resolves the address, installs every registration's routes and starts
    /// listening.  Does nothing if already open.
    pub async fn open(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_open() {
            return Ok(());
        }

        let (connection, credential) =
            self.resolver.resolve_local(correlation_id)?;
        let host = connection.host().unwrap_or("0.0.0.0").to_string();
        let port = connection.port.unwrap_or(0);

        let tls_acceptor = if connection.is_https() {
            let credential = credential.unwrap_or_default();
            let config = tls_server_config(&credential).map_err(|e| {
                ApplicationError::from(e).with_correlation_id(correlation_id)
            })?;
            Some(TlsAcceptor::from(Arc::new(config)))
        } else {
            None
        };

        let pending = self.perform_registrations()?;

        let listener =
            TcpListener::bind((host.as_str(), port)).await.map_err(|e| {
                ApplicationError::connection(
                    "CANNOT_START_SERVER",
                    format!("failed to listen on {}:{}", host, port),
                )
                .with_correlation_id(correlation_id)
                .with_cause(e)
            })?;
        let local_addr = listener.local_addr().map_err(|e| {
            ApplicationError::connection(
                "CANNOT_START_SERVER",
                "failed to determine listening address",
            )
            .with_cause(e)
        })?;
        let uri =
            format!("{}://{}:{}", connection.protocol(), host, local_addr.port());

        let log = self.log.new(o!("local_addr" => local_addr));
        let server = Arc::new(ServerState {
            routes: pending.routes,
            interceptors: pending.interceptors,
            cors: self.state().cors.freeze(),
            maintenance: Arc::clone(&self.maintenance),
            local_addr,
            https: tls_acceptor.is_some(),
            request_max_size: self.config.options.request_max_size,
            file_max_size: self.config.options.file_max_size,
            protocol_upgrade_enabled: self
                .config
                .options
                .protocol_upgrade_enabled,
            connect_timeout: Duration::from_millis(
                self.config.options.connect_timeout,
            ),
            debug: self.config.options.debug,
            log: log.clone(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(serve_connections(
            listener,
            tls_acceptor,
            server,
            shutdown_rx,
        ));
        self.state().running =
            Some(RunningServer { local_addr, uri: uri.clone(), shutdown, join });
        info!(log, "opened REST service at {}", uri);

        if let Err(error) = self
            .resolver
            .register(correlation_id, Some(local_addr.port()))
            .await
        {
            error!(log, "failed to register endpoint address"; "error" => %error);
            // Don't leave a listener running that nobody can find.
            if let Err(close_error) = self.shutdown(correlation_id).await {
                warn!(log, "failed to close unregistered endpoint";
                    "error" => %close_error);
            }
            return Err(error);
        }
        Ok(())
    }

    /// Asks every queued registration to install its routes.
    fn perform_registrations(&self) -> Result<PendingRoutes, ApplicationError> {
        let registrations = {
            let mut state = self.state();
            state.pending = Some(PendingRoutes::default());
            state.registrations.clone()
        };

        let result = registrations.iter().try_for_each(|r| r.register(self));
        let pending = self.state().pending.take();
        result?;
        pending.ok_or_else(not_registering)
    }

    /// Stops listening and waits (up to five seconds) for in-flight requests.
    /// The endpoint is closed afterwards even if that wait fails.
    pub async fn close(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown(correlation_id).await
    }

    async fn shutdown(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let running = {
            let mut state = self.state();
            state.cors.unfreeze();
            state.running.take()
        };
        let Some(mut running) = running else {
            return Ok(());
        };

        // The receiver is gone only if the server task already exited, in
        // which case the join below reports why.
        let _ = running.shutdown.send(true);

        let result =
            match tokio::time::timeout(SHUTDOWN_DEADLINE, &mut running.join)
                .await
            {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(ApplicationError::connection(
                    "SERVER_FAILED",
                    "listener failed while serving",
                )
                .with_cause(e)),
                Ok(Err(e)) => Err(ApplicationError::internal(
                    "SERVER_FAILED",
                    "server task failed",
                )
                .with_cause(e)),
                Err(_) => {
                    running.join.abort();
                    Err(ApplicationError::invalid_state(
                        "SHUTDOWN_TIMEOUT",
                        "in-flight requests did not finish in time",
                    ))
                }
            };

        match &result {
            Ok(()) => info!(self.log, "closed REST service at {}", running.uri),
            Err(error) => warn!(self.log, "REST service closed with error";
                "uri" => &running.uri, "error" => %error),
        }
        result.map_err(|e| e.with_correlation_id(correlation_id))
    }
}

// For graceful termination, `close()` is preferred, as it can report errors
// and wait for termination to complete.  Dropping an open endpoint still
// stops the listener.
impl Drop for HttpEndpoint {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = &state.running {
            let _ = running.shutdown.send(true);
        }
    }
}

fn not_registering() -> ApplicationError {
    ApplicationError::invalid_state(
        "NOT_REGISTERING",
        "routes can only be registered while the endpoint opens",
    )
}

fn parse_method(method: &str) -> Result<Method, ApplicationError> {
    match method.to_ascii_lowercase().as_str() {
        "get" => Ok(Method::GET),
        "post" => Ok(Method::POST),
        "put" => Ok(Method::PUT),
        "patch" => Ok(Method::PATCH),
        "delete" | "del" => Ok(Method::DELETE),
        "head" => Ok(Method::HEAD),
        "options" => Ok(Method::OPTIONS),
        _ => Err(ApplicationError::unsupported(
            "UNSUPPORTED_METHOD",
            format!("method {} is not supported", method),
        )
        .with_details("method", method)),
    }
}

fn normalize_route(route: &str) -> String {
    if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{}", route)
    }
}

fn route_handler<F, Fut>(
    method: &Method,
    route: &str,
    schema: Option<ObjectSchema>,
    handler: F,
) -> Arc<dyn RouteHandler>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let label = format!("{} {}", method, route);
    let handler: Arc<dyn RouteHandler> =
        Arc::new(HttpRouteHandler::new_with_name(&label, handler));
    match schema {
        Some(schema) => Arc::new(ValidatedHandler::new(schema, handler)),
        None => handler,
    }
}
