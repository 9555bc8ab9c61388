// Copyright 2025 Oxide Computer Company
//! Base for REST services
//!
//! A [`RestService`] is one logical service on an [`HttpEndpoint`].  Its
//! routes come from a [`RestServiceRegistrar`], a strategy object that the
//! service invokes whenever its endpoint opens.  The registrar sees a
//! [`ServiceRoutes`] view that prefixes the service's base route onto every
//! route it installs.
//!
//! The endpoint is either shared (handed in with
//! [`RestService::with_endpoint`] and opened by its owner) or, when none was
//! given, created by the service itself on first open and closed along with
//! it.

use crate::Body;
use crate::config::ConfigRestService;
use crate::connect::Discovery;
use crate::endpoint::HttpEndpoint;
use crate::endpoint::Registrable;
use crate::error::ApplicationError;
use crate::handler::HandlerResult;
use crate::handler::Interceptor;
use crate::handler::RequestContext;
use crate::http_util::CONTENT_TYPE_YAML;
use crate::instrument::Counters;
use crate::instrument::InstrumentTiming;
use crate::instrument::Instrumentation;
use crate::instrument::Tracer;
use crate::instrument::VERB_EXEC;
use crate::logging::component_logger;
use crate::schema::ObjectSchema;

use bytes::Bytes;
use camino::Utf8Path;
use http::header;
use http::HeaderValue;
use hyper::Response;
use slog::Logger;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

/// Installs the routes of a service.  Called each time the service's
/// endpoint opens.
pub trait RestServiceRegistrar: Send + Sync {
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError>;
}

impl<F> RestServiceRegistrar for F
where
    F: Fn(&ServiceRoutes<'_>) -> Result<(), ApplicationError> + Send + Sync,
{
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
        self(routes)
    }
}

/// Collects the OpenAPI documents of many services, e.g. to serve a
/// Swagger UI.
pub trait SwaggerService: Send + Sync {
    fn register_open_api_spec(&self, base_route: &str, swagger_route: &str);
}

/// Prepends `base_route` to `route`.  An empty route is the base route
/// itself.
pub fn append_base_route(base_route: &str, route: &str) -> String {
    let route = if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{}", route)
    };
    let base_route = base_route.trim_end_matches('/');
    if base_route.is_empty() {
        return route;
    }
    if base_route.starts_with('/') {
        format!("{}{}", base_route, route)
    } else {
        format!("/{}{}", base_route, route)
    }
}

/// The part of a service that its endpoint calls back into.
#[derive(Clone)]
struct ServiceRegistration {
    config: ConfigRestService,
    log: Logger,
    instrumentation: Instrumentation,
    registrar: Arc<dyn RestServiceRegistrar>,
    swagger_service: Option<Arc<dyn SwaggerService>>,
}

impl Registrable for ServiceRegistration {
    fn register(&self, endpoint: &HttpEndpoint) -> Result<(), ApplicationError> {
        let routes = ServiceRoutes { endpoint, service: self };
        self.registrar.register(&routes)?;
        if let Some(path) = &self.config.swagger.path {
            routes.register_open_api_spec_from_file(path)?;
        }
        Ok(())
    }
}

/// Registration view handed to a [`RestServiceRegistrar`].
pub struct ServiceRoutes<'a> {
    endpoint: &'a HttpEndpoint,
    service: &'a ServiceRegistration,
}

impl<'a> ServiceRoutes<'a> {
    pub fn base_route(&self) -> &str {
        &self.service.config.base_route
    }

    pub fn config(&self) -> &ConfigRestService {
        &self.service.config
    }

    pub fn log(&self) -> &Logger {
        &self.service.log
    }

    /// The service's instrumentation, for handlers to clone.
    pub fn instrumentation(&self) -> &Instrumentation {
        &self.service.instrumentation
    }

    /// Starts instrumenting one execution of operation `name`.
    pub fn instrument(
        &self,
        correlation_id: Option<&str>,
        name: &str,
    ) -> InstrumentTiming {
        self.service.instrumentation.instrument(correlation_id, name, VERB_EXEC)
    }

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
        let route = append_base_route(self.base_route(), route);
        self.endpoint.register_route(method, &route, schema, handler)
    }

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
        let route = append_base_route(self.base_route(), route);
        self.endpoint
            .register_route_with_auth(method, &route, schema, authorize, handler)
    }

    /// Installs `interceptor` for paths matching `route_pattern` below the
    /// base route.  The pattern is a regular expression.
    pub fn register_interceptor(
        &self,
        route_pattern: &str,
        interceptor: Arc<dyn Interceptor>,
    ) -> Result<(), ApplicationError> {
        let pattern = append_base_route(self.base_route(), route_pattern);
        self.endpoint.register_interceptor(&pattern, interceptor)
    }

    /// Serves `content` as the service's OpenAPI document at
    /// `<base_route>/<swagger.route>`.  Does nothing unless swagger is
    /// enabled.
    pub fn register_open_api_spec(
        &self,
        content: impl Into<Bytes>,
    ) -> Result<(), ApplicationError> {
        let swagger = &self.service.config.swagger;
        if !swagger.enable {
            return Ok(());
        }

        let content: Bytes = content.into();
        self.register_route("get", &swagger.route, None, move |_| {
            let content = content.clone();
            async move {
                let mut response = Response::new(Body::with_content(content));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(CONTENT_TYPE_YAML),
                );
                Ok(response)
            }
        })?;

        if let Some(swagger_service) = &self.service.swagger_service {
            swagger_service
                .register_open_api_spec(self.base_route(), &swagger.route);
        }
        Ok(())
    }

    /// Like [`ServiceRoutes::register_open_api_spec`], with the document read
    /// from `path`.
    pub fn register_open_api_spec_from_file(
        &self,
        path: &Utf8Path,
    ) -> Result<(), ApplicationError> {
        let content = std::fs::read(path).map_err(|e| {
            error!(self.log(), "can't read swagger file"; "path" => %path,
                "error" => %e);
            ApplicationError::file(
                "CANNOT_READ_FILE",
                format!("failed to read OpenAPI document {}", path),
            )
            .with_cause(e)
        })?;
        self.register_open_api_spec(content)
    }
}

struct ServiceEndpoint {
    endpoint: Arc<HttpEndpoint>,
    /// created by (and closed with) this service
    local: bool,
}

/// A logical REST service.
pub struct RestService {
    registration: Arc<ServiceRegistration>,
    discovery: Option<Arc<dyn Discovery>>,
    endpoint: Mutex<Option<ServiceEndpoint>>,
    opened: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for RestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestService")
            .field("base_route", &self.registration.config.base_route)
            .field("opened", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl RestService {
    pub fn new(
        config: ConfigRestService,
        log: &Logger,
        registrar: Arc<dyn RestServiceRegistrar>,
    ) -> Self {
        let log = component_logger(log, "RestService")
            .new(o!("base_route" => config.base_route.clone()));
        let component = if config.base_route.is_empty() {
            "RestService".to_string()
        } else {
            config.base_route.clone()
        };
        let instrumentation = Instrumentation::new(&log, &component);
        RestService {
            registration: Arc::new(ServiceRegistration {
                config,
                log,
                instrumentation,
                registrar,
                swagger_service: None,
            }),
            discovery: None,
            endpoint: Mutex::new(None),
            opened: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Applies `f` to the registration.  A registration already queued on a
    /// shared endpoint is swapped for the updated one.
    fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut ServiceRegistration),
    {
        let shared = self.endpoint();
        if let Some(endpoint) = &shared {
            endpoint.unregister(&self.registrable());
        }
        f(Arc::make_mut(&mut self.registration));
        if let Some(endpoint) = &shared {
            endpoint.register(self.registrable());
        }
        self
    }

    /// Reports counters for every operation this service instruments.
    pub fn with_counters(self, counters: Arc<dyn Counters>) -> Self {
        self.configure(|r| {
            r.instrumentation = r.instrumentation.clone().with_counters(counters)
        })
    }

    pub fn with_tracer(self, tracer: Arc<dyn Tracer>) -> Self {
        self.configure(|r| {
            r.instrumentation = r.instrumentation.clone().with_tracer(tracer)
        })
    }

    pub fn with_swagger_service(
        self,
        swagger_service: Arc<dyn SwaggerService>,
    ) -> Self {
        self.configure(|r| r.swagger_service = Some(swagger_service))
    }

    /// Discovery used by the endpoint this service creates for itself.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Shares `endpoint` with other services.  Its owner opens and closes it;
    /// this service only contributes routes.
    pub fn with_endpoint(self, endpoint: Arc<HttpEndpoint>) -> Self {
        endpoint.register(self.registrable());
        *self.endpoint_state() =
            Some(ServiceEndpoint { endpoint, local: false });
        self
    }

    fn registrable(&self) -> Arc<dyn Registrable> {
        Arc::clone(&self.registration) as Arc<dyn Registrable>
    }

    fn endpoint_state(&self) -> MutexGuard<'_, Option<ServiceEndpoint>> {
        self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ConfigRestService {
        &self.registration.config
    }

    pub fn log(&self) -> &Logger {
        &self.registration.log
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.registration.instrumentation
    }

    /// The endpoint in use, if any.
    pub fn endpoint(&self) -> Option<Arc<HttpEndpoint>> {
        self.endpoint_state().as_ref().map(|e| Arc::clone(&e.endpoint))
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Opens the service, creating (and opening) a private endpoint if no
    /// shared one was provided.  Does nothing if already open.
    pub async fn open(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_open() {
            return Ok(());
        }

        let (endpoint, local) = {
            let mut state = self.endpoint_state();
            let state = state.get_or_insert_with(|| {
                let mut endpoint = HttpEndpoint::new(
                    self.registration.config.endpoint.clone(),
                    self.log(),
                );
                if let Some(discovery) = &self.discovery {
                    endpoint = endpoint.with_discovery(Arc::clone(discovery));
                }
                endpoint.register(self.registrable());
                ServiceEndpoint { endpoint: Arc::new(endpoint), local: true }
            });
            (Arc::clone(&state.endpoint), state.local)
        };

        if local {
            endpoint.open(correlation_id).await?;
        }
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Closes the service and its private endpoint, if it has one.  Does
    /// nothing if already closed.
    pub async fn close(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.is_open() {
            return Ok(());
        }

        let endpoint = self
            .endpoint_state()
            .as_ref()
            .map(|e| (Arc::clone(&e.endpoint), e.local));
        let Some((endpoint, local)) = endpoint else {
            return Err(ApplicationError::invalid_state(
                "NO_ENDPOINT",
                "HTTP endpoint is missing",
            )
            .with_correlation_id(correlation_id));
        };

        self.opened.store(false, Ordering::SeqCst);
        if local {
            endpoint.close(correlation_id).await?;
        }
        Ok(())
    }

    /// Withdraws this service's routes from its endpoint (effective the next
    /// time the endpoint opens) and forgets the endpoint.
    pub fn detach(&self) {
        if let Some(state) = self.endpoint_state().take() {
            state.endpoint.unregister(&self.registrable());
        }
    }
}
