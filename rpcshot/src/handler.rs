// Copyright 2025 Oxide Computer Company
//! Interface for implementing HTTP route handlers and interceptors.
//!
//! A route handler is an async function that accepts a [`RequestContext`] and
//! produces either a response or an [`ApplicationError`].  By the time a
//! handler runs, the request body has been fully buffered, so it can be read
//! any number of times (by a validating wrapper, an interceptor and the
//! handler itself).
//!
//! Handlers are composed by wrapping: schema validation, authorization and
//! path-matched interceptors each wrap the next [`RouteHandler`] and decide
//! whether to call it.  An interceptor that never calls [`Next::run`] denies
//! the request with whatever it returns.

use crate::data::FilterParams;
use crate::data::PagingParams;
use crate::error::ApplicationError;
use crate::http_util::query_pairs;
use crate::http_util::CORRELATION_ID;
use crate::router::PathParams;
use crate::schema::ObjectSchema;
use crate::Body;

use async_trait::async_trait;
use bytes::Bytes;
use debug_ignore::DebugIgnore;
use hyper::Response;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use slog::Logger;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::future::Future;
use std::sync::Arc;

/// Type alias for the result returned by HTTP handler functions.
pub type HandlerResult = Result<Response<Body>, ApplicationError>;

/// Handle for various interfaces useful during request processing.
#[derive(Debug)]
pub struct RequestContext {
    /// basic request information (method, URI, etc.)
    pub request: RequestInfo,
    /// HTTP request routing variables
    pub path_params: PathParams,
    /// unique id assigned to this request
    pub request_id: String,
    /// logger for this specific request
    pub log: Logger,

    query: Vec<(String, String)>,
    body: Bytes,
    extensions: http::Extensions,
}

/// Request line and headers, kept after the body has been buffered.
#[derive(Debug)]
pub struct RequestInfo {
    method: http::Method,
    uri: http::Uri,
    version: http::Version,
    headers: http::HeaderMap<http::HeaderValue>,
    remote_addr: std::net::SocketAddr,
    local_addr: std::net::SocketAddr,
    https: bool,
}

impl RequestInfo {
    pub(crate) fn new<B>(
        request: &hyper::Request<B>,
        remote_addr: std::net::SocketAddr,
        local_addr: std::net::SocketAddr,
        https: bool,
    ) -> Self {
        RequestInfo {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            remote_addr,
            local_addr,
            https,
        }
    }

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    pub fn uri(&self) -> &http::Uri {
        &self.uri
    }

    pub fn version(&self) -> http::Version {
        self.version
    }

    pub fn headers(&self) -> &http::HeaderMap<http::HeaderValue> {
        &self.headers
    }

    pub fn remote_addr(&self) -> std::net::SocketAddr {
        self.remote_addr
    }

    /// Address of the endpoint socket that accepted the request.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// "https" for connections that went through TLS, "http" otherwise.
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }
}

impl RequestContext {
    pub(crate) fn new(
        request: RequestInfo,
        path_params: PathParams,
        body: Bytes,
        request_id: String,
        log: Logger,
    ) -> Self {
        let query = query_pairs(request.uri().query());
        RequestContext {
            request,
            path_params,
            request_id,
            log,
            query,
            body,
            extensions: http::Extensions::new(),
        }
    }

    /// Query string parameters in order of appearance.  Only the first value
    /// of a repeated parameter is kept.
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Looks `name` up in the query string first, then in the path.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query_param(name).or_else(|| self.path_param(name))
    }

    /// Returns the value of header `name` if it's present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the caller's correlation id, taken from the `correlation_id`
    /// query parameter or, failing that, the header of the same name.
    pub fn correlation_id(&self) -> Option<&str> {
        self.query_param(CORRELATION_ID)
            .filter(|id| !id.is_empty())
            .or_else(|| self.header(CORRELATION_ID))
            .filter(|id| !id.is_empty())
    }

    /// Query parameters other than paging and the correlation id, as a
    /// filter.
    pub fn filter_params(&self) -> FilterParams {
        FilterParams::from_tuples(
            self.query
                .iter()
                .filter(|(name, _)| {
                    !matches!(
                        name.as_str(),
                        "skip" | "take" | "total" | CORRELATION_ID
                    )
                })
                .map(|(name, value)| (name.clone(), value.clone())),
        )
    }

    /// `skip`, `take` and `total`, each looked up like [`Self::param`].
    pub fn paging_params(&self) -> PagingParams {
        PagingParams::from_strings(
            self.param("skip"),
            self.param("take"),
            self.param("total"),
        )
    }

    /// Raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Parses the request body as JSON into `T`.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, ApplicationError> {
        let jd = &mut serde_json::Deserializer::from_slice(&self.body);
        serde_path_to_error::deserialize(jd).map_err(|e| {
            ApplicationError::bad_request(
                "INVALID_JSON",
                format!("unable to parse JSON body: {}", e),
            )
            .with_correlation_id(self.correlation_id())
        })
    }

    /// Parses the request body as arbitrary JSON.  An empty body is `None`.
    pub fn body_value(&self) -> Result<Option<Value>, ApplicationError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        self.body_json::<Value>().map(Some)
    }

    /// Per-request values attached by interceptors (e.g., the authenticated
    /// user).
    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    /// Takes the pending protocol upgrade of the request's connection.  It
    /// is only there when the endpoint enables `protocol_upgrade_enabled`.
    /// The handler answers `101 Switching Protocols` and then awaits the
    /// upgrade for the raw stream.
    pub fn take_upgrade(&mut self) -> Option<hyper::upgrade::OnUpgrade> {
        self.extensions.remove::<hyper::upgrade::OnUpgrade>()
    }
}

/// `RouteHandler` abstracts an `HttpRouteHandler<F>` and its wrappers so that
/// the route table can store handlers of different concrete types.
///
/// The "Route" in `RouteHandler` refers to the fact that this structure is used
/// to record that a specific handler has been attached to a specific HTTP route.
#[async_trait]
pub trait RouteHandler: Debug + Send + Sync {
    /// Returns a description of this handler.  This might be a function name,
    /// for example.  This is not guaranteed to be unique.
    fn label(&self) -> &str;

    /// Handle an incoming HTTP request.
    async fn handle_request(&self, rqctx: RequestContext) -> HandlerResult;
}

/// `HttpRouteHandler` adapts an async function or closure into a
/// [`RouteHandler`].
pub struct HttpRouteHandler<F> {
    /// the actual function used to implement this route
    handler: F,
    /// debugging label for the handler
    label: String,
}

impl<F, Fut> HttpRouteHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new `HttpRouteHandler` for the given function.  The label is
    /// the function's type name.
    pub fn new(handler: F) -> Self {
        HttpRouteHandler::new_with_name(std::any::type_name::<F>(), handler)
    }

    pub fn new_with_name(label: &str, handler: F) -> Self {
        HttpRouteHandler { handler, label: label.to_string() }
    }
}

impl<F> Debug for HttpRouteHandler<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "handler: {}", self.label)
    }
}

#[async_trait]
impl<F, Fut> RouteHandler for HttpRouteHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn handle_request(&self, rqctx: RequestContext) -> HandlerResult {
        (self.handler)(rqctx).await
    }
}

/// Continuation handed to an [`Interceptor`].  Running it invokes the rest of
/// the chain (and eventually the route handler).
#[derive(Clone, Debug)]
pub struct Next {
    handler: Arc<dyn RouteHandler>,
}

impl Next {
    pub(crate) fn new(handler: Arc<dyn RouteHandler>) -> Self {
        Next { handler }
    }

    pub async fn run(self, rqctx: RequestContext) -> HandlerResult {
        self.handler.handle_request(rqctx).await
    }
}

/// Middleware that runs ahead of a route handler.  It must call
/// [`Next::run`] for the request to proceed.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, rqctx: RequestContext, next: Next) -> HandlerResult;
}

/// [`Interceptor`] implemented by an async function or closure.
pub struct InterceptorFn<F>(F);

#[async_trait]
impl<F, Fut> Interceptor for InterceptorFn<F>
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn intercept(&self, rqctx: RequestContext, next: Next) -> HandlerResult {
        (self.0)(rqctx, next).await
    }
}

/// Wraps a function or closure into a shareable [`Interceptor`].
pub fn interceptor_fn<F, Fut>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(InterceptorFn(f))
}

/// Runs `interceptor` ahead of `next`, but only for request paths matching
/// `pattern` (every path when there is no pattern).
#[derive(Debug)]
pub(crate) struct InterceptedHandler {
    interceptor: DebugIgnore<Arc<dyn Interceptor>>,
    pattern: Option<Regex>,
    next: Arc<dyn RouteHandler>,
}

impl InterceptedHandler {
    pub(crate) fn new(
        interceptor: Arc<dyn Interceptor>,
        pattern: Option<Regex>,
        next: Arc<dyn RouteHandler>,
    ) -> Self {
        InterceptedHandler { interceptor: DebugIgnore(interceptor), pattern, next }
    }
}

#[async_trait]
impl RouteHandler for InterceptedHandler {
    fn label(&self) -> &str {
        self.next.label()
    }

    async fn handle_request(&self, rqctx: RequestContext) -> HandlerResult {
        let applies = self
            .pattern
            .as_ref()
            .map_or(true, |p| p.is_match(rqctx.request.uri().path()));
        if applies {
            let next = Next::new(Arc::clone(&self.next));
            self.interceptor.intercept(rqctx, next).await
        } else {
            self.next.handle_request(rqctx).await
        }
    }
}

/// Validates the merged request parameters against a schema before handing
/// the request to `next`.
#[derive(Debug)]
pub(crate) struct ValidatedHandler {
    schema: ObjectSchema,
    next: Arc<dyn RouteHandler>,
}

impl ValidatedHandler {
    pub(crate) fn new(schema: ObjectSchema, next: Arc<dyn RouteHandler>) -> Self {
        ValidatedHandler { schema, next }
    }
}

/// Merges query parameters, path variables (which win on collision) and the
/// parsed body (under the key `"body"`) into one object.
pub(crate) fn merged_params(
    rqctx: &RequestContext,
) -> Result<Map<String, Value>, ApplicationError> {
    let mut params = Map::new();
    for (name, value) in rqctx.query_params() {
        params.insert(name.clone(), Value::String(value.clone()));
    }
    for (name, value) in &rqctx.path_params {
        params.insert(name.clone(), Value::String(value.clone()));
    }
    if let Some(body) = rqctx.body_value()? {
        params.insert("body".to_string(), body);
    }
    Ok(params)
}

#[async_trait]
impl RouteHandler for ValidatedHandler {
    fn label(&self) -> &str {
        self.next.label()
    }

    async fn handle_request(&self, rqctx: RequestContext) -> HandlerResult {
        let params = merged_params(&rqctx)?;
        self.schema
            .validate_and_return_error(rqctx.correlation_id(), &Value::Object(params))?;
        self.next.handle_request(rqctx).await
    }
}
