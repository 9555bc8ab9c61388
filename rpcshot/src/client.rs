// Copyright 2025 Oxide Computer Company
//! Retrying JSON-over-HTTP client
//!
//! A [`RestClient`] resolves its remote endpoint once, in
//! [`RestClient::open`], and then issues calls against
//! `<uri><base_route><route>`.  Each call is attempted up to
//! `options.retries` times.  Only transport failures (refused connections,
//! timeouts) are retried; after the `n`th failed attempt the client waits
//! `options.timeout * n * n` milliseconds before trying again.  An HTTP error
//! status is never retried: the response body is decoded into an
//! [`ApplicationError`] and returned.

use crate::config::ConfigRestClient;
use crate::connect::Discovery;
use crate::connect::HttpConnectionResolver;
use crate::data::FilterParams;
use crate::data::PagingParams;
use crate::error::ApplicationError;
use crate::http_util::CONTENT_TYPE_JSON;
use crate::http_util::CORRELATION_ID;
use crate::instrument::Counters;
use crate::instrument::InstrumentTiming;
use crate::instrument::Instrumentation;
use crate::instrument::Tracer;
use crate::instrument::VERB_CALL;
use crate::logging::component_logger;

use bytes::Bytes;
use http::StatusCode;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use slog::Logger;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Query parameters of one call, in insertion order.
pub type QueryParams = IndexMap<String, String>;

/// Puts `correlation_id` into `params`, if there is one.
pub fn add_correlation_id(params: &mut QueryParams, correlation_id: Option<&str>) {
    if let Some(correlation_id) = correlation_id.filter(|c| !c.is_empty()) {
        params.insert(CORRELATION_ID.to_string(), correlation_id.to_string());
    }
}

/// Copies every non-empty filter entry into `params`.
pub fn add_filter_params(params: &mut QueryParams, filter: Option<&FilterParams>) {
    let Some(filter) = filter else {
        return;
    };
    for (key, value) in filter.iter().filter(|(_, v)| !v.is_empty()) {
        params.insert(key.to_string(), value.to_string());
    }
}

/// Copies paging into `params`.  `total` is always sent; `skip` and `take`
/// only when they are set.
pub fn add_paging_params(params: &mut QueryParams, paging: Option<&PagingParams>) {
    let Some(paging) = paging else {
        return;
    };
    if let Some(skip) = paging.skip {
        params.insert("skip".to_string(), skip.to_string());
    }
    if let Some(take) = paging.take {
        params.insert("take".to_string(), take.to_string());
    }
    params.insert("total".to_string(), paging.total.to_string());
}

/// Joins route fragments with exactly one `/` between them and a leading
/// `/`.  Empty fragments are skipped.
fn request_route(base_route: &str, route: &str) -> String {
    let mut path = String::new();
    for part in [base_route, route] {
        let part = part.trim_matches('/');
        if !part.is_empty() {
            path.push('/');
            path.push_str(part);
        }
    }
    path
}

fn parse_method(method: &str) -> Result<reqwest::Method, ApplicationError> {
    match method.to_ascii_lowercase().as_str() {
        "get" => Ok(reqwest::Method::GET),
        "head" => Ok(reqwest::Method::HEAD),
        "post" => Ok(reqwest::Method::POST),
        "put" => Ok(reqwest::Method::PUT),
        "patch" => Ok(reqwest::Method::PATCH),
        "delete" | "del" => Ok(reqwest::Method::DELETE),
        _ => Err(ApplicationError::unknown(
            "UNSUPPORTED_METHOD",
            "method is not supported by REST client",
        )
        .with_details("verb", method)),
    }
}

#[derive(Clone, Debug)]
struct OpenClient {
    client: reqwest::Client,
    uri: String,
}

/// Client for one remote REST service.
#[derive(Debug)]
pub struct RestClient {
    config: ConfigRestClient,
    log: Logger,
    resolver: HttpConnectionResolver,
    instrumentation: Instrumentation,
    state: Mutex<Option<OpenClient>>,
}

impl RestClient {
    pub fn new(config: ConfigRestClient, log: &Logger) -> Self {
        let log = component_logger(log, "RestClient");
        let resolver =
            HttpConnectionResolver::new(config.connection.clone(), None);
        let component = match config.base_route.trim_matches('/') {
            "" => "RestClient".to_string(),
            base_route => base_route.to_string(),
        };
        let instrumentation = Instrumentation::new(&log, &component);
        RestClient {
            config,
            log,
            resolver,
            instrumentation,
            state: Mutex::new(None),
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.resolver.set_discovery(Some(discovery));
        self
    }

    pub fn with_counters(mut self, counters: Arc<dyn Counters>) -> Self {
        self.instrumentation = self.instrumentation.with_counters(counters);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.instrumentation = self.instrumentation.with_tracer(tracer);
        self
    }

    pub fn config(&self) -> &ConfigRestClient {
        &self.config
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    fn current(&self) -> Option<OpenClient> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    /// Base URI of the resolved remote endpoint, while open.
    pub fn uri(&self) -> Option<String> {
        self.current().map(|c| c.uri)
    }

    /// Resolves the remote endpoint and prepares the transport.  Opening an
    /// open client does nothing.
    pub async fn open(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        if self.is_open() {
            return Ok(());
        }

        let (connection, _) = self.resolver.resolve(correlation_id).await?;
        let uri = connection
            .uri()
            .ok_or_else(|| {
                ApplicationError::config("NO_URI", "connection has no uri")
                    .with_correlation_id(correlation_id)
            })?
            .trim_end_matches('/')
            .to_string();

        let options = &self.config.options;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(options.connect_timeout))
            .timeout(Duration::from_millis(
                options.timeout.saturating_add(options.connect_timeout),
            ))
            .build()
            .map_err(|e| {
                ApplicationError::connection(
                    "CANNOT_CONNECT",
                    "failed to create HTTP client",
                )
                .with_correlation_id(correlation_id)
                .with_cause(e)
            })?;

        let mut state =
            self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_none() {
            debug!(self.log, "connected via REST to {}", uri;
                "correlation_id" => correlation_id);
            *state = Some(OpenClient { client, uri });
        }
        Ok(())
    }

    /// Drops the transport.  Closing a closed client does nothing.
    pub async fn close(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let closed =
            self.state.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(closed) = closed {
            debug!(self.log, "closed REST client at {}", closed.uri;
                "correlation_id" => correlation_id);
        }
        Ok(())
    }

    /// Starts instrumenting a call of operation `name`.
    pub fn instrument(
        &self,
        correlation_id: Option<&str>,
        name: &str,
    ) -> InstrumentTiming {
        self.instrumentation.instrument(correlation_id, name, VERB_CALL)
    }

    /// Runs `call` as an instrumented call of operation `name`.
    pub async fn instrument_call<T, F>(
        &self,
        correlation_id: Option<&str>,
        name: &str,
        call: F,
    ) -> Result<T, ApplicationError>
    where
        F: Future<Output = Result<T, ApplicationError>>,
    {
        self.instrumentation
            .instrument_call(correlation_id, name, VERB_CALL, call)
            .await
    }

    /// Calls `method route` and decodes the JSON response as `T`.  A 204
    /// response, or one with an empty body, is `Ok(None)`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        route: &str,
        correlation_id: Option<&str>,
        params: QueryParams,
        body: Option<Value>,
    ) -> Result<Option<T>, ApplicationError> {
        let cancel = CancellationToken::new();
        self.call_with_cancel(&cancel, method, route, correlation_id, params, body)
            .await
    }

    /// Like [`RestClient::call`], leaving the response as untyped JSON.
    pub async fn call_raw(
        &self,
        method: &str,
        route: &str,
        correlation_id: Option<&str>,
        params: QueryParams,
        body: Option<Value>,
    ) -> Result<Option<Value>, ApplicationError> {
        self.call(method, route, correlation_id, params, body).await
    }

    /// Like [`RestClient::call`], giving up with `CONTEXT_CANCELLED` as soon
    /// as `cancel` fires.
    pub async fn call_with_cancel<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        route: &str,
        correlation_id: Option<&str>,
        params: QueryParams,
        body: Option<Value>,
    ) -> Result<Option<T>, ApplicationError> {
        let bytes = self
            .send(cancel, method, route, correlation_id, params, body)
            .await?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        serde_json::from_slice::<Option<T>>(&bytes).map_err(|e| {
            ApplicationError::unknown(
                "BAD_RESPONSE",
                "failed to decode response body",
            )
            .with_correlation_id(correlation_id)
            .with_cause(e)
        })
    }

    fn build_url(
        &self,
        uri: &str,
        route: &str,
        correlation_id: Option<&str>,
        mut params: QueryParams,
    ) -> Result<reqwest::Url, ApplicationError> {
        if self.config.options.correlation_id_place.in_query() {
            add_correlation_id(&mut params, correlation_id);
        }
        let path = request_route(&self.config.base_route, route);
        let mut url = reqwest::Url::parse(&format!("{}{}", uri, path))
            .map_err(|e| {
                ApplicationError::config(
                    "INVALID_ROUTE",
                    format!("cannot build request url for \"{}\"", path),
                )
                .with_correlation_id(correlation_id)
                .with_cause(e)
            })?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        method: &reqwest::Method,
        url: &reqwest::Url,
        correlation_id: Option<&str>,
        body: &Option<Bytes>,
    ) -> reqwest::RequestBuilder {
        let mut request = client
            .request(method.clone(), url.clone())
            .header(http::header::CONTENT_TYPE, CONTENT_TYPE_JSON);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if self.config.options.correlation_id_place.in_headers() {
            if let Some(correlation_id) =
                correlation_id.filter(|c| !c.is_empty())
            {
                request = request.header(CORRELATION_ID, correlation_id);
            }
        }
        if let Some(body) = body {
            request = request.body(body.clone());
        }
        request
    }

    /// Sends the request, retrying transport failures, and returns the body
    /// of a successful response (`None` for 204 and empty bodies).
    async fn send(
        &self,
        cancel: &CancellationToken,
        method: &str,
        route: &str,
        correlation_id: Option<&str>,
        params: QueryParams,
        body: Option<Value>,
    ) -> Result<Option<Bytes>, ApplicationError> {
        let method = parse_method(method)
            .map_err(|e| e.with_correlation_id(correlation_id))?;
        let open = self.current().ok_or_else(|| {
            ApplicationError::invalid_state(
                "NOT_OPENED",
                "REST client is not opened",
            )
            .with_correlation_id(correlation_id)
        })?;
        let url = self.build_url(&open.uri, route, correlation_id, params)?;
        let body = body
            .map(|b| serde_json::to_vec(&b).map(Bytes::from))
            .transpose()
            .map_err(|e| {
                ApplicationError::internal(
                    "SERIALIZATION_ERROR",
                    "failed to serialize request body",
                )
                .with_correlation_id(correlation_id)
                .with_cause(e)
            })?;

        let options = &self.config.options;
        let retries = options.retries.max(1);
        let mut remaining = retries;
        let response = loop {
            let request = self.build_request(
                &open.client,
                &method,
                &url,
                correlation_id,
                &body,
            );
            if options.debug {
                debug!(self.log, "sending request";
                    "method" => %method,
                    "url" => %url,
                    "correlation_id" => correlation_id);
            }

            let result = tokio::select! {
                result = request.send() => result,
                _ = cancel.cancelled() => {
                    return Err(cancelled(correlation_id));
                }
            };
            let error = match result {
                Ok(response) => break response,
                Err(error) => error,
            };

            remaining -= 1;
            if remaining == 0 {
                return Err(ApplicationError::unknown(
                    "COMMUNICATION_ERROR",
                    "Unknown communication problem on REST client",
                )
                .with_correlation_id(correlation_id)
                .with_cause(error));
            }

            let attempts = u64::from(retries - remaining);
            let wait = options.timeout.saturating_mul(attempts * attempts);
            warn!(self.log, "request failed, retrying";
                "url" => %url,
                "attempt" => attempts,
                "wait_ms" => wait,
                "error" => %error,
                "correlation_id" => correlation_id);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
                _ = cancel.cancelled() => {
                    return Err(cancelled(correlation_id));
                }
            }
        };

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let content = response.bytes().await.map_err(|e| {
            ApplicationError::unknown(
                "COMMUNICATION_ERROR",
                "failed to read response body",
            )
            .with_correlation_id(correlation_id)
            .with_status(status)
            .with_cause(e)
        })?;

        if status.as_u16() >= 400 {
            return Err(response_error(status, &content, correlation_id));
        }
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(content))
    }
}

fn cancelled(correlation_id: Option<&str>) -> ApplicationError {
    ApplicationError::unknown(
        "CONTEXT_CANCELLED",
        "request canceled by parent context",
    )
    .with_correlation_id(correlation_id)
}

/// Decodes the body of an error response.  A body that isn't an
/// [`ApplicationError`] is kept as details (JSON) or as the message (text).
/// The response status always wins over whatever the body says.
fn response_error(
    status: StatusCode,
    content: &[u8],
    correlation_id: Option<&str>,
) -> ApplicationError {
    let error = match serde_json::from_slice::<ApplicationError>(content) {
        Ok(error) => error,
        Err(_) => {
            let reason = status.canonical_reason().unwrap_or("request failed");
            let error = ApplicationError::unknown("UNKNOWN", reason);
            match serde_json::from_slice::<Value>(content) {
                Ok(Value::Object(map)) => {
                    map.into_iter().fold(error, |e, (k, v)| e.with_details(k, v))
                }
                Ok(value) => error.with_details("body", value),
                Err(_) if content.is_empty() => error,
                Err(_) => ApplicationError {
                    message: String::from_utf8_lossy(content).into_owned(),
                    ..error
                },
            }
        }
    };
    let error = if error.correlation_id.is_none() {
        error.with_correlation_id(correlation_id)
    } else {
        error
    };
    error.with_status(status)
}
