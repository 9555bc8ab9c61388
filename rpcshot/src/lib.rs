// Copyright 2025 Oxide Computer Company

//! rpcshot is scaffolding for microservices that talk JSON over HTTP.  It
//! covers both sides of a call:
//!
//! * An [`HttpEndpoint`] owns one listener and serves the routes of any
//!   number of logical services.  Every request passes through the same
//!   middleware: maintenance mode, CORS, no-cache headers, route
//!   interceptors, optional JSON schema validation and authorization.
//!
//! * A [`RestService`] contributes routes under its base route.  A
//!   [`CommandableHttpService`] goes one step further and serves each
//!   command of a controller's [`CommandSet`] as `POST <base_route>/<name>`,
//!   with an OpenAPI document generated from the command schemas.
//!
//! * A [`RestClient`] resolves its remote endpoint once, retries transport
//!   failures with quadratic backoff, propagates the caller's correlation id
//!   and turns error responses back into [`ApplicationError`]s.
//!   [`CommandableHttpClient`] and [`DirectClient`] build on the same life
//!   cycle for command calls over HTTP and in-process.
//!
//! Every operation on either side is instrumented: it is logged with slog,
//! counted (`<name>.exec_count`, `<name>.call_time`, ...) through a
//! [`Counters`] sink and traced through a [`Tracer`].
//!
//! ## Usage
//!
//! A service that serves one route:
//!
//! ```no_run
//! use rpcshot::send_result;
//! use rpcshot::ApplicationError;
//! use rpcshot::ConfigLogging;
//! use rpcshot::ConfigLoggingLevel;
//! use rpcshot::ConfigRestService;
//! use rpcshot::RequestContext;
//! use rpcshot::RestService;
//! use rpcshot::ServiceRoutes;
//! use std::sync::Arc;
//!
//! fn register(routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
//!     routes.register_route("get", "/hello", None, |rqctx: RequestContext| {
//!         let name = rqctx.param("name").unwrap_or("world").to_string();
//!         async move { send_result(Ok(Some(format!("hello, {}", name)))) }
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let log = ConfigLogging::StderrTerminal {
//!         level: ConfigLoggingLevel::Info,
//!     }
//!     .to_logger("greeter")
//!     .map_err(|e| e.to_string())?;
//!
//!     let mut config = ConfigRestService::default();
//!     config.base_route = "/api/v1/greeter".to_string();
//!
//!     let service = RestService::new(config, &log, Arc::new(register));
//!     service.open(None).await.map_err(|e| e.to_string())?;
//!     tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
//!     service.close(None).await.map_err(|e| e.to_string())
//! }
//! ```
//!
//! ## Configuration
//!
//! Endpoints, services and clients take plain serde structs
//! ([`ConfigEndpoint`], [`ConfigRestService`], [`ConfigRestClient`]) that
//! are usually read from a TOML file:
//!
//! ```toml
//! base_route = "/api/v1/dummy"
//!
//! [connection]
//! protocol = "http"
//! host = "0.0.0.0"
//! port = 8080
//!
//! [options]
//! maintenance_enabled = false
//! request_max_size = 1048576
//!
//! [swagger]
//! enable = true
//! ```
//!
//! ## Errors
//!
//! Handlers, commands and clients all fail with [`ApplicationError`].  On the
//! wire it is a JSON object with a stable `code`, an HTTP `status`, a
//! message, the correlation id and free-form details.  A client receiving
//! any response with a status of 400 or more decodes it back into the same
//! structure, so the caller sees the server's `code` and `status`.

mod auth;
mod body;
mod client;
mod commandable;
mod commandable_client;
mod commands;
mod config;
mod connect;
mod cors;
mod data;
mod detector;
mod direct;
mod endpoint;
mod error;
mod handler;
mod http_util;
mod instrument;
mod logging;
mod openapi;
mod operations;
mod parameters;
mod response;
mod router;
mod schema;
mod server;
mod service;
mod status;

pub mod test_util;

#[macro_use]
extern crate slog;

pub use auth::AuthUser;
pub use auth::BasicAuthManager;
pub use auth::OwnerAuthManager;
pub use auth::RoleAuthManager;
pub use auth::ADMIN_ROLE;
pub use body::Body;
pub use client::add_correlation_id;
pub use client::add_filter_params;
pub use client::add_paging_params;
pub use client::QueryParams;
pub use client::RestClient;
pub use commandable::command_arguments;
pub use commandable::CommandableHttpService;
pub use commandable_client::CommandableHttpClient;
pub use commands::command_result;
pub use commands::Command;
pub use commands::CommandResult;
pub use commands::CommandSet;
pub use commands::Commandable;
pub use config::ConfigClientOptions;
pub use config::ConfigEndpoint;
pub use config::ConfigEndpointOptions;
pub use config::ConfigRestClient;
pub use config::ConfigRestService;
pub use config::ConfigSwagger;
pub use config::CorrelationIdPlace;
pub use connect::ConnectionParams;
pub use connect::ConnectionResolver;
pub use connect::CredentialParams;
pub use connect::Discovery;
pub use connect::HttpConnectionResolver;
pub use connect::MemoryDiscovery;
pub use cors::CorsBuilder;
pub use cors::CorsPolicy;
pub use data::DataPage;
pub use data::FilterParams;
pub use data::PagingParams;
pub use direct::DirectClient;
pub use endpoint::registration_fn;
pub use endpoint::HttpEndpoint;
pub use endpoint::Registrable;
pub use error::ApplicationError;
pub use error::ErrorCategory;
pub use handler::interceptor_fn;
pub use handler::HandlerResult;
pub use handler::HttpRouteHandler;
pub use handler::Interceptor;
pub use handler::Next;
pub use handler::RequestContext;
pub use handler::RequestInfo;
pub use handler::RouteHandler;
pub use http_util::CONTENT_TYPE_JSON;
pub use http_util::CONTENT_TYPE_YAML;
pub use http_util::CORRELATION_ID;
pub use http_util::HEADER_REQUEST_ID;
pub use instrument::CachedCounters;
pub use instrument::Counter;
pub use instrument::CounterKind;
pub use instrument::Counters;
pub use instrument::InstrumentTiming;
pub use instrument::Instrumentation;
pub use instrument::LogTracer;
pub use instrument::NullCounters;
pub use instrument::NullTracer;
pub use instrument::Tracer;
pub use instrument::VERB_CALL;
pub use instrument::VERB_EXEC;
pub use logging::discard_logger;
pub use logging::ConfigLogging;
pub use logging::ConfigLoggingIfExists;
pub use logging::ConfigLoggingLevel;
pub use openapi::CommandableOpenApiDocument;
pub use operations::bad_request;
pub use operations::conflict;
pub use operations::internal_error;
pub use operations::not_found;
pub use operations::server_unavailable;
pub use operations::session_expired;
pub use operations::unauthorized;
pub use parameters::Parameters;
pub use response::empty_response;
pub use response::send_created_result;
pub use response::send_deleted_result;
pub use response::send_empty_result;
pub use response::send_error;
pub use response::send_result;
pub use schema::ObjectSchema;
pub use schema::PropertySchema;
pub use schema::TypeCode;
pub use schema::ValidationResult;
pub use schema::ValidationResultType;
pub use server::TlsConfigError;
pub use service::append_base_route;
pub use service::RestService;
pub use service::RestServiceRegistrar;
pub use service::ServiceRoutes;
pub use service::SwaggerService;
pub use status::AboutClient;
pub use status::AboutInfo;
pub use status::AboutRestService;
pub use status::AboutServer;
pub use status::ContextInfo;
pub use status::HeartbeatRestService;
pub use status::StatusInfo;
pub use status::StatusRestService;
