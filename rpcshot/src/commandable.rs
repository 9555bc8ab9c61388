// Copyright 2025 Oxide Computer Company
//! REST service that serves a command set
//!
//! Every command of the controller's [`CommandSet`] is served at
//! `POST <base_route>/<command>`.  Its arguments are the JSON object in the
//! request body, overlaid with the query string and then with the path
//! variables, so a path variable wins over a query parameter of the same
//! name, which wins over a body property.

use crate::commands::Command;
use crate::commands::Commandable;
use crate::config::ConfigRestService;
use crate::connect::Discovery;
use crate::endpoint::HttpEndpoint;
use crate::error::ApplicationError;
use crate::handler::HandlerResult;
use crate::handler::RequestContext;
use crate::instrument::Counters;
use crate::instrument::Instrumentation;
use crate::instrument::Tracer;
use crate::instrument::VERB_EXEC;
use crate::openapi::CommandableOpenApiDocument;
use crate::parameters::Parameters;
use crate::response::send_result;
use crate::service::RestService;
use crate::service::RestServiceRegistrar;
use crate::service::ServiceRoutes;
use crate::service::SwaggerService;

use serde_json::Value;
use slog::Logger;
use std::sync::Arc;

/// Collects the arguments of a command call from the request.
pub fn command_arguments(rqctx: &RequestContext) -> Result<Parameters, ApplicationError> {
    let mut args = match rqctx.body_value()? {
        Some(Value::Object(body)) => Parameters::from(body),
        _ => Parameters::new(),
    };
    for (name, value) in rqctx.query_params() {
        args.set_raw(name, Value::String(value.clone()));
    }
    for (name, value) in &rqctx.path_params {
        args.set_raw(name, Value::String(value.clone()));
    }
    Ok(args)
}

/// Operation name under which calls of `command` are instrumented.
fn operation_name(base_route: &str, command: &str) -> String {
    let base_route = base_route.trim_matches('/');
    if base_route.is_empty() {
        command.to_string()
    } else {
        format!("{}.{}", base_route, command)
    }
}

async fn execute_command(
    command: Arc<Command>,
    instrumentation: Instrumentation,
    name: Arc<str>,
    rqctx: RequestContext,
) -> HandlerResult {
    let args = command_arguments(&rqctx)?;
    let correlation_id = rqctx.correlation_id();
    let result = instrumentation
        .instrument_call(
            correlation_id,
            &name,
            VERB_EXEC,
            command.execute(correlation_id, args),
        )
        .await;
    send_result(result)
}

struct CommandableRegistrar {
    controller: Arc<dyn Commandable>,
}

impl RestServiceRegistrar for CommandableRegistrar {
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
        let command_set = self.controller.command_set();
        for command in command_set.commands() {
            let route = command.name().to_ascii_lowercase();
            let name: Arc<str> =
                operation_name(routes.base_route(), command.name()).into();
            let command = Arc::clone(command);
            let instrumentation = routes.instrumentation().clone();
            routes.register_route("post", &route, None, move |rqctx| {
                execute_command(
                    Arc::clone(&command),
                    instrumentation.clone(),
                    Arc::clone(&name),
                    rqctx,
                )
            })?;
        }

        let swagger = &routes.config().swagger;
        if swagger.auto && swagger.path.is_none() {
            let document = CommandableOpenApiDocument::new(
                routes.base_route(),
                swagger,
                command_set.commands(),
            );
            routes.register_open_api_spec(document.to_json()?)?;
        }
        Ok(())
    }
}

/// A [`RestService`] whose routes are the commands of a controller.
#[derive(Debug)]
pub struct CommandableHttpService {
    service: RestService,
}

impl CommandableHttpService {
    pub fn new(
        config: ConfigRestService,
        log: &Logger,
        controller: Arc<dyn Commandable>,
    ) -> Self {
        let registrar = Arc::new(CommandableRegistrar { controller });
        CommandableHttpService {
            service: RestService::new(config, log, registrar),
        }
    }

    pub fn with_endpoint(self, endpoint: Arc<HttpEndpoint>) -> Self {
        CommandableHttpService { service: self.service.with_endpoint(endpoint) }
    }

    pub fn with_discovery(self, discovery: Arc<dyn Discovery>) -> Self {
        CommandableHttpService { service: self.service.with_discovery(discovery) }
    }

    pub fn with_counters(self, counters: Arc<dyn Counters>) -> Self {
        CommandableHttpService { service: self.service.with_counters(counters) }
    }

    pub fn with_tracer(self, tracer: Arc<dyn Tracer>) -> Self {
        CommandableHttpService { service: self.service.with_tracer(tracer) }
    }

    pub fn with_swagger_service(
        self,
        swagger_service: Arc<dyn SwaggerService>,
    ) -> Self {
        CommandableHttpService {
            service: self.service.with_swagger_service(swagger_service),
        }
    }

    pub fn service(&self) -> &RestService {
        &self.service
    }

    pub fn is_open(&self) -> bool {
        self.service.is_open()
    }

    pub async fn open(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        self.service.open(correlation_id).await
    }

    pub async fn close(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        self.service.close(correlation_id).await
    }
}
