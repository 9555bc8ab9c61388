// Copyright 2025 Oxide Computer Company
//! Client for commandable services

use crate::client::QueryParams;
use crate::client::RestClient;
use crate::config::ConfigRestClient;
use crate::connect::Discovery;
use crate::error::ApplicationError;
use crate::instrument::Counters;
use crate::instrument::Tracer;
use crate::parameters::Parameters;

use serde::de::DeserializeOwned;
use slog::Logger;
use std::sync::Arc;

/// Calls the commands of a [`crate::CommandableHttpService`]: command `name`
/// is `POST <base_route>/<name>` with the arguments as the JSON body.
#[derive(Debug)]
pub struct CommandableHttpClient {
    client: RestClient,
}

impl CommandableHttpClient {
    pub fn new(config: ConfigRestClient, log: &Logger) -> Self {
        CommandableHttpClient { client: RestClient::new(config, log) }
    }

    pub fn with_discovery(self, discovery: Arc<dyn Discovery>) -> Self {
        CommandableHttpClient { client: self.client.with_discovery(discovery) }
    }

    pub fn with_counters(self, counters: Arc<dyn Counters>) -> Self {
        CommandableHttpClient { client: self.client.with_counters(counters) }
    }

    pub fn with_tracer(self, tracer: Arc<dyn Tracer>) -> Self {
        CommandableHttpClient { client: self.client.with_tracer(tracer) }
    }

    pub fn client(&self) -> &RestClient {
        &self.client
    }

    pub fn is_open(&self) -> bool {
        self.client.is_open()
    }

    pub async fn open(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        self.client.open(correlation_id).await
    }

    pub async fn close(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        self.client.close(correlation_id).await
    }

    /// Calls command `name`, instrumented as `<base_route>.<name>`.
    pub async fn call_command<T: DeserializeOwned>(
        &self,
        name: &str,
        correlation_id: Option<&str>,
        params: Option<Parameters>,
    ) -> Result<Option<T>, ApplicationError> {
        let operation = match self.client.config().base_route.trim_matches('/') {
            "" => name.to_string(),
            base_route => format!("{}.{}", base_route, name),
        };
        let body = params.map(Parameters::into_value);
        let route = name.to_ascii_lowercase();
        self.client
            .instrument_call(
                correlation_id,
                &operation,
                self.client.call(
                    "post",
                    &route,
                    correlation_id,
                    QueryParams::new(),
                    body,
                ),
            )
            .await
    }
}
