// Copyright 2025 Oxide Computer Company
//! In-process client
//!
//! A [`DirectClient`] calls a controller living in the same process.  It has
//! the same open/close life cycle and the same instrumentation as
//! [`crate::RestClient`], so a client built on it can later be swapped for a
//! remote one without changing what is logged and counted.

use crate::commands::Commandable;
use crate::error::ApplicationError;
use crate::instrument::Counters;
use crate::instrument::InstrumentTiming;
use crate::instrument::Instrumentation;
use crate::instrument::Tracer;
use crate::instrument::VERB_CALL;
use crate::logging::component_logger;
use crate::parameters::Parameters;

use serde::de::DeserializeOwned;
use slog::Logger;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub struct DirectClient<C: ?Sized> {
    controller: Option<Arc<C>>,
    log: Logger,
    instrumentation: Instrumentation,
    opened: AtomicBool,
}

impl<C: ?Sized> std::fmt::Debug for DirectClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectClient")
            .field("has_controller", &self.controller.is_some())
            .field("opened", &self.opened.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C: ?Sized + Send + Sync> DirectClient<C> {
    /// Creates a client without a controller.  `name` identifies the client
    /// in logs and traces.
    pub fn new(log: &Logger, name: &str) -> Self {
        let log = component_logger(log, "DirectClient")
            .new(o!("name" => name.to_string()));
        let instrumentation = Instrumentation::new(&log, name);
        DirectClient {
            controller: None,
            log,
            instrumentation,
            opened: AtomicBool::new(false),
        }
    }

    pub fn with_controller(mut self, controller: Arc<C>) -> Self {
        self.controller = Some(controller);
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

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn controller(&self) -> Result<&Arc<C>, ApplicationError> {
        self.controller.as_ref().ok_or_else(|| {
            ApplicationError::connection(
                "NO_CONTROLLER",
                "Controller reference is missing",
            )
        })
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Opens the client.  Fails with `NO_CONTROLLER` until a controller has
    /// been provided.
    pub async fn open(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        if self.is_open() {
            return Ok(());
        }
        self.controller()
            .map_err(|e| e.with_correlation_id(correlation_id))?;
        if !self.opened.swap(true, Ordering::SeqCst) {
            info!(self.log, "opened direct client";
                "correlation_id" => correlation_id);
        }
        Ok(())
    }

    pub async fn close(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        if self.opened.swap(false, Ordering::SeqCst) {
            info!(self.log, "closed direct client";
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

    /// Runs `call` against the controller as an instrumented call of `name`.
    pub async fn instrument_call<T, F, Fut>(
        &self,
        correlation_id: Option<&str>,
        name: &str,
        call: F,
    ) -> Result<T, ApplicationError>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, ApplicationError>>,
    {
        let controller = Arc::clone(
            self.controller()
                .map_err(|e| e.with_correlation_id(correlation_id))?,
        );
        self.instrumentation
            .instrument_call(correlation_id, name, VERB_CALL, call(controller))
            .await
    }
}

impl<C: Commandable + ?Sized> DirectClient<C> {
    /// Executes command `name` of the controller's command set and decodes
    /// its result as `T`.
    pub async fn call_command<T: DeserializeOwned>(
        &self,
        name: &str,
        correlation_id: Option<&str>,
        params: Option<Parameters>,
    ) -> Result<Option<T>, ApplicationError> {
        let result = self
            .instrument_call(correlation_id, name, |controller| async move {
                controller
                    .command_set()
                    .execute(correlation_id, name, params.unwrap_or_default())
                    .await
            })
            .await?;
        result
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    ApplicationError::unknown(
                        "BAD_RESPONSE",
                        "failed to decode command result",
                    )
                    .with_correlation_id(correlation_id)
                    .with_cause(e)
                })
            })
            .transpose()
    }
}
