// Copyright 2025 Oxide Computer Company
//! Call instrumentation
//!
//! Services and clients wrap each operation with [`Instrumentation::instrument`],
//! which logs the call, bumps `<name>.<verb>_count`, and starts two timers:
//! one reported to [`Counters`] as `<name>.<verb>_time` and one reported to a
//! [`Tracer`].  The returned [`InstrumentTiming`] is ended exactly once, with
//! either success or the error the operation failed with.  Failures are
//! additionally logged and counted as `<name>.<verb>_errors`.

use crate::error::ApplicationError;
use crate::logging::component_logger;
use serde::Serialize;
use slog::Logger;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

/// verb used for operations served by this process
pub const VERB_EXEC: &str = "exec";
/// verb used for calls to remote services
pub const VERB_CALL: &str = "call";

/// Sink for performance counters.
pub trait Counters: Send + Sync {
    /// Adds `value` to the increment counter `name`.
    fn increment(&self, name: &str, value: i64);

    /// Records one measurement of the interval counter `name`.
    fn record_timing(&self, name: &str, elapsed: Duration);

    fn increment_one(&self, name: &str) {
        self.increment(name, 1);
    }
}

/// Sink for operation traces.
pub trait Tracer: Send + Sync {
    fn trace(
        &self,
        correlation_id: Option<&str>,
        component: &str,
        operation: &str,
        elapsed: Duration,
    );

    fn failure(
        &self,
        correlation_id: Option<&str>,
        component: &str,
        operation: &str,
        error: &ApplicationError,
        elapsed: Duration,
    );
}

/// Counters that discard everything.
#[derive(Debug, Default)]
pub struct NullCounters;

impl Counters for NullCounters {
    fn increment(&self, _name: &str, _value: i64) {}
    fn record_timing(&self, _name: &str, _elapsed: Duration) {}
}

/// Tracer that discards everything.
#[derive(Debug, Default)]
pub struct NullTracer;

impl Tracer for NullTracer {
    fn trace(&self, _: Option<&str>, _: &str, _: &str, _: Duration) {}
    fn failure(
        &self,
        _: Option<&str>,
        _: &str,
        _: &str,
        _: &ApplicationError,
        _: Duration,
    ) {
    }
}

/// Tracer that writes one log record per operation.
#[derive(Debug)]
pub struct LogTracer {
    log: Logger,
}

impl LogTracer {
    pub fn new(log: &Logger) -> Self {
        LogTracer { log: component_logger(log, "LogTracer") }
    }
}

impl Tracer for LogTracer {
    fn trace(
        &self,
        correlation_id: Option<&str>,
        component: &str,
        operation: &str,
        elapsed: Duration,
    ) {
        debug!(self.log, "executed {}.{}", component, operation;
            "correlation_id" => correlation_id,
            "latency_us" => elapsed.as_micros());
    }

    fn failure(
        &self,
        correlation_id: Option<&str>,
        component: &str,
        operation: &str,
        error: &ApplicationError,
        elapsed: Duration,
    ) {
        error!(self.log, "failed to execute {}.{}", component, operation;
            "correlation_id" => correlation_id,
            "latency_us" => elapsed.as_micros(),
            "error" => %error);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Increment,
    Interval,
}

/// Current value of one cached counter.  Interval counters keep timings in
/// milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Counter {
    pub name: String,
    pub kind: CounterKind,
    pub count: i64,
    pub last: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
}

impl Counter {
    fn new(name: &str, kind: CounterKind) -> Self {
        Counter {
            name: name.to_string(),
            kind,
            count: 0,
            last: None,
            min: None,
            max: None,
            average: None,
        }
    }
}

/// Counters kept in memory, for inspection by status pages and tests.
#[derive(Debug, Default)]
pub struct CachedCounters {
    counters: Mutex<BTreeMap<String, Counter>>,
}

impl CachedCounters {
    pub fn new() -> Self {
        CachedCounters::default()
    }

    pub fn get(&self, name: &str) -> Option<Counter> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Counter> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.values().cloned().collect()
    }

    pub fn clear(&self) {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn update<F: FnOnce(&mut Counter)>(&self, name: &str, kind: CounterKind, f: F) {
        let mut counters =
            self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| Counter::new(name, kind));
        f(counter);
    }
}

impl Counters for CachedCounters {
    fn increment(&self, name: &str, value: i64) {
        self.update(name, CounterKind::Increment, |c| c.count += value);
    }

    fn record_timing(&self, name: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.update(name, CounterKind::Interval, |c| {
            let total = c.average.unwrap_or(0.0) * c.count as f64 + ms;
            c.count += 1;
            c.last = Some(ms);
            c.min = Some(c.min.map_or(ms, |min| min.min(ms)));
            c.max = Some(c.max.map_or(ms, |max| max.max(ms)));
            c.average = Some(total / c.count as f64);
        });
    }
}

/// Running interval counter, started by [`Instrumentation::instrument`].
pub struct CounterTiming {
    counters: Arc<dyn Counters>,
    name: String,
    start: Instant,
}

impl CounterTiming {
    pub fn end_timing(self) {
        self.counters.record_timing(&self.name, self.start.elapsed());
    }
}

/// Running trace, started by [`Instrumentation::instrument`].
pub struct TraceTiming {
    tracer: Arc<dyn Tracer>,
    correlation_id: Option<String>,
    component: String,
    operation: String,
    start: Instant,
}

impl TraceTiming {
    pub fn end_trace(self) {
        self.tracer.trace(
            self.correlation_id.as_deref(),
            &self.component,
            &self.operation,
            self.start.elapsed(),
        );
    }

    pub fn end_failure(self, error: &ApplicationError) {
        self.tracer.failure(
            self.correlation_id.as_deref(),
            &self.component,
            &self.operation,
            error,
            self.start.elapsed(),
        );
    }
}

/// Logger, counters and tracer shared by the operations of one component.
#[derive(Clone)]
pub struct Instrumentation {
    log: Logger,
    component: String,
    counters: Arc<dyn Counters>,
    tracer: Arc<dyn Tracer>,
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

impl Instrumentation {
    /// Instrumentation that only logs.  Counters and traces are discarded
    /// until [`Instrumentation::with_counters`] and
    /// [`Instrumentation::with_tracer`] provide real sinks.
    pub fn new(log: &Logger, component: &str) -> Self {
        Instrumentation {
            log: log.clone(),
            component: component.to_string(),
            counters: Arc::new(NullCounters),
            tracer: Arc::new(NullTracer),
        }
    }

    pub fn with_counters(mut self, counters: Arc<dyn Counters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn counters(&self) -> &Arc<dyn Counters> {
        &self.counters
    }

    /// Starts instrumenting one call of operation `name`.
    pub fn instrument(
        &self,
        correlation_id: Option<&str>,
        name: &str,
        verb: &str,
    ) -> InstrumentTiming {
        trace!(self.log, "executing {} method", name;
            "correlation_id" => correlation_id);
        self.counters.increment_one(&format!("{}.{}_count", name, verb));

        let counter_timing = CounterTiming {
            counters: Arc::clone(&self.counters),
            name: format!("{}.{}_time", name, verb),
            start: Instant::now(),
        };
        let trace_timing = TraceTiming {
            tracer: Arc::clone(&self.tracer),
            correlation_id: correlation_id.map(str::to_string),
            component: self.component.clone(),
            operation: name.to_string(),
            start: Instant::now(),
        };
        InstrumentTiming {
            correlation_id: correlation_id.map(str::to_string),
            name: name.to_string(),
            verb: verb.to_string(),
            ended: Some(Sinks {
                log: self.log.clone(),
                counters: Arc::clone(&self.counters),
                counter_timing,
                trace_timing,
            }),
        }
    }

    /// Runs `operation` inside an instrumented call of `name`.
    pub async fn instrument_call<T, F>(
        &self,
        correlation_id: Option<&str>,
        name: &str,
        verb: &str,
        operation: F,
    ) -> Result<T, ApplicationError>
    where
        F: Future<Output = Result<T, ApplicationError>>,
    {
        let mut timing = self.instrument(correlation_id, name, verb);
        let result = operation.await;
        timing.end_timing(result.as_ref().err());
        result
    }
}

struct Sinks {
    log: Logger,
    counters: Arc<dyn Counters>,
    counter_timing: CounterTiming,
    trace_timing: TraceTiming,
}

/// One-shot token for an instrumented call.  Only the first `end_*` call
/// reports anything; later ones do nothing.
pub struct InstrumentTiming {
    correlation_id: Option<String>,
    name: String,
    verb: String,
    ended: Option<Sinks>,
}

impl InstrumentTiming {
    pub fn is_ended(&self) -> bool {
        self.ended.is_none()
    }

    /// Ends with success when `error` is `None`, with failure otherwise.
    pub fn end_timing(&mut self, error: Option<&ApplicationError>) {
        match error {
            None => self.end_success(),
            Some(error) => self.end_failure(error),
        }
    }

    pub fn end_success(&mut self) {
        if let Some(sinks) = self.ended.take() {
            sinks.counter_timing.end_timing();
            sinks.trace_timing.end_trace();
        }
    }

    pub fn end_failure(&mut self, error: &ApplicationError) {
        let Some(sinks) = self.ended.take() else {
            return;
        };
        sinks.counter_timing.end_timing();
        error!(sinks.log, "failed to call {} method", self.name;
            "correlation_id" => self.correlation_id.as_deref(),
            "error" => %error);
        sinks
            .counters
            .increment_one(&format!("{}.{}_errors", self.name, self.verb));
        sinks.trace_timing.end_failure(error);
    }
}
