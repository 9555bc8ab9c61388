// Copyright 2025 Oxide Computer Company

//! Root logger construction for processes that host endpoints, services and
//! clients.  Components themselves only ever see a `slog::Logger`; this module
//! turns a `[log]` block of a TOML config into one.

use crate::error::ApplicationError;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;
use slog::Level;
use slog::Logger;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::LineWriter;

/// Where log records go.  Expected as a top-level TOML block:
///
/// ```toml
/// [log]
/// mode = "file"
/// level = "debug"
/// path = "/var/log/dummy-service.log"
/// if_exists = "append"
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum ConfigLogging {
    /// Human-readable records on stderr.
    StderrTerminal {
        #[serde(default)]
        level: ConfigLoggingLevel,
    },
    /// One JSON object per record on stderr, for collectors that scrape
    /// container output.
    StderrJson {
        #[serde(default)]
        level: ConfigLoggingLevel,
    },
    /// Bunyan JSON records appended to `path`.
    File {
        #[serde(default)]
        level: ConfigLoggingLevel,
        path: Utf8PathBuf,
        #[serde(default)]
        if_exists: ConfigLoggingIfExists,
    },
    Discard,
}

impl Default for ConfigLogging {
    fn default() -> Self {
        ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::default() }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl ConfigLoggingLevel {
    fn as_slog(self) -> Level {
        match self {
            ConfigLoggingLevel::Trace => Level::Trace,
            ConfigLoggingLevel::Debug => Level::Debug,
            ConfigLoggingLevel::Info => Level::Info,
            ConfigLoggingLevel::Warn => Level::Warning,
            ConfigLoggingLevel::Error => Level::Error,
            ConfigLoggingLevel::Critical => Level::Critical,
        }
    }
}

/// What to do when the configured log file is already there.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingIfExists {
    Fail,
    Truncate,
    #[default]
    Append,
}

impl ConfigLoggingIfExists {
    fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.write(true);
        match self {
            ConfigLoggingIfExists::Fail => options.create_new(true),
            ConfigLoggingIfExists::Truncate => {
                options.create(true).truncate(true)
            }
            ConfigLoggingIfExists::Append => options.create(true).append(true),
        };
        options
    }
}

impl ConfigLogging {
    /// Builds the root logger.  `name` becomes the bunyan `name` field of
    /// file records.
    pub fn to_logger(&self, name: &str) -> Result<Logger, ApplicationError> {
        match self {
            ConfigLogging::StderrTerminal { level } => {
                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Ok(async_root(*level, drain))
            }
            ConfigLogging::StderrJson { level } => {
                let drain = slog_json::Json::default(std::io::stderr()).fuse();
                Ok(async_root(*level, drain))
            }
            ConfigLogging::File { level, path, if_exists } => {
                let drain = log_drain_for_file(path, *if_exists, name)?;
                let log = async_root(*level, drain);
                eprintln!("note: configured to log to \"{}\"", path);
                Ok(log)
            }
            ConfigLogging::Discard => Ok(discard_logger()),
        }
    }
}

/// A logger that drops every record.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Child logger tagged with the component that owns it.
pub(crate) fn component_logger(log: &Logger, component: &str) -> Logger {
    log.new(o!("component" => component.to_string()))
}

fn async_root<D>(level: ConfigLoggingLevel, drain: D) -> Logger
where
    D: Drain + Send + 'static,
    D::Err: std::fmt::Debug,
{
    let filtered = slog::LevelFilter(drain, level.as_slog()).fuse();
    // An async drain keeps executor threads from blocking on a mutex.
    let drain = slog_async::Async::new(filtered).chan_size(1024).build().fuse();
    Logger::root(drain, o!())
}

fn log_drain_for_file(
    path: &Utf8Path,
    if_exists: ConfigLoggingIfExists,
    name: &str,
) -> Result<slog::Fuse<slog_json::Json<LineWriter<File>>>, ApplicationError> {
    let cannot_open = |error: std::io::Error| {
        ApplicationError::file(
            "CANNOT_OPEN_LOG",
            format!("cannot open log file {}", path),
        )
        .with_details("path", path.as_str())
        .with_cause(error)
    };
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(cannot_open)?;
        }
    }
    let file = if_exists.open_options().open(path).map_err(cannot_open)?;

    // slog-bunyan wants a 'static name.
    let name: &'static str = Box::leak(name.to_string().into_boxed_str());
    Ok(slog_bunyan::with_name(name, LineWriter::new(file)).build().fuse())
}
