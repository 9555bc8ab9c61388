// Copyright 2025 Oxide Computer Company
//! Automated testing facilities.  These are intended for use both by this
//! crate's own tests and by consumers testing services built on it.

use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use slog::Logger;
use std::fmt::Debug;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use crate::config::ConfigEndpoint;
use crate::config::ConfigRestClient;
use crate::connect::ConnectionParams;
use crate::logging::ConfigLogging;

/// Used to generate unique log file names within a process.
static TEST_SUITE_LOGGER_ID: AtomicU32 = AtomicU32::new(0);

/// Path that a test's `ConfigLogging::File` block must name.  `LogContext`
/// swaps it for a unique file.
pub const LOG_PATH_SENTINEL: &str = "UNUSED";

/// A logger for one test.
///
/// With a file-based configuration, the log goes to a unique file in the
/// temporary directory.  The file is kept if the test fails and removed by
/// [`LogContext::cleanup_successful`], which tests call as one of their last
/// steps.
pub struct LogContext {
    pub log: Logger,
    log_path: Option<Utf8PathBuf>,
}

impl LogContext {
    pub fn new(test_name: &str, initial_config_logging: &ConfigLogging) -> LogContext {
        let (log_path, log_config) = match initial_config_logging {
            ConfigLogging::File { level, path, if_exists } => {
                assert_eq!(
                    path.as_str(),
                    LOG_PATH_SENTINEL,
                    "for test suite logging configuration, when mode = \
                     \"file\" is used, the path MUST be the sentinel string \
                     \"UNUSED\".  It will be replaced with a unique path for \
                     each test."
                );
                let new_path = log_file_for_test(test_name);
                eprintln!("log file: {}", new_path);
                (
                    Some(new_path.clone()),
                    ConfigLogging::File {
                        level: *level,
                        path: new_path,
                        if_exists: *if_exists,
                    },
                )
            }
            other_config => (None, other_config.clone()),
        };

        let log = log_config.to_logger(test_name).unwrap();
        LogContext { log, log_path }
    }

    /// Removes the log file, if this was a file-based logger.
    pub fn cleanup_successful(self) {
        if let Some(log_path) = &self.log_path {
            fs::remove_file(log_path).unwrap();
        }
    }
}

/// Returns a unique path name in a temporary directory that includes the
/// given `test_name`.
pub fn log_file_for_test(test_name: &str) -> Utf8PathBuf {
    let arg0 = {
        let arg0path = std::env::args().next().unwrap();
        Path::new(&arg0path).file_name().unwrap().to_str().unwrap().to_string()
    };

    let mut path = Utf8PathBuf::try_from(std::env::temp_dir()).unwrap();
    let id = TEST_SUITE_LOGGER_ID.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    path.push(format!("{}-{}.{}.{}.log", arg0, test_name, pid, id));
    path
}

/// Loads an object of type `T` (usually a hunk of configuration) from the
/// TOML string `contents`.  `label` identifies the config in test output.
pub fn read_config<T: DeserializeOwned + Debug>(
    label: &str,
    contents: &str,
) -> Result<T, toml::de::Error> {
    let result = toml::from_str(contents);
    eprintln!("config \"{}\": {:?}", label, result);
    result
}

/// Endpoint configuration listening on an ephemeral port of the loopback
/// interface, so tests can run concurrently.
pub fn config_endpoint_for_test() -> ConfigEndpoint {
    ConfigEndpoint {
        connection: ConnectionParams::new("http", "127.0.0.1", 0),
        ..Default::default()
    }
}

/// Client configuration for a server at `uri`.
pub fn config_client_for_test(uri: &str, base_route: &str) -> ConfigRestClient {
    let mut config = ConfigRestClient {
        connection: ConnectionParams::from_uri(uri),
        base_route: base_route.to_string(),
        ..Default::default()
    };
    config.options.retries = 1;
    config.options.timeout = 1000;
    config.options.connect_timeout = 1000;
    config
}

/*
 * Bunyan testing facilities
 */

/// One Bunyan log record.  Non-standard fields are ignored.
#[derive(Debug, Deserialize)]
pub struct BunyanLogRecord {
    pub time: DateTime<Utc>,
    pub name: String,
    pub hostname: String,
    pub pid: u32,
    pub msg: String,
    pub v: usize,
}

/// Reads a file containing a Bunyan-format log.
pub fn read_bunyan_log(logpath: &Path) -> Vec<BunyanLogRecord> {
    let log_contents = fs::read_to_string(logpath).unwrap();
    log_contents
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str::<BunyanLogRecord>(line).unwrap())
        .collect()
}
