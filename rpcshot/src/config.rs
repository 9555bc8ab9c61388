// Copyright 2025 Oxide Computer Company
//! Configuration for endpoints, services and clients
//!
//! Each type here implements [`serde::Deserialize`] and [`serde::Serialize`]
//! and can be composed with the consumer's own configuration.  For example:
//!
//! ```
//! use rpcshot::ConfigRestClient;
//! use rpcshot::ConfigRestService;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct MyAppConfig {
//!     dummies_api: ConfigRestService,
//!     upstream: ConfigRestClient,
//! }
//!
//! fn main() -> Result<(), String> {
//!     let my_config: MyAppConfig = toml::from_str(
//!         r##"
//!             [dummies_api]
//!             base_route = "/api/v1"
//!             cors_headers = ["x-tenant"]
//!             [dummies_api.connection]
//!             host = "127.0.0.1"
//!             port = 8080
//!             [dummies_api.swagger]
//!             enable = true
//!
//!             [upstream.connection]
//!             uri = "http://upstream.local:3000"
//!             [upstream.options]
//!             retries = 5
//!             correlation_id_place = "both"
//!         "##
//!     ).map_err(|error| format!("parsing config: {}", error))?;
//!
//!     assert_eq!(my_config.dummies_api.base_route, "/api/v1");
//!     assert_eq!(my_config.upstream.options.timeout, 10000);
//!     Ok(())
//! }
//! ```

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::connect::ConnectionParams;
use crate::connect::CredentialParams;

/// Configuration for an [`crate::HttpEndpoint`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigEndpoint {
    /** address to listen on; defaults to http://0.0.0.0:3000 */
    pub connection: ConnectionParams,
    /** TLS material, required when the protocol is "https" */
    pub credential: Option<CredentialParams>,
    pub options: ConfigEndpointOptions,
    /** extra headers allowed in CORS requests ("correlation_id" always is) */
    pub cors_headers: Vec<String>,
    /** origins allowed in CORS requests; empty means any origin */
    pub cors_origins: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigEndpointOptions {
    /** maximum allowed size of a request body, defaults to 1 MiB */
    pub request_max_size: usize,
    /** maximum size of a file upload (a multipart/form-data or
     * application/octet-stream body), defaults to 200 MiB */
    pub file_max_size: usize,
    /** lets handlers take over connections that ask for a protocol upgrade */
    pub protocol_upgrade_enabled: bool,
    /** milliseconds allowed for accepting a connection (TLS handshake) */
    pub connect_timeout: u64,
    /** when set, every request is answered with 503 */
    pub maintenance_enabled: bool,
    /** include error causes in responses */
    pub debug: bool,
}

impl Default for ConfigEndpoint {
    fn default() -> Self {
        ConfigEndpoint {
            connection: ConnectionParams::new("http", "0.0.0.0", 3000),
            credential: None,
            options: ConfigEndpointOptions::default(),
            cors_headers: Vec::new(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for ConfigEndpointOptions {
    fn default() -> Self {
        ConfigEndpointOptions {
            request_max_size: 1024 * 1024,
            file_max_size: 200 * 1024 * 1024,
            protocol_upgrade_enabled: false,
            connect_timeout: 60000,
            maintenance_enabled: false,
            debug: false,
        }
    }
}

/// Configuration for a [`crate::RestService`].  The endpoint fields are used
/// only when the service creates its own endpoint.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigRestService {
    /** route prefix for everything the service registers */
    pub base_route: String,
    pub swagger: ConfigSwagger,
    #[serde(flatten)]
    pub endpoint: ConfigEndpoint,
}

/// OpenAPI exposure settings for a service.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigSwagger {
    /** serve the OpenAPI document at all */
    #[serde(alias = "enabled")]
    pub enable: bool,
    /** sub-route (below the base route) the document is served at */
    pub route: String,
    /** generate the document from the command set (commandable services) */
    pub auto: bool,
    /** document title */
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    /** serve this file instead of a generated document */
    pub path: Option<camino::Utf8PathBuf>,
}

impl Default for ConfigSwagger {
    fn default() -> Self {
        ConfigSwagger {
            enable: false,
            route: "swagger".to_string(),
            auto: true,
            name: None,
            description: None,
            version: None,
            path: None,
        }
    }
}

/// Where a client puts the correlation id of outgoing calls.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationIdPlace {
    #[default]
    Query,
    Headers,
    Both,
}

impl CorrelationIdPlace {
    pub fn in_query(&self) -> bool {
        matches!(self, CorrelationIdPlace::Query | CorrelationIdPlace::Both)
    }

    pub fn in_headers(&self) -> bool {
        matches!(self, CorrelationIdPlace::Headers | CorrelationIdPlace::Both)
    }
}

/// Configuration for a [`crate::RestClient`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigRestClient {
    pub connection: ConnectionParams,
    /** route prefix prepended to every call */
    pub base_route: String,
    pub options: ConfigClientOptions,
    /** headers sent with every request */
    pub headers: BTreeMap<String, String>,
}

impl Default for ConfigRestClient {
    fn default() -> Self {
        ConfigRestClient {
            connection: ConnectionParams::default(),
            base_route: String::new(),
            options: ConfigClientOptions::default(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConfigClientOptions {
    /** number of attempts made for each call */
    pub retries: u32,
    /** milliseconds allowed for establishing a connection */
    pub connect_timeout: u64,
    /** milliseconds allowed for a request; also the backoff unit */
    pub timeout: u64,
    #[serde(alias = "correlation_id")]
    pub correlation_id_place: CorrelationIdPlace,
    pub debug: bool,
}

impl Default for ConfigClientOptions {
    fn default() -> Self {
        ConfigClientOptions {
            retries: 3,
            connect_timeout: 10000,
            timeout: 10000,
            correlation_id_place: CorrelationIdPlace::Query,
            debug: false,
        }
    }
}
