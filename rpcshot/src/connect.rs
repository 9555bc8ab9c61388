// Copyright 2025 Oxide Computer Company

//! Resolution and validation of HTTP connection parameters
//!
//! Endpoints and clients are configured with a [`ConnectionParams`] block
//! that can be expressed either as a full `uri` or as separate `protocol`,
//! `host` and `port` fields:
//!
//! ```toml
//! [connection]
//! protocol = "http"
//! host = "localhost"
//! port = 8080
//! ```
//!
//! [`HttpConnectionResolver`] validates whichever form was supplied and fills
//! in the other one, so that downstream code can always rely on both.  A
//! connection may instead name a `discovery_key`, in which case the actual
//! address is looked up through a [`Discovery`] service.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::ApplicationError;

/// Address of one HTTP endpoint.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct ConnectionParams {
    /** "http" or "https"; "http" when unset */
    pub protocol: Option<String>,
    pub host: Option<String>,
    /** TCP port; port 0 asks the endpoint to bind any available port */
    pub port: Option<u16>,
    /** composed address, e.g. "http://localhost:8080" */
    pub uri: Option<String>,
    /** key used to look this connection up in a discovery service */
    pub discovery_key: Option<String>,
}

impl ConnectionParams {
    pub fn new(protocol: &str, host: &str, port: u16) -> Self {
        ConnectionParams {
            protocol: Some(protocol.to_string()),
            host: Some(host.to_string()),
            port: Some(port),
            uri: None,
            discovery_key: None,
        }
    }

    pub fn from_uri(uri: &str) -> Self {
        ConnectionParams { uri: Some(uri.to_string()), ..Default::default() }
    }

    /// Returns the protocol, defaulting to "http".
    pub fn protocol(&self) -> &str {
        non_empty(&self.protocol).unwrap_or("http")
    }

    pub fn host(&self) -> Option<&str> {
        non_empty(&self.host)
    }

    pub fn uri(&self) -> Option<&str> {
        non_empty(&self.uri)
    }

    pub fn uses_discovery(&self) -> bool {
        non_empty(&self.discovery_key).is_some()
    }

    pub fn is_https(&self) -> bool {
        self.protocol() == "https"
    }
}

/// TLS material for https connections.  All paths refer to PEM files.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct CredentialParams {
    /** PKCS #8 (or RSA) private key for the endpoint's certificate */
    pub ssl_key_file: Option<Utf8PathBuf>,
    /** certificate chain; the first certificate is the end-entity one */
    pub ssl_crt_file: Option<Utf8PathBuf>,
    /** optional CA certificates appended to the served chain */
    pub ssl_ca_file: Option<Utf8PathBuf>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Service used to publish and look up connection addresses by key.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Publishes `connection` under `key`.
    async fn register(
        &self,
        correlation_id: Option<&str>,
        key: &str,
        connection: &ConnectionParams,
    ) -> Result<(), ApplicationError>;

    /// Returns one connection registered under `key`, if any.
    async fn resolve_one(
        &self,
        correlation_id: Option<&str>,
        key: &str,
    ) -> Result<Option<ConnectionParams>, ApplicationError>;

    /// Returns every connection registered under `key`.
    async fn resolve_all(
        &self,
        correlation_id: Option<&str>,
        key: &str,
    ) -> Result<Vec<ConnectionParams>, ApplicationError>;
}

/// In-process [`Discovery`] implementation, mostly useful for tests and for
/// wiring several components inside one process.
#[derive(Debug, Default)]
pub struct MemoryDiscovery {
    items: Mutex<Vec<(String, ConnectionParams)>>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        MemoryDiscovery::default()
    }

    fn items(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<(String, ConnectionParams)>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Discovery for MemoryDiscovery {
    async fn register(
        &self,
        _correlation_id: Option<&str>,
        key: &str,
        connection: &ConnectionParams,
    ) -> Result<(), ApplicationError> {
        let mut items = self.items();
        items.retain(|(k, c)| !(k == key && c == connection));
        items.push((key.to_string(), connection.clone()));
        Ok(())
    }

    async fn resolve_one(
        &self,
        _correlation_id: Option<&str>,
        key: &str,
    ) -> Result<Option<ConnectionParams>, ApplicationError> {
        Ok(self
            .items()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, connection)| connection.clone()))
    }

    async fn resolve_all(
        &self,
        _correlation_id: Option<&str>,
        key: &str,
    ) -> Result<Vec<ConnectionParams>, ApplicationError> {
        Ok(self
            .items()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, connection)| connection.clone())
            .collect())
    }
}

/// Resolves raw connection parameters from configuration, consulting a
/// discovery service for connections that carry a `discovery_key`.
#[derive(Clone, Default)]
pub struct ConnectionResolver {
    connections: Vec<ConnectionParams>,
    discovery: Option<Arc<dyn Discovery>>,
}

impl std::fmt::Debug for ConnectionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResolver")
            .field("connections", &self.connections)
            .field("discovery", &self.discovery.is_some())
            .finish()
    }
}

impl ConnectionResolver {
    pub fn new(connections: Vec<ConnectionParams>) -> Self {
        ConnectionResolver { connections, discovery: None }
    }

    pub fn set_discovery(&mut self, discovery: Option<Arc<dyn Discovery>>) {
        self.discovery = discovery;
    }

    fn discovery(
        &self,
        correlation_id: Option<&str>,
        key: &str,
    ) -> Result<&Arc<dyn Discovery>, ApplicationError> {
        self.discovery.as_ref().ok_or_else(|| {
            ApplicationError::config(
                "CANNOT_RESOLVE",
                "discovery wasn't found to make resolution",
            )
            .with_correlation_id(correlation_id)
            .with_details("discovery_key", key)
        })
    }

    /// Returns the first configured connection, resolved through discovery
    /// if necessary.
    pub async fn resolve(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<Option<ConnectionParams>, ApplicationError> {
        let Some(connection) = self.connections.first() else {
            return Ok(None);
        };
        match non_empty(&connection.discovery_key) {
            None => Ok(Some(connection.clone())),
            Some(key) => {
                self.discovery(correlation_id, key)?
                    .resolve_one(correlation_id, key)
                    .await
            }
        }
    }

    /// Returns every configured connection, expanding the ones that use
    /// discovery.
    pub async fn resolve_all(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<Vec<ConnectionParams>, ApplicationError> {
        let mut resolved = Vec::new();
        for connection in &self.connections {
            match non_empty(&connection.discovery_key) {
                None => resolved.push(connection.clone()),
                Some(key) => resolved.extend(
                    self.discovery(correlation_id, key)?
                        .resolve_all(correlation_id, key)
                        .await?,
                ),
            }
        }
        Ok(resolved)
    }

    /// Publishes `connection` to discovery.  Connections without a
    /// `discovery_key`, and resolvers without discovery, are skipped.
    pub async fn register(
        &self,
        correlation_id: Option<&str>,
        connection: &ConnectionParams,
    ) -> Result<(), ApplicationError> {
        match (non_empty(&connection.discovery_key), &self.discovery) {
            (Some(key), Some(discovery)) => {
                discovery.register(correlation_id, key, connection).await
            }
            _ => Ok(()),
        }
    }
}

/// Resolves and validates the connection and credential of one HTTP endpoint
/// or client.
#[derive(Clone, Debug, Default)]
pub struct HttpConnectionResolver {
    resolver: ConnectionResolver,
    credential: Option<CredentialParams>,
}

impl HttpConnectionResolver {
    pub fn new(
        connection: ConnectionParams,
        credential: Option<CredentialParams>,
    ) -> Self {
        HttpConnectionResolver {
            resolver: ConnectionResolver::new(vec![connection]),
            credential,
        }
    }

    pub fn with_connections(
        connections: Vec<ConnectionParams>,
        credential: Option<CredentialParams>,
    ) -> Self {
        HttpConnectionResolver {
            resolver: ConnectionResolver::new(connections),
            credential,
        }
    }

    pub fn set_discovery(&mut self, discovery: Option<Arc<dyn Discovery>>) {
        self.resolver.set_discovery(discovery);
    }

    /// Resolves one connection, validates it, and normalizes it so that both
    /// `uri` and `protocol`/`host`/`port` are populated.
    pub async fn resolve(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(ConnectionParams, Option<CredentialParams>), ApplicationError>
    {
        let connection = self.resolver.resolve(correlation_id).await?;
        let connection =
            validate_connection(correlation_id, connection, &self.credential)?;
        Ok((update_connection(connection), self.credential.clone()))
    }

    /// Resolves, validates and normalizes every configured connection.  The
    /// result is empty (never missing) when nothing is configured.
    pub async fn resolve_all(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(Vec<ConnectionParams>, Option<CredentialParams>), ApplicationError>
    {
        let connections = self.resolver.resolve_all(correlation_id).await?;
        let mut resolved = Vec::with_capacity(connections.len());
        for connection in connections {
            let connection = validate_connection(
                correlation_id,
                Some(connection),
                &self.credential,
            )?;
            resolved.push(update_connection(connection));
        }
        Ok((resolved, self.credential.clone()))
    }

    /// Validates and normalizes the first configured connection as written,
    /// without consulting discovery.  An endpoint listens on this address
    /// even when it also carries a `discovery_key`.
    pub fn resolve_local(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<(ConnectionParams, Option<CredentialParams>), ApplicationError>
    {
        let connection = self.resolver.connections.first().cloned();
        let connection =
            validate_connection(correlation_id, connection, &self.credential)?;
        Ok((update_connection(connection), self.credential.clone()))
    }

    /// Publishes the locally configured connection to discovery under its
    /// `discovery_key`.  A no-op for connections without one.  `bound_port`
    /// replaces the configured port, e.g. once port 0 has been bound.
    pub async fn register(
        &self,
        correlation_id: Option<&str>,
        bound_port: Option<u16>,
    ) -> Result<(), ApplicationError> {
        let Some(connection) = self.resolver.connections.first() else {
            return Ok(());
        };
        if !connection.uses_discovery() {
            return Ok(());
        }
        let (mut local, _) = self.resolve_local(correlation_id)?;
        if let Some(port) = bound_port {
            local.port = Some(port);
            local.uri = None;
            local = update_connection(local);
        }
        self.resolver.register(correlation_id, &local).await
    }
}

fn validate_connection(
    correlation_id: Option<&str>,
    connection: Option<ConnectionParams>,
    credential: &Option<CredentialParams>,
) -> Result<ConnectionParams, ApplicationError> {
    let config_error = |code: &str, message: &str| {
        ApplicationError::config(code, message)
            .with_correlation_id(correlation_id)
    };

    let connection = connection.ok_or_else(|| {
        config_error("NO_CONNECTION", "HTTP connection is not set")
    })?;
    if connection.uri().is_some() {
        return Ok(connection);
    }

    let protocol = connection.protocol();
    if protocol != "http" && protocol != "https" {
        return Err(config_error(
            "WRONG_PROTOCOL",
            "Protocol is not supported by REST connection",
        )
        .with_details("protocol", protocol));
    }
    if connection.host().is_none() {
        return Err(config_error("NO_HOST", "Connection host is not set"));
    }
    if connection.port.is_none() {
        return Err(config_error("NO_PORT", "Connection port is not set"));
    }

    if connection.is_https() {
        let credential = credential.as_ref().ok_or_else(|| {
            config_error(
                "NO_CREDENTIAL",
                "SSL certificates are not configured for HTTPS protocol",
            )
        })?;
        if credential.ssl_key_file.is_none() {
            return Err(config_error(
                "NO_SSL_KEY_FILE",
                "SSL key file is not configured in credentials",
            ));
        }
        if credential.ssl_crt_file.is_none() {
            return Err(config_error(
                "NO_SSL_CRT_FILE",
                "SSL crt file is not configured in credentials",
            ));
        }
    }

    Ok(connection)
}

/// Fills in whichever of the two address forms is missing.
fn update_connection(mut connection: ConnectionParams) -> ConnectionParams {
    match connection.uri().map(url::Url::parse) {
        None => {
            let mut uri = format!(
                "{}://{}",
                connection.protocol(),
                connection.host().unwrap_or_default()
            );
            if let Some(port) = connection.port {
                uri.push_str(&format!(":{}", port));
            }
            connection.uri = Some(uri);
        }
        Some(Ok(address)) => {
            connection.protocol = Some(address.scheme().to_string());
            connection.host = address.host_str().map(str::to_string);
            connection.port = address.port_or_known_default();
        }
        // An unparseable uri is passed through untouched; the transport
        // reports it when the connection is actually used.
        Some(Err(_)) => {}
    }
    connection
}
