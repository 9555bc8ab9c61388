// Copyright 2025 Oxide Computer Company
//! Heartbeat, status and about services
//!
//! Small services every microservice tends to carry: `GET heartbeat`
//! answers with the current time, `GET status` with a description of the
//! running process and `GET about` with what the server knows about itself
//! and about the caller.  All are plain [`RestService`]s and can share an
//! endpoint with the application's own services.

use crate::auth::AuthUser;
use crate::config::ConfigRestService;
use crate::endpoint::HttpEndpoint;
use crate::error::ApplicationError;
use crate::handler::RequestContext;
use crate::response::send_result;
use crate::service::RestService;
use crate::service::RestServiceRegistrar;
use crate::service::ServiceRoutes;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const HEARTBEAT_ROUTE: &str = "heartbeat";
pub const STATUS_ROUTE: &str = "status";
pub const ABOUT_ROUTE: &str = "about";

struct HeartbeatRegistrar {
    route: String,
}

impl RestServiceRegistrar for HeartbeatRegistrar {
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
        routes.register_route("get", &self.route, None, |_: RequestContext| async {
            send_result(Ok(Some(Utc::now())))
        })
    }
}

/// Answers `GET <base_route>/heartbeat` with the current UTC time.
#[derive(Debug)]
pub struct HeartbeatRestService {
    service: RestService,
}

impl HeartbeatRestService {
    pub fn new(config: ConfigRestService, log: &Logger) -> Self {
        HeartbeatRestService::new_with_route(config, log, HEARTBEAT_ROUTE)
    }

    pub fn new_with_route(
        config: ConfigRestService,
        log: &Logger,
        route: &str,
    ) -> Self {
        let registrar = HeartbeatRegistrar { route: route.to_string() };
        HeartbeatRestService {
            service: RestService::new(config, log, Arc::new(registrar)),
        }
    }

    pub fn with_endpoint(self, endpoint: Arc<HttpEndpoint>) -> Self {
        HeartbeatRestService { service: self.service.with_endpoint(endpoint) }
    }

    pub fn service(&self) -> &RestService {
        &self.service
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

/// What the status service reports about the process.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ContextInfo {
    pub context_id: String,
    pub name: String,
    pub description: String,
    pub properties: BTreeMap<String, String>,
    /// names of the components running in the process
    pub components: Vec<String>,
}

impl Default for ContextInfo {
    fn default() -> Self {
        ContextInfo {
            context_id: String::new(),
            name: "Unknown".to_string(),
            description: String::new(),
            properties: BTreeMap::new(),
            components: Vec::new(),
        }
    }
}

/// Body of a `GET status` response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StatusInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    /// milliseconds since the service was created
    pub uptime: i64,
    pub properties: BTreeMap<String, String>,
    pub components: Vec<String>,
}

fn status_info(info: &ContextInfo, start_time: DateTime<Utc>) -> StatusInfo {
    let current_time = Utc::now();
    StatusInfo {
        id: info.context_id.clone(),
        name: info.name.clone(),
        description: info.description.clone(),
        start_time,
        current_time,
        uptime: (current_time - start_time).num_milliseconds(),
        properties: info.properties.clone(),
        components: info.components.clone(),
    }
}

struct StatusRegistrar {
    route: String,
    info: Arc<ContextInfo>,
    start_time: DateTime<Utc>,
}

impl RestServiceRegistrar for StatusRegistrar {
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
        let info = Arc::clone(&self.info);
        let start_time = self.start_time;
        routes.register_route("get", &self.route, None, move |_: RequestContext| {
            let status = status_info(&info, start_time);
            async move { send_result(Ok(Some(status))) }
        })
    }
}

/// Answers `GET <base_route>/status` with a [`StatusInfo`].
#[derive(Debug)]
pub struct StatusRestService {
    service: RestService,
    start_time: DateTime<Utc>,
}

impl StatusRestService {
    pub fn new(config: ConfigRestService, log: &Logger, info: ContextInfo) -> Self {
        StatusRestService::new_with_route(config, log, info, STATUS_ROUTE)
    }

    pub fn new_with_route(
        config: ConfigRestService,
        log: &Logger,
        info: ContextInfo,
        route: &str,
    ) -> Self {
        let start_time = Utc::now();
        let registrar = StatusRegistrar {
            route: route.to_string(),
            info: Arc::new(info),
            start_time,
        };
        StatusRestService {
            service: RestService::new(config, log, Arc::new(registrar)),
            start_time,
        }
    }

    pub fn with_endpoint(self, endpoint: Arc<HttpEndpoint>) -> Self {
        StatusRestService {
            service: self.service.with_endpoint(endpoint),
            start_time: self.start_time,
        }
    }

    pub fn service(&self) -> &RestService {
        &self.service
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
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

/// The serving side of an [`AboutInfo`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AboutServer {
    pub name: String,
    pub description: String,
    pub properties: BTreeMap<String, String>,
    /// milliseconds since the service was created
    pub uptime: i64,
    pub start_time: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    pub protocol: String,
    pub host: String,
    /// IPv4 unicast addresses of this host
    pub addresses: Vec<String>,
    pub port: u16,
    pub url: String,
}

/// The calling side of an [`AboutInfo`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AboutClient {
    pub address: String,
    /// detected browser, see [`RequestContext::detect_browser`]
    pub client: String,
    pub platform: String,
    /// the caller, if an auth manager signed it in
    pub user: Option<AuthUser>,
}

/// Body of a `GET about` response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AboutInfo {
    pub server: AboutServer,
    pub client: AboutClient,
}

fn is_unicast(ip: &Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast())
}

/// IPv4 unicast addresses this host answers to: those its own host name
/// resolves to, plus the address the request arrived on.
async fn network_addresses(local: IpAddr) -> Vec<String> {
    let mut addresses = BTreeSet::new();
    if let Some(name) = hostname::get().ok().and_then(|h| h.into_string().ok())
    {
        if let Ok(resolved) = tokio::net::lookup_host((name.as_str(), 0)).await
        {
            addresses.extend(resolved.map(|a| a.ip()));
        }
    }
    addresses.insert(local);
    addresses
        .into_iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(ip) if is_unicast(&ip) => Some(ip.to_string()),
            _ => None,
        })
        .collect()
}

async fn about_info(
    rqctx: &RequestContext,
    info: &ContextInfo,
    start_time: DateTime<Utc>,
) -> AboutInfo {
    let status = status_info(info, start_time);
    let protocol = rqctx.request.scheme().to_string();
    let host = rqctx.detect_server_host();
    let port = rqctx.detect_server_port();
    let authority = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    let path = rqctx
        .request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let url = format!("{}://{}{}", protocol, authority, path);

    AboutInfo {
        server: AboutServer {
            name: status.name,
            description: status.description,
            properties: status.properties,
            uptime: status.uptime,
            start_time: status.start_time,
            current_time: status.current_time,
            protocol,
            addresses: network_addresses(rqctx.request.local_addr().ip())
                .await,
            host,
            port,
            url,
        },
        client: AboutClient {
            address: rqctx.detect_address().to_string(),
            client: rqctx.detect_browser(),
            platform: rqctx.detect_platform(),
            user: rqctx.extensions().get::<AuthUser>().cloned(),
        },
    }
}

struct AboutRegistrar {
    route: String,
    info: Arc<ContextInfo>,
    start_time: DateTime<Utc>,
}

impl RestServiceRegistrar for AboutRegistrar {
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
        let info = Arc::clone(&self.info);
        let start_time = self.start_time;
        routes.register_route("get", &self.route, None, move |rqctx: RequestContext| {
            let info = Arc::clone(&info);
            async move {
                let about = about_info(&rqctx, &info, start_time).await;
                send_result(Ok(Some(about)))
            }
        })
    }
}

/// Answers `GET <base_route>/about` with an [`AboutInfo`].
#[derive(Debug)]
pub struct AboutRestService {
    service: RestService,
}

impl AboutRestService {
    pub fn new(config: ConfigRestService, log: &Logger, info: ContextInfo) -> Self {
        AboutRestService::new_with_route(config, log, info, ABOUT_ROUTE)
    }

    pub fn new_with_route(
        config: ConfigRestService,
        log: &Logger,
        info: ContextInfo,
        route: &str,
    ) -> Self {
        let registrar = AboutRegistrar {
            route: route.to_string(),
            info: Arc::new(info),
            start_time: Utc::now(),
        };
        AboutRestService {
            service: RestService::new(config, log, Arc::new(registrar)),
        }
    }

    pub fn with_endpoint(self, endpoint: Arc<HttpEndpoint>) -> Self {
        AboutRestService { service: self.service.with_endpoint(endpoint) }
    }

    pub fn service(&self) -> &RestService {
        &self.service
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
