// Copyright 2025 Oxide Computer Company

//! Tests for the heartbeat, status and about services, and for several
//! services sharing one endpoint.

use chrono::DateTime;
use chrono::Utc;
use rpcshot::test_util::config_client_for_test;
use rpcshot::AboutInfo;
use rpcshot::AboutRestService;
use rpcshot::test_util::config_endpoint_for_test;
use rpcshot::ConfigRestService;
use rpcshot::ContextInfo;
use rpcshot::DataPage;
use rpcshot::HeartbeatRestService;
use rpcshot::HttpEndpoint;
use rpcshot::QueryParams;
use rpcshot::RestClient;
use rpcshot::RestService;
use rpcshot::StatusInfo;
use rpcshot::StatusRestService;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common;
use crate::dummy::Dummy;
use crate::dummy::DummyRoutes;

fn service_config(base_route: &str) -> ConfigRestService {
    ConfigRestService { base_route: base_route.to_string(), ..Default::default() }
}

#[tokio::test]
async fn test_heartbeat_service() {
    let logctx = common::create_log_context("test_heartbeat_service");
    let service = HeartbeatRestService::new(
        common::config_service_for_test(""),
        &logctx.log,
    );
    service.open(None).await.unwrap();
    let client = RestClient::new(
        common::config_client_for_service(service.service()),
        &logctx.log,
    );
    client.open(None).await.unwrap();

    let before = Utc::now();
    let time: DateTime<Utc> = client
        .call("get", "heartbeat", None, QueryParams::new(), None)
        .await
        .unwrap()
        .unwrap();
    assert!(time >= before - chrono::Duration::seconds(1));
    assert!(time <= Utc::now());

    client.close(None).await.unwrap();
    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_shared_endpoint() {
    let logctx = common::create_log_context("test_shared_endpoint");
    let endpoint = Arc::new(HttpEndpoint::new(
        config_endpoint_for_test(),
        &logctx.log,
    ));

    let mut properties = BTreeMap::new();
    properties.insert("region".to_string(), "test".to_string());
    let info = ContextInfo {
        context_id: "ctx1".to_string(),
        name: "dummy-process".to_string(),
        description: "process hosting the dummy services".to_string(),
        properties,
        components: vec!["dummy".to_string()],
    };

    let heartbeat =
        HeartbeatRestService::new_with_route(service_config("/api"), &logctx.log, "ping")
            .with_endpoint(Arc::clone(&endpoint));
    let status = StatusRestService::new(service_config("/api"), &logctx.log, info)
        .with_endpoint(Arc::clone(&endpoint));
    let dummies = RestService::new(
        service_config("/api/v1"),
        &logctx.log,
        DummyRoutes::new(),
    )
    .with_endpoint(Arc::clone(&endpoint));

    // Services don't open a shared endpoint; its owner does.
    heartbeat.open(None).await.unwrap();
    status.open(None).await.unwrap();
    dummies.open(None).await.unwrap();
    assert!(!endpoint.is_open());
    endpoint.open(None).await.unwrap();

    let client = RestClient::new(
        config_client_for_test(&endpoint.uri().unwrap(), "/api"),
        &logctx.log,
    );
    client.open(None).await.unwrap();

    let time: Option<DateTime<Utc>> = client
        .call("get", "ping", None, QueryParams::new(), None)
        .await
        .unwrap();
    assert!(time.is_some());

    let info: StatusInfo = client
        .call("get", "status", None, QueryParams::new(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.id, "ctx1");
    assert_eq!(info.name, "dummy-process");
    assert_eq!(info.properties["region"], "test");
    assert_eq!(info.components, ["dummy"]);
    assert_eq!(info.start_time, status.start_time());
    assert!(info.current_time >= info.start_time);
    assert!(info.uptime >= 0);

    let page: DataPage<Dummy> = client
        .call("get", "v1/dummies", None, QueryParams::new(), None)
        .await
        .unwrap()
        .unwrap();
    assert!(page.data.is_empty());

    // Closing a service leaves the shared endpoint running.
    dummies.close(None).await.unwrap();
    heartbeat.close(None).await.unwrap();
    status.close(None).await.unwrap();
    assert!(endpoint.is_open());

    // A detached service's routes are gone after the endpoint reopens.
    dummies.detach();
    endpoint.close(None).await.unwrap();
    endpoint.open(None).await.unwrap();
    client.close(None).await.unwrap();
    let client = RestClient::new(
        config_client_for_test(&endpoint.uri().unwrap(), "/api"),
        &logctx.log,
    );
    client.open(None).await.unwrap();
    let error = client
        .call::<DataPage<Dummy>>("get", "v1/dummies", None, QueryParams::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.status, 404);
    let info: Option<StatusInfo> = client
        .call("get", "status", None, QueryParams::new(), None)
        .await
        .unwrap();
    assert!(info.is_some());

    client.close(None).await.unwrap();
    endpoint.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_about_service() {
    let logctx = common::create_log_context("test_about_service");
    let info = ContextInfo {
        name: "dummy-process".to_string(),
        ..Default::default()
    };
    let service = AboutRestService::new(
        common::config_service_for_test("/api"),
        &logctx.log,
        info,
    );
    service.open(None).await.unwrap();
    let port = service.service().endpoint().unwrap().local_addr().unwrap().port();

    let response = reqwest::Client::new()
        .get(format!("{}/api/about", common::service_uri(service.service())))
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/125.0")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    let about: AboutInfo = response.json().await.unwrap();
    assert_eq!(about.server.name, "dummy-process");
    assert_eq!(about.server.protocol, "http");
    assert_eq!(about.server.host, "127.0.0.1");
    assert_eq!(about.server.port, port);
    assert_eq!(
        about.server.url,
        format!("http://127.0.0.1:{}/api/about", port)
    );
    assert_eq!(about.client.address, "127.0.0.1");
    assert_eq!(about.client.client, "firefox");
    assert!(about.client.user.is_none());

    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}
