// Copyright 2025 Oxide Computer Company

//! Tests for commandable services and the clients that call them, over HTTP
//! and in-process.

use http::StatusCode;
use rpcshot::CachedCounters;
use rpcshot::CommandableHttpClient;
use rpcshot::CommandableHttpService;
use rpcshot::Commandable;
use rpcshot::DataPage;
use rpcshot::DirectClient;
use rpcshot::FilterParams;
use rpcshot::PagingParams;
use rpcshot::Parameters;
use std::sync::Arc;

use crate::common;
use crate::dummy::Dummy;
use crate::dummy::DummyController;

const BASE_ROUTE: &str = "/api/v1/dummy";

async fn open_commandable_service(
    log: &slog::Logger,
    controller: Arc<DummyController>,
) -> CommandableHttpService {
    let mut config = common::config_service_for_test(BASE_ROUTE);
    config.swagger.enable = true;
    config.swagger.name = Some("Dummy Service".to_string());
    let service = CommandableHttpService::new(config, log, controller);
    service.open(None).await.unwrap();
    service
}

fn dummy_params(dummy: &Dummy) -> Option<Parameters> {
    let mut params = Parameters::new();
    params.set("dummy", serde_json::to_value(dummy).unwrap());
    Some(params)
}

fn id_params(dummy_id: &str) -> Option<Parameters> {
    Some(Parameters::from_tuples([("dummy_id", dummy_id)]))
}

#[tokio::test]
async fn test_commandable_http_crud() {
    let logctx = common::create_log_context("test_commandable_http_crud");
    let controller = DummyController::new();
    let service =
        open_commandable_service(&logctx.log, Arc::clone(&controller)).await;
    assert!(service.is_open());

    let counters = Arc::new(CachedCounters::new());
    let client = CommandableHttpClient::new(
        common::config_client_for_service(service.service()),
        &logctx.log,
    )
    .with_counters(counters.clone());
    client.open(None).await.unwrap();
    assert!(client.is_open());

    let dummy1: Dummy = client
        .call_command(
            "create_dummy",
            Some("cmd"),
            dummy_params(&Dummy::new("", "Key 1", "Content 1")),
        )
        .await
        .unwrap()
        .unwrap();
    assert!(!dummy1.id.is_empty());
    assert_eq!(controller.store().get_one_by_id(&dummy1.id), Some(dummy1.clone()));

    let dummy2: Dummy = client
        .call_command(
            "create_dummy",
            None,
            dummy_params(&Dummy::new("", "Key 2", "Content 2")),
        )
        .await
        .unwrap()
        .unwrap();

    let mut params = Parameters::new();
    params.set("filter", serde_json::to_value(FilterParams::from_tuples([("key", "Key 1")])).unwrap());
    params.set("paging", serde_json::to_value(PagingParams::new(None, None, true)).unwrap());
    let page: DataPage<Dummy> = client
        .call_command("get_dummies", None, Some(params))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.data, vec![dummy1.clone()]);
    assert_eq!(page.total, Some(1));

    let page: DataPage<Dummy> =
        client.call_command("get_dummies", None, None).await.unwrap().unwrap();
    assert_eq!(page.data.len(), 2);

    let found: Option<Dummy> = client
        .call_command("get_dummy_by_id", None, id_params(&dummy2.id))
        .await
        .unwrap();
    assert_eq!(found.as_ref(), Some(&dummy2));

    let mut changed = dummy2.clone();
    changed.content = "Updated Content 2".to_string();
    let updated: Option<Dummy> = client
        .call_command("update_dummy", None, dummy_params(&changed))
        .await
        .unwrap();
    assert_eq!(updated.as_ref(), Some(&changed));

    let deleted: Option<Dummy> = client
        .call_command("delete_dummy", None, id_params(&dummy2.id))
        .await
        .unwrap();
    assert_eq!(deleted.as_ref(), Some(&changed));

    let found: Option<Dummy> = client
        .call_command("get_dummy_by_id", None, id_params(&dummy2.id))
        .await
        .unwrap();
    assert_eq!(found, None);

    assert_eq!(
        counters.get("api/v1/dummy.create_dummy.call_count").unwrap().count,
        2
    );
    assert_eq!(
        counters.get("api/v1/dummy.get_dummies.call_count").unwrap().count,
        2
    );

    client.close(None).await.unwrap();
    service.close(None).await.unwrap();
    assert!(!service.is_open());
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_commandable_http_errors() {
    let logctx = common::create_log_context("test_commandable_http_errors");
    let service =
        open_commandable_service(&logctx.log, DummyController::new()).await;
    let client = CommandableHttpClient::new(
        common::config_client_for_service(service.service()),
        &logctx.log,
    );
    client.open(None).await.unwrap();

    let error = client
        .call_command::<Dummy>("raise_exception", Some("cmd_err"), None)
        .await
        .unwrap_err();
    assert_eq!(error.code, "NOT_FOUND_TEST");
    assert_eq!(error.status, 404);
    assert_eq!(error.correlation_id.as_deref(), Some("cmd_err"));

    // Missing required arguments are rejected before the command runs.
    let error = client
        .call_command::<Dummy>("get_dummy_by_id", Some("cmd_val"), None)
        .await
        .unwrap_err();
    assert_eq!(error.code, "INVALID_DATA");
    assert_eq!(error.status, 400);
    assert_eq!(error.correlation_id.as_deref(), Some("cmd_val"));

    let error = client
        .call_command::<Dummy>("no_such_command", None, None)
        .await
        .unwrap_err();
    assert_eq!(error.status, 404);

    let value: serde_json::Value = client
        .call_command("check_correlation_id", Some("cmd_cor"), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["correlation_id"], "cmd_cor");

    // A body that isn't JSON is a bad request.
    let response = reqwest::Client::new()
        .post(format!(
            "{}{}/get_dummies",
            common::service_uri(service.service()),
            BASE_ROUTE
        ))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: rpcshot::ApplicationError = response.json().await.unwrap();
    assert_eq!(error.code, "INVALID_JSON");

    client.close(None).await.unwrap();
    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_commandable_swagger() {
    let logctx = common::create_log_context("test_commandable_swagger");
    let service =
        open_commandable_service(&logctx.log, DummyController::new()).await;

    let response = reqwest::get(format!(
        "{}{}/swagger",
        common::service_uri(service.service()),
        BASE_ROUTE
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[http::header::CONTENT_TYPE],
        rpcshot::CONTENT_TYPE_YAML
    );
    let document: serde_json::Value =
        serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(document["info"]["title"], "Dummy Service");
    let paths = document["paths"].as_object().unwrap();
    assert_eq!(paths.len(), 7);
    let create = &paths["/api/v1/dummy/create_dummy"]["post"];
    assert_eq!(create["operationId"], "create_dummy");
    assert_eq!(create["tags"][0], "api/v1/dummy");

    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_direct_client() {
    let logctx = common::create_log_context("test_direct_client");
    let controller = DummyController::new();
    let client = DirectClient::<dyn Commandable>::new(&logctx.log, "dummy")
        .with_controller(controller.clone() as Arc<dyn Commandable>);
    client.open(None).await.unwrap();

    let dummy: Dummy = client
        .call_command(
            "create_dummy",
            None,
            dummy_params(&Dummy::new("1", "Key 1", "Content 1")),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dummy.id, "1");
    assert_eq!(controller.store().get_one_by_id("1"), Some(dummy));

    let error = client
        .call_command::<Dummy>("raise_exception", Some("direct"), None)
        .await
        .unwrap_err();
    assert_eq!(error.code, "NOT_FOUND_TEST");
    assert_eq!(error.correlation_id.as_deref(), Some("direct"));

    client.close(None).await.unwrap();
    logctx.cleanup_successful();
}
