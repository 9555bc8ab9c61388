// Copyright 2025 Oxide Computer Company

//! Tests for REST services: plain routes called through `RestClient`, error
//! propagation, schema validation, authorization and OpenAPI documents.

use http::StatusCode;
use rpcshot::add_filter_params;
use rpcshot::add_paging_params;
use rpcshot::interceptor_fn;
use rpcshot::send_result;
use rpcshot::ApplicationError;
use rpcshot::AuthUser;
use rpcshot::BasicAuthManager;
use rpcshot::CachedCounters;
use rpcshot::DataPage;
use rpcshot::FilterParams;
use rpcshot::Next;
use rpcshot::OwnerAuthManager;
use rpcshot::PagingParams;
use rpcshot::QueryParams;
use rpcshot::RequestContext;
use rpcshot::RestClient;
use rpcshot::RestService;
use rpcshot::RestServiceRegistrar;
use rpcshot::RoleAuthManager;
use rpcshot::ServiceRoutes;
use rpcshot::CONTENT_TYPE_YAML;
use std::io::Write;
use std::sync::Arc;

use crate::common;
use crate::dummy::Dummy;
use crate::dummy::DummyRoutes;

async fn open_dummy_service(log: &slog::Logger) -> (RestService, RestClient) {
    let service = RestService::new(
        common::config_service_for_test("/api/v1"),
        &log.new(o!("side" => "server")),
        DummyRoutes::new(),
    );
    service.open(None).await.unwrap();
    let client = RestClient::new(
        common::config_client_for_service(&service),
        &log.new(o!("side" => "client")),
    );
    client.open(None).await.unwrap();
    (service, client)
}

fn body_of(dummy: &Dummy) -> Option<serde_json::Value> {
    Some(serde_json::to_value(dummy).unwrap())
}

#[tokio::test]
async fn test_rest_service_crud() {
    let logctx = common::create_log_context("test_rest_service_crud");
    let (service, client) = open_dummy_service(&logctx.log).await;
    assert!(service.is_open());
    assert!(client.is_open());
    assert_eq!(client.uri(), Some(common::service_uri(&service)));

    let dummy1: Dummy = client
        .call(
            "post",
            "dummies",
            Some("crud"),
            QueryParams::new(),
            body_of(&Dummy::new("", "Key 1", "Content 1")),
        )
        .await
        .unwrap()
        .unwrap();
    assert!(!dummy1.id.is_empty());
    assert_eq!(dummy1.key, "Key 1");

    let dummy2: Dummy = client
        .call(
            "post",
            "/dummies",
            None,
            QueryParams::new(),
            body_of(&Dummy::new("", "Key 2", "Content 2")),
        )
        .await
        .unwrap()
        .unwrap();

    let page: DataPage<Dummy> = client
        .call("get", "dummies", None, QueryParams::new(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.total, None);

    let mut params = QueryParams::new();
    add_filter_params(
        &mut params,
        Some(&FilterParams::from_tuples([("key", "Key 2")])),
    );
    add_paging_params(
        &mut params,
        Some(&PagingParams::new(Some(0), Some(10), true)),
    );
    let page: DataPage<Dummy> = client
        .call("get", "dummies", None, params, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.data, vec![dummy2.clone()]);
    assert_eq!(page.total, Some(1));

    let found: Option<Dummy> = client
        .call(
            "get",
            &format!("dummies/{}", dummy1.id),
            None,
            QueryParams::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(found.as_ref(), Some(&dummy1));

    let mut changed = dummy1.clone();
    changed.content = "Updated Content 1".to_string();
    let updated: Option<Dummy> = client
        .call("put", "dummies", None, QueryParams::new(), body_of(&changed))
        .await
        .unwrap();
    assert_eq!(updated.as_ref(), Some(&changed));

    let deleted: Option<Dummy> = client
        .call(
            "delete",
            &format!("dummies/{}", dummy1.id),
            None,
            QueryParams::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(deleted.map(|d| d.id), Some(dummy1.id.clone()));

    // A missing object is a 204, which the client reports as no result.
    let found: Option<Dummy> = client
        .call(
            "get",
            &format!("dummies/{}", dummy1.id),
            None,
            QueryParams::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(found, None);

    client.close(None).await.unwrap();
    assert!(!client.is_open());
    service.close(None).await.unwrap();
    assert!(!service.is_open());
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_rest_service_errors() {
    let logctx = common::create_log_context("test_rest_service_errors");
    let (service, client) = open_dummy_service(&logctx.log).await;

    let error = client
        .call::<Dummy>("post", "raise_exception", Some("err1"), QueryParams::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.code, "NOT_FOUND_TEST");
    assert_eq!(error.status, 404);
    assert_eq!(error.message, "Dummy error in controller!");
    assert_eq!(error.correlation_id.as_deref(), Some("err1"));

    let error = client
        .call::<Dummy>("get", "no/such/route", Some("err2"), QueryParams::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.status, 404);
    assert_eq!(error.code, "NOT_FOUND");

    // The body is validated against the route's schema before the handler
    // runs.
    let error = client
        .call::<Dummy>(
            "post",
            "dummies",
            Some("err3"),
            QueryParams::new(),
            Some(serde_json::json!({ "key": 7 })),
        )
        .await
        .unwrap_err();
    assert_eq!(error.status, 400);
    assert_eq!(error.code, "INVALID_DATA");
    assert_eq!(error.correlation_id.as_deref(), Some("err3"));

    let error = client
        .call::<Dummy>("launch", "dummies", None, QueryParams::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.code, "UNSUPPORTED_METHOD");

    client.close(None).await.unwrap();
    let error = client
        .call::<Dummy>("get", "dummies", Some("err4"), QueryParams::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.code, "NOT_OPENED");
    assert_eq!(error.correlation_id.as_deref(), Some("err4"));

    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_rest_service_correlation_id() {
    let logctx = common::create_log_context("test_rest_service_correlation_id");
    let (service, client) = open_dummy_service(&logctx.log).await;

    let result: serde_json::Value = client
        .call("get", "dummies/check/correlation_id", Some("test_cor_id"), QueryParams::new(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result["correlation_id"], "test_cor_id");
    client.close(None).await.unwrap();

    // The same id arrives when the client sends it as a header.
    let mut config = common::config_client_for_service(&service);
    config.options.correlation_id_place = rpcshot::CorrelationIdPlace::Headers;
    let client = RestClient::new(config, &logctx.log);
    client.open(None).await.unwrap();
    let result: serde_json::Value = client
        .call("get", "dummies/check/correlation_id", Some("in_header"), QueryParams::new(), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result["correlation_id"], "in_header");
    client.close(None).await.unwrap();

    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_rest_service_panic() {
    let logctx = common::create_log_context("test_rest_service_panic");
    let (service, client) = open_dummy_service(&logctx.log).await;

    let error = client
        .call::<Dummy>("get", "panic", None, QueryParams::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.status, 500);

    // The endpoint keeps serving after a handler panics.
    let page: Option<DataPage<Dummy>> = client
        .call("get", "dummies", None, QueryParams::new(), None)
        .await
        .unwrap();
    assert!(page.is_some());

    client.close(None).await.unwrap();
    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_rest_service_counters() {
    let logctx = common::create_log_context("test_rest_service_counters");
    let (service, _) = open_dummy_service(&logctx.log).await;
    let counters = Arc::new(CachedCounters::new());
    let client = RestClient::new(common::config_client_for_service(&service), &logctx.log)
        .with_counters(counters.clone());
    client.open(None).await.unwrap();

    let name = "dummy.get_dummies";
    let _: Option<DataPage<Dummy>> = client
        .instrument_call(
            None,
            name,
            client.call("get", "dummies", None, QueryParams::new(), None),
        )
        .await
        .unwrap();
    let _ = client
        .instrument_call(
            None,
            "dummy.raise_exception",
            client.call::<Dummy>("post", "raise_exception", None, QueryParams::new(), None),
        )
        .await
        .unwrap_err();

    assert_eq!(counters.get("dummy.get_dummies.call_count").unwrap().count, 1);
    assert!(counters.get("dummy.get_dummies.call_time").is_some());
    assert_eq!(
        counters.get("dummy.raise_exception.call_errors").unwrap().count,
        1
    );

    client.close(None).await.unwrap();
    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

/*
 * Authorization
 */

struct SecureRoutes;

impl RestServiceRegistrar for SecureRoutes {
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
        // Stands in for a real session check: trusts whatever user the
        // request names.
        routes.register_interceptor(
            "",
            interceptor_fn(|mut rqctx: RequestContext, next: Next| async move {
                if let Some(user_id) = rqctx.header("x-user-id").map(str::to_string) {
                    let roles = rqctx.header("x-user-roles").unwrap_or("").to_string();
                    let roles: Vec<&str> =
                        roles.split(',').filter(|r| !r.is_empty()).collect();
                    let user = AuthUser::new(&user_id, &roles);
                    rqctx.extensions_mut().insert(user);
                }
                next.run(rqctx).await
            }),
        )?;

        let whoami = |rqctx: RequestContext| {
            let user_id = rqctx
                .extensions()
                .get::<AuthUser>()
                .map(|user| user.user_id.clone());
            async move { send_result(Ok(user_id)) }
        };
        routes.register_route_with_auth(
            "get",
            "/public",
            None,
            BasicAuthManager.anybody(),
            whoami,
        )?;
        routes.register_route_with_auth(
            "get",
            "/signed",
            None,
            BasicAuthManager.signed(),
            whoami,
        )?;
        routes.register_route_with_auth(
            "get",
            "/admin",
            None,
            RoleAuthManager.admin(),
            whoami,
        )?;
        routes.register_route_with_auth(
            "get",
            "/users/{user_id}/profile",
            None,
            OwnerAuthManager.owner_or_admin(""),
            whoami,
        )
    }
}

#[tokio::test]
async fn test_rest_service_auth() {
    let logctx = common::create_log_context("test_rest_service_auth");
    let service = RestService::new(
        common::config_service_for_test("/api/v1/secure"),
        &logctx.log,
        Arc::new(SecureRoutes),
    );
    service.open(None).await.unwrap();
    let uri = format!("{}/api/v1/secure", common::service_uri(&service));
    let client = reqwest::Client::new();

    let get = |route: &str, user: Option<(&str, &str)>| {
        let mut request = client.get(format!("{}{}", uri, route));
        if let Some((user_id, roles)) = user {
            request = request
                .header("x-user-id", user_id)
                .header("x-user-roles", roles);
        }
        request.send()
    };

    let response = get("/public", None).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get("/signed", None).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: ApplicationError = response.json().await.unwrap();
    assert_eq!(error.code, "NOT_SIGNED");

    let response = get("/signed", Some(("1", ""))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<String>().await.unwrap(), "1");

    let response = get("/admin", Some(("1", "user"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let error: ApplicationError = response.json().await.unwrap();
    assert_eq!(error.code, "NOT_IN_ROLE");

    let response = get("/admin", Some(("2", "user,admin"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = get("/users/1/profile", Some(("1", ""))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = get("/users/1/profile", Some(("3", ""))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let error: ApplicationError = response.json().await.unwrap();
    assert_eq!(error.code, "FORBIDDEN");
    let response = get("/users/1/profile", Some(("2", "admin"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    service.close(None).await.unwrap();
    logctx.cleanup_successful();
}

/*
 * OpenAPI
 */

#[tokio::test]
async fn test_rest_service_swagger_file() {
    let logctx = common::create_log_context("test_rest_service_swagger_file");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let document = "openapi: 3.0.2\ninfo:\n  title: Dummy\n  version: '1'\n";
    file.write_all(document.as_bytes()).unwrap();

    let mut config = common::config_service_for_test("/api/v1");
    config.swagger.enable = true;
    config.swagger.path =
        Some(camino::Utf8PathBuf::try_from(file.path().to_path_buf()).unwrap());
    let service = RestService::new(config, &logctx.log, DummyRoutes::new());
    service.open(None).await.unwrap();

    let response = reqwest::get(format!(
        "{}/api/v1/swagger",
        common::service_uri(&service)
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[http::header::CONTENT_TYPE],
        CONTENT_TYPE_YAML
    );
    assert_eq!(response.text().await.unwrap(), document);
    service.close(None).await.unwrap();

    // A document that can't be read keeps the service from opening.
    let mut config = common::config_service_for_test("/api/v1");
    config.swagger.enable = true;
    config.swagger.path = Some("/nonexistent/swagger.yaml".into());
    let service = RestService::new(config, &logctx.log, DummyRoutes::new());
    let error = service.open(None).await.unwrap_err();
    assert_eq!(error.code, "CANNOT_READ_FILE");
    assert!(!service.is_open());

    logctx.cleanup_successful();
}
