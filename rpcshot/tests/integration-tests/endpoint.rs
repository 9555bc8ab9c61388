// Copyright 2025 Oxide Computer Company

//! Tests for the behavior every endpoint applies to every request:
//! lifecycle, maintenance mode, CORS, caching headers, body limits and
//! interceptors.  Also discovery publishing and protocol upgrades.

use http::header;
use http::HeaderValue;
use http::Response;
use http::StatusCode;
use hyper_util::rt::TokioIo;
use rpcshot::interceptor_fn;
use rpcshot::registration_fn;
use rpcshot::send_result;
use rpcshot::test_util::config_endpoint_for_test;
use rpcshot::ApplicationError;
use rpcshot::Body;
use rpcshot::Discovery;
use rpcshot::HttpEndpoint;
use rpcshot::MemoryDiscovery;
use rpcshot::Next;
use rpcshot::RequestContext;
use rpcshot::HEADER_REQUEST_ID;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::common;

fn hello_endpoint(log: &slog::Logger) -> Arc<HttpEndpoint> {
    let endpoint = HttpEndpoint::new(config_endpoint_for_test(), log);
    endpoint.register(registration_fn(|endpoint: &HttpEndpoint| {
        endpoint.register_route("get", "/hello", None, |rqctx: RequestContext| {
            let name = rqctx.param("name").unwrap_or("world").to_string();
            async move { send_result(Ok(Some(format!("hello, {}", name)))) }
        })?;
        endpoint.register_route("post", "private/data", None, |_: RequestContext| async {
            send_result(Ok(Some("secret")))
        })?;
        endpoint.register_interceptor(
            "^/private",
            interceptor_fn(|rqctx: RequestContext, next: Next| async move {
                if rqctx.header("x-api-key") != Some("letmein") {
                    return Err(ApplicationError::unauthorized(
                        "INVALID_KEY",
                        "a valid api key is required",
                    ));
                }
                next.run(rqctx).await
            }),
        )
    }));
    Arc::new(endpoint)
}

async fn error_body(response: reqwest::Response) -> ApplicationError {
    response.json::<ApplicationError>().await.unwrap()
}

#[tokio::test]
async fn test_endpoint_open_close() {
    let logctx = common::create_log_context("test_endpoint_open_close");
    let endpoint = hello_endpoint(&logctx.log);
    assert!(!endpoint.is_open());
    assert_eq!(endpoint.uri(), None);

    endpoint.open(Some("123")).await.unwrap();
    // Opening again is a no-op.
    endpoint.open(Some("123")).await.unwrap();
    assert!(endpoint.is_open());
    let uri = endpoint.uri().unwrap();
    let port = endpoint.local_addr().unwrap().port();
    assert_ne!(port, 0);
    assert_eq!(uri, format!("http://127.0.0.1:{}", port));

    let client = reqwest::Client::new();
    let response =
        client.get(format!("{}/hello?name=rust", uri)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(headers[header::PRAGMA], "no-cache");
    assert_eq!(headers[header::EXPIRES], "0");
    assert!(headers.contains_key(HEADER_REQUEST_ID));
    assert_eq!(response.json::<String>().await.unwrap(), "hello, rust");

    endpoint.close(None).await.unwrap();
    endpoint.close(None).await.unwrap();
    assert!(!endpoint.is_open());
    assert!(client.get(format!("{}/hello", uri)).send().await.is_err());

    // The same registrations are installed again on the next open.
    endpoint.open(None).await.unwrap();
    let uri = endpoint.uri().unwrap();
    let response = client.get(format!("{}/hello", uri)).send().await.unwrap();
    assert_eq!(response.json::<String>().await.unwrap(), "hello, world");
    endpoint.close(None).await.unwrap();

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_endpoint_bind_failure() {
    let logctx = common::create_log_context("test_endpoint_bind_failure");
    let first = hello_endpoint(&logctx.log);
    first.open(None).await.unwrap();
    let port = first.local_addr().unwrap().port();

    let mut config = config_endpoint_for_test();
    config.connection.port = Some(port);
    let second = HttpEndpoint::new(config, &logctx.log);
    let error = second.open(Some("abc")).await.unwrap_err();
    assert_eq!(error.code, "CANNOT_START_SERVER");
    assert_eq!(error.correlation_id.as_deref(), Some("abc"));
    assert!(!second.is_open());

    first.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_endpoint_routing_errors() {
    let logctx = common::create_log_context("test_endpoint_routing_errors");
    let endpoint = hello_endpoint(&logctx.log);
    endpoint.open(None).await.unwrap();
    let uri = endpoint.uri().unwrap();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/nothing/here?correlation_id=cid1", uri))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        rpcshot::CONTENT_TYPE_JSON
    );
    let error = error_body(response).await;
    assert_eq!(error.code, "NOT_FOUND");
    assert_eq!(error.status, 404);

    let response =
        client.delete(format!("{}/hello", uri)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    endpoint.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_endpoint_request_too_large() {
    let logctx = common::create_log_context("test_endpoint_request_too_large");
    let mut config = config_endpoint_for_test();
    config.options.request_max_size = 16;
    config.options.file_max_size = 64;
    let endpoint = HttpEndpoint::new(config, &logctx.log);
    endpoint.register(registration_fn(|endpoint: &HttpEndpoint| {
        endpoint.register_route("post", "/echo", None, |rqctx: RequestContext| {
            let body = rqctx.body_value();
            async move { send_result(body) }
        })?;
        endpoint.register_route("post", "/upload", None, |rqctx: RequestContext| {
            let size = rqctx.body().len();
            async move { send_result(Ok(Some(size))) }
        })
    }));
    endpoint.open(None).await.unwrap();
    let uri = endpoint.uri().unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/echo", uri))
        .body("[1, 2, 3]")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<serde_json::Value>().await.unwrap(),
        serde_json::json!([1, 2, 3])
    );

    let response = client
        .post(format!("{}/echo", uri))
        .body("[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_body(response).await.code, "REQUEST_TOO_LARGE");

    // File uploads get their own, larger limit.
    let upload = |content_type: &'static str, size: usize| {
        client
            .post(format!("{}/upload", uri))
            .header(header::CONTENT_TYPE, content_type)
            .body(vec![b'x'; size])
            .send()
    };
    let response = upload("application/octet-stream", 48).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<usize>().await.unwrap(), 48);
    let response =
        upload("multipart/form-data; boundary=x", 48).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = upload("application/octet-stream", 65).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let response = upload("text/plain", 48).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    endpoint.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_endpoint_maintenance() {
    let logctx = common::create_log_context("test_endpoint_maintenance");
    let endpoint = hello_endpoint(&logctx.log);
    endpoint.open(None).await.unwrap();
    let uri = endpoint.uri().unwrap();
    let client = reqwest::Client::new();

    endpoint.set_maintenance_enabled(true);
    assert!(endpoint.is_maintenance_enabled());
    let response = client
        .get(format!("{}/hello?correlation_id=maint", uri))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[header::RETRY_AFTER], "3600");
    let error = error_body(response).await;
    assert_eq!(error.code, "SERVER_UNAVAILABLE");
    assert_eq!(error.correlation_id.as_deref(), Some("maint"));

    // Even unknown routes are unavailable.
    let response =
        client.get(format!("{}/nothing", uri)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    endpoint.set_maintenance_enabled(false);
    let response = client.get(format!("{}/hello", uri)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    endpoint.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_endpoint_cors() {
    let logctx = common::create_log_context("test_endpoint_cors");
    let endpoint = hello_endpoint(&logctx.log);
    endpoint.add_cors_header("X-Tenant", "").unwrap();
    endpoint.open(None).await.unwrap();
    let uri = endpoint.uri().unwrap();
    let client = reqwest::Client::new();

    let error = endpoint.add_cors_header("X-Other", "").unwrap_err();
    assert_eq!(error.code, "CORS_FROZEN");

    let preflight = |headers: &str| {
        client
            .request(reqwest::Method::OPTIONS, format!("{}/hello", uri))
            .header(header::ORIGIN, "http://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, headers.to_string())
            .send()
    };

    let response =
        preflight("Content-Type, correlation_id, X-Tenant").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let allowed_methods =
        headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
    assert!(allowed_methods.contains("POST"));
    let allowed_headers =
        headers[header::ACCESS_CONTROL_ALLOW_HEADERS].to_str().unwrap();
    assert!(allowed_headers.contains("correlation_id"));
    assert!(allowed_headers.contains("x-tenant"));

    let response = preflight("X-Other").await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Ordinary cross-origin requests get the allowed origin too.
    let response = client
        .get(format!("{}/hello", uri))
        .header(header::ORIGIN, "http://example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    // The policy can change again once the endpoint is closed.
    endpoint.close(None).await.unwrap();
    endpoint.add_cors_header("X-Other", "").unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_endpoint_interceptor() {
    let logctx = common::create_log_context("test_endpoint_interceptor");
    let endpoint = hello_endpoint(&logctx.log);
    endpoint.open(None).await.unwrap();
    let uri = endpoint.uri().unwrap();
    let client = reqwest::Client::new();

    let response =
        client.post(format!("{}/private/data", uri)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_body(response).await.code, "INVALID_KEY");

    let response = client
        .post(format!("{}/private/data", uri))
        .header("x-api-key", "letmein")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<String>().await.unwrap(), "secret");

    // Routes outside the pattern are not intercepted.
    let response = client.get(format!("{}/hello", uri)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    endpoint.close(None).await.unwrap();
    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_endpoint_discovery() {
    let logctx = common::create_log_context("test_endpoint_discovery");
    let discovery = Arc::new(MemoryDiscovery::new());
    let mut config = config_endpoint_for_test();
    config.connection.discovery_key = Some("hello".to_string());
    let endpoint = HttpEndpoint::new(config, &logctx.log)
        .with_discovery(discovery.clone());
    endpoint.open(None).await.unwrap();

    // The bound port is published, not the configured port 0.
    let published =
        discovery.resolve_one(None, "hello").await.unwrap().unwrap();
    assert_eq!(published.uri, endpoint.uri());
    assert_eq!(
        published.port,
        Some(endpoint.local_addr().unwrap().port())
    );

    endpoint.close(None).await.unwrap();
    logctx.cleanup_successful();
}

fn upgrade_endpoint(log: &slog::Logger, enabled: bool) -> HttpEndpoint {
    let mut config = config_endpoint_for_test();
    config.options.protocol_upgrade_enabled = enabled;
    let endpoint = HttpEndpoint::new(config, log);
    endpoint.register(registration_fn(|endpoint: &HttpEndpoint| {
        endpoint.register_route("get", "/echo", None, |mut rqctx: RequestContext| async move {
            let Some(upgrade) = rqctx.take_upgrade() else {
                return Err(ApplicationError::bad_request(
                    "NO_UPGRADE",
                    "protocol upgrades are disabled",
                ));
            };
            // Echo four bytes over the upgraded stream.
            tokio::spawn(async move {
                if let Ok(upgraded) = upgrade.await {
                    let mut io = TokioIo::new(upgraded);
                    let mut buf = [0u8; 4];
                    if io.read_exact(&mut buf).await.is_ok() {
                        let _ = io.write_all(&buf).await;
                    }
                }
            });
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            let headers = response.headers_mut();
            headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
            headers.insert(header::UPGRADE, HeaderValue::from_static("echo"));
            Ok(response)
        })
    }));
    endpoint
}

#[tokio::test]
async fn test_endpoint_protocol_upgrade() {
    let logctx = common::create_log_context("test_endpoint_protocol_upgrade");
    let endpoint = upgrade_endpoint(&logctx.log, true);
    endpoint.open(None).await.unwrap();

    let mut stream =
        TcpStream::connect(endpoint.local_addr().unwrap()).await.unwrap();
    stream
        .write_all(
            b"GET /echo HTTP/1.1\r\nhost: localhost\r\n\
              connection: upgrade\r\nupgrade: echo\r\n\r\n",
        )
        .await
        .unwrap();
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "{}", head);

    stream.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping");
    drop(stream);

    endpoint.close(None).await.unwrap();

    // Without the option, handlers never see the upgrade.
    let endpoint = upgrade_endpoint(&logctx.log, false);
    endpoint.open(None).await.unwrap();
    let response = reqwest::Client::new()
        .get(format!("{}/echo", endpoint.uri().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(response).await.code, "NO_UPGRADE");

    endpoint.close(None).await.unwrap();
    logctx.cleanup_successful();
}
