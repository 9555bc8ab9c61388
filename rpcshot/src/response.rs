// Copyright 2025 Oxide Computer Company
//! Helpers that turn handler outcomes into HTTP responses
//!
//! Every sender takes the `Result` a handler or command produced.  Errors are
//! rendered as the JSON error body; a `None` result becomes an empty 204.

use crate::error::ApplicationError;
use crate::handler::HandlerResult;
use crate::http_util::CONTENT_TYPE_JSON;
use crate::Body;

use http::header;
use http::HeaderValue;
use http::StatusCode;
use hyper::Response;
use serde::Serialize;

fn json_response<T: Serialize + ?Sized>(
    status: StatusCode,
    value: &T,
) -> HandlerResult {
    let mut response = Response::new(Body::json(value)?);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
    Ok(response)
}

/// 204 with no body.
pub fn empty_response() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

/// 200 with `result` as JSON, or 204 if there is no result.
pub fn send_result<T: Serialize>(
    result: Result<Option<T>, ApplicationError>,
) -> HandlerResult {
    match result? {
        Some(value) => json_response(StatusCode::OK, &value),
        None => Ok(empty_response()),
    }
}

/// 201 with the created object as JSON, or 204 if nothing was created.
pub fn send_created_result<T: Serialize>(
    result: Result<Option<T>, ApplicationError>,
) -> HandlerResult {
    match result? {
        Some(value) => json_response(StatusCode::CREATED, &value),
        None => Ok(empty_response()),
    }
}

/// 200 with the deleted object as JSON, or 204 if nothing was deleted.
pub fn send_deleted_result<T: Serialize>(
    result: Result<Option<T>, ApplicationError>,
) -> HandlerResult {
    send_result(result)
}

/// 204 on success.
pub fn send_empty_result(result: Result<(), ApplicationError>) -> HandlerResult {
    result.map(|()| empty_response())
}

/// Renders `error` directly, without going through the endpoint's error path.
pub fn send_error(error: ApplicationError, request_id: &str) -> Response<Body> {
    error.into_response(request_id)
}
