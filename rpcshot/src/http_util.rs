// Copyright 2025 Oxide Computer Company

//! General-purpose HTTP-related facilities

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body as HttpBody;

use crate::error::ApplicationError;

/// header name for conveying request ids ("x-request-id")
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// MIME type for plain JSON data
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// MIME type for YAML documents (used for OpenAPI specs)
pub const CONTENT_TYPE_YAML: &str = "application/x-yaml";
/// name of the query parameter and header carrying the correlation id
pub const CORRELATION_ID: &str = "correlation_id";

/// Reads the whole body into memory, failing once more than `cap` bytes have
/// arrived.  Checking `size_hint` first lets us reject an oversized body
/// without reading any of it when `Content-Length` is present.
pub async fn http_read_body<T>(
    body: T,
    cap: usize,
) -> Result<Bytes, ApplicationError>
where
    T: HttpBody<Data = Bytes> + Send,
    T::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let too_large = || {
        ApplicationError::bad_request(
            "REQUEST_TOO_LARGE",
            format!("request body exceeded maximum size of {} bytes", cap),
        )
        .with_status(http::StatusCode::PAYLOAD_TOO_LARGE)
    };

    if let Some(exact) = body.size_hint().exact() {
        if exact > cap as u64 {
            return Err(too_large());
        }
    }

    let limited = http_body_util::Limited::new(body, cap);
    match limited.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(error) => {
            if error.downcast_ref::<http_body_util::LengthLimitError>().is_some()
            {
                Err(too_large())
            } else {
                Err(ApplicationError::bad_request(
                    "BAD_REQUEST",
                    format!("error reading request body: {}", error),
                ))
            }
        }
    }
}

/// Parses a query string into (name, value) pairs, keeping only the first
/// value for each name.
pub fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    if let Some(query) = query {
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            if !pairs.iter().any(|(n, _)| *n == name) {
                pairs.push((name.into_owned(), value.into_owned()));
            }
        }
    }
    pairs
}
