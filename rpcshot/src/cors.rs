// Copyright 2025 Oxide Computer Company
//! Cross-origin resource sharing
//!
//! Allowed headers and origins accumulate in a [`CorsBuilder`] while an
//! endpoint is closed.  Opening the endpoint freezes them into an immutable
//! [`CorsPolicy`] that every connection shares; further additions are refused
//! until the endpoint closes again.

use crate::error::ApplicationError;
use crate::http_util::CORRELATION_ID;
use crate::Body;
use http::header;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use hyper::Response;
use std::sync::Arc;

/// methods allowed in cross-origin requests
pub const CORS_METHODS: &[&str] =
    &["POST", "GET", "OPTIONS", "PUT", "DELETE", "PATCH"];

/// headers that are always allowed
const DEFAULT_CORS_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "content-language",
    "content-type",
    "origin",
    CORRELATION_ID,
];

/// Accumulates the CORS allow-lists of an endpoint before it opens.
#[derive(Debug, Default)]
pub struct CorsBuilder {
    headers: Vec<String>,
    origins: Vec<String>,
    frozen: bool,
}

impl CorsBuilder {
    pub fn new(headers: &[String], origins: &[String]) -> Self {
        let mut builder = CorsBuilder::default();
        for header in headers {
            builder.push_header(header);
        }
        for origin in origins {
            builder.push_origin(origin);
        }
        builder
    }

    /// Allows `header` and `origin` in cross-origin requests.  Either may be
    /// empty.  Fails with `CORS_FROZEN` once the policy is in use.
    pub fn add(
        &mut self,
        header: &str,
        origin: &str,
    ) -> Result<(), ApplicationError> {
        if self.frozen {
            return Err(ApplicationError::invalid_state(
                "CORS_FROZEN",
                "CORS headers and origins cannot change while the endpoint \
                 is open",
            )
            .with_details("header", header)
            .with_details("origin", origin));
        }
        self.push_header(header);
        self.push_origin(origin);
        Ok(())
    }

    /// Produces the policy used while the endpoint is open.
    pub fn freeze(&mut self) -> Arc<CorsPolicy> {
        self.frozen = true;
        let mut headers: Vec<String> =
            DEFAULT_CORS_HEADERS.iter().map(|h| h.to_string()).collect();
        for header in &self.headers {
            if !headers.contains(header) {
                headers.push(header.clone());
            }
        }
        Arc::new(CorsPolicy { headers, origins: self.origins.clone() })
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    fn push_header(&mut self, header: &str) {
        let header = header.trim().to_ascii_lowercase();
        if !header.is_empty() && !self.headers.contains(&header) {
            self.headers.push(header);
        }
    }

    fn push_origin(&mut self, origin: &str) {
        let origin = origin.trim();
        if !origin.is_empty() && !self.origins.iter().any(|o| o == origin) {
            self.origins.push(origin.to_string());
        }
    }
}

/// Frozen CORS allow-lists.
#[derive(Debug)]
pub struct CorsPolicy {
    headers: Vec<String>,
    /// empty means any origin
    origins: Vec<String>,
}

impl CorsPolicy {
    fn origin_allowed(&self, origin: &str) -> bool {
        self.origins.is_empty()
            || self.origins.iter().any(|o| o == "*" || o == origin)
    }

    fn allow_origin_value(&self, origin: &str) -> String {
        if self.origins.is_empty() || self.origins.iter().any(|o| o == "*") {
            "*".to_string()
        } else {
            origin.to_string()
        }
    }

    /// Answers a CORS preflight request.  Returns `None` for anything that
    /// isn't one, so the request proceeds to routing.
    pub fn preflight(
        &self,
        method: &Method,
        headers: &HeaderMap,
    ) -> Option<Response<Body>> {
        if method != Method::OPTIONS {
            return None;
        }
        let origin = headers.get(header::ORIGIN)?.to_str().ok()?;
        let requested_method =
            headers.get(header::ACCESS_CONTROL_REQUEST_METHOD)?;

        let mut response = Response::new(Body::empty());
        if !self.origin_allowed(origin) {
            // Answer without any CORS headers; the browser will refuse.
            return Some(response);
        }

        let requested_method = requested_method.to_str().unwrap_or("");
        if !CORS_METHODS.iter().any(|m| m.eq_ignore_ascii_case(requested_method))
        {
            *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            return Some(response);
        }

        let requested_headers = headers
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        for requested in requested_headers.split(',') {
            let requested = requested.trim().to_ascii_lowercase();
            if !requested.is_empty() && !self.headers.contains(&requested) {
                *response.status_mut() = StatusCode::FORBIDDEN;
                return Some(response);
            }
        }

        let response_headers = response.headers_mut();
        self.set_origin(origin, response_headers);
        if let Ok(value) = HeaderValue::from_str(&CORS_METHODS.join(", ")) {
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.headers.join(", ")) {
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
        }
        Some(response)
    }

    /// Adds CORS headers to the response of an ordinary cross-origin request.
    pub fn decorate(
        &self,
        request_headers: &HeaderMap,
        response: &mut Response<Body>,
    ) {
        let Some(origin) = request_headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        if self.origin_allowed(origin) {
            self.set_origin(origin, response.headers_mut());
        }
    }

    fn set_origin(&self, origin: &str, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.allow_origin_value(origin))
        {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if !self.origins.is_empty() {
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
}
