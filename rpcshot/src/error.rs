// Copyright 2025 Oxide Computer Company

//! Generic error types shared by endpoints, services and clients.
//!
//! Every failure that crosses a process boundary is described by an
//! [`ApplicationError`].  On the server side, handlers and commands return
//! these errors and they are rendered into a JSON body with the matching HTTP
//! status code.  On the client side, any response with a status of 400 or
//! above is parsed back into the same structure, so callers can inspect
//! `code` and `status` programmatically regardless of which side produced the
//! failure.
//!
//! The wire form looks like this:
//!
//! ```json
//! {
//!     "type": "NotFoundError",
//!     "category": "NotFound",
//!     "status": 404,
//!     "code": "NOT_FOUND_TEST",
//!     "message": "Not found error",
//!     "correlation_id": "test_cor_id",
//!     "details": { "id": "abc" }
//! }
//! ```
//!
//! Only `code` is required when parsing; `status` falls back to 500 when it's
//! missing.

use crate::body::Body;
use crate::http_util::CONTENT_TYPE_JSON;
use crate::http_util::HEADER_REQUEST_ID;
use http::StatusCode;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::error::Error;
use std::fmt;

/// Broad classification of an [`ApplicationError`].  Each category has a
/// default HTTP status, though individual errors may override it.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorCategory {
    /// Errors that happened inside this process (including panics)
    Internal,
    /// Missing or invalid configuration
    Misconfiguration,
    /// A remote service could not be reached or didn't respond
    NoResponse,
    /// A remote call was made but failed
    FailedInvocation,
    /// Failure while reading or writing local files
    FileError,
    /// The caller sent something invalid
    BadRequest,
    /// Missing or insufficient credentials
    Unauthorized,
    /// The requested object doesn't exist
    NotFound,
    /// The operation isn't valid in the component's current state
    InvalidState,
    /// The operation isn't supported
    Unsupported,
    /// Optimistic concurrency or uniqueness violation
    Conflict,
    /// Something went wrong, but we don't know what.  Categories this crate
    /// doesn't know also parse as `Unknown`.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ErrorCategory {
    /// Returns the HTTP status used for errors of this category unless the
    /// error says otherwise.
    pub fn default_status(&self) -> StatusCode {
        match self {
            ErrorCategory::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCategory::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::InvalidState | ErrorCategory::Conflict => {
                StatusCode::CONFLICT
            }
            ErrorCategory::Unknown
            | ErrorCategory::Internal
            | ErrorCategory::Misconfiguration
            | ErrorCategory::NoResponse
            | ErrorCategory::FailedInvocation
            | ErrorCategory::FileError
            | ErrorCategory::Unsupported => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ErrorCategory::Unknown => "UnknownError",
            ErrorCategory::Internal => "InternalError",
            ErrorCategory::Misconfiguration => "ConfigError",
            ErrorCategory::NoResponse => "ConnectionError",
            ErrorCategory::FailedInvocation => "InvocationError",
            ErrorCategory::FileError => "FileError",
            ErrorCategory::BadRequest => "BadRequestError",
            ErrorCategory::Unauthorized => "UnauthorizedError",
            ErrorCategory::NotFound => "NotFoundError",
            ErrorCategory::InvalidState => "InvalidStateError",
            ErrorCategory::Unsupported => "UnsupportedError",
            ErrorCategory::Conflict => "ConflictError",
        }
    }
}

fn default_status() -> u16 {
    StatusCode::INTERNAL_SERVER_ERROR.as_u16()
}

fn deserialize_details<'de, D>(
    deserializer: D,
) -> Result<Option<Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::Object(details) => Some(details),
        value => Some(Map::from_iter([("value".to_string(), value)])),
    })
}

/// `ApplicationError` is the error type returned by handlers, commands,
/// connection resolution and clients.  It doubles as the JSON body of error
/// responses.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ApplicationError {
    /// name of the error type, used for diagnostics only
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub category: ErrorCategory,
    /// HTTP status code associated with this error
    #[serde(default = "default_status")]
    pub status: u16,
    /// stable, machine-readable error code (e.g., `"NOT_FOUND"`)
    pub code: String,
    /// human-readable message
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// free-form details; a non-object value is kept under `"value"`
    #[serde(
        default,
        deserialize_with = "deserialize_details",
        skip_serializing_if = "Option::is_none"
    )]
    pub details: Option<Map<String, Value>>,
    /// description of the underlying error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ApplicationError {
    /// Constructs an error of the given category using that category's
    /// default status.
    pub fn new<C, M>(category: ErrorCategory, code: C, message: M) -> Self
    where
        C: Into<String>,
        M: Into<String>,
    {
        ApplicationError {
            error_type: Some(category.type_name().to_string()),
            category,
            status: category.default_status().as_u16(),
            code: code.into(),
            message: message.into(),
            correlation_id: None,
            details: None,
            cause: None,
        }
    }

    pub fn unknown(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApplicationError::new(ErrorCategory::Unknown, code, message)
    }

    pub fn internal(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::Internal, code, message)
    }

    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApplicationError::new(ErrorCategory::Misconfiguration, code, message)
    }

    pub fn connection(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::NoResponse, code, message)
    }

    pub fn invocation(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::FailedInvocation, code, message)
    }

    pub fn file(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApplicationError::new(ErrorCategory::FileError, code, message)
    }

    pub fn bad_request(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::BadRequest, code, message)
    }

    pub fn unauthorized(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::Unauthorized, code, message)
    }

    pub fn not_found(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::NotFound, code, message)
    }

    pub fn invalid_state(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::InvalidState, code, message)
    }

    pub fn unsupported(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::Unsupported, code, message)
    }

    pub fn conflict(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApplicationError::new(ErrorCategory::Conflict, code, message)
    }

    /// Attaches the correlation id of the call that failed.  Empty ids are
    /// ignored.
    pub fn with_correlation_id(mut self, correlation_id: Option<&str>) -> Self {
        if let Some(id) = correlation_id.filter(|id| !id.is_empty()) {
            self.correlation_id = Some(id.to_string());
        }
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status.as_u16();
        self
    }

    /// Adds one entry to `details`.
    pub fn with_details<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_cause<E: fmt::Display>(mut self, cause: E) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Returns `status` as an HTTP status code.  Values that aren't valid
    /// HTTP statuses are reported as 500.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Renders this error as an HTTP response with a JSON body.
    pub fn into_response(self, request_id: &str) -> hyper::Response<Body> {
        let status = self.status_code();
        let body = match serde_json::to_vec(&self) {
            Ok(body) => body,
            Err(error) => format!(
                "{{\"code\":\"INTERNAL\",\"status\":500,\"message\":{:?}}}",
                error.to_string()
            )
            .into_bytes(),
        };
        let mut response = hyper::Response::new(Body::with_content(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(CONTENT_TYPE_JSON),
        );
        if let Ok(value) = http::HeaderValue::from_str(request_id) {
            headers.insert(HEADER_REQUEST_ID, value);
        }
        response
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl Error for ApplicationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl From<hyper::Error> for ApplicationError {
    fn from(error: hyper::Error) -> Self {
        ApplicationError::bad_request(
            "BAD_REQUEST",
            format!("error processing request: {}", error),
        )
    }
}

impl From<http::Error> for ApplicationError {
    fn from(error: http::Error) -> Self {
        ApplicationError::internal(
            "INTERNAL",
            format!("error building response: {}", error),
        )
    }
}
