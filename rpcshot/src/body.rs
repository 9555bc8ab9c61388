// Copyright 2025 Oxide Computer Company

//! Response body shared by handlers, error rendering and the CORS layer.
//! Request bodies are buffered into `Bytes` before dispatch and never use
//! this type.

use crate::error::ApplicationError;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::Body as HttpBody;
use hyper::body::Bytes;
use hyper::body::Frame;
use hyper::body::SizeHint;
use serde::Serialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub struct Body(BoxBody<Bytes, BoxError>);

fn never(never: Infallible) -> BoxError {
    match never {}
}

impl Body {
    /// A body with no content, as sent with 204 responses.
    pub fn empty() -> Self {
        Body(http_body_util::Empty::new().map_err(never).boxed())
    }

    pub fn with_content(content: impl Into<Bytes>) -> Self {
        Body(Full::new(content.into()).map_err(never).boxed())
    }

    /// Serializes `value` as JSON.  A value that can't be serialized is an
    /// internal error of the handler that produced it.
    pub fn json<T: Serialize + ?Sized>(
        value: &T,
    ) -> Result<Self, ApplicationError> {
        let content = serde_json::to_vec(value).map_err(|error| {
            ApplicationError::internal(
                "SERIALIZATION_ERROR",
                "failed to serialize result as JSON",
            )
            .with_cause(error)
        })?;
        Ok(Body::with_content(content))
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::with_content(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::with_content(text)
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}
