// Copyright 2025 Oxide Computer Company

//! Route table shared by every service registered on an endpoint.
//!
//! Routes are keyed by method and a path template such as
//! `"/api/v1/dummies/{dummy_id}"`.  A `{name}` segment matches exactly one
//! path segment and binds it as a path parameter.  Fixed segments take
//! precedence over a parameter at the same position, and lookup falls back to
//! the parameter when the fixed branch doesn't lead anywhere, so
//! `"/dummies/check/correlation_id"` can live next to `"/dummies/{dummy_id}"`.
//!
//! The table is filled during an endpoint's registration pass and is
//! read-only while the endpoint serves.

use crate::error::ApplicationError;
use crate::handler::RouteHandler;
use http::Method;
use http::StatusCode;
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Path parameters bound by a lookup, by name.
pub type PathParams = BTreeMap<String, String>;

/// Reasons a route template is rejected.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RouteError {
    #[error("route \"{route}\": segment \"{segment}\" is not a valid parameter")]
    MalformedParam { route: String, segment: String },
    #[error("route \"{route}\": parameter name is empty")]
    EmptyParam { route: String },
    #[error("route \"{route}\": parameter \"{name}\" appears twice")]
    RepeatedParam { route: String, name: String },
    #[error(
        "route \"{route}\": parameter \"{name}\" conflicts with \"{existing}\" \
         registered at the same position"
    )]
    ConflictingParam { route: String, name: String, existing: String },
    #[error("route \"{route}\" is already registered for {method}")]
    DuplicateRoute { route: String, method: String },
}

impl From<RouteError> for ApplicationError {
    fn from(error: RouteError) -> Self {
        ApplicationError::config("INVALID_ROUTE", error.to_string())
    }
}

#[derive(Debug, PartialEq)]
enum TemplateSegment<'a> {
    Fixed(&'a str),
    Param(&'a str),
}

fn parse_template(route: &str) -> Result<Vec<TemplateSegment<'_>>, RouteError> {
    let mut seen = Vec::new();
    let mut segments = Vec::new();
    for segment in route.split('/').filter(|s| !s.is_empty()) {
        let opens = segment.starts_with('{');
        let closes = segment.ends_with('}');
        if !opens && !closes {
            segments.push(TemplateSegment::Fixed(segment));
            continue;
        }
        if !(opens && closes) || segment.len() < 2 {
            return Err(RouteError::MalformedParam {
                route: route.to_string(),
                segment: segment.to_string(),
            });
        }
        let name = &segment[1..segment.len() - 1];
        if name.is_empty() {
            return Err(RouteError::EmptyParam { route: route.to_string() });
        }
        if seen.contains(&name) {
            return Err(RouteError::RepeatedParam {
                route: route.to_string(),
                name: name.to_string(),
            });
        }
        seen.push(name);
        segments.push(TemplateSegment::Param(name));
    }
    Ok(segments)
}

/// Splits a request path into percent-decoded segments.  Empty segments are
/// skipped; `.` and `..` are refused.
fn decode_path(path: &str) -> Result<Vec<String>, ApplicationError> {
    let invalid = |message: String| {
        ApplicationError::bad_request(
            "BAD_REQUEST",
            format!("invalid path {}: {}", path, message),
        )
    };
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if segment == "." || segment == ".." {
                return Err(invalid("relative segments are not allowed".into()));
            }
            percent_decode_str(segment)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|e| invalid(e.to_string()))
        })
        .collect()
}

#[derive(Debug, Default)]
struct RouteNode {
    handlers: BTreeMap<String, Arc<dyn RouteHandler>>,
    fixed: BTreeMap<String, RouteNode>,
    param: Option<(String, Box<RouteNode>)>,
}

enum Lookup<'a> {
    Matched(&'a Arc<dyn RouteHandler>),
    /// the path exists, but not for this method
    OtherMethods,
    Missing,
}

impl RouteNode {
    fn find<'a>(
        &'a self,
        segments: &[String],
        method: &str,
        params: &mut PathParams,
    ) -> Lookup<'a> {
        let Some((head, tail)) = segments.split_first() else {
            return match self.handlers.get(method) {
                Some(handler) => Lookup::Matched(handler),
                None if self.handlers.is_empty() => Lookup::Missing,
                None => Lookup::OtherMethods,
            };
        };

        let mut best = Lookup::Missing;
        if let Some(child) = self.fixed.get(head) {
            match child.find(tail, method, params) {
                Lookup::Matched(handler) => return Lookup::Matched(handler),
                other => best = other,
            }
        }
        if let Some((name, child)) = &self.param {
            params.insert(name.clone(), head.clone());
            match child.find(tail, method, params) {
                Lookup::Matched(handler) => return Lookup::Matched(handler),
                Lookup::OtherMethods => best = Lookup::OtherMethods,
                Lookup::Missing => {}
            }
            params.remove(name);
        }
        best
    }
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch {
    pub handler: Arc<dyn RouteHandler>,
    pub path_params: PathParams,
}

/// Method and path template to handler mapping used by an endpoint.
#[derive(Debug, Default)]
pub struct RouteTable {
    root: RouteNode,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable::default()
    }

    /// Adds `handler` for `method` on the path template `route`.
    pub fn insert(
        &mut self,
        method: &Method,
        route: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), RouteError> {
        let mut node = &mut self.root;
        for segment in parse_template(route)? {
            node = match segment {
                TemplateSegment::Fixed(text) => {
                    node.fixed.entry(text.to_string()).or_default()
                }
                TemplateSegment::Param(name) => {
                    let (existing, child) = node
                        .param
                        .get_or_insert_with(|| (name.to_string(), Box::default()));
                    if existing.as_str() != name {
                        return Err(RouteError::ConflictingParam {
                            route: route.to_string(),
                            name: name.to_string(),
                            existing: existing.clone(),
                        });
                    }
                    child.as_mut()
                }
            };
        }

        let method = method.as_str().to_uppercase();
        if node.handlers.contains_key(&method) {
            return Err(RouteError::DuplicateRoute {
                route: route.to_string(),
                method,
            });
        }
        node.handlers.insert(method, handler);
        Ok(())
    }

    /// Finds the handler for a request.  Fails with 400 for a malformed path,
    /// 405 when only other methods are registered for the path, and 404
    /// otherwise.
    pub fn find(
        &self,
        method: &Method,
        path: &str,
    ) -> Result<RouteMatch, ApplicationError> {
        let segments = decode_path(path)?;
        let mut path_params = PathParams::new();
        let method_name = method.as_str().to_uppercase();
        match self.root.find(&segments, &method_name, &mut path_params) {
            Lookup::Matched(handler) => Ok(RouteMatch {
                handler: Arc::clone(handler),
                path_params,
            }),
            Lookup::OtherMethods => Err(ApplicationError::bad_request(
                "METHOD_NOT_ALLOWED",
                format!("method {} is not supported for {}", method, path),
            )
            .with_status(StatusCode::METHOD_NOT_ALLOWED)),
            Lookup::Missing => Err(ApplicationError::not_found(
                "NOT_FOUND",
                format!("no route for {} {}", method, path),
            )),
        }
    }
}
