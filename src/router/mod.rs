//! Request router
//!
//! Matches request paths against route templates (`/simple-return/:user`)
//! and hands back the handler together with its operation name and decoded
//! path parameters. Anything that does not match resolves to the fallback
//! handler, so every request still goes through the instrumentor.

use crate::telemetry::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Operation name of the fallback route
pub const NOT_FOUND_OPERATION: &str = "not_found";

/// Route template reported for unmatched requests
pub const NOT_FOUND_TEMPLATE: &str = "/*";

/// Handler failures, surfaced to the client unchanged
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HandlerError::NotFound(_) => StatusCode::NOT_FOUND,
            HandlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status();
        Reply::text(self.to_string())
            .with_status(status)
            .into_response()
    }
}

/// Successful handler output
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/plain; charset=utf-8",
            body: Bytes::from(body.into()),
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| HandlerError::Internal(format!("Failed to encode response: {}", e)))?;
        Ok(Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body: Bytes::from(body),
        })
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        response
    }
}

/// A route handler.
///
/// Receives a [`RequestContext`] carrying the active request span and the
/// decoded path parameters.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, cx: RequestContext) -> Result<Reply, HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply, HandlerError>> + Send + 'static,
{
    async fn call(&self, cx: RequestContext) -> Result<Reply, HandlerError> {
        (self)(cx).await
    }
}

/// Decoded path parameters, in template order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(&'static str, String)>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(key, value)| (*key, value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(&'static str, String)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (&'static str, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(&'static str),
    Param(&'static str),
}

struct Route {
    method: Method,
    operation: &'static str,
    template: &'static str,
    segments: Vec<Segment>,
    handler: Arc<dyn Handler>,
}

impl Route {
    fn matches(&self, method: &Method, path: &[&str]) -> Option<PathParams> {
        if *method != self.method || path.len() != self.segments.len() {
            return None;
        }

        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    let value = percent_decode_str(part).decode_utf8_lossy().into_owned();
                    params.push((*name, value));
                }
            }
        }
        Some(PathParams(params))
    }
}

/// Result of resolving a request against the routing table
pub struct RouteMatch<'a> {
    pub operation: &'static str,
    pub template: &'static str,
    pub params: PathParams,
    pub handler: &'a dyn Handler,
}

/// Routing table, matched in registration order
pub struct Router {
    routes: Vec<Route>,
    fallback: Arc<dyn Handler>,
}

impl Router {
    /// Create an empty router whose fallback answers 404
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: Arc::new(not_found),
        }
    }

    /// Register a GET route
    pub fn get<H>(self, template: &'static str, operation: &'static str, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.route(Method::GET, template, operation, handler)
    }

    /// Register a route for `method`
    pub fn route<H>(
        mut self,
        method: Method,
        template: &'static str,
        operation: &'static str,
        handler: H,
    ) -> Self
    where
        H: Handler + 'static,
    {
        self.routes.push(Route {
            method,
            operation,
            template,
            segments: parse_template(template),
            handler: Arc::new(handler),
        });
        self
    }

    /// Replace the handler used when nothing matches
    pub fn fallback<H>(mut self, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.fallback = Arc::new(handler);
        self
    }

    /// Resolve a request; unmatched requests resolve to the fallback
    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let parts = split_path(path);
        for route in &self.routes {
            if let Some(params) = route.matches(method, &parts) {
                return RouteMatch {
                    operation: route.operation,
                    template: route.template,
                    params,
                    handler: route.handler.as_ref(),
                };
            }
        }

        RouteMatch {
            operation: NOT_FOUND_OPERATION,
            template: NOT_FOUND_TEMPLATE,
            params: PathParams::default(),
            handler: self.fallback.as_ref(),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_template(template: &'static str) -> Vec<Segment> {
    split_path(template)
        .into_iter()
        .map(|part| match part.strip_prefix(':') {
            Some(name) => Segment::Param(name),
            None => Segment::Literal(part),
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

async fn not_found(_cx: RequestContext) -> Result<Reply, HandlerError> {
    Err(HandlerError::NotFound("Not Found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(_cx: RequestContext) -> Result<Reply, HandlerError> {
        Ok(Reply::text("ok"))
    }

    fn router() -> Router {
        Router::new()
            .get("/", "root", ok)
            .get("/:user", "user", ok)
            .get("/simple-return/:user", "simple", ok)
            .get("/simple-return/nested/:user", "nested", ok)
    }

    #[test]
    fn test_parse_template() {
        assert_eq!(parse_template("/"), vec![]);
        assert_eq!(
            parse_template("/simple-return/:user"),
            vec![Segment::Literal("simple-return"), Segment::Param("user")]
        );
    }

    #[test]
    fn test_resolve_root() {
        let router = router();
        let matched = router.resolve(&Method::GET, "/");
        assert_eq!(matched.operation, "root");
        assert!(matched.params.is_empty());
    }

    #[test]
    fn test_resolve_params() {
        let router = router();

        let matched = router.resolve(&Method::GET, "/alice");
        assert_eq!(matched.operation, "user");
        assert_eq!(matched.params.get("user"), Some("alice"));

        let matched = router.resolve(&Method::GET, "/simple-return/bob");
        assert_eq!(matched.operation, "simple");
        assert_eq!(matched.template, "/simple-return/:user");
        assert_eq!(matched.params.get("user"), Some("bob"));

        let matched = router.resolve(&Method::GET, "/simple-return/nested/carol");
        assert_eq!(matched.operation, "nested");
        assert_eq!(matched.params.get("user"), Some("carol"));
    }

    #[test]
    fn test_resolve_percent_decodes() {
        let router = router();
        let matched = router.resolve(&Method::GET, "/J%C3%BCrgen%20M");
        assert_eq!(matched.params.get("user"), Some("Jürgen M"));
    }

    #[test]
    fn test_resolve_fallback() {
        let router = router();

        let matched = router.resolve(&Method::GET, "/a/b/c/d");
        assert_eq!(matched.operation, NOT_FOUND_OPERATION);
        assert_eq!(matched.template, NOT_FOUND_TEMPLATE);

        let matched = router.resolve(&Method::POST, "/alice");
        assert_eq!(matched.operation, NOT_FOUND_OPERATION);
    }

    #[test]
    fn test_handler_error_response() {
        let response = HandlerError::BadRequest("bad name".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_reply_json() {
        #[derive(Serialize)]
        struct Body {
            id: u32,
        }
        let reply = Reply::json(&Body { id: 1 }).unwrap();
        assert_eq!(reply.content_type, "application/json");
        assert_eq!(reply.body, Bytes::from_static(br#"{"id":1}"#));
    }
}
