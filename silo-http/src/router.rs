//! The custom router and pattern matcher (spec §4.6).
//!
//! Grounded on `application.py`'s `Router`/`Route.match`: a router owns a
//! prefix and an ordered list of routes; a route is `(method, template,
//! handler)` where `template` segments of the form `{name:type}` bind a
//! path parameter. Deliberately not `axum::Router` — this crate carries no
//! web framework dependency at all, so this is plain data built directly on
//! `http::Method` and the request/response types in this crate.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::Method;
use silo_core::AppError;

use crate::request::Request;
use crate::response::Response;

/// One bound path parameter's value, typed per its template declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(n) => Some(*n),
            ParamValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ParamValue::Int(_) => panic!("route parameter is an int, not a str"),
            ParamValue::Str(s) => s,
        }
    }
}

/// Resolved path parameters, keyed by the name bound in the route template.
pub type Params = HashMap<String, ParamValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    Int,
    Str,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Static(String),
    Param { name: String, ty: ParamType },
}

fn parse_segment(raw: &str) -> Segment {
    if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        if let Some((name, ty)) = inner.split_once(':') {
            let ty = match ty {
                "int" => ParamType::Int,
                _ => ParamType::Str,
            };
            return Segment::Param {
                name: name.to_string(),
                ty,
            };
        }
    }
    Segment::Static(raw.to_string())
}

/// Normalises a path to start with `/` and not end with one, except the
/// root path itself (spec §4.6 resolution rule).
fn canonicalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    let canonical = path.trim_start_matches('/');
    if canonical.is_empty() {
        Vec::new()
    } else {
        canonical.split('/').collect()
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send>>;
pub type Handler = Arc<dyn Fn(Request, Params) -> HandlerFuture + Send + Sync>;

/// One registered route: a method, a parsed template, and its handler.
pub struct Route {
    pub method: Method,
    pub template: String,
    segments: Vec<Segment>,
    pub handler: Handler,
}

impl Route {
    fn new(method: Method, template: String, handler: Handler) -> Self {
        let segments = split_segments(&template).into_iter().map(parse_segment).collect();
        Self {
            method,
            template,
            segments,
            handler,
        }
    }

    /// Matches a canonicalized request path against this route's template,
    /// per spec §4.6: segment counts must agree; a parameter segment
    /// decodes the path part per its declared type (a failed `int` parse is
    /// a non-match, not an error); static segments must be byte-equal.
    fn match_path(&self, path: &str) -> Option<Params> {
        let path_segments = split_segments(path);
        if path_segments.len() != self.segments.len() {
            return None;
        }
        let mut params = Params::new();
        for (segment, part) in self.segments.iter().zip(path_segments.iter()) {
            match segment {
                Segment::Static(expected) => {
                    if expected != part {
                        return None;
                    }
                }
                Segment::Param { name, ty } => match ty {
                    ParamType::Int => {
                        let value: i64 = part.parse().ok()?;
                        params.insert(name.clone(), ParamValue::Int(value));
                    }
                    ParamType::Str => {
                        params.insert(name.clone(), ParamValue::Str((*part).to_string()));
                    }
                },
            }
        }
        Some(params)
    }
}

/// A named group of routes sharing one path prefix (spec §4.6).
pub struct Router {
    pub name: String,
    prefix: String,
    routes: Vec<Route>,
}

impl Router {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            routes: Vec::new(),
        }
    }

    fn full_path(&self, path: &str) -> String {
        let trimmed = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            canonicalize(trimmed)
        } else {
            canonicalize(&format!("{}/{}", self.prefix, trimmed))
        }
    }

    pub fn add_route(&mut self, method: Method, path: &str, handler: Handler) {
        let full_path = self.full_path(path);
        self.routes.push(Route::new(method, full_path, handler));
    }

    pub fn get(&mut self, path: &str, handler: Handler) {
        self.add_route(Method::GET, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: Handler) {
        self.add_route(Method::POST, path, handler);
    }

    pub fn patch(&mut self, path: &str, handler: Handler) {
        self.add_route(Method::PATCH, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: Handler) {
        self.add_route(Method::DELETE, path, handler);
    }

    /// Merges another router's routes into this one, re-prefixing each
    /// template with this router's own prefix (spec §4.6, matching
    /// `Router.include_router`).
    pub fn include_router(&mut self, other: Router) {
        for route in other.routes {
            let full_path = self.full_path(&route.template);
            self.routes.push(Route {
                method: route.method,
                segments: split_segments(&full_path).into_iter().map(parse_segment).collect(),
                template: full_path,
                handler: route.handler,
            });
        }
    }

    /// First-match-wins resolution within this router (spec §4.6).
    pub fn resolve(&self, method: &Method, path: &str) -> Option<(Handler, Params)> {
        let path = canonicalize(path);
        for route in &self.routes {
            if route.method != *method {
                continue;
            }
            if let Some(params) = route.match_path(&path) {
                return Some((route.handler.clone(), params));
            }
        }
        None
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// Detects duplicate `(method, canonical path)` pairs across an ordered set
/// of routers, logged (not rejected) at startup per spec §4.6.
pub fn find_duplicate_routes(routers: &[Router]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut duplicates = Vec::new();
    for router in routers {
        for route in &router.routes {
            let key = (route.method.clone(), route.template.clone());
            if !seen.insert(key) {
                duplicates.push(format!("{} {}", route.method, route.template));
            }
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    fn noop_handler() -> Handler {
        Arc::new(|_req, _params| Box::pin(async { Response::no_content().pipe_ok() }))
    }

    trait PipeOk {
        fn pipe_ok(self) -> Result<Response, AppError>;
    }
    impl PipeOk for Response {
        fn pipe_ok(self) -> Result<Response, AppError> {
            Ok(self)
        }
    }

    #[test]
    fn resolves_static_routes_by_method_and_path() {
        let mut router = Router::new("users", "/users");
        router.get("/", noop_handler());
        assert!(router.resolve(&Method::GET, "/users").is_some());
        assert!(router.resolve(&Method::POST, "/users").is_none());
        assert!(router.resolve(&Method::GET, "/other").is_none());
    }

    #[test]
    fn typed_int_parameter_rejects_non_numeric_segments() {
        let mut router = Router::new("users", "/users");
        router.get("/{id:int}", noop_handler());
        let (_, params) = router.resolve(&Method::GET, "/users/42").unwrap();
        assert_eq!(params.get("id"), Some(&ParamValue::Int(42)));
        assert!(router.resolve(&Method::GET, "/users/not-a-number").is_none());
    }

    #[test]
    fn str_parameter_accepts_any_segment() {
        let mut router = Router::new("pages", "/pages");
        router.get("/{slug:str}", noop_handler());
        let (_, params) = router.resolve(&Method::GET, "/pages/hello-world").unwrap();
        assert_eq!(params.get("slug"), Some(&ParamValue::Str("hello-world".to_string())));
    }

    #[test]
    fn root_template_matches_only_root() {
        let mut router = Router::new("root", "");
        router.get("/", noop_handler());
        assert!(router.resolve(&Method::GET, "/").is_some());
        assert!(router.resolve(&Method::GET, "/anything").is_none());
    }

    #[test]
    fn first_match_wins_within_a_router() {
        let mut router = Router::new("things", "/things");
        router.get("/{id:str}", noop_handler());
        router.get("/special", noop_handler());
        let (_, params) = router.resolve(&Method::GET, "/things/special").unwrap();
        assert_eq!(params.get("id"), Some(&ParamValue::Str("special".to_string())));
    }

    #[test]
    fn include_router_reprefixes_routes() {
        let mut inner = Router::new("v1", "");
        inner.get("/ping", noop_handler());
        let mut outer = Router::new("api", "/api");
        outer.include_router(inner);
        assert!(outer.resolve(&Method::GET, "/api/ping").is_some());
    }

    #[test]
    fn find_duplicate_routes_detects_same_method_and_path() {
        let mut a = Router::new("a", "/x");
        a.get("/", noop_handler());
        let mut b = Router::new("b", "/x");
        b.get("/", noop_handler());
        let duplicates = find_duplicate_routes(&[a, b]);
        assert_eq!(duplicates, vec!["GET /x".to_string()]);
    }
}
