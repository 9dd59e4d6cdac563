//! In-process HTTP test client (spec §4.7).
//!
//! Calls [`Pipeline::handle`] directly rather than driving a `tower::oneshot`
//! call over an `axum::Router` — the same choice `silo-http` itself makes by
//! not being an Axum adapter. `Pipeline::handle` already takes a fully
//! parsed [`Request`] and returns a wire-ready `http::Response`, so there's
//! no `hyper`/TCP listener to stand up for a test: this client builds the
//! `Request` by hand and reads the response straight back.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use silo_http::pipeline::Pipeline;
use silo_http::request::{Request, RequestParts};

/// In-process HTTP test client wrapping a [`Pipeline`].
pub struct TestApp {
    pipeline: Arc<Pipeline>,
}

impl TestApp {
    /// Create a `TestApp` from an assembled [`Pipeline`].
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Send an arbitrary request, method/path/headers/body all caller-chosen.
    pub async fn send(&self, method: Method, path: &str, headers: HeaderMap, body: Bytes) -> TestResponse {
        let (path, query) = split_query(path);
        let parts = RequestParts::from_wire(method, path, query, headers);
        let request = Request::new(parts, body);
        TestResponse::from_wire(self.pipeline.handle(request).await).await
    }

    /// Send a GET request to the given path.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Method::GET, path, HeaderMap::new(), Bytes::new()).await
    }

    /// Send a GET request with a Bearer token.
    pub async fn get_authenticated(&self, path: &str, token: &str) -> TestResponse {
        self.send(Method::GET, path, bearer_headers(token), Bytes::new()).await
    }

    /// Send a POST request with a JSON body.
    pub async fn post_json(&self, path: &str, body: &impl serde::Serialize) -> TestResponse {
        self.send(Method::POST, path, json_headers(None), json_bytes(body)).await
    }

    /// Send a POST request with a JSON body and a Bearer token.
    pub async fn post_json_authenticated(
        &self,
        path: &str,
        body: &impl serde::Serialize,
        token: &str,
    ) -> TestResponse {
        self.send(Method::POST, path, json_headers(Some(token)), json_bytes(body)).await
    }

    /// Send a PUT request with a JSON body and a Bearer token.
    pub async fn put_json_authenticated(
        &self,
        path: &str,
        body: &impl serde::Serialize,
        token: &str,
    ) -> TestResponse {
        self.send(Method::PUT, path, json_headers(Some(token)), json_bytes(body)).await
    }

    /// Send a DELETE request with a Bearer token.
    pub async fn delete_authenticated(&self, path: &str, token: &str) -> TestResponse {
        self.send(Method::DELETE, path, bearer_headers(token), Bytes::new()).await
    }
}

fn bearer_headers(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("bearer token is a valid header value"),
    );
    headers
}

fn json_headers(token: Option<&str>) -> HeaderMap {
    let mut headers = token.map(bearer_headers).unwrap_or_default();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn json_bytes(body: &impl serde::Serialize) -> Bytes {
    Bytes::from(serde_json::to_vec(body).expect("response body serializes to JSON"))
}

/// Splits a `path?query` string the way a real URI would, since
/// `RequestParts::from_wire` takes the two separately.
fn split_query(path: &str) -> (String, &str) {
    match path.split_once('?') {
        Some((path, query)) => (path.to_string(), query),
        None => (path.to_string(), ""),
    }
}

/// Response wrapper with assertion helpers.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    async fn from_wire(response: http::Response<http_body_util::Full<Bytes>>) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Full body never fails to collect")
            .to_bytes();
        Self { status, headers, body }
    }

    /// Assert status is 200 OK. Returns `self` for chaining.
    pub fn assert_ok(self) -> Self {
        assert_eq!(self.status, StatusCode::OK, "Expected 200 OK, got {}", self.status);
        self
    }

    /// Assert status is 201 Created. Returns `self` for chaining.
    pub fn assert_created(self) -> Self {
        assert_eq!(self.status, StatusCode::CREATED, "Expected 201 Created, got {}", self.status);
        self
    }

    /// Assert status is 400 Bad Request.
    pub fn assert_bad_request(self) -> Self {
        assert_eq!(self.status, StatusCode::BAD_REQUEST, "Expected 400 Bad Request, got {}", self.status);
        self
    }

    /// Assert status is 401 Unauthorized.
    pub fn assert_unauthorized(self) -> Self {
        assert_eq!(self.status, StatusCode::UNAUTHORIZED, "Expected 401 Unauthorized, got {}", self.status);
        self
    }

    /// Assert status is 403 Forbidden.
    pub fn assert_forbidden(self) -> Self {
        assert_eq!(self.status, StatusCode::FORBIDDEN, "Expected 403 Forbidden, got {}", self.status);
        self
    }

    /// Assert status is 404 Not Found.
    pub fn assert_not_found(self) -> Self {
        assert_eq!(self.status, StatusCode::NOT_FOUND, "Expected 404 Not Found, got {}", self.status);
        self
    }

    /// Assert the response has a specific status code.
    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(self.status, expected, "Expected {expected}, got {}", self.status);
        self
    }

    /// Read a response header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserialize the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|e| panic!("Failed to parse JSON: {e}\nBody: {}", self.text()))
    }

    /// Return the response body as a UTF-8 string.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use silo_data::EntityRegistry;
    use silo_data_sqlx::DbHandle;
    use silo_events::EventBus;
    use std::sync::Arc as StdArc;

    async fn sqlite_db() -> DbHandle {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DbHandle::new(pool, silo_data::query::Dialect::Sqlite, StdArc::new(EntityRegistry::new()))
    }

    fn ping_router() -> silo_http::router::Router {
        let mut router = silo_http::router::Router::new("ping", "/ping");
        router.get(
            "/",
            StdArc::new(|_req, _params| Box::pin(async { silo_http::response::Response::ok_json(&json!({ "ok": true })) })),
        );
        router
    }

    #[tokio::test]
    async fn get_dispatches_through_the_real_pipeline() {
        let db = sqlite_db().await;
        let pipeline = Pipeline::new(vec![ping_router()], EventBus::new(), db, Vec::new());
        let app = TestApp::new(pipeline);
        let response = app.get("/ping").await.assert_ok();
        assert_eq!(response.json::<serde_json::Value>(), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn unmatched_routes_surface_as_404() {
        let db = sqlite_db().await;
        let pipeline = Pipeline::new(Vec::new(), EventBus::new(), db, Vec::new());
        let app = TestApp::new(pipeline);
        app.get("/nope").await.assert_not_found();
    }

    #[tokio::test]
    async fn authenticated_helpers_attach_a_bearer_header() {
        let db = sqlite_db().await;
        let mut router = silo_http::router::Router::new("whoami", "/whoami");
        router.get(
            "/",
            StdArc::new(|req, _params| {
                Box::pin(async move {
                    let header = req.header("authorization").unwrap_or_default().to_string();
                    silo_http::response::Response::ok_json(&json!({ "authorization": header }))
                })
            }),
        );
        let pipeline = Pipeline::new(vec![router], EventBus::new(), db, Vec::new());
        let app = TestApp::new(pipeline);
        let response = app.get_authenticated("/whoami", "abc123").await.assert_ok();
        assert_eq!(response.json::<serde_json::Value>()["authorization"], json!("Bearer abc123"));
    }
}
