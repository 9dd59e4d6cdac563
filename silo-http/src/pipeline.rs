//! The request dispatch pipeline (spec §4.7).
//!
//! Grounded on `application.py`'s `ASGIApplication.__call__`/
//! `handle_exception`/`send_response`: parse the wire request, fire
//! `BeforeRequest`, special-case `/favicon.ico`, resolve the tenant from
//! headers, acquire a tenant-scoped db handle and install the ambient
//! context, dispatch to the first matching router, classify the outcome,
//! layer security headers and queued cookies onto the response, and fire
//! `AfterRequest`. [`Pipeline`] implements `hyper::service::Service`
//! directly rather than delegating to `axum::Router` — the stream provider
//! underneath it is `hyper` plus a `tokio::net::TcpListener`, not an Axum
//! app.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, Request as HttpRequest, Response as HttpResponse, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use serde_json::json;
use silo_core::{AppError, Context, ContextBuilder, TenantId};
use silo_data::Orm;
use silo_data_sqlx::{DbHandle, MigrationFile};
use silo_events::{Event, EventBus};
use tracing::{error, warn};

use crate::request::{Request, RequestParts};
use crate::response::Response;
use crate::router::Router;
use crate::secure_headers::SecureHeaders;

/// Everything the pipeline needs to dispatch one request, shared across
/// every connection `hyper` hands it.
pub struct Pipeline {
    routers: Vec<Router>,
    bus: EventBus,
    db: DbHandle,
    migrations: Vec<MigrationFile>,
    secure_headers: SecureHeaders,
    default_tenant: TenantId,
}

impl Pipeline {
    pub fn new(routers: Vec<Router>, bus: EventBus, db: DbHandle, migrations: Vec<MigrationFile>) -> Self {
        let duplicates = crate::router::find_duplicate_routes(&routers);
        for duplicate in &duplicates {
            warn!(route = %duplicate, "duplicate route registered");
        }
        Self {
            routers,
            bus,
            db,
            migrations,
            secure_headers: SecureHeaders::default(),
            default_tenant: TenantId::from("acme_corp"),
        }
    }

    pub fn with_secure_headers(mut self, headers: SecureHeaders) -> Self {
        self.secure_headers = headers;
        self
    }

    pub fn with_default_tenant(mut self, tenant: TenantId) -> Self {
        self.default_tenant = tenant;
        self
    }

    fn resolve_tenant(&self, parts: &RequestParts) -> TenantId {
        parts
            .subdomain_candidate()
            .map(TenantId::from)
            .unwrap_or_else(|| self.default_tenant.clone())
    }

    async fn acquire_namespace(&self, tenant: &TenantId) -> Result<(), AppError> {
        self.db
            .ensure_namespace(tenant.as_str())
            .await
            .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;
        for migration in &self.migrations {
            let public = tenant.is_public();
            self.db
                .apply_migration(tenant.as_str(), migration, public)
                .await
                .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;
        }
        Ok(())
    }

    async fn dispatch_request(&self, request: Request) -> (StatusCode, Response) {
        if request.path() == "/favicon.ico" {
            return (StatusCode::OK, Response::new(StatusCode::OK, HeaderValue::from_static("image/x-icon"), Bytes::new()));
        }

        let tenant = self.resolve_tenant(&request.parts);
        if let Err(err) = self.acquire_namespace(&tenant).await {
            return (err.status(), Response::from_app_error(&err));
        }

        let orm: Arc<dyn Orm> = Arc::new(self.db.scoped(tenant.as_str()));
        let frame = ContextBuilder::new(tenant)
            .with(orm)
            .with(request.clone())
            .with(self.bus.clone())
            .build();

        let outcome = Context::scope(frame, async {
            for router in &self.routers {
                if let Some((handler, params)) = router.resolve(request.method(), request.path()) {
                    return Some(handler(request.clone(), params).await);
                }
            }
            None
        })
        .await;

        match outcome {
            Some(Ok(response)) => (response.status, response),
            Some(Err(err)) => {
                self.report_failure(&err, &request).await;
                (err.status(), Response::from_app_error(&err))
            }
            None => {
                let err = AppError::ResourceNotFound(format!("no route matched {}", request.path()));
                (StatusCode::NOT_FOUND, Response::from_app_error(&err))
            }
        }
    }

    async fn report_failure(&self, err: &AppError, request: &Request) {
        if err.is_unhandled() {
            error!(error = %err, path = request.path(), "unhandled request failure");
            self.bus
                .dispatch_and_wait(Event::new(
                    "UnhandledException",
                    json!({
                        "path": request.path(),
                        "method": request.method().as_str(),
                        "exception": err.to_string(),
                    }),
                ))
                .await;
        }
    }

    /// Runs the full lifecycle in spec §4.7 over an already-parsed
    /// request, returning the wire-ready response. Exposed directly (not
    /// just through [`Service::call`]) so tests and `silo-test` helpers can
    /// drive the pipeline without going through `hyper`.
    pub async fn handle(&self, request: Request) -> HttpResponse<Full<Bytes>> {
        self.bus
            .dispatch_and_wait(Event::new(
                "BeforeRequest",
                json!({ "path": request.path(), "method": request.method().as_str() }),
            ))
            .await;

        let (status, response) = self.dispatch_request(request.clone()).await;

        let mut builder = HttpResponse::builder().status(status);
        {
            let headers = builder.headers_mut().expect("response builder always has headers");
            headers.insert(http::header::CONTENT_TYPE, response.content_type.clone());
            headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from(response.body.len()));
            headers.insert(http::header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
            for (name, value) in self.secure_headers.headers() {
                headers.insert(name.clone(), value.clone());
            }
            for cookie in request.queued_cookies() {
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    headers.append(http::header::SET_COOKIE, value);
                }
            }
        }

        let http_response = builder
            .body(Full::new(response.body))
            .unwrap_or_else(|_| HttpResponse::new(Full::new(Bytes::new())));

        self.bus
            .dispatch_and_wait(Event::new(
                "AfterRequest",
                json!({ "path": request.path(), "method": request.method().as_str() }),
            ))
            .await;

        http_response
    }
}

async fn handle_incoming(pipeline: Arc<Pipeline>, req: HttpRequest<Incoming>) -> HttpResponse<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body_bytes = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let query_string = parts.uri.query().unwrap_or("");
    let request_parts = RequestParts::from_wire(parts.method, parts.uri.path().to_string(), query_string, parts.headers);
    let request = Request::new(request_parts, body_bytes);
    pipeline.handle(request).await
}

impl Service<HttpRequest<Incoming>> for Arc<Pipeline> {
    type Response = HttpResponse<Full<Bytes>>;
    type Error = Infallible;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: HttpRequest<Incoming>) -> Self::Future {
        let pipeline = self.clone();
        Box::pin(async move { Ok(handle_incoming(pipeline, req).await) })
    }
}

/// Lets [`tower_http`] layers (compression, request tracing) wrap a
/// [`Pipeline`] the same way they'd wrap any other Tower service, since
/// the `hyper::service::Service` impl above isn't the trait those layers
/// target.
impl tower::Service<HttpRequest<Incoming>> for Arc<Pipeline> {
    type Response = HttpResponse<Full<Bytes>>;
    type Error = Infallible;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HttpRequest<Incoming>) -> Self::Future {
        let pipeline = self.clone();
        Box::pin(async move { Ok(handle_incoming(pipeline, req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response as HandlerResponse;
    use crate::router::ParamValue;
    use http::Method;
    use silo_data::EntityRegistry;
    use sqlx::any::AnyPoolOptions;

    async fn sqlite_db() -> DbHandle {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().connect("sqlite::memory:").await.unwrap();
        DbHandle::new(pool, silo_data::query::Dialect::Sqlite, Arc::new(EntityRegistry::new()))
    }

    fn request(method: Method, path: &str) -> Request {
        let parts = RequestParts::from_wire(method, path.to_string(), "", http::HeaderMap::new());
        Request::new(parts, Bytes::new())
    }

    #[tokio::test]
    async fn unmatched_route_returns_404() {
        let db = sqlite_db().await;
        let pipeline = Pipeline::new(Vec::new(), EventBus::new(), db, Vec::new());
        let response = pipeline.handle(request(Method::GET, "/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn favicon_short_circuits_before_routing() {
        let db = sqlite_db().await;
        let pipeline = Pipeline::new(Vec::new(), EventBus::new(), db, Vec::new());
        let response = pipeline.handle(request(Method::GET, "/favicon.ico")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn matched_route_runs_the_handler_with_security_headers() {
        let db = sqlite_db().await;
        let mut router = Router::new("ping", "/ping");
        router.get(
            "/",
            Arc::new(|_req, _params: crate::router::Params| {
                Box::pin(async { HandlerResponse::ok_json(&json!({ "ok": true })) })
            }),
        );
        let pipeline = Pipeline::new(vec![router], EventBus::new(), db, Vec::new());
        let response = pipeline.handle(request(Method::GET, "/ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-frame-options").is_some());
    }

    #[tokio::test]
    async fn int_param_handler_reads_the_typed_value() {
        let db = sqlite_db().await;
        let mut router = Router::new("items", "/items");
        router.get(
            "/{id:int}",
            Arc::new(|_req, params: crate::router::Params| {
                Box::pin(async move {
                    let id = params.get("id").and_then(ParamValue::as_int).unwrap();
                    HandlerResponse::ok_json(&json!({ "id": id }))
                })
            }),
        );
        let pipeline = Pipeline::new(vec![router], EventBus::new(), db, Vec::new());
        let response = pipeline.handle(request(Method::GET, "/items/7")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
