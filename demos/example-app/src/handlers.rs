use std::sync::Arc;

use http::Method;
use silo::prelude::*;
use silo::silo_data::SortOrder;

use crate::models::{CreateWidgetRequest, Widget, WidgetCreated};

fn widget_schema() -> EntitySchema {
    Widget::schema()
}

async fn list_widgets(req: Request, _params: Params) -> Result<Response, AppError> {
    let orm = Context::get::<Arc<dyn Orm>>();
    let limit: u32 = req.query_param("limit").and_then(|v| v.parse().ok()).unwrap_or(20);
    let offset: u32 = req.query_param("offset").and_then(|v| v.parse().ok()).unwrap_or(0);

    let query = Query::new().sort_by("created_at", SortOrder::Descending).limit(limit).offset(offset);
    let records = orm.fetch_many(&widget_schema(), query).await.map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;

    let schema = widget_schema();
    let body: Vec<_> = records.iter().map(|r| r.to_json(&schema, false)).collect();
    Response::ok_json(&serde_json::json!({ "widgets": body }))
}

async fn get_widget(_req: Request, params: Params) -> Result<Response, AppError> {
    let orm = Context::get::<Arc<dyn Orm>>();
    let id = params.get("id").map(ParamValue::as_str).unwrap_or_default().to_string();

    let record = orm
        .fetch(&widget_schema(), &Value::Text(id.clone()))
        .await
        .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?
        .ok_or_else(|| AppError::not_found(format!("widget {id}")))?;

    Response::ok_json(&record.to_json(&widget_schema(), false))
}

async fn create_widget(req: Request, _params: Params) -> Result<Response, AppError> {
    let payload: CreateWidgetRequest = validate_request(req.method(), "", req.body_bytes())?;

    let orm = Context::get::<Arc<dyn Orm>>();
    let record = Record::new()
        .with("sku", Value::from(payload.sku.clone()))
        .with("name", Value::from(payload.name.clone()))
        .with("cost_cents", Value::from(payload.cost_cents));

    let created = orm
        .insert(&widget_schema(), record)
        .await
        .map_err(|err| match err {
            OrmError::UniqueViolation(detail) => AppError::duplicate(detail),
            other => AppError::ServiceUnavailable(other.to_string()),
        })?;

    let id = created.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let bus = Context::get::<EventBus>();
    bus.dispatch(silo::silo_events::Event::from_payload(
        "WidgetCreated",
        &WidgetCreated { id: id.clone(), sku: payload.sku },
    )?)
    .await;

    silo::silo_data::audit::emit_audit_event::<Widget>(
        &bus,
        silo::silo_data::audit::AuditPayload {
            tenant_id: Some(Context::tenant().to_string()),
            actor: None,
            action: silo::silo_data::audit::AuditAction::Created,
            table_name: Widget::table_name().to_string(),
            record_id: id,
            detail: created.to_json(&widget_schema(), true),
        },
    )
    .await;

    Response::created_json(&created.to_json(&widget_schema(), false))
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

/// The one route that needs an authenticated caller — everything else in
/// this demo is deliberately open so it's easy to curl.
async fn whoami(req: Request, _params: Params, oracle: Arc<dyn TokenOracle>) -> Result<Response, AppError> {
    let header = req.header("authorization").ok_or_else(|| AppError::AuthenticationFailure("missing Authorization header".into()))?;
    let bearer = bearer_token(header).map_err(|err| AppError::AuthenticationFailure(err.to_string()))?;
    let claims = oracle.verify(bearer).await?;
    let principal = claims.to_principal();
    Response::ok_json(&serde_json::json!({
        "subject": principal.subject,
        "roles": principal.roles,
    }))
}

/// Builds the `/widgets` router. `oracle` is closed over by the one
/// auth-gated route rather than pulled from the ambient context — the
/// pipeline installs the tenant's db handle, the request, and the event bus
/// into [`Context`] (spec §4.1), but not a token oracle, since verifying
/// bearer tokens is a per-route concern, not every request's.
pub fn widgets_router(oracle: Arc<dyn TokenOracle>) -> Router {
    let mut router = Router::new("widgets", "/widgets");
    router.get("/", Arc::new(|req, params| Box::pin(list_widgets(req, params))));
    router.post("/", Arc::new(|req, params| Box::pin(create_widget(req, params))));

    // Registered before the `{id:str}` catch-all — route order matters,
    // since the router takes the first matching template (spec §4.6).
    let whoami_oracle = oracle.clone();
    router.add_route(
        Method::GET,
        "/me",
        Arc::new(move |req, params| {
            let oracle = whoami_oracle.clone();
            Box::pin(whoami(req, params, oracle))
        }),
    );
    router.get("/{id:str}", Arc::new(|req, params| Box::pin(get_widget(req, params))));
    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widgets_router_registers_the_expected_routes() {
        let oracle: Arc<dyn TokenOracle> = Arc::new(StaticTokenOracle::new(Default::default()));
        let router = widgets_router(oracle);
        assert!(router.resolve(&Method::GET, "/widgets").is_some());
        assert!(router.resolve(&Method::POST, "/widgets").is_some());
        assert!(router.resolve(&Method::GET, "/widgets/abc").is_some());

        let (_, me_params) = router.resolve(&Method::GET, "/widgets/me").unwrap();
        assert!(me_params.get("id").is_none());

        let (_, id_params) = router.resolve(&Method::GET, "/widgets/abc").unwrap();
        assert_eq!(id_params.get("id"), Some(&ParamValue::Str("abc".to_string())));
    }
}
