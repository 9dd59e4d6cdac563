use std::collections::BTreeMap;
use std::sync::Arc;

use http::Method;
use silo::prelude::*;
use silo::silo_data::SortOrder;

use crate::models::{CreateProjectRequest, Project, TenantProjectCount};

fn project_schema() -> EntitySchema {
    Project::schema()
}

/// Verifies the bearer token and returns its claims, or a 401.
async fn authenticate(req: &Request, oracle: &Arc<dyn TokenOracle>) -> Result<Claims, AppError> {
    let header = req
        .header("authorization")
        .ok_or_else(|| AppError::AuthenticationFailure("missing Authorization header".into()))?;
    let bearer = bearer_token(header).map_err(|err| AppError::AuthenticationFailure(err.to_string()))?;
    oracle.verify(bearer).await
}

/// The tenant this demo's tokens carry isn't part of `Principal` — it's a
/// custom claim, read straight off the raw JSON `Claims` wraps.
fn claimed_tenant(claims: &Claims) -> Option<&str> {
    claims.0.get("tenant_id").and_then(|v| v.as_str())
}

/// Requires the caller's `tenant_id` claim to match the namespace the
/// request resolved into, unless they hold the `super-admin` role — mirrors
/// the old per-path tenant check, but against the ambient tenant (spec §2)
/// rather than a path segment, since the namespace is now the boundary.
fn authorize_tenant_access(claims: &Claims) -> Result<(), AppError> {
    let principal = claims.to_principal();
    if principal.has_role("super-admin") {
        return Ok(());
    }
    let resolved = Context::tenant();
    match claimed_tenant(claims) {
        Some(claimed) if TenantId::from(claimed) == resolved => Ok(()),
        Some(claimed) => Err(AppError::PermissionDenied(format!(
            "token is scoped to tenant '{claimed}', not '{}'",
            resolved.as_str()
        ))),
        None => Err(AppError::AuthenticationFailure("token carries no tenant_id claim".into())),
    }
}

async fn list_projects(req: Request, _params: Params, oracle: Arc<dyn TokenOracle>) -> Result<Response, AppError> {
    let claims = authenticate(&req, &oracle).await?;
    authorize_tenant_access(&claims)?;

    let orm = Context::get::<Arc<dyn Orm>>();
    let query = Query::new().sort_by("created_at", SortOrder::Descending);
    let records = orm.fetch_many(&project_schema(), query).await.map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;

    let schema = project_schema();
    let body: Vec<_> = records.iter().map(|r| r.to_json(&schema, false)).collect();
    Response::ok_json(&serde_json::json!({ "projects": body }))
}

async fn create_project(req: Request, _params: Params, oracle: Arc<dyn TokenOracle>) -> Result<Response, AppError> {
    let claims = authenticate(&req, &oracle).await?;
    authorize_tenant_access(&claims)?;

    let payload: CreateProjectRequest = validate_request(req.method(), "", req.body_bytes())?;

    let orm = Context::get::<Arc<dyn Orm>>();
    let record = Record::new().with("name", Value::from(payload.name));
    let created = orm
        .insert(&project_schema(), record)
        .await
        .map_err(|err| match err {
            OrmError::UniqueViolation(detail) => AppError::duplicate(detail),
            other => AppError::ServiceUnavailable(other.to_string()),
        })?;

    let id = created.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let bus = Context::get::<EventBus>();
    silo::silo_data::audit::emit_audit_event::<Project>(
        &bus,
        silo::silo_data::audit::AuditPayload {
            tenant_id: Some(Context::tenant().to_string()),
            actor: Some(claims.to_principal().subject),
            action: silo::silo_data::audit::AuditAction::Created,
            table_name: Project::table_name().to_string(),
            record_id: id,
            detail: created.to_json(&project_schema(), true),
        },
    )
    .await;

    Response::created_json(&created.to_json(&project_schema(), false))
}

/// `GET /admin/tenants` — `super-admin`-only. Reconstructs a per-tenant
/// project count from the public audit trail rather than a cross-namespace
/// `GROUP BY`, since `Orm` only ever queries one tenant's namespace at a
/// time (spec §4.4).
async fn list_tenants(req: Request, _params: Params, oracle: Arc<dyn TokenOracle>, public_orm: Arc<dyn Orm>) -> Result<Response, AppError> {
    let claims = authenticate(&req, &oracle).await?;
    if !claims.to_principal().has_role("super-admin") {
        return Err(AppError::PermissionDenied("super-admin role required".into()));
    }

    let schema = silo::silo_data::audit::AuditLog::schema();
    let query = Query::new().filter(Filter::eq("table_name", "projects"));
    let entries = public_orm.fetch_many(&schema, query).await.map_err(|err| AppError::ServiceUnavailable(err.to_string()))?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in &entries {
        if let Some(tenant_id) = entry.get("tenant_id").and_then(Value::as_str) {
            *counts.entry(tenant_id.to_string()).or_default() += 1;
        }
    }

    let tenants: Vec<TenantProjectCount> = counts
        .into_iter()
        .map(|(tenant_id, project_count)| TenantProjectCount { tenant_id, project_count })
        .collect();
    Response::ok_json(&serde_json::json!({ "tenants": tenants }))
}

pub fn projects_router(oracle: Arc<dyn TokenOracle>) -> Router {
    let mut router = Router::new("projects", "/projects");
    let list_oracle = oracle.clone();
    router.get("/", Arc::new(move |req, params| Box::pin(list_projects(req, params, list_oracle.clone()))));
    router.post("/", Arc::new(move |req, params| Box::pin(create_project(req, params, oracle.clone()))));
    router
}

pub fn admin_router(oracle: Arc<dyn TokenOracle>, public_orm: Arc<dyn Orm>) -> Router {
    let mut router = Router::new("admin", "/admin");
    router.add_route(
        Method::GET,
        "/tenants",
        Arc::new(move |req, params| Box::pin(list_tenants(req, params, oracle.clone(), public_orm.clone()))),
    );
    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routers_register_the_expected_routes() {
        let oracle: Arc<dyn TokenOracle> = Arc::new(StaticTokenOracle::new(Default::default()));
        let projects = projects_router(oracle.clone());
        assert!(projects.resolve(&Method::GET, "/projects").is_some());
        assert!(projects.resolve(&Method::POST, "/projects").is_some());
    }
}
