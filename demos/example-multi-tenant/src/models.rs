use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use silo::Entity;

/// Tenant-scoped: lives in each tenant's own namespace, so there's no
/// `tenant_id` column here the way a shared-table design would need — the
/// namespace the request resolved into (spec §2) is the tenant boundary.
#[derive(Debug, Clone, Serialize, Deserialize, Entity)]
#[entity(table = "projects")]
pub struct Project {
    #[column(primary_key, default = "id57")]
    pub id: String,
    pub name: String,
    #[column(default = "now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[garde(length(min = 1, max = 120))]
    pub name: String,
}

/// One row of the admin tenant directory (`GET /admin/tenants`):
/// a tenant id and how many `projects` rows it has created, reconstructed
/// from the public `AuditLog` trail rather than a cross-namespace query —
/// the ORM has no primitive for querying across tenant namespaces at once.
#[derive(Debug, Clone, Serialize)]
pub struct TenantProjectCount {
    pub tenant_id: String,
    pub project_count: usize,
}
