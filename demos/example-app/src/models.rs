use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use silo::Entity;

/// A catalog item. `cost_cents` is marked private so `GET /widgets` never
/// leaks it to anonymous callers — only the audit trail and internal code
/// paths that request private fields explicitly ever see it.
#[derive(Debug, Clone, Serialize, Deserialize, Entity)]
#[entity(table = "widgets")]
pub struct Widget {
    #[column(primary_key, default = "id57")]
    pub id: String,
    #[column(unique, indexed)]
    pub sku: String,
    pub name: String,
    #[column(private)]
    pub cost_cents: i64,
    #[column(default = "now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWidgetRequest {
    #[garde(length(min = 1, max = 64))]
    pub sku: String,
    #[garde(length(min = 1, max = 200))]
    pub name: String,
    #[garde(range(min = 0))]
    pub cost_cents: i64,
}

/// Fired after a widget is inserted, alongside the `AuditEvent` the handler
/// emits separately — this one carries only the fields other parts of the
/// app (e.g. a pricing cache) would care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetCreated {
    pub id: String,
    pub sku: String,
}
