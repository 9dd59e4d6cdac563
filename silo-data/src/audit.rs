//! Audit logging (spec §4.8).
//!
//! A write worth auditing fires a named `"AuditEvent"` on the event bus via
//! [`emit_audit_event`]; a listener registered here persists it as an
//! [`AuditLog`] row. Firing the event is the caller's job, not the ORM's —
//! [`Orm`] is generic over [`EntitySchema`] values at the type-erasure
//! boundary, but [`emit_audit_event`] needs the concrete entity type `E` to
//! run [`should_audit`]'s [`TypeId`] check, so it's called from whichever
//! handler or service already knows `E` at the point it calls
//! `orm.insert`/`update`/`delete`. The interesting part is the recursion guard: persisting an
//! `AuditLog` row is itself a write, which would naively fire another
//! `AuditEvent`, forever. The original implementation guarded this with an
//! `isinstance` check against its own audit model class; the idiomatic
//! equivalent here is a [`std::any::TypeId`] comparison, decided over a
//! boolean re-entrancy flag because it composes — callers never have to
//! remember to clear a flag, and nested unrelated writes from within a
//! listener are still audited correctly.

use std::any::TypeId;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use silo_core::TenantId;
use silo_events::{Event, EventBus};
use tracing::warn;

use crate::entity::{Entity, EntitySchema, Record, RecordError};
use crate::field::{FieldDefault, FieldDescriptor, FieldType, Value, now_factory};
use crate::orm::Orm;

pub const AUDIT_EVENT_NAME: &str = "AuditEvent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl AuditAction {
    fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
        }
    }
}

/// The system entity every audited write lands in. Lives in the shared
/// `public` namespace (§2) so audit trails survive even if a tenant's
/// namespace is later dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub tenant_id: Option<String>,
    pub actor: Option<String>,
    pub action: AuditAction,
    pub table_name: String,
    pub record_id: String,
    pub occurred_at: DateTime<Utc>,
    pub detail: Json,
}

impl Entity for AuditLog {
    fn table_name() -> &'static str {
        "audit_logs"
    }

    fn is_public() -> bool {
        true
    }

    fn schema() -> EntitySchema {
        EntitySchema::new("audit_logs")
            .field(FieldDescriptor::new("id", FieldType::Varchar(32)).primary_key())
            .field(FieldDescriptor::new("tenant_id", FieldType::Varchar(64)).nullable().indexed())
            .field(FieldDescriptor::new("actor", FieldType::Varchar(255)).nullable())
            .field(FieldDescriptor::new("action", FieldType::Varchar(16)))
            .field(FieldDescriptor::new("table_name", FieldType::Varchar(255)).indexed())
            .field(FieldDescriptor::new("record_id", FieldType::Varchar(64)).indexed())
            .field(FieldDescriptor::new("occurred_at", FieldType::Timestamp).default(FieldDefault::Factory(now_factory)))
            .field(FieldDescriptor::new("detail", FieldType::Json).nullable())
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", Value::Text(self.id.clone()))
            .with(
                "tenant_id",
                self.tenant_id
                    .clone()
                    .map(Value::Text)
                    .unwrap_or(Value::Null),
            )
            .with(
                "actor",
                self.actor.clone().map(Value::Text).unwrap_or(Value::Null),
            )
            .with("action", Value::Text(self.action.as_str().to_string()))
            .with("table_name", Value::Text(self.table_name.clone()))
            .with("record_id", Value::Text(self.record_id.clone()))
            .with("occurred_at", Value::Timestamp(self.occurred_at))
            .with("detail", Value::Json(self.detail.clone()))
    }

    fn from_record(record: &Record) -> Result<Self, RecordError> {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RecordError("audit_logs.id missing".into()))?
            .to_string();
        let action = match record.get("action").and_then(Value::as_str) {
            Some("created") => AuditAction::Created,
            Some("updated") => AuditAction::Updated,
            Some("deleted") => AuditAction::Deleted,
            other => {
                return Err(RecordError(format!(
                    "audit_logs.action has unexpected value {other:?}"
                )))
            }
        };
        let table_name = record
            .get("table_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let record_id = record
            .get("record_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let occurred_at = match record.get("occurred_at") {
            Some(Value::Timestamp(ts)) => *ts,
            _ => Utc::now(),
        };
        let detail = match record.get("detail") {
            Some(Value::Json(v)) => v.clone(),
            _ => Json::Null,
        };
        Ok(Self {
            id,
            tenant_id: record.get("tenant_id").and_then(Value::as_str).map(String::from),
            actor: record.get("actor").and_then(Value::as_str).map(String::from),
            action,
            table_name,
            record_id,
            occurred_at,
            detail,
        })
    }
}

/// `true` if a write to entity type `E` should raise an `AuditEvent`.
///
/// Compares by [`TypeId`] rather than by table name so it works even before
/// an entity is registered, and compares against `AuditLog` itself rather
/// than flipping a re-entrancy flag around the write — writes nested inside
/// an audit listener for an unrelated entity are still audited.
pub fn should_audit<E: 'static>() -> bool {
    TypeId::of::<E>() != TypeId::of::<AuditLog>()
}

/// Payload carried on the `"AuditEvent"` bus event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPayload {
    pub tenant_id: Option<String>,
    pub actor: Option<String>,
    pub action: AuditAction,
    pub table_name: String,
    pub record_id: String,
    pub detail: Json,
}

/// Fires an `"AuditEvent"` for a write to entity type `E`, unless `E` is
/// [`AuditLog`] itself. Call this after `orm.insert`/`update`/`delete`
/// commits, from the same call site that knows `E` — see `example-app`'s
/// and `example-multi-tenant`'s handlers for the pattern.
pub async fn emit_audit_event<E: 'static>(bus: &EventBus, payload: AuditPayload) {
    if !should_audit::<E>() {
        return;
    }
    let data = serde_json::to_value(&payload).unwrap_or(Json::Null);
    bus.dispatch(Event::new(AUDIT_EVENT_NAME, data)).await;
}

/// Registers the listener that persists `"AuditEvent"` payloads as
/// [`AuditLog`] rows. `id_factory` mints the row's primary key (spec §4.10's
/// id57 in production; tests may supply a deterministic stand-in).
pub async fn register_audit_listener(
    bus: &EventBus,
    orm: Arc<dyn Orm>,
    id_factory: impl Fn() -> String + Send + Sync + 'static,
) {
    let schema = AuditLog::schema();
    bus.register_listener(AUDIT_EVENT_NAME, move |event: Event| {
        let orm = orm.clone();
        let schema = schema.clone();
        let id = id_factory();
        async move {
            let payload: AuditPayload = match event.deserialize_data() {
                Ok(p) => p,
                Err(err) => {
                    warn!(error = %err, "malformed AuditEvent payload");
                    return;
                }
            };
            let entry = AuditLog {
                id,
                tenant_id: payload.tenant_id,
                actor: payload.actor,
                action: payload.action,
                table_name: payload.table_name,
                record_id: payload.record_id,
                occurred_at: Utc::now(),
                detail: payload.detail,
            };
            if let Err(err) = orm.insert(&schema, entry.to_record()).await {
                warn!(error = %err, "failed to persist audit log entry");
            }
        }
    })
    .await;
}

/// Convenience for call sites that already hold an ambient tenant id.
pub fn tenant_id_string(tenant: Option<&TenantId>) -> Option<String> {
    tenant.map(|t| t.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Other;

    #[test]
    fn should_audit_is_false_only_for_audit_log_itself() {
        assert!(!should_audit::<AuditLog>());
        assert!(should_audit::<Other>());
    }

    #[test]
    fn audit_log_round_trips_through_record() {
        let entry = AuditLog {
            id: "abc123".into(),
            tenant_id: Some("tenant-1".into()),
            actor: Some("user-9".into()),
            action: AuditAction::Updated,
            table_name: "orders".into(),
            record_id: "ord-1".into(),
            occurred_at: Utc::now(),
            detail: serde_json::json!({ "field": "status" }),
        };
        let record = entry.to_record();
        let restored = AuditLog::from_record(&record).unwrap();
        assert_eq!(restored.table_name, "orders");
        assert_eq!(restored.action, AuditAction::Updated);
        assert_eq!(restored.tenant_id.as_deref(), Some("tenant-1"));
    }
}
