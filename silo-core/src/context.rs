//! Ambient request context (spec §4.1).
//!
//! Every request handler, ORM call, and event listener that runs inside the
//! request execution window needs a handful of ambient values — the tenant's
//! database handle, the inbound request, the event bus, the resolved tenant,
//! and (once authenticated) the calling principal. Threading these through
//! every function signature is exactly what an ambient context is for; this
//! uses [`tokio::task_local!`] to get it, with the guarantee that the frame
//! installed by
//! [`Context::scope`] is visible to everything that `.await`s inside that
//! future, and is restored (dropped) the instant the future returns, even on
//! panic or early `?`.
//!
//! The frame does not hardwire concrete types for the db handle, request, or
//! event bus — those types live in `silo-data-sqlx`, `silo-http`, and
//! `silo-events` respectively, and none of those crates are dependencies of
//! this one. Instead the frame is a small type-erased slot map, keyed by
//! `TypeId`, the same pattern `http::Extensions` uses for out-of-band request
//! metadata. Callers insert one value per concrete type with
//! [`ContextBuilder::with`] and retrieve it with [`Context::get`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The resolved tenant for a request, derived from the subdomain/host (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    /// Normalises a raw subdomain/host fragment into a namespace identifier:
    /// lowercased, with `-` folded to `_` (§4.7, matches the schema-naming
    /// rules in §4.3).
    pub fn normalize(raw: &str) -> Self {
        Self(raw.to_lowercase().replace('-', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The shared, ungated namespace every tenant can see (§2).
    pub fn public() -> Self {
        Self("public".to_string())
    }

    pub fn is_public(&self) -> bool {
        self.0 == "public"
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value.to_lowercase().replace('-', "_"))
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::normalize(value)
    }
}

/// The authenticated caller, once a bearer token has been verified by the
/// token oracle (§4.9). Absent for anonymous requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
    /// `true` for service-to-service callers with no human behind them —
    /// audit records attribute these to the system rather than a user id.
    pub is_system: bool,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

type AnySync = dyn Any + Send + Sync;

/// The frame installed for the lifetime of one request (§4.1).
///
/// Cloning a `ContextFrame` is cheap — it clones an `Arc` to the shared slot
/// map, not the map itself.
#[derive(Clone)]
pub struct ContextFrame {
    inner: Arc<FrameInner>,
}

struct FrameInner {
    slots: HashMap<TypeId, Arc<AnySync>>,
    tenant: TenantId,
    principal: Option<Principal>,
}

/// Builds a [`ContextFrame`] one slot at a time before entering it with
/// [`Context::scope`].
#[derive(Default)]
pub struct ContextBuilder {
    slots: HashMap<TypeId, Arc<AnySync>>,
    tenant: Option<TenantId>,
    principal: Option<Principal>,
}

impl ContextBuilder {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            slots: HashMap::new(),
            tenant: Some(tenant),
            principal: None,
        }
    }

    /// Installs one ambient value, keyed by its concrete type. Calling this
    /// twice with the same `T` overwrites the previous value.
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.slots.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn build(self) -> ContextFrame {
        ContextFrame {
            inner: Arc::new(FrameInner {
                slots: self.slots,
                tenant: self.tenant.unwrap_or_else(TenantId::public),
                principal: self.principal,
            }),
        }
    }
}

tokio::task_local! {
    static CONTEXT: ContextFrame;
}

/// The ambient-context entry point. Every method is a free function over the
/// current task's installed frame — there is no `Context` value to pass
/// around, which is the point.
pub struct Context;

impl Context {
    /// Runs `fut` with `frame` installed as the ambient context for its
    /// entire `.await` tree. The frame is torn down the instant `fut`
    /// resolves, including on panic unwind, mirroring the Python
    /// implementation's `@contextmanager` guarantee.
    pub async fn scope<F: Future>(frame: ContextFrame, fut: F) -> F::Output {
        CONTEXT.scope(frame, fut).await
    }

    /// Fetches an ambient value installed by [`ContextBuilder::with`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`Context::scope`], or if no value of type
    /// `T` was installed in the current frame. This is a programmer error in
    /// both cases (spec §4.1: ambient values are populated once per request
    /// by the pipeline before any handler code runs), not a recoverable
    /// runtime condition — handlers should not need to guard against a
    /// missing db handle.
    pub fn get<T: Send + Sync + 'static>() -> Arc<T> {
        Self::try_get::<T>().unwrap_or_else(|| {
            panic!(
                "no {} installed in the current context frame",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn try_get<T: Send + Sync + 'static>() -> Option<Arc<T>> {
        CONTEXT
            .try_with(|frame| {
                frame
                    .inner
                    .slots
                    .get(&TypeId::of::<T>())
                    .cloned()
                    .and_then(|arc| arc.downcast::<T>().ok())
            })
            .ok()
            .flatten()
    }

    pub fn tenant() -> TenantId {
        CONTEXT
            .try_with(|frame| frame.inner.tenant.clone())
            .unwrap_or_else(|_| panic!("Context::tenant() called outside a request scope"))
    }

    pub fn principal() -> Option<Principal> {
        CONTEXT
            .try_with(|frame| frame.inner.principal.clone())
            .unwrap_or(None)
    }

    /// `true` if called from inside an active [`Context::scope`].
    pub fn is_active() -> bool {
        CONTEXT.try_with(|_| ()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(&'static str);

    #[tokio::test]
    async fn scope_installs_and_tears_down_values() {
        assert!(!Context::is_active());
        let frame = ContextBuilder::new(TenantId::from("Acme-Corp"))
            .with(Marker("db"))
            .build();
        Context::scope(frame, async {
            assert!(Context::is_active());
            assert_eq!(Context::tenant().as_str(), "acme_corp");
            assert_eq!(*Context::get::<Marker>(), Marker("db"));
        })
        .await;
        assert!(!Context::is_active());
    }

    #[tokio::test]
    async fn try_get_returns_none_for_unregistered_type() {
        let frame = ContextBuilder::new(TenantId::public()).build();
        Context::scope(frame, async {
            assert!(Context::try_get::<Marker>().is_none());
        })
        .await;
    }

    #[test]
    #[should_panic(expected = "no")]
    fn get_panics_outside_scope() {
        let _ = Context::get::<Marker>();
    }

    #[tokio::test]
    async fn principal_defaults_to_none() {
        let frame = ContextBuilder::new(TenantId::public()).build();
        Context::scope(frame, async {
            assert!(Context::principal().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn principal_survives_the_scope() {
        let principal = Principal {
            subject: "user-1".into(),
            roles: vec!["admin".into()],
            is_system: false,
        };
        let frame = ContextBuilder::new(TenantId::public())
            .principal(principal.clone())
            .build();
        Context::scope(frame, async {
            assert_eq!(Context::principal(), Some(principal));
        })
        .await;
    }

    #[test]
    fn tenant_id_normalizes_like_the_subdomain_resolver() {
        assert_eq!(TenantId::from("Acme-Corp").as_str(), "acme_corp");
        assert_eq!(TenantId::normalize("ACME").as_str(), "acme");
        assert!(TenantId::public().is_public());
        assert!(!TenantId::from("acme").is_public());
    }
}
