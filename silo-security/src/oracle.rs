//! Token verification contract (spec §4.10, C9).
//!
//! A real JWKS-backed implementation is out of scope — identity providers
//! are treated the same way as any other external system SILO talks to but
//! does not own. What this module fixes is the *shape* of that boundary:
//! [`TokenOracle`] is the trait a real implementation would satisfy,
//! [`VerifiedClaimsCache`] is the in-memory cache every such implementation
//! wants in front of it (a `kid`-keyed cache with a TTL and a "don't hammer
//! the network" minimum refresh interval, generalized here to cache
//! verified claims by the bearer string itself rather than by key id), and
//! [`StaticTokenOracle`] is the test double that lets `silo-http` handlers
//! and tests exercise auth-gated code paths without a real identity
//! provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value as Json;
use silo_core::{AppError, Principal};

use crate::error::SecurityError;

/// Verified token claims, kept as a raw JSON tree rather than a fixed
/// struct — callers pull out `sub`/`roles`/whatever else they need,
/// including claims this crate doesn't know the shape of.
#[derive(Debug, Clone)]
pub struct Claims(pub Json);

impl Claims {
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Json::as_str)
    }

    pub fn roles(&self) -> Vec<String> {
        self.0
            .get("roles")
            .and_then(Json::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Json::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Builds the [`Principal`] the pipeline installs into the ambient
    /// context once a bearer token verifies (spec §4.1).
    pub fn to_principal(&self) -> Principal {
        Principal {
            subject: self.subject().unwrap_or_default().to_string(),
            roles: self.roles(),
            is_system: self.0.get("is_system").and_then(Json::as_bool).unwrap_or(false),
        }
    }
}

/// The contract a real identity-provider integration implements: given a
/// bearer token, produce verified claims or an authentication failure.
#[async_trait::async_trait]
pub trait TokenOracle: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<Claims, AppError>;
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Result<&str, SecurityError> {
    let mut parts = header_value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or("");
    let token = parts.next().ok_or(SecurityError::InvalidAuthScheme)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(SecurityError::InvalidAuthScheme);
    }
    Ok(token)
}

struct CacheEntry {
    claims: Claims,
    cached_at: Instant,
}

/// TTL-bounded cache of verified claims, keyed by the raw bearer string.
///
/// Grounded on `JwksCache`'s `CacheInner`/`is_stale` shape: a sweep-on-read
/// cache rather than a background eviction task, since the request volume
/// that exercises it is the same request volume that would otherwise pay
/// the verification cost.
pub struct VerifiedClaimsCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl VerifiedClaimsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, bearer: &str) -> Option<Claims> {
        let entry = self.entries.get(bearer)?;
        if entry.cached_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(bearer);
            return None;
        }
        Some(entry.claims.clone())
    }

    pub fn insert(&self, bearer: String, claims: Claims) {
        self.entries.insert(
            bearer,
            CacheEntry {
                claims,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Wraps any [`TokenOracle`] with a [`VerifiedClaimsCache`] in front of it,
/// so a real implementation only pays its verification cost once per TTL
/// window per distinct bearer string.
pub struct CachingTokenOracle<O: TokenOracle> {
    inner: O,
    cache: VerifiedClaimsCache,
}

impl<O: TokenOracle> CachingTokenOracle<O> {
    pub fn new(inner: O, ttl: Duration) -> Self {
        Self {
            inner,
            cache: VerifiedClaimsCache::new(ttl),
        }
    }
}

#[async_trait::async_trait]
impl<O: TokenOracle> TokenOracle for CachingTokenOracle<O> {
    async fn verify(&self, bearer: &str) -> Result<Claims, AppError> {
        if let Some(claims) = self.cache.get(bearer) {
            return Ok(claims);
        }
        let claims = self.inner.verify(bearer).await?;
        self.cache.insert(bearer.to_string(), claims.clone());
        Ok(claims)
    }
}

/// A fixed table of bearer-token-to-claims mappings, for tests and demos
/// that need auth-gated code paths without a real identity provider.
#[derive(Default)]
pub struct StaticTokenOracle {
    tokens: Arc<HashMap<String, Json>>,
}

impl StaticTokenOracle {
    pub fn new(tokens: HashMap<String, Json>) -> Self {
        Self {
            tokens: Arc::new(tokens),
        }
    }
}

#[async_trait::async_trait]
impl TokenOracle for StaticTokenOracle {
    async fn verify(&self, bearer: &str) -> Result<Claims, AppError> {
        self.tokens
            .get(bearer)
            .cloned()
            .map(Claims)
            .ok_or_else(|| SecurityError::InvalidToken("unknown token".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_rejects_non_bearer_schemes() {
        assert!(bearer_token("Basic abc123").is_err());
        assert!(bearer_token("abc123").is_err());
    }

    #[test]
    fn bearer_token_extracts_the_token_part() {
        assert_eq!(bearer_token("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
    }

    #[test]
    fn claims_build_a_principal_from_sub_and_roles() {
        let claims = Claims(serde_json::json!({ "sub": "user-1", "roles": ["admin", "editor"] }));
        let principal = claims.to_principal();
        assert_eq!(principal.subject, "user-1");
        assert_eq!(principal.roles, vec!["admin".to_string(), "editor".to_string()]);
        assert!(!principal.is_system);
    }

    #[tokio::test]
    async fn static_oracle_verifies_registered_tokens_only() {
        let mut tokens = HashMap::new();
        tokens.insert("good-token".to_string(), serde_json::json!({ "sub": "user-1" }));
        let oracle = StaticTokenOracle::new(tokens);

        let claims = oracle.verify("good-token").await.unwrap();
        assert_eq!(claims.subject(), Some("user-1"));
        assert!(oracle.verify("bad-token").await.is_err());
    }

    #[tokio::test]
    async fn cache_expires_entries_after_ttl() {
        let cache = VerifiedClaimsCache::new(Duration::from_millis(10));
        cache.insert("tok".to_string(), Claims(serde_json::json!({ "sub": "user-1" })));
        assert!(cache.get("tok").is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("tok").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn caching_oracle_only_calls_inner_once_per_ttl_window() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingOracle(AtomicUsize);

        #[async_trait::async_trait]
        impl TokenOracle for CountingOracle {
            async fn verify(&self, _bearer: &str) -> Result<Claims, AppError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Claims(serde_json::json!({ "sub": "user-1" })))
            }
        }

        let oracle = CachingTokenOracle::new(CountingOracle(AtomicUsize::new(0)), Duration::from_secs(60));
        oracle.verify("tok").await.unwrap();
        oracle.verify("tok").await.unwrap();
        assert_eq!(oracle.inner.0.load(Ordering::SeqCst), 1);
    }
}
