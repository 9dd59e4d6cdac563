//! Auth fixtures for tests (spec §4.10, C9).
//!
//! Since a JWKS-backed `TokenOracle` is explicitly out of scope, there's no
//! keypair to sign real JWTs against — tests instead register fixed bearer
//! strings against a [`StaticTokenOracle`], the same test double
//! `silo-security` ships. `TestJwt`/`TokenBuilder` keep the names and shape
//! of a real token-minting fixture: build a principal, get back a bearer
//! string to pass to `TestApp::get_authenticated` and friends.

use std::collections::HashMap;

use serde_json::{json, Value};
use silo_security::StaticTokenOracle;

/// Describes the principal a minted token should verify to.
pub struct TokenBuilder {
    subject: String,
    roles: Vec<String>,
    is_system: bool,
}

impl TokenBuilder {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            roles: Vec::new(),
            is_system: false,
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    fn claims(&self) -> Value {
        json!({
            "sub": self.subject,
            "roles": self.roles,
            "is_system": self.is_system,
        })
    }
}

/// Accumulates bearer-token fixtures, then hands out a [`StaticTokenOracle`]
/// that verifies exactly those tokens and no others.
#[derive(Default)]
pub struct TestJwt {
    tokens: HashMap<String, Value>,
    next_id: usize,
}

impl TestJwt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `builder`'s claims under a freshly minted bearer string and
    /// returns it.
    pub fn issue(&mut self, builder: TokenBuilder) -> String {
        self.next_id += 1;
        let bearer = format!("test-token-{}", self.next_id);
        self.tokens.insert(bearer.clone(), builder.claims());
        bearer
    }

    /// The oracle backing every token issued so far.
    pub fn oracle(&self) -> StaticTokenOracle {
        StaticTokenOracle::new(self.tokens.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_security::TokenOracle;

    #[tokio::test]
    async fn issued_tokens_verify_to_the_built_principal() {
        let mut fixtures = TestJwt::new();
        let bearer = fixtures.issue(TokenBuilder::new("user-1").role("admin"));
        let oracle = fixtures.oracle();

        let claims = oracle.verify(&bearer).await.unwrap();
        let principal = claims.to_principal();
        assert_eq!(principal.subject, "user-1");
        assert_eq!(principal.roles, vec!["admin".to_string()]);
        assert!(!principal.is_system);
    }

    #[tokio::test]
    async fn unissued_tokens_fail_verification() {
        let fixtures = TestJwt::new();
        let oracle = fixtures.oracle();
        assert!(oracle.verify("never-issued").await.is_err());
    }

    #[tokio::test]
    async fn each_issued_token_gets_a_distinct_bearer_string() {
        let mut fixtures = TestJwt::new();
        let a = fixtures.issue(TokenBuilder::new("user-a"));
        let b = fixtures.issue(TokenBuilder::new("user-b"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn system_tokens_set_the_is_system_flag() {
        let mut fixtures = TestJwt::new();
        let bearer = fixtures.issue(TokenBuilder::new("scheduler").system());
        let claims = fixtures.oracle().verify(&bearer).await.unwrap();
        assert!(claims.to_principal().is_system);
    }
}
