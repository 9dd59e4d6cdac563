//! Configuration for the token oracle's verified-claims cache.

/// How long a verified token's claims stay cached before the oracle is
/// asked to re-verify the bearer string, and which signing algorithms a
/// real oracle implementation is expected to accept.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub cache_ttl_secs: u64,
    pub allowed_algorithms: Vec<String>,
}

impl SecurityConfig {
    pub fn new(allowed_algorithms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cache_ttl_secs: 300,
            allowed_algorithms: allowed_algorithms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.cache_ttl_secs = ttl_secs;
        self
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new(["RS256"])
    }
}
