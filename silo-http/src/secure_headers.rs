//! Security response headers (spec §4.7, defaults in §4.7 "Security-header
//! defaults").
//!
//! Same builder shape and header table as a typical middleware-layer
//! security-headers helper, minus the `axum::middleware` plugin integration
//! (there is no `axum::Router` here to attach a layer to) in favor of a
//! plain `headers()` accessor the pipeline applies directly to every
//! outgoing [`crate::response::Response`]. The defaults themselves: a
//! restrictive CSP, preload-enabled HSTS, and `SAMEORIGIN` framing, emitted
//! unconditionally rather than left opt-in.

use http::{HeaderName, HeaderValue};

pub struct SecureHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecureHeaders {
    pub fn builder() -> SecureHeadersBuilder {
        SecureHeadersBuilder::new()
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }
}

impl Default for SecureHeaders {
    fn default() -> Self {
        SecureHeadersBuilder::new().build()
    }
}

pub struct SecureHeadersBuilder {
    content_type_options: bool,
    frame_options: String,
    hsts_max_age: u64,
    hsts_include_subdomains: bool,
    hsts_preload: bool,
    content_security_policy: String,
    permissions_policy: Option<String>,
}

impl SecureHeadersBuilder {
    fn new() -> Self {
        Self {
            content_type_options: true,
            frame_options: "SAMEORIGIN".to_string(),
            hsts_max_age: 31_536_000,
            hsts_include_subdomains: true,
            hsts_preload: true,
            content_security_policy: "default-src 'self'; script-src 'self'; \
                 style-src 'self'; img-src 'self' data:; frame-ancestors 'self'; \
                 form-action 'self'; block-all-mixed-content; upgrade-insecure-requests"
                .to_string(),
            permissions_policy: None,
        }
    }

    pub fn content_type_options(mut self, enabled: bool) -> Self {
        self.content_type_options = enabled;
        self
    }

    pub fn frame_options(mut self, value: impl Into<String>) -> Self {
        self.frame_options = value.into();
        self
    }

    pub fn hsts_max_age(mut self, seconds: u64) -> Self {
        self.hsts_max_age = seconds;
        self
    }

    pub fn hsts_include_subdomains(mut self, include: bool) -> Self {
        self.hsts_include_subdomains = include;
        self
    }

    pub fn hsts_preload(mut self, preload: bool) -> Self {
        self.hsts_preload = preload;
        self
    }

    pub fn content_security_policy(mut self, value: impl Into<String>) -> Self {
        self.content_security_policy = value.into();
        self
    }

    pub fn permissions_policy(mut self, value: impl Into<String>) -> Self {
        self.permissions_policy = Some(value.into());
        self
    }

    pub fn build(self) -> SecureHeaders {
        let mut headers = Vec::new();

        if self.content_type_options {
            headers.push((
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            ));
        }

        if let Ok(val) = HeaderValue::from_str(&self.frame_options) {
            headers.push((HeaderName::from_static("x-frame-options"), val));
        }

        let mut hsts = format!("max-age={}", self.hsts_max_age);
        if self.hsts_include_subdomains {
            hsts.push_str("; includeSubDomains");
        }
        if self.hsts_preload {
            hsts.push_str("; preload");
        }
        if let Ok(val) = HeaderValue::from_str(&hsts) {
            headers.push((HeaderName::from_static("strict-transport-security"), val));
        }

        if let Ok(val) = HeaderValue::from_str(&self.content_security_policy) {
            headers.push((HeaderName::from_static("content-security-policy"), val));
        }

        if let Some(ref pp) = self.permissions_policy {
            if let Ok(val) = HeaderValue::from_str(pp) {
                headers.push((HeaderName::from_static("permissions-policy"), val));
            }
        }

        SecureHeaders { headers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_runtime_wide_header_table() {
        let headers = SecureHeaders::default();
        let find = |name: &str| {
            headers
                .headers()
                .iter()
                .find(|(n, _)| n.as_str() == name)
                .map(|(_, v)| v.to_str().unwrap().to_string())
        };
        assert_eq!(find("x-frame-options").as_deref(), Some("SAMEORIGIN"));
        assert_eq!(
            find("strict-transport-security").as_deref(),
            Some("max-age=31536000; includeSubDomains; preload")
        );
        assert!(find("content-security-policy").unwrap().starts_with("default-src 'self'"));
    }

    #[test]
    fn builder_overrides_are_reflected_in_the_header_set() {
        let headers = SecureHeaders::builder()
            .frame_options("DENY")
            .hsts_preload(false)
            .build();
        let find = |name: &str| headers.headers().iter().any(|(n, _)| n.as_str() == name);
        assert!(find("x-frame-options"));
        let hsts = headers
            .headers()
            .iter()
            .find(|(n, _)| n.as_str() == "strict-transport-security")
            .unwrap()
            .1
            .to_str()
            .unwrap();
        assert!(!hsts.contains("preload"));
    }
}
