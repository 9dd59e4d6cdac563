//! The inbound request record (spec §4.7 step 1).
//!
//! Grounded on `application.py`'s `Request`: method, path, lower-cased
//! multi-valued headers, a parsed query string, and cookies parsed eagerly
//! from the `Cookie` header. Unlike the Python version, which mutates the
//! same object the handler was given, [`Request`] splits the inbound
//! snapshot (immutable, cheap to clone, safe to stash in the ambient
//! context) from the outbound cookie jar (an `Arc<Mutex<_>>` so the ambient
//! copy installed into [`silo_core::Context`] and the copy handed to the
//! handler accumulate into the same jar).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use silo_core::AppError;

/// An immutable snapshot of everything about the request that doesn't
/// change once it's been parsed off the wire.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: HashMap<String, Vec<String>>,
    pub cookies: HashMap<String, String>,
}

impl RequestParts {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|values| values.first()).map(String::as_str)
    }

    /// Tenant-selection headers in spec §4.7/§6 priority order:
    /// `X-Subdomain`, else the first label of `X-Forwarded-Host`, else the
    /// first label of `Host` when it has three or more labels.
    pub fn subdomain_candidate(&self) -> Option<String> {
        if let Some(subdomain) = self.header("x-subdomain") {
            return Some(subdomain.to_string());
        }
        if let Some(forwarded) = self.header("x-forwarded-host") {
            if let Some(first) = forwarded.split(':').next() {
                return Some(first.to_string());
            }
        }
        if let Some(host) = self.header("host") {
            let host_only = host.split(':').next().unwrap_or(host);
            let labels: Vec<&str> = host_only.split('.').collect();
            if labels.len() >= 3 {
                return Some(labels[0].to_string());
            }
        }
        None
    }

    /// `Accept-Encoding`-driven content encoding choice (spec §6):
    /// `zstd`, `br`, `gzip`, `deflate`, else identity.
    pub fn preferred_encoding(&self) -> &'static str {
        let Some(accept) = self.header("accept-encoding") else {
            return "identity";
        };
        for candidate in ["zstd", "br", "gzip", "deflate"] {
            if accept.to_ascii_lowercase().contains(candidate) {
                return candidate;
            }
        }
        "identity"
    }
}

fn parse_cookies(header: Option<&str>) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let Some(header) = header else {
        return cookies;
    };
    for part in header.split(';') {
        if let Some((name, value)) = part.trim().split_once('=') {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    cookies
}

fn parse_query(query_string: &str) -> HashMap<String, Vec<String>> {
    let mut query = HashMap::new();
    for (key, value) in form_urlencoded::parse(query_string.as_bytes()) {
        query.entry(key.into_owned()).or_insert_with(Vec::new).push(value.into_owned());
    }
    query
}

impl RequestParts {
    pub fn from_wire(method: Method, path: String, query_string: &str, headers: HeaderMap) -> Self {
        let cookies = parse_cookies(headers.get("cookie").and_then(|v| v.to_str().ok()));
        Self {
            method,
            path,
            headers,
            query: parse_query(query_string),
            cookies,
        }
    }
}

/// The request handed to route handlers. Cloning shares the same cookie jar
/// with every other clone — the one installed into the ambient context and
/// the one passed to the handler are the same jar, so either can accumulate
/// `Set-Cookie` entries (spec §4.7 step 7).
#[derive(Clone)]
pub struct Request {
    pub parts: Arc<RequestParts>,
    body: Bytes,
    cookie_jar: Arc<Mutex<Vec<String>>>,
}

impl Request {
    pub fn new(parts: RequestParts, body: Bytes) -> Self {
        Self {
            parts: Arc::new(parts),
            body,
            cookie_jar: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn path(&self) -> &str {
        &self.parts.path
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.header(name)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.parts.query_param(name)
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| AppError::ValidationFailure(vec![silo_core::FieldError::new(
                "body",
                format!("invalid JSON body: {err}"),
            )]))
    }

    /// Queues a `Set-Cookie` header, matching `application.py`'s
    /// `Request.set_cookie`: a cookie already queued under the same name is
    /// left alone rather than overwritten.
    pub fn set_cookie(
        &self,
        name: &str,
        value: &str,
        path: &str,
        http_only: bool,
        secure: bool,
        same_site: &str,
    ) {
        let mut jar = self.cookie_jar.lock().expect("cookie jar mutex poisoned");
        let prefix = format!("{name}=");
        if jar.iter().any(|c| c.starts_with(&prefix)) {
            return;
        }
        jar.push(format!(
            "{name}={value}; Path={path}; HttpOnly={http_only}; Secure={secure}; SameSite={same_site}"
        ));
    }

    /// The accumulated `Set-Cookie` values to emit on the response (spec
    /// §4.7 step 7).
    pub fn queued_cookies(&self) -> Vec<String> {
        self.cookie_jar.lock().expect("cookie jar mutex poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(path: &str, query: &str) -> RequestParts {
        RequestParts::from_wire(Method::GET, path.to_string(), query, HeaderMap::new())
    }

    #[test]
    fn subdomain_prefers_x_subdomain_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-subdomain", "Acme".parse().unwrap());
        headers.insert("host", "other.example.com".parse().unwrap());
        let parts = RequestParts::from_wire(Method::GET, "/".into(), "", headers);
        assert_eq!(parts.subdomain_candidate().as_deref(), Some("Acme"));
    }

    #[test]
    fn subdomain_falls_back_to_forwarded_host_then_host() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-host", "tenant-a:8080".parse().unwrap());
        let parts = RequestParts::from_wire(Method::GET, "/".into(), "", headers.clone());
        assert_eq!(parts.subdomain_candidate().as_deref(), Some("tenant-a"));

        let mut host_only = HeaderMap::new();
        host_only.insert("host", "tenant-b.example.com".parse().unwrap());
        let parts = RequestParts::from_wire(Method::GET, "/".into(), "", host_only);
        assert_eq!(parts.subdomain_candidate().as_deref(), Some("tenant-b"));
    }

    #[test]
    fn subdomain_is_none_for_a_bare_two_label_host() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "example.com".parse().unwrap());
        let parts = RequestParts::from_wire(Method::GET, "/".into(), "", headers);
        assert_eq!(parts.subdomain_candidate(), None);
    }

    #[test]
    fn query_string_parses_repeated_keys() {
        let parts = parts("/search", "tag=a&tag=b&q=hello");
        assert_eq!(parts.query.get("tag").unwrap(), &vec!["a".to_string(), "b".to_string()]);
        assert_eq!(parts.query_param("q"), Some("hello"));
    }

    #[test]
    fn preferred_encoding_picks_the_first_match() {
        let mut headers = HeaderMap::new();
        headers.insert("accept-encoding", "gzip, deflate, br".parse().unwrap());
        let parts = RequestParts::from_wire(Method::GET, "/".into(), "", headers);
        assert_eq!(parts.preferred_encoding(), "br");
    }

    #[test]
    fn preferred_encoding_defaults_to_identity() {
        let parts = parts("/", "");
        assert_eq!(parts.preferred_encoding(), "identity");
    }

    #[test]
    fn set_cookie_does_not_overwrite_an_existing_queued_cookie() {
        let request = Request::new(parts("/", ""), Bytes::new());
        request.set_cookie("session", "first", "/", true, true, "Strict");
        request.set_cookie("session", "second", "/", true, true, "Strict");
        let cookies = request.queued_cookies();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].contains("session=first"));
    }
}
