//! Request decoding and validation hooks (spec §4.9, C8).
//!
//! Grounded on `application/validation.py`'s `validate` decorator: a GET
//! request's query string is decoded into the target type, every other
//! method's body is decoded as JSON, then `garde::Validate::validate` runs
//! over the decoded value. A failing [`garde::Report`] is converted to
//! [`silo_core::FieldError`]s by `field_errors` below, keeping the wire
//! shape of a validation failure the same regardless of which field failed.

use http::Method;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use silo_core::{AppError, FieldError};

/// Decodes and validates a request body or query string into `T`.
///
/// `GET`/`HEAD` requests are decoded from `query_string` (`a=1&b=2` style,
/// matching `application.py`'s treatment of query params as the payload for
/// read-only requests); every other method is decoded from `body` as JSON.
/// An empty body is treated as `{}` so validation can still report missing
/// required fields instead of a body-parse error.
pub fn validate_request<T>(method: &Method, query_string: &str, body: &[u8]) -> Result<T, AppError>
where
    T: DeserializeOwned + garde::Validate,
    T::Context: Default,
{
    let value: T = if method == Method::GET || method == Method::HEAD {
        decode_query(query_string)?
    } else {
        decode_body(body)?
    };

    value
        .validate()
        .map_err(|report| AppError::ValidationFailure(field_errors(&report)))?;

    Ok(value)
}

fn decode_query<T: DeserializeOwned>(query_string: &str) -> Result<T, AppError> {
    let mut map = serde_json::Map::new();
    for (key, value) in form_urlencoded::parse(query_string.as_bytes()) {
        map.insert(key.into_owned(), Json::String(value.into_owned()));
    }
    serde_json::from_value(Json::Object(map))
        .map_err(|err| AppError::ValidationFailure(vec![FieldError::new("value", err.to_string())]))
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    let body = if body.is_empty() { b"{}".as_slice() } else { body };
    serde_json::from_slice(body)
        .map_err(|err| AppError::ValidationFailure(vec![FieldError::new("value", err.to_string())]))
}

fn field_errors(report: &garde::Report) -> Vec<FieldError> {
    report
        .iter()
        .map(|(path, error)| {
            let field = {
                let s = path.to_string();
                if s.is_empty() { "value".to_string() } else { s }
            };
            FieldError::new(field, error.message().to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use garde::Validate;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct CreateUser {
        #[garde(length(min = 1))]
        name: String,
        #[garde(email)]
        email: String,
    }

    #[test]
    fn get_requests_decode_from_the_query_string() {
        let result: CreateUser =
            validate_request(&Method::GET, "name=Ada&email=ada%40example.com", b"").unwrap();
        assert_eq!(result.name, "Ada");
        assert_eq!(result.email, "ada@example.com");
    }

    #[test]
    fn non_get_requests_decode_from_the_body() {
        let body = br#"{"name":"Ada","email":"ada@example.com"}"#;
        let result: CreateUser = validate_request(&Method::POST, "", body).unwrap();
        assert_eq!(result.name, "Ada");
    }

    #[test]
    fn invalid_fields_become_structured_field_errors() {
        let body = br#"{"name":"","email":"not-an-email"}"#;
        let err = validate_request::<CreateUser>(&Method::POST, "", body).unwrap_err();
        match err {
            AppError::ValidationFailure(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().any(|e| e.field == "name"));
                assert!(errors.iter().any(|e| e.field == "email"));
            }
            other => panic!("expected ValidationFailure, got {other:?}"),
        }
    }

    #[test]
    fn empty_body_on_a_post_is_treated_as_an_empty_object() {
        let err = validate_request::<CreateUser>(&Method::POST, "", b"").unwrap_err();
        assert!(matches!(err, AppError::ValidationFailure(_)));
    }
}
