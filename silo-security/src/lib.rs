//! # silo-security — token verification contract and request validation
//!
//! Two independent concerns live here: [`oracle`] is the boundary SILO
//! expects a real identity-provider integration to satisfy (spec §4.10), and
//! [`validation`] decodes and validates incoming requests against a target
//! type (spec §4.9). Neither depends on `silo-http` — both take raw
//! `http::Method`/header/body values so this crate stays usable from
//! anything that fronts a request, not just the bundled pipeline.

pub mod config;
pub mod error;
pub mod oracle;
pub mod validation;

pub use config::SecurityConfig;
pub use error::SecurityError;
pub use oracle::{bearer_token, CachingTokenOracle, Claims, StaticTokenOracle, TokenOracle, VerifiedClaimsCache};
pub use validation::validate_request;

pub mod prelude {
    pub use crate::{
        bearer_token, CachingTokenOracle, Claims, SecurityConfig, SecurityError, StaticTokenOracle,
        TokenOracle, validate_request,
    };
}
