//! # silo-http — the request dispatch pipeline, router, and wire types
//!
//! Sole owner of the `hyper`/`http` dependency on the server side. Nothing
//! here builds on `axum::Router` — the router and the pipeline are both
//! grounded directly on `application.py`/`router.py`'s purpose-built
//! dispatcher rather than adapted from an existing web framework.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`request`] | The inbound request snapshot and shared cookie jar |
//! | [`response`] | A handler's return value before security headers are layered on |
//! | [`router`] | The `{name:type}` path-template matcher |
//! | [`secure_headers`] | The CSP/HSTS/X-Frame-Options header table |
//! | [`translation`] | Folder-of-JSON i18n lookup |
//! | [`pipeline`] | Ties the above into a `hyper::service::Service` |

pub mod pipeline;
pub mod request;
pub mod response;
pub mod router;
pub mod secure_headers;
pub mod translation;

pub mod prelude {
    pub use crate::pipeline::Pipeline;
    pub use crate::request::{Request, RequestParts};
    pub use crate::response::Response;
    pub use crate::router::{Handler, ParamValue, Params, Router};
    pub use crate::secure_headers::SecureHeaders;
    pub use crate::translation::{Translations, Translator};
}
