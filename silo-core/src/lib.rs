pub mod config;
pub mod context;
pub mod error;
pub mod prelude;

pub use config::{
    ConfigError, ConfigProperties, ConfigValidationDetail, ConfigValidationError, ConfigValue,
    DefaultSecretResolver, FromConfigValue, MissingKeyError, PropertyMeta, RegisteredSection,
    SecretResolver, SiloConfig, register_section, registered_sections, validate_keys,
    validate_section,
};
pub use context::{Context, ContextBuilder, ContextFrame, Principal, TenantId};
pub use error::{AppError, FieldError};
