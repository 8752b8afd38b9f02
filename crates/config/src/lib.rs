//! Configuration loading, validation and env substitution.
//!
//! Config files: `parley.toml`, `parley.yaml`, or `parley.json`
//! Searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, default_data_dir, discover_and_load, load_config, validate_file},
    schema::{
        MetricsConfig, ParleyConfig, RegistryConfig, RouterConfig, ServerConfig, SessionsConfig,
        TranscriptionConfig, WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
