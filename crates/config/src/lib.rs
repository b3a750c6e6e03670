//! Configuration for the engage client stack.
//!
//! Loads `engage.toml` (TOML, all sections optional), applies environment
//! overrides, and resolves the [`ServiceEndpoint`] every other crate derives
//! its addresses from.

pub mod endpoint;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    endpoint::{ExecutionContext, ServiceEndpoint, redact_token},
    error::{Error, Result},
    loader::{default_config_path, default_session_path, load, load_from},
    schema::{ApiConfig, EngageConfig, RealtimeConfig, SessionConfig},
};
