//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Top-level config struct, loading, server and database sections
//! - [`session`]: Roster capacity, ratings and refresh debounce (SessionConfig)
//! - [`rate_limits`]: Per-actor cooldowns and outbound budget (RateLimitConfig)
//! - [`store`]: Session store backend and retry policy (StoreConfig)
//! - [`limits`]: Per-chat worker limits (LimitsConfig)
//! - [`validation`]: Startup checks

mod limits;
mod rate_limits;
mod session;
mod store;
mod types;
pub mod validation;

pub use limits::LimitsConfig;
pub use rate_limits::RateLimitConfig;
pub use session::SessionConfig;
pub use store::{StoreBackend, StoreConfig};
pub use types::{Config, ConfigError, DatabaseConfig, ServerConfig};
pub use validation::validate;
