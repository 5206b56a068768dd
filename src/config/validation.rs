//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{Config, StoreBackend};
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("session.capacity must be at least 2, got {0}")]
    CapacityTooSmall(usize),
    #[error("store.retry_max_attempts must be at least 1")]
    NoRetryAttempts,
    #[error("store.retry_base_delay_ms ({base}) exceeds store.retry_max_delay_ms ({max})")]
    BackoffInverted { base: u64, max: u64 },
    #[error("store.attempt_timeout_ms must be greater than 0")]
    ZeroAttemptTimeout,
    #[error("rate_limits.outbound_rate_per_second must be at least 1")]
    ZeroOutboundRate,
    #[error("limits.chat_mailbox_capacity must be at least 1")]
    ZeroMailbox,
    #[error("limits.chat_idle_timeout_secs must be greater than 0")]
    ZeroIdleTimeout,
    #[error("store.path parent directory does not exist: {0}")]
    StorePathInvalid(String),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    // Two players is the smallest roster that splits into teams.
    if config.session.capacity < 2 {
        errors.push(ValidationError::CapacityTooSmall(config.session.capacity));
    }

    let store = &config.store;
    if store.retry_max_attempts == 0 {
        errors.push(ValidationError::NoRetryAttempts);
    }
    if store.retry_base_delay_ms > store.retry_max_delay_ms {
        errors.push(ValidationError::BackoffInverted {
            base: store.retry_base_delay_ms,
            max: store.retry_max_delay_ms,
        });
    }
    if store.attempt_timeout_ms == 0 {
        errors.push(ValidationError::ZeroAttemptTimeout);
    }

    if config.rate_limits.outbound_rate_per_second == 0 {
        errors.push(ValidationError::ZeroOutboundRate);
    }
    if config.limits.chat_mailbox_capacity == 0 {
        errors.push(ValidationError::ZeroMailbox);
    }
    if config.limits.chat_idle_timeout_secs == 0 {
        errors.push(ValidationError::ZeroIdleTimeout);
    }

    if store.backend == StoreBackend::Redb && !parent_exists(&store.path) {
        errors.push(ValidationError::StorePathInvalid(store.path.clone()));
    }
    if config.database.path != ":memory:" && !parent_exists(&config.database.path) {
        errors.push(ValidationError::DatabasePathInvalid(
            config.database.path.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn parent_exists(path: &str) -> bool {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.exists(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate(&Config::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = Config::default();
        config.server.name.clear();
        config.session.capacity = 1;
        config.store.retry_max_attempts = 0;
        config.store.retry_base_delay_ms = 5_000;
        config.rate_limits.outbound_rate_per_second = 0;

        let errors = validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingServerName,
                ValidationError::CapacityTooSmall(1),
                ValidationError::NoRetryAttempts,
                ValidationError::BackoffInverted {
                    base: 5_000,
                    max: 2_000
                },
                ValidationError::ZeroOutboundRate,
            ]
        );
    }

    #[test]
    fn missing_parent_directory_is_reported() {
        let mut config = Config::default();
        config.database.path = "/nonexistent/dir/kickoff.db".into();
        config.store.path = "/nonexistent/dir/sessions.redb".into();

        let errors = validate(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DatabasePathInvalid(
            "/nonexistent/dir/kickoff.db".into()
        )));
        assert!(errors.contains(&ValidationError::StorePathInvalid(
            "/nonexistent/dir/sessions.redb".into()
        )));
    }

    #[test]
    fn memory_backends_skip_path_checks() {
        let mut config = Config::default();
        config.database.path = ":memory:".into();
        config.store.backend = StoreBackend::Memory;
        config.store.path = "/nonexistent/dir/sessions.redb".into();
        assert_eq!(validate(&config), Ok(()));
    }
}
