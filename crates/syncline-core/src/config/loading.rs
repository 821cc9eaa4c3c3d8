//! Configuration loading and merging logic.
//!
//! Configuration is loaded in the following order (later sources override
//! earlier ones):
//! 1. **Hardcoded defaults** - Built-in fallback values
//! 2. **User config** - `~/.syncline/config.toml` (global user preferences)
//! 3. **Project config** - `./.syncline/config.toml` (project-specific overrides)

use crate::config::types::{CoreConfig, NotificationConfig, PairingConfig, SchedulerConfig};
use crate::errors::ConfigError;
use std::fs;
use std::path::PathBuf;

/// Load configuration from the hierarchy of config files.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be parsed, or if
/// validation fails. Missing config files are not errors.
pub fn load_hierarchy() -> Result<CoreConfig, ConfigError> {
    let mut config = CoreConfig::default();

    if let Some(user_config) = load_user_config()? {
        config = merge_configs(config, user_config);
    }

    if let Some(project_config) = load_project_config()? {
        config = merge_configs(config, project_config);
    }

    validate_config(&config)?;

    Ok(config)
}

/// Load the user configuration from ~/.syncline/config.toml.
fn load_user_config() -> Result<Option<CoreConfig>, ConfigError> {
    let Some(home_dir) = dirs::home_dir() else {
        return Ok(None);
    };
    load_config_file(&home_dir.join(".syncline").join("config.toml"))
}

/// Load the project configuration from ./.syncline/config.toml.
fn load_project_config() -> Result<Option<CoreConfig>, ConfigError> {
    let cwd = std::env::current_dir()?;
    load_config_file(&cwd.join(".syncline").join("config.toml"))
}

/// Load a configuration file from the given path. Missing file yields `None`.
fn load_config_file(path: &PathBuf) -> Result<Option<CoreConfig>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::IoError { source: e }),
    };
    let config: CoreConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ConfigParseError {
            message: format!("'{}': {}", path.display(), e),
        })?;
    Ok(Some(config))
}

/// Merge two configurations, with override_config taking precedence.
///
/// Optional fields from the override replace base values only when present.
pub fn merge_configs(base: CoreConfig, override_config: CoreConfig) -> CoreConfig {
    CoreConfig {
        scheduler: SchedulerConfig {
            cache_grace_ms: override_config
                .scheduler
                .cache_grace_ms
                .or(base.scheduler.cache_grace_ms),
            retry_interval_ms: override_config
                .scheduler
                .retry_interval_ms
                .or(base.scheduler.retry_interval_ms),
        },
        pairing: PairingConfig {
            credential_ttl_secs: override_config
                .pairing
                .credential_ttl_secs
                .or(base.pairing.credential_ttl_secs),
            tick_ms: override_config.pairing.tick_ms.or(base.pairing.tick_ms),
            scan_poll_secs: override_config
                .pairing
                .scan_poll_secs
                .or(base.pairing.scan_poll_secs),
            linked_poll_secs: override_config
                .pairing
                .linked_poll_secs
                .or(base.pairing.linked_poll_secs),
        },
        notifications: NotificationConfig {
            max_entries: override_config
                .notifications
                .max_entries
                .or(base.notifications.max_entries),
            persisted_entries: override_config
                .notifications
                .persisted_entries
                .or(base.notifications.persisted_entries),
        },
    }
}

/// Validate the final merged configuration.
fn validate_config(config: &CoreConfig) -> Result<(), ConfigError> {
    if config.pairing.credential_ttl_secs.is_some_and(|t| t <= 0) {
        return Err(ConfigError::InvalidConfiguration {
            message: "pairing.credential_ttl_secs must be positive".to_string(),
        });
    }
    if config.pairing.tick_ms.is_some_and(|t| t == 0) {
        return Err(ConfigError::InvalidConfiguration {
            message: "pairing.tick_ms must be positive".to_string(),
        });
    }
    if config
        .notifications
        .persisted_entries
        .unwrap_or(20)
        > config.notifications.max_entries.unwrap_or(50)
    {
        return Err(ConfigError::InvalidConfiguration {
            message: "notifications.persisted_entries cannot exceed max_entries".to_string(),
        });
    }
    Ok(())
}
