pub mod amqp;
pub mod tracing;

use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value {value:?} for environment variable {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Deployment environment, resolved from `APP_ENV`.
///
/// Anything other than "production" (case-insensitive) is development,
/// so a typo degrades to the verbose-logging mode rather than the
/// quiet one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Resolve from `APP_ENV`; unset means development.
    pub fn detect() -> Self {
        env::var("APP_ENV")
            .map(|raw| raw.parse().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_development(self) -> bool {
        !self.is_production()
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(if raw.eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        })
    }
}

/// Read and parse an environment variable.
///
/// Returns `Ok(None)` when the variable is unset; a set-but-unparsable
/// value is an error that names the variable and the offending value.
/// This is the one primitive the `env_or`/`env_required` conveniences
/// build on, so every config value in the workspace fails the same way.
pub fn env_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Ok(raw) = env::var(key) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
            value: raw,
        })
}

/// Read and parse an environment variable, falling back when unset.
pub fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(env_var(key)?.unwrap_or(default))
}

/// Read and parse an environment variable, erroring when unset.
pub fn env_required<T>(key: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env_var(key)?.ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// Basic application identity for health endpoints and startup logs.
#[derive(Clone, Debug)]
pub struct AppInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// Capture the calling crate's name and version from Cargo metadata.
#[macro_export]
macro_rules! app_info {
    () => {
        $crate::AppInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_environment_from_app_env() {
        temp_env::with_var("APP_ENV", Some("production"), || {
            assert!(Environment::detect().is_production());
        });
        temp_env::with_var("APP_ENV", Some("PrOdUcTiOn"), || {
            assert!(Environment::detect().is_production());
        });
    }

    #[test]
    fn unknown_or_unset_app_env_means_development() {
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert!(Environment::detect().is_development());
        });
        temp_env::with_var_unset("APP_ENV", || {
            assert_eq!(Environment::detect(), Environment::Development);
        });
    }

    #[test]
    fn env_var_parses_typed_values() {
        temp_env::with_var("CFG_PORT", Some("9090"), || {
            assert_eq!(env_var::<u16>("CFG_PORT").unwrap(), Some(9090));
        });
        temp_env::with_var_unset("CFG_PORT", || {
            assert_eq!(env_var::<u16>("CFG_PORT").unwrap(), None);
        });
    }

    #[test]
    fn env_var_error_names_key_and_value() {
        temp_env::with_var("CFG_COUNT", Some("lots"), || {
            let message = env_var::<u32>("CFG_COUNT").unwrap_err().to_string();
            assert!(message.contains("CFG_COUNT"));
            assert!(message.contains("lots"));
        });
    }

    #[test]
    fn env_or_falls_back_only_when_unset() {
        temp_env::with_var("CFG_RETRIES", Some("7"), || {
            assert_eq!(env_or("CFG_RETRIES", 3u32).unwrap(), 7);
        });
        temp_env::with_var_unset("CFG_RETRIES", || {
            assert_eq!(env_or("CFG_RETRIES", 3u32).unwrap(), 3);
        });
        // A set-but-garbage value is still an error, not the default
        temp_env::with_var("CFG_RETRIES", Some("several"), || {
            assert!(env_or("CFG_RETRIES", 3u32).is_err());
        });
    }

    #[test]
    fn env_required_errors_when_unset() {
        temp_env::with_var("CFG_SECRET", Some("s3cret"), || {
            let value: String = env_required("CFG_SECRET").unwrap();
            assert_eq!(value, "s3cret");
        });
        temp_env::with_var_unset("CFG_SECRET", || {
            let message = env_required::<String>("CFG_SECRET").unwrap_err().to_string();
            assert!(message.contains("CFG_SECRET"));
            assert!(message.contains("missing"));
        });
    }

    #[test]
    fn app_info_macro_reads_cargo_metadata() {
        let info = app_info!();
        assert_eq!(info.name, "core_config");
        assert!(!info.version.is_empty());
    }
}
