//! JSON configuration delivery through environment variables

use serde::de::DeserializeOwned;

use crate::error::ConfigError;

/// Parse a JSON configuration document stored in the named environment
/// variable.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] when the variable is unset or blank,
/// and [`ConfigError::Parse`] when its contents are not valid JSON for `T`.
pub fn from_env<T: DeserializeOwned>(env_key: &str) -> Result<T, ConfigError> {
    let raw = std::env::var(env_key).unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::MissingEnv(env_key.to_string()));
    }
    serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
        env: env_key.to_string(),
        source,
    })
}
