//! Provider selection.
//!
//! A single provider is selected once at startup. "Not configured" is
//! a legitimate state (the email-link path takes over); a configured
//! name with no matching adapter, or missing credentials, is a
//! misconfiguration and fails loudly.

use styresign_core::{ConfigError, ProviderKey, SigningProvider};
use styresign_dokobit::{DokobitConfig, DokobitProvider};
use styresign_signicat::{SignicatConfig, SignicatProvider};

pub const PROVIDER_ENV_VAR: &str = "SIGNING_PROVIDER";

/// Maps the provider setting to a key. Unset or empty means signing by
/// provider is disabled; an unrecognized name is an error, never a
/// silent fallback.
pub fn configured_provider_key(value: Option<&str>) -> Result<Option<ProviderKey>, ConfigError> {
    match value.map(str::trim).filter(|name| !name.is_empty()) {
        None => Ok(None),
        Some(name) => name
            .parse::<ProviderKey>()
            .map(Some)
            .map_err(|_| ConfigError::UnknownProvider(name.to_string())),
    }
}

/// Builds the configured adapter from the environment.
pub fn provider_from_env() -> Result<Option<Box<dyn SigningProvider>>, ConfigError> {
    let setting = std::env::var(PROVIDER_ENV_VAR).ok();
    let provider: Box<dyn SigningProvider> = match configured_provider_key(setting.as_deref())? {
        None => return Ok(None),
        Some(ProviderKey::Dokobit) => Box::new(DokobitProvider::new(DokobitConfig::from_env()?)),
        Some(ProviderKey::Signicat) => {
            Box::new(SignicatProvider::new(SignicatConfig::from_env()?))
        }
    };
    Ok(Some(provider))
}
