use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::params::{
    DEFAULT_API_VERSION, DEFAULT_MAX_AUTH_ATTEMPTS, DEFAULT_REPLY_TIMEOUT_SECS,
    DEFAULT_STATUS_THROTTLE_SECS, DEFAULT_TOKEN_LIFETIME_SECS, MAX_TOKEN_LIFETIME_SECS,
};
use crate::domain::proxy::ProxyOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("`{field}` must not exceed {max}")]
    TooLarge { field: &'static str, max: u64 },
    #[error("api_version must not be empty")]
    EmptyApiVersion,
}

/// What `register_device` does with an operation id left over from an
/// earlier attempt that never completed.
///
/// Only reachable when a transport is driven directly: `RegistrationSession`
/// closes its transport after every terminal outcome, and closing discards
/// the operation id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationIdPolicy {
    /// Drop the stale id and start a fresh registration.
    #[default]
    Reset,
    /// Refuse the registration with `InvalidState`.
    FailFast,
}

/// Registration session tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Minimum spacing between operation-status requests.
    pub status_throttle_secs: u64,
    /// Maximum wait for a reply (and for connection bring-up).
    pub reply_timeout_secs: u64,
    /// Lifetime of challenge tokens.
    pub token_lifetime_secs: u64,
    /// Challenges answered per registration before refusing.
    pub max_auth_attempts: u32,
    pub api_version: String,
    pub operation_id_policy: OperationIdPolicy,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            status_throttle_secs: DEFAULT_STATUS_THROTTLE_SECS,
            reply_timeout_secs: DEFAULT_REPLY_TIMEOUT_SECS,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
            api_version: DEFAULT_API_VERSION.to_string(),
            operation_id_policy: OperationIdPolicy::Reset,
        }
    }
}

impl ProvisioningConfig {
    /// Load from a JSON document; omitted fields keep their defaults.
    ///
    /// # Errors
    /// [`ConfigError`] on malformed JSON, unknown fields or invalid values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// [`ConfigError`] if a timing value is zero, the token lifetime exceeds
    /// [`MAX_TOKEN_LIFETIME_SECS`] or the api version is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reply_timeout_secs == 0 {
            return Err(ConfigError::Zero("reply_timeout_secs"));
        }
        if self.token_lifetime_secs == 0 {
            return Err(ConfigError::Zero("token_lifetime_secs"));
        }
        if self.token_lifetime_secs > MAX_TOKEN_LIFETIME_SECS {
            return Err(ConfigError::TooLarge {
                field: "token_lifetime_secs",
                max: MAX_TOKEN_LIFETIME_SECS,
            });
        }
        if self.max_auth_attempts == 0 {
            return Err(ConfigError::Zero("max_auth_attempts"));
        }
        if self.api_version.is_empty() {
            return Err(ConfigError::EmptyApiVersion);
        }
        Ok(())
    }

    pub(crate) fn status_throttle_ms(&self) -> u64 {
        self.status_throttle_secs.saturating_mul(1000)
    }

    pub(crate) fn reply_timeout_ms(&self) -> u64 {
        self.reply_timeout_secs.saturating_mul(1000)
    }
}

/// Value passed to `RegistrationSession::set_option`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Text option; `None` clears it.
    Text(Option<String>),
    Bool(bool),
    Proxy(ProxyOptions),
}
