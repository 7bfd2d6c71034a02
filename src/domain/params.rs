/// ---- Protocol constants ----
/// Values fixed by the provisioning service protocol. Tunables that a caller
/// may reasonably change live in [`crate::domain::config::ProvisioningConfig`]
/// and default to the values below.
pub const CLIENT_VERSION: &str = "1.1.01";
pub const DEFAULT_API_VERSION: &str = "2017-08-31-preview";

pub(crate) const DEFAULT_STATUS_THROTTLE_SECS: u64 = 2;
pub(crate) const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 60;
pub(crate) const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
pub(crate) const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 3;
/// Upper bound accepted for `token_lifetime_secs` (one year).
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 3600;

/// Key name the service uses for hardware identity challenges.
pub const SAS_KEY_NAME: &str = "registration";

/// Token prefix of a shared access signature.
pub(crate) const SAS_TOKEN_PREFIX: &str = "SharedAccessSignature";

/// `set_option` names.
pub const OPTION_TRUSTED_CERT: &str = "TrustedCerts";
pub const OPTION_LOG_TRACE: &str = "logtrace";
pub const OPTION_HTTP_PROXY: &str = "proxy_data";

/// `<scope_id>/registrations/<registration_id>`, shared by token scopes and
/// AMQP link addresses.
#[must_use]
pub fn registration_path(scope_id: &str, registration_id: &str) -> String {
    format!("{scope_id}/registrations/{registration_id}")
}
