use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("proxy host address must not be empty")]
    EmptyHost,
    #[error("proxy username and password must be supplied together")]
    IncompleteCredentials,
}

/// HTTP proxy used to tunnel the provisioning connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    pub host_address: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyOptions {
    /// Proxy without authentication.
    pub fn new(host_address: impl Into<String>, port: u16) -> Self {
        Self { host_address: host_address.into(), port, username: None, password: None }
    }

    /// Attach basic credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Host must be present; username and password are all-or-nothing.
    ///
    /// # Errors
    /// Returns [`ProxyError`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.host_address.is_empty() {
            return Err(ProxyError::EmptyHost);
        }
        match (&self.username, &self.password) {
            (Some(_), None) | (None, Some(_)) => Err(ProxyError::IncompleteCredentials),
            _ => Ok(()),
        }
    }
}

// Password stays out of logs.
impl std::fmt::Debug for ProxyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyOptions")
            .field("host_address", &self.host_address)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
