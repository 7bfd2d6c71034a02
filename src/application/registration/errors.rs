use thiserror::Error;

use crate::application::identity::IdentityError;
use crate::domain::config::ConfigError;
use crate::ports::security::DeviceError;
use crate::ports::transport::{TransportError, TransportFailure};

/// Caller-facing error taxonomy, returned by session operations and passed
/// to the error callback once per failed registration attempt.
///
/// Every value is recoverable: after the error callback fires the session is
/// back in `Ready` and a fresh `register()` may be issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisioningError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    Memory,

    /// Reply JSON malformed or missing a required field.
    #[error("registration reply could not be parsed")]
    Parsing,

    /// Send, receive or connect failure in the transport.
    #[error("transport failure")]
    Transport,

    #[error("operation not valid in the current state")]
    InvalidState,

    /// The service rejected the device's proof of possession.
    #[error("device authentication rejected by the service")]
    DeviceAuthError,

    #[error("no reply from the provisioning service in time")]
    Timeout,

    /// A service-delivered credential could not be imported.
    #[error("credential key could not be imported")]
    KeyError,
}

impl From<IdentityError> for ProvisioningError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Device(DeviceError::OutOfMemory) => Self::Memory,
            IdentityError::Device(_) => Self::KeyError,
            IdentityError::InvalidArgument(what) => Self::InvalidArgument(what.to_string()),
            IdentityError::WrongIdentityKind { .. } => Self::InvalidState,
        }
    }
}

impl From<TransportError> for ProvisioningError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::InvalidState(_) => Self::InvalidState,
            TransportError::Link(_) => Self::Transport,
            TransportError::InvalidArgument(_)
            | TransportError::MissingKeys
            | TransportError::WrongIdentityKind(_)
            | TransportError::Proxy(_) => Self::InvalidArgument(e.to_string()),
        }
    }
}

impl From<TransportFailure> for ProvisioningError {
    fn from(f: TransportFailure) -> Self {
        match f {
            TransportFailure::Parse => Self::Parsing,
            TransportFailure::Unauthorized => Self::DeviceAuthError,
            TransportFailure::Link | TransportFailure::Challenge | TransportFailure::Service => {
                Self::Transport
            }
        }
    }
}

impl From<ConfigError> for ProvisioningError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}
