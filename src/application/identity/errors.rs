use thiserror::Error;

use crate::domain::identity::IdentityKind;
use crate::ports::security::DeviceError;

/// Errors raised by [`super::IdentityProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("operation is only valid for {expected:?} identities")]
    WrongIdentityKind { expected: IdentityKind },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("security device error: {0}")]
    Device(#[from] DeviceError),
}
