//! Use-case layer: the device identity and the registration state machine
//! driving a transport.

pub mod identity;
pub mod registration;

pub use identity::{IdentityError, IdentityProvider};
pub use registration::{
    DeviceAssignment, ProvisioningError, RegistrationSession, RegistrationState,
    RegistrationStatus,
};
