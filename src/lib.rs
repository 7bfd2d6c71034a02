//! Crate root for `devprov`, a device provisioning protocol client.
//!
//! A device that has never been provisioned registers with the provisioning
//! service, proves possession of its hardware key (TPM-style challenge and
//! shared access signature) or presents an X.509 certificate, and polls until
//! the service assigns it to an endpoint.
//!
//! High-level tree:
//! * `application::registration` – `RegistrationSession`, the top-level
//!   cooperative state machine the caller drives with `poll()`.
//! * `application::identity` – `IdentityProvider` and the token algorithm.
//! * `adapters::amqp` – AMQP (TLS or WebSocket) transport state machine over
//!   an injected connection primitive.
//! * `ports` – trait seams: security device, AMQP primitives, transport,
//!   clock, reply parser.
//! * `domain` – reply model, configuration, proxy options, activation blob.
//! * `core::codec` – base-32 codec used for registration ids.
//!
//! The library logs through `tracing` and never installs a subscriber.
pub mod adapters;
pub mod application;
pub mod core;
pub mod domain;
pub mod ports;
#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

pub use application::{
    DeviceAssignment, IdentityProvider, ProvisioningError, RegistrationSession, RegistrationState,
    RegistrationStatus,
};

/// Client version reported by this crate.
#[must_use]
pub fn version() -> &'static str {
    domain::params::CLIENT_VERSION
}
