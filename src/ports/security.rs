// src/ports/security.rs
//! Security device ports.
//!
//! The provisioning engine never talks to a TPM or a certificate store
//! directly. It consumes one of two capability sets:
//! - [`TpmDevice`] for hardware proof-of-possession identities (endorsement
//!   key, storage root key, key import and signing).
//! - [`X509Device`] for certificate-backed identities (device certificate,
//!   alias private key, certificate common name).
//!
//! Implementations own all key material; buffers handed out through these
//! traits are copies the caller may drop (and should zeroize) as soon as it is
//! done with them.

/// Failure reported by a security device implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device (or the requested object on it) is not reachable.
    #[error("security device unavailable: {0}")]
    Unavailable(String),
    /// The device could not allocate resources for the request.
    #[error("security device out of memory")]
    OutOfMemory,
    /// The device refused the operation (bad key blob, policy failure, ...).
    #[error("security device rejected the operation: {0}")]
    Rejected(String),
}

/// Capability set of a TPM-style hardware module.
///
/// Contract:
/// - `endorsement_key()` is stable for the lifetime of the device; the
///   registration id is derived from it.
/// - `import_key()` replaces the key used by subsequent `sign()` calls.
/// - `sign()` is a bounded-latency synchronous call; it runs inside a poll
///   turn of the registration session.
pub trait TpmDevice {
    /// Public endorsement key bytes.
    ///
    /// # Errors
    /// Returns a [`DeviceError`] if the key cannot be read.
    fn endorsement_key(&self) -> Result<Vec<u8>, DeviceError>;

    /// Public storage root key bytes.
    ///
    /// # Errors
    /// Returns a [`DeviceError`] if the key cannot be read.
    fn storage_root_key(&self) -> Result<Vec<u8>, DeviceError>;

    /// Load a service-delivered wrapped key into the device.
    ///
    /// # Errors
    /// Returns a [`DeviceError`] if the blob cannot be activated.
    fn import_key(&mut self, key_blob: &[u8]) -> Result<(), DeviceError>;

    /// Sign `data` with the currently loaded identity key.
    ///
    /// # Errors
    /// Returns a [`DeviceError`] if no key is loaded or signing fails.
    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, DeviceError>;
}

/// Capability set of a certificate-backed identity (DICE/RIoT style or a
/// plain certificate store).
pub trait X509Device {
    /// PEM encoded device certificate (chain).
    ///
    /// # Errors
    /// Returns a [`DeviceError`] if the certificate cannot be produced.
    fn certificate(&self) -> Result<String, DeviceError>;

    /// PEM encoded private key matching the device certificate.
    ///
    /// # Errors
    /// Returns a [`DeviceError`] if the key cannot be produced.
    fn alias_key(&self) -> Result<String, DeviceError>;

    /// Common name of the device certificate subject.
    ///
    /// # Errors
    /// Returns a [`DeviceError`] if the certificate has no usable CN.
    fn common_name(&self) -> Result<String, DeviceError>;
}
