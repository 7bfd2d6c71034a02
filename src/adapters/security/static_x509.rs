use zeroize::Zeroizing;

use crate::ports::security::{DeviceError, X509Device};

/// Certificate identity backed by PEM text held in memory.
///
/// The common name is supplied by the caller rather than parsed out of the
/// certificate; whoever provisioned the certificate already knows it.
pub struct StaticX509 {
    certificate: String,
    alias_key: Zeroizing<String>,
    common_name: String,
}

impl StaticX509 {
    pub fn new(
        certificate: impl Into<String>,
        alias_key: impl Into<String>,
        common_name: impl Into<String>,
    ) -> Self {
        Self {
            certificate: certificate.into(),
            alias_key: Zeroizing::new(alias_key.into()),
            common_name: common_name.into(),
        }
    }
}

impl X509Device for StaticX509 {
    fn certificate(&self) -> Result<String, DeviceError> {
        if self.certificate.is_empty() {
            return Err(DeviceError::Unavailable("no device certificate".into()));
        }
        Ok(self.certificate.clone())
    }

    fn alias_key(&self) -> Result<String, DeviceError> {
        if self.alias_key.is_empty() {
            return Err(DeviceError::Unavailable("no alias key".into()));
        }
        Ok(self.alias_key.to_string())
    }

    fn common_name(&self) -> Result<String, DeviceError> {
        if self.common_name.is_empty() {
            return Err(DeviceError::Rejected("certificate has no common name".into()));
        }
        Ok(self.common_name.clone())
    }
}
