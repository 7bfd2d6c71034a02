// src/adapters/security/software_tpm.rs
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::domain::activation::ActivationBlob;
use crate::ports::security::{DeviceError, TpmDevice};

type HmacSha256 = Hmac<Sha256>;

/// In-process stand-in for a TPM.
///
/// Keys are plain byte strings held in memory. `import_key` accepts a
/// credential activation blob and installs its encrypted payload as the
/// identity key; `sign` is HMAC-SHA256 under that key. There is no real key
/// wrapping here, so this device is meant for simulators and tests, not for
/// production hardware.
pub struct SoftwareTpm {
    endorsement_key: Vec<u8>,
    storage_root_key: Vec<u8>,
    identity_key: Option<Zeroizing<Vec<u8>>>,
}

impl SoftwareTpm {
    pub fn new(endorsement_key: impl Into<Vec<u8>>, storage_root_key: impl Into<Vec<u8>>) -> Self {
        Self {
            endorsement_key: endorsement_key.into(),
            storage_root_key: storage_root_key.into(),
            identity_key: None,
        }
    }

    /// Preload an identity key (as if a previous activation had succeeded).
    #[must_use]
    pub fn with_identity_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.identity_key = Some(Zeroizing::new(key.into()));
        self
    }

    #[must_use]
    pub fn has_identity_key(&self) -> bool {
        self.identity_key.is_some()
    }
}

impl TpmDevice for SoftwareTpm {
    fn endorsement_key(&self) -> Result<Vec<u8>, DeviceError> {
        Ok(self.endorsement_key.clone())
    }

    fn storage_root_key(&self) -> Result<Vec<u8>, DeviceError> {
        Ok(self.storage_root_key.clone())
    }

    fn import_key(&mut self, key_blob: &[u8]) -> Result<(), DeviceError> {
        let blob =
            ActivationBlob::parse(key_blob).map_err(|e| DeviceError::Rejected(e.to_string()))?;
        if blob.encrypted_data.is_empty() {
            return Err(DeviceError::Rejected("activation blob carries no key".into()));
        }
        debug!(key_len = blob.encrypted_data.len(), "software tpm imported identity key");
        self.identity_key = Some(Zeroizing::new(blob.encrypted_data.clone()));
        Ok(())
    }

    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let key = self
            .identity_key
            .as_ref()
            .ok_or_else(|| DeviceError::Unavailable("no identity key loaded".into()))?;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| DeviceError::Rejected("identity key rejected by HMAC".into()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_with_key(key: &[u8]) -> Vec<u8> {
        ActivationBlob {
            credential_blob: vec![1],
            encrypted_secret: vec![2],
            duplicate_private: vec![3],
            encrypted_wrap_key: vec![4],
            public_area: vec![5],
            encrypted_data: key.to_vec(),
        }
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn sign_requires_identity_key() {
        let mut tpm = SoftwareTpm::new(b"ek".to_vec(), b"srk".to_vec());
        assert!(matches!(tpm.sign(b"data"), Err(DeviceError::Unavailable(_))));
    }

    #[test]
    fn import_installs_payload_as_hmac_key() {
        let mut tpm = SoftwareTpm::new(b"ek".to_vec(), b"srk".to_vec());
        tpm.import_key(&blob_with_key(b"k1")).unwrap();
        let first = tpm.sign(b"data").unwrap();
        assert_eq!(first.len(), 32);

        let mut reference = HmacSha256::new_from_slice(b"k1").unwrap();
        reference.update(b"data");
        assert_eq!(first, reference.finalize().into_bytes().to_vec());

        tpm.import_key(&blob_with_key(b"k2")).unwrap();
        assert_ne!(tpm.sign(b"data").unwrap(), first);
    }

    #[test]
    fn malformed_or_empty_blob_rejected() {
        let mut tpm = SoftwareTpm::new(b"ek".to_vec(), b"srk".to_vec());
        assert!(matches!(tpm.import_key(&[0, 9, 1]), Err(DeviceError::Rejected(_))));
        assert!(matches!(tpm.import_key(&blob_with_key(b"")), Err(DeviceError::Rejected(_))));
        assert!(!tpm.has_identity_key());
    }
}
