/// Which proof-of-possession scheme backs a device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// TPM-style hardware module: endorsement key, challenge/response.
    HardwareProof,
    /// X.509 certificate and private key presented during the TLS handshake.
    CertificateProof,
}

impl IdentityKind {
    #[must_use]
    pub fn is_hardware(self) -> bool {
        matches!(self, Self::HardwareProof)
    }
}
