pub mod software_tpm;
pub mod static_x509;

pub use software_tpm::SoftwareTpm;
pub use static_x509::StaticX509;
