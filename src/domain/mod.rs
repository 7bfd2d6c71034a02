//! Pure provisioning types: replies, identity kinds, configuration, proxy
//! options and the TPM activation blob layout.

pub mod activation;
pub mod config;
pub mod identity;
pub mod params;
pub mod proxy;
pub mod reply;

pub use activation::{ActivationBlob, BlobError};
pub use config::{ConfigError, OperationIdPolicy, OptionValue, ProvisioningConfig};
pub use identity::IdentityKind;
pub use proxy::{ProxyError, ProxyOptions};
pub use reply::{RegistrationReply, ReplyError, ReplyStatus};
