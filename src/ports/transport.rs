//! Transport boundary between the registration session and a concrete wire
//! protocol.
//!
//! A transport drives its own connection/handshake state machine inside
//! `poll()`. Whatever it needs from the session (challenge answers, reply
//! parsing) or reports to it (status, terminal reply) goes through the
//! [`TransportEvents`] handler passed into the call. The handler is a typed
//! borrow of the session core; transports never retain it between calls.

use zeroize::Zeroizing;

use crate::domain::config::OperationIdPolicy;
use crate::domain::identity::IdentityKind;
use crate::domain::proxy::{ProxyError, ProxyOptions};
use crate::domain::reply::{RegistrationReply, ReplyError};
use crate::ports::amqp::LinkError;

/// Progress notifications raised by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// The transport is open (and again once its links are up).
    Connected,
    /// The service accepted the device credential.
    Authenticated,
    /// The service knows the device but has not started assignment.
    Unassigned,
    /// Assignment is in progress; poll the operation status.
    Assigning,
}

/// Why a registration attempt failed inside the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The reply payload could not be parsed.
    Parse,
    /// Connection, session, link or send failure.
    Link,
    /// The credential challenge could not be answered.
    Challenge,
    /// The service refused the device (blacklisted).
    Unauthorized,
    /// The service reported a failed registration.
    Service,
}

/// Terminal outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportReply {
    Assigned {
        /// Wrapped device credential delivered for hardware identities.
        auth_key: Option<Zeroizing<Vec<u8>>>,
        assigned_endpoint: String,
        device_id: String,
    },
    Failed(TransportFailure),
}

/// Errors returned synchronously by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("hardware identity requires endorsement and storage keys")]
    MissingKeys,
    #[error("operation not supported for {0:?} identities")]
    WrongIdentityKind(IdentityKind),
    #[error("proxy options rejected: {0}")]
    Proxy(#[from] ProxyError),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

/// Creation parameters shared by every transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    /// Global provisioning endpoint host name.
    pub uri: String,
    pub identity_kind: IdentityKind,
    pub scope_id: String,
    pub registration_id: String,
    pub api_version: String,
    /// What `register_device` does with a stale operation id.
    pub operation_id_policy: OperationIdPolicy,
}

/// Callbacks a transport raises into its owner.
pub trait TransportEvents {
    /// Progress notification.
    fn on_status(&mut self, status: TransportStatus);

    /// Terminal outcome of the current attempt.
    fn on_reply(&mut self, reply: TransportReply);

    /// Answer a credential challenge (hardware identities only). `None`
    /// aborts the handshake.
    fn on_challenge(&mut self, nonce: &[u8], key_name: &str) -> Option<String>;

    /// Parse a raw reply payload into its normalized form.
    ///
    /// # Errors
    /// Returns [`ReplyError`] if the payload is malformed or incomplete.
    fn parse_reply(&mut self, payload: &str) -> Result<RegistrationReply, ReplyError>;
}

/// Capability set every concrete wire transport provides.
///
/// Creation goes through [`TransportFactory`]; destruction is `Drop`.
pub trait TransportProvider {
    /// Store key material and start the connection on the next `poll()`.
    /// Emits [`TransportStatus::Connected`] immediately. Key buffers are
    /// copied; the caller keeps ownership of its own.
    ///
    /// # Errors
    /// [`TransportError::MissingKeys`] when a hardware identity omits a key.
    fn open(
        &mut self,
        endorsement_key: Option<&[u8]>,
        storage_root_key: Option<&[u8]>,
        events: &mut dyn TransportEvents,
    ) -> Result<(), TransportError>;

    /// Tear everything down. Idempotent.
    fn close(&mut self);

    /// Queue a registration request.
    ///
    /// # Errors
    /// [`TransportError::InvalidState`] if a registration is in flight or the
    /// transport is in its error state.
    fn register_device(&mut self) -> Result<(), TransportError>;

    /// Queue an operation-status request for the captured operation id.
    ///
    /// # Errors
    /// [`TransportError::InvalidState`] if no operation id is known or the
    /// transport is in its error state.
    fn get_operation_status(&mut self) -> Result<(), TransportError>;

    /// Run one cooperative turn.
    fn poll(&mut self, events: &mut dyn TransportEvents);

    fn set_trace(&mut self, enabled: bool);

    /// Set the X.509 client certificate and private key.
    ///
    /// # Errors
    /// [`TransportError::WrongIdentityKind`] for hardware identities.
    fn set_client_cert(&mut self, certificate: &str, private_key: &str)
    -> Result<(), TransportError>;

    /// Replace (or clear with `None`) the trusted root certificates.
    ///
    /// # Errors
    /// [`TransportError::InvalidArgument`] for an empty certificate string.
    fn set_trusted_cert(&mut self, certificate: Option<&str>) -> Result<(), TransportError>;

    /// Replace the HTTP proxy configuration.
    ///
    /// # Errors
    /// [`TransportError::Proxy`] if the options are inconsistent.
    fn set_proxy(&mut self, proxy: &ProxyOptions) -> Result<(), TransportError>;
}

/// Builds one transport for a session.
pub trait TransportFactory {
    /// # Errors
    /// [`TransportError::InvalidArgument`] for empty parameters.
    fn create(self, params: TransportParams) -> Result<Box<dyn TransportProvider>, TransportError>;
}
