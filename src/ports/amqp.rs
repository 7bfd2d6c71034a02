//! AMQP primitive ports.
//!
//! The byte-level AMQP stack (framing, TLS, WebSocket, proxy tunnelling, SASL
//! frame exchange) is an external collaborator. The transport state machine
//! only needs a connection that can open a session, attach two one-way links,
//! send a message and report what happened during a cooperative `do_work`
//! turn. Everything the connection learns is pushed back synchronously through
//! [`ConnectionEvents`]; no callbacks are retained across turns.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::domain::proxy::ProxyOptions;

/// Failure reported by the AMQP primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The underlying IO (socket, TLS, WebSocket, proxy) could not be created.
    #[error("io setup failed: {0}")]
    Io(String),
    /// AMQP connection or session could not be created.
    #[error("session setup failed: {0}")]
    Session(String),
    /// A link could not be attached.
    #[error("link attach failed: {0}")]
    Link(String),
    /// A message could not be queued for sending.
    #[error("send failed: {0}")]
    Send(String),
    /// The connection was already closed.
    #[error("connection closed")]
    Closed,
}

/// Direction of a one-way link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Client → service requests.
    Sender,
    /// Service → client replies.
    Receiver,
}

/// Observable state of a link endpoint (message sender or receiver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Opening,
    Open,
    Closing,
    Error,
}

/// Attach request for one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub name: &'static str,
    pub role: LinkRole,
    pub source: String,
    pub target: String,
    pub max_message_size: u64,
}

/// Outcome of a queued send, reported once per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    Error,
    Timeout,
    /// The connection was closed while the send was still pending.
    Cancelled,
}

/// Body of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Binary data section(s), concatenated.
    Data(Vec<u8>),
    /// An `amqp-value` section rendered as text.
    Value(String),
    /// No body at all.
    Empty,
}

/// Message delivered on the receiver link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub body: MessageBody,
    pub application_properties: BTreeMap<String, String>,
}

/// Message queued on the sender link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub application_properties: BTreeMap<String, String>,
}

/// Settlement returned for an inbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Rejected { condition: String, description: String },
}

/// Parameters of the SASL TPM mechanism negotiated during connection
/// bring-up for hardware identities.
#[derive(Clone)]
pub struct SaslTpmParams {
    pub registration_id: String,
    pub hostname: String,
    pub endorsement_key: Zeroizing<Vec<u8>>,
    pub storage_root_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SaslTpmParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslTpmParams")
            .field("registration_id", &self.registration_id)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

/// WebSocket framing parameters (AMQP over WebSocket only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketParams {
    pub protocol: &'static str,
    pub resource: &'static str,
}

/// Everything the connector needs to bring up one AMQP connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectParams<'a> {
    pub hostname: &'a str,
    pub port: u16,
    pub container_id: &'a str,
    pub websocket: Option<WebSocketParams>,
    pub sasl_tpm: Option<&'a SaslTpmParams>,
    pub proxy: Option<&'a ProxyOptions>,
    pub trusted_cert: Option<&'a str>,
    /// `(certificate, private_key)` PEM pair for X.509 client authentication.
    pub client_cert: Option<(&'a str, &'a str)>,
    pub trace: bool,
}

/// Events raised by a connection during `do_work` / `close`.
pub trait ConnectionEvents {
    /// A link endpoint changed state.
    fn on_link_state(&mut self, role: LinkRole, new_state: LinkState, previous: LinkState);

    /// A message arrived on the receiver link. The returned disposition
    /// settles the delivery.
    fn on_message(&mut self, message: InboundMessage) -> Disposition;

    /// A previously queued send finished.
    fn on_send_complete(&mut self, result: SendResult);

    /// The SASL TPM mechanism received a challenge and needs a credential.
    /// `None` aborts the SASL exchange.
    fn on_sasl_challenge(&mut self, challenge: &[u8]) -> Option<String>;
}

/// One AMQP connection with at most one session.
pub trait AmqpConnection {
    /// Begin the AMQP session used by both links.
    ///
    /// # Errors
    /// Returns [`LinkError::Session`] if the session cannot be created.
    fn begin_session(
        &mut self,
        incoming_window: u32,
        outgoing_window: u32,
    ) -> Result<(), LinkError>;

    /// Attach a link on the session and start opening it.
    ///
    /// # Errors
    /// Returns [`LinkError::Link`] if the link cannot be created or opened.
    fn attach_link(&mut self, spec: LinkSpec) -> Result<(), LinkError>;

    /// Queue a message on the sender link.
    ///
    /// # Errors
    /// Returns [`LinkError::Send`] if the message cannot be queued.
    fn send(&mut self, message: OutboundMessage) -> Result<(), LinkError>;

    /// Run one cooperative turn of IO and protocol processing.
    fn do_work(&mut self, events: &mut dyn ConnectionEvents);

    /// Toggle frame tracing on the connection.
    fn set_trace(&mut self, enabled: bool);

    /// Detach links, end the session and close the connection. Sends still
    /// pending are completed with [`SendResult::Cancelled`].
    fn close(&mut self, events: &mut dyn ConnectionEvents);
}

/// Factory for connections (TLS socket, WebSocket, proxy tunnel ...).
pub trait AmqpConnector {
    /// Create the IO stack and the AMQP connection over it.
    ///
    /// # Errors
    /// Returns [`LinkError::Io`] or [`LinkError::Session`] on failure.
    fn connect(
        &mut self,
        params: &ConnectParams<'_>,
    ) -> Result<Box<dyn AmqpConnection>, LinkError>;
}
