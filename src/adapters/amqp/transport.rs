//! AMQP provisioning transport.
//!
//! Drives two independent axes (see `transport_types`): the connection axis
//! brings up one AMQP connection with a session and two one-way links, the
//! protocol axis walks a single register-me or operation-status request
//! through send, wait, receive and interpret. Both are advanced only from
//! `poll()`.
//!
//! Link addresses are `amqps://<host>/<scope_id>/registrations/<registration_id>`;
//! requests carry an `operation-type` application property and, once the
//! service has issued one, `operation-id`.
//!
//! Hardware identities authenticate through the SASL TPM mechanism: the
//! connection raises a challenge mid-handshake which is forwarded to the
//! owner as `on_challenge(nonce, "registration")`.

use std::collections::BTreeMap;

use tracing::{debug, error, trace, warn};
use zeroize::Zeroizing;

use super::transport_types::{AmqpFlavor, ConnectionState, ProtocolEvent, ProtocolState};
use crate::domain::config::OperationIdPolicy;
use crate::domain::identity::IdentityKind;
use crate::domain::params::{registration_path, SAS_KEY_NAME};
use crate::domain::proxy::ProxyOptions;
use crate::domain::reply::RegistrationReply;
use crate::ports::amqp::{
    AmqpConnection, AmqpConnector, ConnectParams, ConnectionEvents, Disposition, InboundMessage,
    LinkError, LinkRole, LinkSpec, LinkState, MessageBody, OutboundMessage, SaslTpmParams,
    SendResult,
};
use crate::ports::transport::{
    TransportError, TransportEvents, TransportFailure, TransportParams, TransportProvider,
    TransportReply, TransportStatus,
};

pub(crate) const ADDRESS_SCHEME: &str = "amqps";
pub(crate) const CONTAINER_ID: &str = "dps_connection";

pub(crate) const SENDER_LINK_NAME: &str = "sender_link";
pub(crate) const RECEIVER_LINK_NAME: &str = "recv_link";
const SENDER_SOURCE: &str = "remote_endpoint";
const RECEIVER_TARGET: &str = "local_endpoint";
const MAX_SENDER_MSG_SIZE: u64 = u64::MAX;
const MAX_RECV_MSG_SIZE: u64 = 65_536;
const SESSION_INCOMING_WINDOW: u32 = 2_147_483_647;
const SESSION_OUTGOING_WINDOW: u32 = 65_536;

pub const OPERATION_TYPE_PROPERTY: &str = "operation-type";
pub const OPERATION_ID_PROPERTY: &str = "operation-id";
pub const REGISTER_ME: &str = "register-me";
pub const OPERATION_STATUS: &str = "operation-status";

/// State shared between the transport and the connection event handler.
#[derive(Debug)]
struct ProtocolCore {
    kind: IdentityKind,
    connection: ConnectionState,
    protocol: ProtocolState,
    sender: LinkState,
    receiver: LinkState,
    payload: Option<String>,
    operation_id: Option<String>,
    failure: Option<TransportFailure>,
    challenge_armed: bool,
}

impl ProtocolCore {
    fn new(kind: IdentityKind) -> Self {
        Self {
            kind,
            connection: ConnectionState::Idle,
            protocol: ProtocolState::Idle,
            sender: LinkState::Idle,
            receiver: LinkState::Idle,
            payload: None,
            operation_id: None,
            failure: None,
            challenge_armed: false,
        }
    }

    fn apply(&mut self, ev: ProtocolEvent) -> Result<(), TransportError> {
        use ProtocolEvent as E;
        use ProtocolState as S;
        let old = self.protocol;
        let new = match (old, ev) {
            (S::Idle, E::Register) => S::RegisterSend,
            (S::Idle, E::QueryStatus) => S::StatusSend,
            (S::RegisterSend, E::RequestSent) => S::RegisterSent,
            (S::StatusSend, E::RequestSent) => S::StatusSent,
            (S::RegisterSent, E::ReplyReceived) => S::RegisterRecv,
            (S::StatusSent, E::ReplyReceived) => S::StatusRecv,
            (S::RegisterRecv | S::StatusRecv, E::ReplyHandled) | (_, E::Reset) => S::Idle,
            (_, E::Fail) => S::Error,
            (S::Error, _) => {
                return Err(TransportError::InvalidState(
                    "transport is in its error state; close and retry",
                ))
            }
            (_, E::Register | E::QueryStatus) => {
                return Err(TransportError::InvalidState("a request is already in flight"))
            }
            _ => return Err(TransportError::InvalidState("invalid protocol transition")),
        };
        if old != new {
            debug!(from = ?old, to = ?new, event = ?ev, "amqp protocol transition");
        }
        self.protocol = new;
        Ok(())
    }

    /// Move both axes to `Error`. The first failure of an attempt is the one
    /// reported.
    fn fail(&mut self, failure: TransportFailure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        self.connection = ConnectionState::Error;
        let _ = self.apply(ProtocolEvent::Fail);
    }

    fn reset(&mut self) {
        *self = Self::new(self.kind);
    }
}

/// Connection events during a regular `do_work` turn.
struct LinkEvents<'a> {
    core: &'a mut ProtocolCore,
    events: &'a mut dyn TransportEvents,
}

impl ConnectionEvents for LinkEvents<'_> {
    fn on_link_state(&mut self, role: LinkRole, new_state: LinkState, previous: LinkState) {
        if new_state == previous {
            return;
        }
        trace!(?role, ?new_state, ?previous, "amqp link state changed");
        match role {
            LinkRole::Sender => self.core.sender = new_state,
            LinkRole::Receiver => self.core.receiver = new_state,
        }
        match new_state {
            // a failure earlier in this turn keeps the connection in Error
            LinkState::Open
                if self.core.sender == LinkState::Open
                    && self.core.receiver == LinkState::Open
                    && self.core.connection != ConnectionState::Error =>
            {
                debug!("amqp sender and receiver links open");
                self.core.connection = ConnectionState::Connected;
                self.events.on_status(TransportStatus::Connected);
            }
            LinkState::Error => {
                error!(?role, "amqp link failed");
                self.core.fail(TransportFailure::Link);
            }
            _ => {}
        }
    }

    fn on_message(&mut self, message: InboundMessage) -> Disposition {
        match message.body {
            MessageBody::Data(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    self.core.payload = Some(text);
                    if self.core.apply(ProtocolEvent::ReplyReceived).is_err() {
                        warn!(state = ?self.core.protocol, "unsolicited reply dropped");
                        self.core.payload = None;
                    }
                }
                Err(_) => {
                    error!("reply body is not UTF-8");
                    self.core.fail(TransportFailure::Parse);
                }
            },
            MessageBody::Value(_) | MessageBody::Empty => {
                error!("reply does not carry a data body");
                self.core.fail(TransportFailure::Parse);
            }
        }
        Disposition::Accepted
    }

    fn on_send_complete(&mut self, result: SendResult) {
        if result != SendResult::Ok {
            warn!(?result, "request send did not complete");
            self.core.fail(TransportFailure::Link);
        }
    }

    fn on_sasl_challenge(&mut self, challenge: &[u8]) -> Option<String> {
        if !self.core.kind.is_hardware() || !self.core.challenge_armed {
            error!("credential challenge received with no registration armed");
            self.core.fail(TransportFailure::Challenge);
            return None;
        }
        let token = self.events.on_challenge(challenge, SAS_KEY_NAME);
        if token.is_none() {
            error!("credential challenge could not be answered");
            self.core.fail(TransportFailure::Challenge);
        }
        token
    }
}

/// Connection events while tearing down: pending sends complete as
/// cancelled and nothing reaches the owner.
struct Teardown;

impl ConnectionEvents for Teardown {
    fn on_link_state(&mut self, _role: LinkRole, _new_state: LinkState, _previous: LinkState) {}

    fn on_message(&mut self, _message: InboundMessage) -> Disposition {
        Disposition::Rejected {
            condition: "amqp:link:detach-forced".into(),
            description: "transport closing".into(),
        }
    }

    fn on_send_complete(&mut self, result: SendResult) {
        trace!(?result, "send completed during close");
    }

    fn on_sasl_challenge(&mut self, _challenge: &[u8]) -> Option<String> {
        None
    }
}

/// [`TransportProvider`] over AMQP (TLS or WebSocket).
pub struct AmqpTransport {
    flavor: AmqpFlavor,
    hostname: String,
    scope_id: String,
    registration_id: String,
    api_version: String,
    operation_id_policy: OperationIdPolicy,
    connector: Box<dyn AmqpConnector>,
    connection: Option<Box<dyn AmqpConnection>>,
    sasl: Option<SaslTpmParams>,
    endorsement_key: Option<Zeroizing<Vec<u8>>>,
    storage_root_key: Option<Zeroizing<Vec<u8>>>,
    trusted_cert: Option<String>,
    client_cert: Option<(String, Zeroizing<String>)>,
    proxy: Option<ProxyOptions>,
    trace: bool,
    core: ProtocolCore,
}

impl std::fmt::Debug for AmqpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpTransport")
            .field("flavor", &self.flavor)
            .field("hostname", &self.hostname)
            .field("registration_id", &self.registration_id)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl AmqpTransport {
    /// # Errors
    /// [`TransportError::InvalidArgument`] if any string parameter is empty.
    pub fn new(
        params: TransportParams,
        flavor: AmqpFlavor,
        connector: Box<dyn AmqpConnector>,
    ) -> Result<Self, TransportError> {
        if params.uri.is_empty() {
            return Err(TransportError::InvalidArgument("uri"));
        }
        if params.scope_id.is_empty() {
            return Err(TransportError::InvalidArgument("scope_id"));
        }
        if params.registration_id.is_empty() {
            return Err(TransportError::InvalidArgument("registration_id"));
        }
        if params.api_version.is_empty() {
            return Err(TransportError::InvalidArgument("api_version"));
        }
        Ok(Self {
            flavor,
            hostname: params.uri,
            scope_id: params.scope_id,
            registration_id: params.registration_id,
            api_version: params.api_version,
            operation_id_policy: params.operation_id_policy,
            connector,
            connection: None,
            sasl: None,
            endorsement_key: None,
            storage_root_key: None,
            trusted_cert: None,
            client_cert: None,
            proxy: None,
            trace: false,
            core: ProtocolCore::new(params.identity_kind),
        })
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection
    }

    #[must_use]
    pub fn protocol_state(&self) -> ProtocolState {
        self.core.protocol
    }

    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.core.operation_id.as_deref()
    }

    #[must_use]
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    #[must_use]
    pub fn trusted_cert(&self) -> Option<&str> {
        self.trusted_cert.as_deref()
    }

    /// Address used by both links.
    #[must_use]
    pub fn link_address(&self) -> String {
        format!(
            "{ADDRESS_SCHEME}://{}/{}",
            self.hostname,
            registration_path(&self.scope_id, &self.registration_id)
        )
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        let address = self.link_address();
        self.sasl = match self.core.kind {
            IdentityKind::HardwareProof => {
                let (Some(ek), Some(srk)) = (&self.endorsement_key, &self.storage_root_key) else {
                    return Err(LinkError::Io("endorsement and storage keys not loaded".into()));
                };
                Some(SaslTpmParams {
                    registration_id: self.registration_id.clone(),
                    hostname: self.hostname.clone(),
                    endorsement_key: ek.clone(),
                    storage_root_key: srk.clone(),
                })
            }
            IdentityKind::CertificateProof => {
                if self.client_cert.is_none() {
                    return Err(LinkError::Io("x509 client certificate not set".into()));
                }
                None
            }
        };

        let params = ConnectParams {
            hostname: &self.hostname,
            port: self.flavor.port(),
            container_id: CONTAINER_ID,
            websocket: self.flavor.websocket(),
            sasl_tpm: self.sasl.as_ref(),
            proxy: self.proxy.as_ref().filter(|_| self.flavor.supports_proxy()),
            trusted_cert: self.trusted_cert.as_deref(),
            client_cert: self.client_cert.as_ref().map(|(cert, key)| (cert.as_str(), key.as_str())),
            trace: self.trace,
        };
        let mut conn = self.connector.connect(&params)?;
        conn.begin_session(SESSION_INCOMING_WINDOW, SESSION_OUTGOING_WINDOW)?;
        conn.attach_link(LinkSpec {
            name: RECEIVER_LINK_NAME,
            role: LinkRole::Receiver,
            source: address.clone(),
            target: RECEIVER_TARGET.to_string(),
            max_message_size: MAX_RECV_MSG_SIZE,
        })?;
        conn.attach_link(LinkSpec {
            name: SENDER_LINK_NAME,
            role: LinkRole::Sender,
            source: SENDER_SOURCE.to_string(),
            target: address,
            max_message_size: MAX_SENDER_MSG_SIZE,
        })?;
        self.connection = Some(conn);
        Ok(())
    }

    fn send_request(&mut self, operation_type: &'static str) -> Result<(), LinkError> {
        let conn = self.connection.as_mut().ok_or(LinkError::Closed)?;
        let mut application_properties = BTreeMap::new();
        application_properties.insert(OPERATION_TYPE_PROPERTY.to_string(), operation_type.to_string());
        if let Some(id) = &self.core.operation_id {
            application_properties.insert(OPERATION_ID_PROPERTY.to_string(), id.clone());
        }
        conn.send(OutboundMessage { body: Vec::new(), application_properties })
    }

    fn send_step(&mut self, operation_type: &'static str) {
        match self.send_request(operation_type) {
            Ok(()) => {
                debug!(operation_type, "request queued");
                let _ = self.core.apply(ProtocolEvent::RequestSent);
            }
            Err(e) => {
                error!(error = %e, operation_type, "failed to send request");
                self.core.fail(TransportFailure::Link);
            }
        }
    }

    fn process_reply(&mut self, events: &mut dyn TransportEvents) {
        let Some(payload) = self.core.payload.take() else {
            error!("reply state reached without a buffered payload");
            self.core.fail(TransportFailure::Parse);
            return;
        };
        let reply = match events.parse_reply(&payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "unable to process registration reply");
                self.core.fail(TransportFailure::Parse);
                return;
            }
        };
        match reply {
            RegistrationReply::Unassigned { .. } | RegistrationReply::Assigning { .. } => {
                if self.core.operation_id.is_none() {
                    let Some(id) = reply.operation_id() else {
                        error!(status = ?reply.status(), "reply carries no operation id");
                        self.core.fail(TransportFailure::Parse);
                        return;
                    };
                    debug!(operation_id = id, "captured operation id");
                    self.core.operation_id = Some(id.to_string());
                }
                let status = match reply {
                    RegistrationReply::Unassigned { .. } => TransportStatus::Unassigned,
                    _ => TransportStatus::Assigning,
                };
                let _ = self.core.apply(ProtocolEvent::ReplyHandled);
                events.on_status(status);
            }
            RegistrationReply::Assigned { auth_key, assigned_endpoint, assigned_id } => {
                let _ = self.core.apply(ProtocolEvent::ReplyHandled);
                events.on_reply(TransportReply::Assigned {
                    auth_key,
                    assigned_endpoint,
                    device_id: assigned_id,
                });
            }
            RegistrationReply::Blacklisted => {
                warn!("device is blacklisted by the service");
                self.core.fail(TransportFailure::Unauthorized);
            }
            RegistrationReply::Error => {
                warn!("service reported a failed registration");
                self.core.fail(TransportFailure::Service);
            }
        }
    }

    fn dispatch(&mut self, events: &mut dyn TransportEvents) {
        match self.core.protocol {
            ProtocolState::RegisterSend => self.send_step(REGISTER_ME),
            ProtocolState::StatusSend => self.send_step(OPERATION_STATUS),
            ProtocolState::RegisterRecv | ProtocolState::StatusRecv => self.process_reply(events),
            ProtocolState::Error => {
                let failure = self.core.failure.take().unwrap_or(TransportFailure::Link);
                let _ = self.core.apply(ProtocolEvent::Reset);
                self.core.connection = ConnectionState::Idle;
                self.core.challenge_armed = false;
                events.on_reply(TransportReply::Failed(failure));
            }
            ProtocolState::Idle | ProtocolState::RegisterSent | ProtocolState::StatusSent => {}
        }
    }
}

impl TransportProvider for AmqpTransport {
    fn open(
        &mut self,
        endorsement_key: Option<&[u8]>,
        storage_root_key: Option<&[u8]>,
        events: &mut dyn TransportEvents,
    ) -> Result<(), TransportError> {
        if self.core.kind.is_hardware() && (endorsement_key.is_none() || storage_root_key.is_none())
        {
            return Err(TransportError::MissingKeys);
        }
        self.endorsement_key = endorsement_key.map(|k| Zeroizing::new(k.to_vec()));
        self.storage_root_key = storage_root_key.map(|k| Zeroizing::new(k.to_vec()));
        self.core.connection = ConnectionState::Disconnected;
        debug!(flavor = ?self.flavor, host = %self.hostname, "amqp transport opened");
        events.on_status(TransportStatus::Connected);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.close(&mut Teardown);
        }
        self.sasl = None;
        self.endorsement_key = None;
        self.storage_root_key = None;
        if self.core.connection != ConnectionState::Idle || self.core.protocol != ProtocolState::Idle {
            debug!("amqp transport closed");
        }
        self.core.reset();
    }

    fn register_device(&mut self) -> Result<(), TransportError> {
        if self.core.connection == ConnectionState::Error {
            return Err(TransportError::InvalidState(
                "transport is in its error state; close and retry",
            ));
        }
        if self.core.protocol == ProtocolState::Idle && self.core.operation_id.is_some() {
            match self.operation_id_policy {
                OperationIdPolicy::Reset => {
                    debug!("discarding operation id of an unfinished registration");
                    self.core.operation_id = None;
                }
                OperationIdPolicy::FailFast => {
                    return Err(TransportError::InvalidState(
                        "previous registration still holds an operation id",
                    ));
                }
            }
        }
        self.core.apply(ProtocolEvent::Register)?;
        self.core.challenge_armed = true;
        Ok(())
    }

    fn get_operation_status(&mut self) -> Result<(), TransportError> {
        if self.core.operation_id.is_none() {
            return Err(TransportError::InvalidState("no operation id has been issued"));
        }
        if self.core.connection == ConnectionState::Error {
            return Err(TransportError::InvalidState(
                "transport is in its error state; close and retry",
            ));
        }
        self.core.apply(ProtocolEvent::QueryStatus)
    }

    fn poll(&mut self, events: &mut dyn TransportEvents) {
        match self.core.connection {
            ConnectionState::Idle => return,
            ConnectionState::Disconnected => match self.connect() {
                Ok(()) => {
                    debug!(address = %self.link_address(), "amqp connection created");
                    self.core.connection = ConnectionState::Connecting;
                    return;
                }
                // reported below, in this same turn
                Err(e) => {
                    error!(error = %e, "unable to create amqp connection");
                    self.sasl = None;
                    self.core.fail(TransportFailure::Link);
                }
            },
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Error => {}
        }

        if let Some(conn) = self.connection.as_mut() {
            conn.do_work(&mut LinkEvents { core: &mut self.core, events: &mut *events });
        }

        if matches!(self.core.connection, ConnectionState::Connected | ConnectionState::Error) {
            self.dispatch(events);
        }
    }

    fn set_trace(&mut self, enabled: bool) {
        trace!(enabled, live = self.connection.is_some(), "amqp frame tracing toggled");
        self.trace = enabled;
        if let Some(conn) = self.connection.as_mut() {
            conn.set_trace(enabled);
        }
    }

    fn set_client_cert(&mut self, certificate: &str, private_key: &str) -> Result<(), TransportError> {
        if self.core.kind.is_hardware() {
            return Err(TransportError::WrongIdentityKind(self.core.kind));
        }
        if certificate.is_empty() || private_key.is_empty() {
            return Err(TransportError::InvalidArgument("client certificate and key"));
        }
        self.client_cert = Some((certificate.to_string(), Zeroizing::new(private_key.to_string())));
        Ok(())
    }

    fn set_trusted_cert(&mut self, certificate: Option<&str>) -> Result<(), TransportError> {
        if certificate.is_some_and(str::is_empty) {
            return Err(TransportError::InvalidArgument("trusted certificate"));
        }
        self.trusted_cert = certificate.map(str::to_string);
        Ok(())
    }

    fn set_proxy(&mut self, proxy: &ProxyOptions) -> Result<(), TransportError> {
        proxy.validate()?;
        if !self.flavor.supports_proxy() {
            return Err(TransportError::InvalidArgument(
                "HTTP proxy requires AMQP over WebSocket",
            ));
        }
        self.proxy = Some(proxy.clone());
        Ok(())
    }
}

impl Drop for AmqpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
