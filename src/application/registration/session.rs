//! Top-level registration state machine.
//!
//! A [`RegistrationSession`] owns one identity and one transport. The caller
//! starts a registration with [`RegistrationSession::register`] and then calls
//! [`RegistrationSession::poll`] at a steady cadence until either the
//! completion callback or the error callback fires. Nothing blocks and no
//! threads are spawned; every transition happens inside `poll()`.
//!
//! The transport reports back through [`TransportEvents`], implemented by the
//! session core and lent to the transport for the duration of each call.

use tracing::{debug, error, info, trace, warn};

use super::errors::ProvisioningError;
use super::session_types::{
    CompletionCallback, DeviceAssignment, ErrorCallback, RegistrationState, RegistrationStatus,
    SessionEvent, StatusCallback,
};
use crate::adapters::clock::SystemClock;
use crate::adapters::json_reply::JsonReplyParser;
use crate::application::identity::IdentityProvider;
use crate::domain::config::{OptionValue, ProvisioningConfig};
use crate::domain::identity::IdentityKind;
use crate::domain::params::{
    registration_path, OPTION_HTTP_PROXY, OPTION_LOG_TRACE, OPTION_TRUSTED_CERT,
};
use crate::domain::reply::{RegistrationReply, ReplyError};
use crate::ports::clock::Clock;
use crate::ports::reply::ReplyParser;
use crate::ports::transport::{
    TransportEvents, TransportFactory, TransportParams, TransportProvider, TransportReply,
    TransportStatus,
};

/// Context of the registration in flight. Created by `register()`, dropped on
/// the terminal callback.
struct PendingRegistration {
    on_complete: Option<CompletionCallback>,
    on_status: StatusCallback,
    started_ms: u64,
    last_request_ms: u64,
    last_status_ms: Option<u64>,
    auth_attempts: u32,
}

/// Everything except the transport, so the transport can borrow it as its
/// event handler.
struct SessionCore {
    identity: IdentityProvider,
    scope_id: String,
    registration_id: String,
    config: ProvisioningConfig,
    clock: Box<dyn Clock>,
    parser: Box<dyn ReplyParser>,
    on_error: Option<ErrorCallback>,
    state: RegistrationState,
    connected: bool,
    failure: Option<ProvisioningError>,
    pending: Option<PendingRegistration>,
    close_transport: bool,
}

impl SessionCore {
    fn apply(&mut self, ev: SessionEvent) -> Result<(), ProvisioningError> {
        use RegistrationState as S;
        use SessionEvent as E;
        let old = self.state;
        let new = match (old, ev) {
            (S::Ready, E::Register) => S::RegisterSend,
            (S::RegisterSend, E::RequestIssued) => S::RegisterSent,
            (S::StatusSend, E::RequestIssued) => S::StatusSent,
            (S::RegisterSend | S::RegisterSent | S::StatusSend | S::StatusSent, E::StatusPending) => {
                S::StatusSend
            }
            (S::RegisterSend | S::RegisterSent | S::StatusSend | S::StatusSent, E::Completed)
            | (S::Error, E::Recovered) => S::Ready,
            (S::Ready, E::Fail) => return Err(ProvisioningError::InvalidState),
            (_, E::Fail) => S::Error,
            _ => return Err(ProvisioningError::InvalidState),
        };
        if old != new {
            debug!(from = ?old, to = ?new, event = ?ev, "registration transition");
        }
        self.state = new;
        Ok(())
    }

    /// Enter `Error`; the first reason of an attempt is the one reported.
    fn fail(&mut self, reason: ProvisioningError) {
        if self.apply(SessionEvent::Fail).is_err() {
            warn!(%reason, "failure outside a registration ignored");
            return;
        }
        if self.failure.is_none() {
            warn!(%reason, registration_id = %self.registration_id, "registration attempt failed");
            self.failure = Some(reason);
        }
    }

    fn notify(&mut self, status: RegistrationStatus) {
        if let Some(pending) = self.pending.as_mut() {
            (pending.on_status)(status);
        }
    }

    /// Report the failure and return to `Ready`.
    fn recover(&mut self) {
        let reason = self.failure.take().unwrap_or(ProvisioningError::Transport);
        self.pending = None;
        self.connected = false;
        let _ = self.apply(SessionEvent::Recovered);
        self.close_transport = true;
        if let Some(cb) = self.on_error.as_mut() {
            cb(reason);
        }
    }

    fn complete(&mut self, assignment: DeviceAssignment) {
        info!(
            registration_id = %self.registration_id,
            assigned_endpoint = %assignment.assigned_endpoint,
            device_id = %assignment.device_id,
            "device assigned"
        );
        let on_complete = self.pending.take().and_then(|p| p.on_complete);
        self.connected = false;
        let _ = self.apply(SessionEvent::Completed);
        self.close_transport = true;
        if let Some(cb) = on_complete {
            cb(assignment);
        }
    }

    fn timed_out(&self, since_ms: u64) -> bool {
        self.clock.monotonic_ms().saturating_sub(since_ms) > self.config.reply_timeout_ms()
    }

    fn answer_challenge(&mut self, nonce: &[u8], key_name: &str) -> Option<String> {
        let max = self.config.max_auth_attempts;
        let pending = self.pending.as_mut()?;
        if pending.auth_attempts >= max {
            warn!(attempts = pending.auth_attempts, "authentication attempt limit reached");
            return None;
        }
        pending.auth_attempts += 1;

        let Some(expiry) = self.clock.unix_seconds().checked_add(self.config.token_lifetime_secs)
        else {
            error!("token expiry out of range");
            return None;
        };
        let path = registration_path(&self.scope_id, &self.registration_id);
        let scope = urlencoding::encode(&path);
        if let Err(e) = self.identity.import_key(nonce) {
            error!(error = %e, "challenge nonce could not be imported");
            return None;
        }
        match self.identity.construct_token(&scope, key_name, expiry) {
            Ok(token) => {
                debug!(expiry, "challenge answered");
                Some(token)
            }
            Err(e) => {
                error!(error = %e, "unable to construct authorization token");
                None
            }
        }
    }
}

impl TransportEvents for SessionCore {
    fn on_status(&mut self, status: TransportStatus) {
        trace!(?status, state = ?self.state, "transport status");
        match status {
            TransportStatus::Connected => {
                self.connected = true;
                self.notify(RegistrationStatus::Connected);
            }
            TransportStatus::Authenticated | TransportStatus::Unassigned | TransportStatus::Assigning => {
                if self.apply(SessionEvent::StatusPending).is_err() {
                    warn!(?status, state = ?self.state, "transport status outside a registration");
                    return;
                }
                match status {
                    TransportStatus::Unassigned => self.notify(RegistrationStatus::Registering),
                    TransportStatus::Assigning => self.notify(RegistrationStatus::Assigning),
                    _ => {}
                }
            }
        }
    }

    fn on_reply(&mut self, reply: TransportReply) {
        match reply {
            TransportReply::Assigned { auth_key, assigned_endpoint, device_id } => {
                if matches!(self.state, RegistrationState::Ready | RegistrationState::Error) {
                    warn!(state = ?self.state, "assignment outside a registration ignored");
                    return;
                }
                if self.identity.kind() == IdentityKind::HardwareProof {
                    let Some(key) = auth_key else {
                        error!("assignment for a hardware identity carries no key");
                        self.fail(ProvisioningError::Parsing);
                        return;
                    };
                    if let Err(e) = self.identity.import_key(&key) {
                        error!(error = %e, "assigned credential could not be imported");
                        self.fail(ProvisioningError::KeyError);
                        return;
                    }
                }
                self.complete(DeviceAssignment { assigned_endpoint, device_id });
            }
            TransportReply::Failed(failure) => {
                debug!(?failure, "transport reported failure");
                self.fail(failure.into());
            }
        }
    }

    fn on_challenge(&mut self, nonce: &[u8], key_name: &str) -> Option<String> {
        self.answer_challenge(nonce, key_name)
    }

    fn parse_reply(&mut self, payload: &str) -> Result<RegistrationReply, ReplyError> {
        self.parser.parse(payload, self.identity.kind())
    }
}

/// Client side of one device registration.
pub struct RegistrationSession {
    core: SessionCore,
    transport: Box<dyn TransportProvider>,
}

impl std::fmt::Debug for RegistrationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationSession")
            .field("registration_id", &self.core.registration_id)
            .field("scope_id", &self.core.scope_id)
            .field("state", &self.core.state)
            .field("connected", &self.core.connected)
            .finish_non_exhaustive()
    }
}

impl RegistrationSession {
    /// Bind `identity` to a transport created by `factory` for the service at
    /// `uri` and the tenant `scope_id`.
    ///
    /// # Errors
    /// [`ProvisioningError::InvalidArgument`] for empty arguments or an
    /// invalid `config`; identity errors while deriving the registration id;
    /// any error from the factory.
    pub fn new(
        uri: &str,
        scope_id: &str,
        mut identity: IdentityProvider,
        factory: impl TransportFactory,
        config: ProvisioningConfig,
    ) -> Result<Self, ProvisioningError> {
        if uri.is_empty() {
            return Err(ProvisioningError::InvalidArgument("uri".into()));
        }
        if scope_id.is_empty() {
            return Err(ProvisioningError::InvalidArgument("scope_id".into()));
        }
        config.validate()?;
        let registration_id = identity.registration_id()?.to_string();
        let transport = factory.create(TransportParams {
            uri: uri.to_string(),
            identity_kind: identity.kind(),
            scope_id: scope_id.to_string(),
            registration_id: registration_id.clone(),
            api_version: config.api_version.clone(),
            operation_id_policy: config.operation_id_policy,
        })?;
        debug!(%registration_id, kind = ?identity.kind(), "registration session created");
        Ok(Self {
            core: SessionCore {
                identity,
                scope_id: scope_id.to_string(),
                registration_id,
                config,
                clock: Box::new(SystemClock::new()),
                parser: Box::new(JsonReplyParser),
                on_error: None,
                state: RegistrationState::Ready,
                connected: false,
                failure: None,
                pending: None,
                close_transport: false,
            },
            transport,
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.core.clock = Box::new(clock);
        self
    }

    #[must_use]
    pub fn with_reply_parser(mut self, parser: impl ReplyParser + 'static) -> Self {
        self.core.parser = Box::new(parser);
        self
    }

    /// Callback invoked once for every failed registration attempt.
    #[must_use]
    pub fn with_error_callback(mut self, cb: impl FnMut(ProvisioningError) + 'static) -> Self {
        self.core.on_error = Some(Box::new(cb));
        self
    }

    #[must_use]
    pub fn state(&self) -> RegistrationState {
        self.core.state
    }

    #[must_use]
    pub fn registration_id(&self) -> &str {
        &self.core.registration_id
    }

    #[must_use]
    pub fn identity_kind(&self) -> IdentityKind {
        self.core.identity.kind()
    }

    /// Start a registration.
    ///
    /// `on_complete` fires at most once, with the assignment, when the service
    /// assigns the device. `on_status` receives progress updates.
    ///
    /// # Errors
    /// [`ProvisioningError::InvalidState`] unless the session is `Ready`;
    /// identity and transport errors while opening the transport.
    pub fn register(
        &mut self,
        on_complete: impl FnOnce(DeviceAssignment) + 'static,
        on_status: impl FnMut(RegistrationStatus) + 'static,
    ) -> Result<(), ProvisioningError> {
        if self.core.state != RegistrationState::Ready {
            return Err(ProvisioningError::InvalidState);
        }

        let opened = match self.core.identity.kind() {
            IdentityKind::HardwareProof => {
                let ek = self.core.identity.endorsement_key()?;
                let srk = self.core.identity.storage_root_key()?;
                self.transport.open(Some(ek.as_slice()), Some(srk.as_slice()), &mut self.core)
            }
            IdentityKind::CertificateProof => {
                let cert = self.core.identity.certificate()?;
                let key = self.core.identity.alias_key()?;
                self.transport.set_client_cert(&cert, &key)?;
                self.transport.open(None, None, &mut self.core)
            }
        };
        if let Err(e) = opened {
            error!(error = %e, "unable to open transport");
            self.transport.close();
            self.core.connected = false;
            return Err(e.into());
        }

        let now = self.core.clock.monotonic_ms();
        self.core.pending = Some(PendingRegistration {
            on_complete: Some(Box::new(on_complete)),
            on_status: Box::new(on_status),
            started_ms: now,
            last_request_ms: now,
            last_status_ms: None,
            auth_attempts: 0,
        });
        self.core.failure = None;
        self.core.apply(SessionEvent::Register)?;
        info!(registration_id = %self.core.registration_id, "registration started");
        Ok(())
    }

    /// Advance the registration. A no-op while `Ready`.
    pub fn poll(&mut self) {
        if self.core.state == RegistrationState::Ready {
            return;
        }

        self.transport.poll(&mut self.core);

        if self.core.connected || self.core.state == RegistrationState::Error {
            self.dispatch();
        } else if let Some(started) = self.core.pending.as_ref().map(|p| p.started_ms) {
            if self.core.timed_out(started) {
                error!("transport did not connect in time");
                self.core.fail(ProvisioningError::Timeout);
            }
        }

        if self.core.state == RegistrationState::Error {
            self.core.recover();
        }
        if std::mem::take(&mut self.core.close_transport) {
            self.transport.close();
        }
    }

    fn dispatch(&mut self) {
        let now = self.core.clock.monotonic_ms();
        match self.core.state {
            RegistrationState::RegisterSend => match self.transport.register_device() {
                Ok(()) => {
                    let _ = self.core.apply(SessionEvent::RequestIssued);
                    if let Some(p) = self.core.pending.as_mut() {
                        p.last_request_ms = now;
                    }
                }
                Err(e) => {
                    error!(error = %e, "register request rejected by transport");
                    self.core.fail(e.into());
                }
            },
            RegistrationState::StatusSend => {
                let throttle = self.core.config.status_throttle_ms();
                let due = self
                    .core
                    .pending
                    .as_ref()
                    .and_then(|p| p.last_status_ms)
                    .map_or(true, |last| now.saturating_sub(last) >= throttle);
                if !due {
                    return;
                }
                match self.transport.get_operation_status() {
                    Ok(()) => {
                        let _ = self.core.apply(SessionEvent::RequestIssued);
                        if let Some(p) = self.core.pending.as_mut() {
                            p.last_status_ms = Some(now);
                            p.last_request_ms = now;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "status request rejected by transport");
                        self.core.fail(e.into());
                    }
                }
            }
            RegistrationState::RegisterSent | RegistrationState::StatusSent => {
                let since = self.core.pending.as_ref().map_or(now, |p| p.last_request_ms);
                if self.core.timed_out(since) {
                    error!(state = ?self.core.state, "no reply from the provisioning service");
                    self.core.fail(ProvisioningError::Timeout);
                }
            }
            RegistrationState::Ready | RegistrationState::Error => {}
        }
    }

    /// Apply a named option.
    ///
    /// | name | value |
    /// |------|-------|
    /// | `TrustedCerts` | `Text(Some(pem))` sets, `Text(None)` clears |
    /// | `logtrace` | `Bool` |
    /// | `proxy_data` | `Proxy` |
    ///
    /// Unrecognised names are accepted and ignored.
    ///
    /// # Errors
    /// [`ProvisioningError::InvalidArgument`] for a value of the wrong shape
    /// or one the transport rejects.
    pub fn set_option(&mut self, name: &str, value: OptionValue) -> Result<(), ProvisioningError> {
        match (name, value) {
            (OPTION_TRUSTED_CERT, OptionValue::Text(cert)) => {
                self.transport.set_trusted_cert(cert.as_deref())?;
            }
            (OPTION_LOG_TRACE, OptionValue::Bool(enabled)) => {
                self.transport.set_trace(enabled);
            }
            (OPTION_HTTP_PROXY, OptionValue::Proxy(proxy)) => {
                self.transport.set_proxy(&proxy)?;
            }
            (OPTION_TRUSTED_CERT | OPTION_LOG_TRACE | OPTION_HTTP_PROXY, _) => {
                return Err(ProvisioningError::InvalidArgument(format!(
                    "unexpected value type for option `{name}`"
                )));
            }
            _ => debug!(name, "ignoring unrecognised option"),
        }
        Ok(())
    }
}

impl Drop for RegistrationSession {
    fn drop(&mut self) {
        self.transport.close();
    }
}
