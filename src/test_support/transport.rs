//! Scripted [`TransportProvider`] for exercising the registration session
//! without any wire protocol.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::domain::proxy::ProxyOptions;
use crate::domain::reply::RegistrationReply;
use crate::ports::transport::{
    TransportError, TransportEvents, TransportFactory, TransportFailure, TransportParams,
    TransportProvider, TransportReply, TransportStatus,
};

/// Something the transport reports during one `poll()`.
#[derive(Debug, Clone)]
pub enum TransportAction {
    Status(TransportStatus),
    Reply(TransportReply),
    Challenge { nonce: Vec<u8>, key_name: String },
    /// Run the session's reply parser on a raw payload and report the
    /// outcome the way the AMQP transport does.
    Payload(String),
}

#[derive(Debug, Default)]
pub struct TransportLog {
    pub params: Option<TransportParams>,
    pub opens: Vec<(Option<Vec<u8>>, Option<Vec<u8>>)>,
    pub closes: usize,
    pub polls: usize,
    pub register_calls: usize,
    pub status_calls: usize,
    pub traces: Vec<bool>,
    pub client_cert: Option<(String, String)>,
    pub trusted_cert: Option<String>,
    pub proxy: Option<ProxyOptions>,
    pub challenge_answers: Vec<Option<String>>,
    pub parsed: Vec<Result<RegistrationReply, String>>,
    pub fail_open: bool,
    /// `open()` does not report `Connected`.
    pub quiet_open: bool,
    pub reject_register: bool,
    pub reject_status: bool,
    actions: VecDeque<Vec<TransportAction>>,
}

/// Shared handle; clones observe the same transport.
#[derive(Debug, Clone, Default)]
pub struct TransportScript(Rc<RefCell<TransportLog>>);

impl TransportScript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn factory(&self) -> ScriptedTransportFactory {
        ScriptedTransportFactory(self.clone())
    }

    #[must_use]
    pub fn log(&self) -> Ref<'_, TransportLog> {
        self.0.borrow()
    }

    pub fn log_mut(&self) -> RefMut<'_, TransportLog> {
        self.0.borrow_mut()
    }

    /// Actions for the next `poll()` that has none queued yet.
    pub fn on_poll(&self, actions: Vec<TransportAction>) {
        self.0.borrow_mut().actions.push_back(actions);
    }
}

pub struct ScriptedTransportFactory(TransportScript);

impl TransportFactory for ScriptedTransportFactory {
    fn create(self, params: TransportParams) -> Result<Box<dyn TransportProvider>, TransportError> {
        self.0.log_mut().params = Some(params);
        Ok(Box::new(ScriptedTransport(self.0)))
    }
}

struct ScriptedTransport(TransportScript);

impl ScriptedTransport {
    fn report(&self, action: TransportAction, events: &mut dyn TransportEvents) {
        match action {
            TransportAction::Status(status) => events.on_status(status),
            TransportAction::Reply(reply) => events.on_reply(reply),
            TransportAction::Challenge { nonce, key_name } => {
                let answer = events.on_challenge(&nonce, &key_name);
                let refused = answer.is_none();
                self.0.log_mut().challenge_answers.push(answer);
                if refused {
                    events.on_reply(TransportReply::Failed(TransportFailure::Challenge));
                }
            }
            TransportAction::Payload(payload) => {
                let parsed = events.parse_reply(&payload);
                self.0.log_mut().parsed.push(parsed.as_ref().map(Clone::clone).map_err(ToString::to_string));
                match parsed {
                    Ok(RegistrationReply::Unassigned { .. }) => {
                        events.on_status(TransportStatus::Unassigned);
                    }
                    Ok(RegistrationReply::Assigning { .. }) => {
                        events.on_status(TransportStatus::Assigning);
                    }
                    Ok(RegistrationReply::Assigned { auth_key, assigned_endpoint, assigned_id }) => {
                        events.on_reply(TransportReply::Assigned {
                            auth_key,
                            assigned_endpoint,
                            device_id: assigned_id,
                        });
                    }
                    Ok(RegistrationReply::Blacklisted) => {
                        events.on_reply(TransportReply::Failed(TransportFailure::Unauthorized));
                    }
                    Ok(RegistrationReply::Error) => {
                        events.on_reply(TransportReply::Failed(TransportFailure::Service));
                    }
                    Err(_) => events.on_reply(TransportReply::Failed(TransportFailure::Parse)),
                }
            }
        }
    }
}

impl TransportProvider for ScriptedTransport {
    fn open(
        &mut self,
        endorsement_key: Option<&[u8]>,
        storage_root_key: Option<&[u8]>,
        events: &mut dyn TransportEvents,
    ) -> Result<(), TransportError> {
        {
            let mut log = self.0.log_mut();
            log.opens.push((endorsement_key.map(<[u8]>::to_vec), storage_root_key.map(<[u8]>::to_vec)));
            if log.fail_open {
                return Err(TransportError::MissingKeys);
            }
            if log.quiet_open {
                return Ok(());
            }
        }
        events.on_status(TransportStatus::Connected);
        Ok(())
    }

    fn close(&mut self) {
        self.0.log_mut().closes += 1;
    }

    fn register_device(&mut self) -> Result<(), TransportError> {
        let mut log = self.0.log_mut();
        log.register_calls += 1;
        if log.reject_register {
            return Err(TransportError::InvalidState("register rejected by script"));
        }
        Ok(())
    }

    fn get_operation_status(&mut self) -> Result<(), TransportError> {
        let mut log = self.0.log_mut();
        log.status_calls += 1;
        if log.reject_status {
            return Err(TransportError::InvalidState("status rejected by script"));
        }
        Ok(())
    }

    fn poll(&mut self, events: &mut dyn TransportEvents) {
        let actions = {
            let mut log = self.0.log_mut();
            log.polls += 1;
            log.actions.pop_front().unwrap_or_default()
        };
        for action in actions {
            self.report(action, events);
        }
    }

    fn set_trace(&mut self, enabled: bool) {
        self.0.log_mut().traces.push(enabled);
    }

    fn set_client_cert(&mut self, certificate: &str, private_key: &str) -> Result<(), TransportError> {
        self.0.log_mut().client_cert = Some((certificate.to_string(), private_key.to_string()));
        Ok(())
    }

    fn set_trusted_cert(&mut self, certificate: Option<&str>) -> Result<(), TransportError> {
        self.0.log_mut().trusted_cert = certificate.map(str::to_string);
        Ok(())
    }

    fn set_proxy(&mut self, proxy: &ProxyOptions) -> Result<(), TransportError> {
        proxy.validate()?;
        self.0.log_mut().proxy = Some(proxy.clone());
        Ok(())
    }
}
