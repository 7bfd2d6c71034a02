//! Scripted AMQP connection for driving the transport without a network.
//!
//! Every `do_work` turn:
//! 1. answers a pending SASL challenge (only when the connection was built
//!    with TPM SASL parameters),
//! 2. opens both links if they are still idle and `auto_open` is on,
//! 3. replays the next scripted batch of [`Step`]s,
//! 4. delivers one queued reply for a request completed on an earlier turn,
//! 5. completes every send queued since the last turn.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::domain::proxy::ProxyOptions;
use crate::ports::amqp::{
    AmqpConnection, AmqpConnector, ConnectParams, ConnectionEvents, Disposition, InboundMessage,
    LinkError, LinkRole, LinkSpec, LinkState, MessageBody, OutboundMessage, SendResult,
    WebSocketParams,
};

/// One scripted happening inside a `do_work` turn.
#[derive(Debug, Clone)]
pub enum Step {
    Link(LinkRole, LinkState),
    Message(InboundMessage),
}

/// Owned copy of [`ConnectParams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedConnect {
    pub hostname: String,
    pub port: u16,
    pub container_id: String,
    pub websocket: Option<WebSocketParams>,
    pub sasl_registration_id: Option<String>,
    pub sasl_endorsement_key: Option<Vec<u8>>,
    pub proxy: Option<ProxyOptions>,
    pub trusted_cert: Option<String>,
    pub client_cert: Option<(String, String)>,
    pub trace: bool,
}

#[derive(Debug)]
pub struct ScriptState {
    pub connects: Vec<RecordedConnect>,
    pub sessions: Vec<(u32, u32)>,
    pub links: Vec<LinkSpec>,
    pub sent: Vec<OutboundMessage>,
    pub challenge_answers: Vec<Option<String>>,
    pub dispositions: Vec<Disposition>,
    pub traces: Vec<bool>,
    pub closes: usize,
    pub cancelled: usize,
    pub fail_connect: Option<LinkError>,
    pub fail_attach: Option<LinkError>,
    pub fail_send: Option<LinkError>,
    pub send_result: SendResult,
    pub auto_open: bool,
    pub sasl_challenge: Option<Vec<u8>>,
    turns: VecDeque<Vec<Step>>,
    replies: VecDeque<InboundMessage>,
    sasl_pending: bool,
    sender: LinkState,
    receiver: LinkState,
    pending_sends: usize,
    awaiting_reply: usize,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self {
            connects: Vec::new(),
            sessions: Vec::new(),
            links: Vec::new(),
            sent: Vec::new(),
            challenge_answers: Vec::new(),
            dispositions: Vec::new(),
            traces: Vec::new(),
            closes: 0,
            cancelled: 0,
            fail_connect: None,
            fail_attach: None,
            fail_send: None,
            send_result: SendResult::Ok,
            auto_open: true,
            sasl_challenge: None,
            turns: VecDeque::new(),
            replies: VecDeque::new(),
            sasl_pending: false,
            sender: LinkState::Idle,
            receiver: LinkState::Idle,
            pending_sends: 0,
            awaiting_reply: 0,
        }
    }
}

impl ScriptState {
    /// Operation types of every request sent so far.
    #[must_use]
    pub fn operation_types(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|m| m.application_properties.get("operation-type").cloned())
            .collect()
    }
}

/// Shared handle on the script; clones observe the same connection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAmqp(Rc<RefCell<ScriptState>>);

impl ScriptedAmqp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connector(&self) -> ScriptedConnector {
        ScriptedConnector(self.clone())
    }

    #[must_use]
    pub fn state(&self) -> Ref<'_, ScriptState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, ScriptState> {
        self.0.borrow_mut()
    }

    /// Queue a JSON reply, answered to the next completed request.
    pub fn reply_json(&self, json: &str) {
        self.reply(InboundMessage {
            body: MessageBody::Data(json.as_bytes().to_vec()),
            application_properties: Default::default(),
        });
    }

    pub fn reply(&self, message: InboundMessage) {
        self.0.borrow_mut().replies.push_back(message);
    }

    /// Queue steps for a later `do_work` turn.
    pub fn push_turn(&self, steps: Vec<Step>) {
        self.0.borrow_mut().turns.push_back(steps);
    }

    /// Nonce offered during the SASL TPM exchange of the next connection.
    pub fn challenge_with(&self, nonce: &[u8]) {
        self.0.borrow_mut().sasl_challenge = Some(nonce.to_vec());
    }

    pub fn manual_links(&self) {
        self.0.borrow_mut().auto_open = false;
    }
}

/// [`AmqpConnector`] handing out connections driven by the shared script.
pub struct ScriptedConnector(ScriptedAmqp);

impl AmqpConnector for ScriptedConnector {
    fn connect(&mut self, params: &ConnectParams<'_>) -> Result<Box<dyn AmqpConnection>, LinkError> {
        let mut st = self.0 .0.borrow_mut();
        st.connects.push(RecordedConnect {
            hostname: params.hostname.to_string(),
            port: params.port,
            container_id: params.container_id.to_string(),
            websocket: params.websocket,
            sasl_registration_id: params.sasl_tpm.map(|s| s.registration_id.clone()),
            sasl_endorsement_key: params.sasl_tpm.map(|s| s.endorsement_key.to_vec()),
            proxy: params.proxy.cloned(),
            trusted_cert: params.trusted_cert.map(str::to_string),
            client_cert: params.client_cert.map(|(c, k)| (c.to_string(), k.to_string())),
            trace: params.trace,
        });
        if let Some(e) = st.fail_connect.take() {
            return Err(e);
        }
        st.sender = LinkState::Idle;
        st.receiver = LinkState::Idle;
        st.pending_sends = 0;
        st.awaiting_reply = 0;
        st.sasl_pending = params.sasl_tpm.is_some() && st.sasl_challenge.is_some();
        Ok(Box::new(ScriptedConnection(self.0.clone())))
    }
}

struct ScriptedConnection(ScriptedAmqp);

impl ScriptedConnection {
    fn st(&self) -> RefMut<'_, ScriptState> {
        self.0 .0.borrow_mut()
    }

    fn set_link(&self, role: LinkRole, state: LinkState, events: &mut dyn ConnectionEvents) {
        let previous = {
            let mut st = self.st();
            let slot = match role {
                LinkRole::Sender => &mut st.sender,
                LinkRole::Receiver => &mut st.receiver,
            };
            std::mem::replace(slot, state)
        };
        events.on_link_state(role, state, previous);
    }

    fn deliver(&self, message: InboundMessage, events: &mut dyn ConnectionEvents) {
        let disposition = events.on_message(message);
        self.st().dispositions.push(disposition);
    }
}

impl AmqpConnection for ScriptedConnection {
    fn begin_session(&mut self, incoming_window: u32, outgoing_window: u32) -> Result<(), LinkError> {
        self.st().sessions.push((incoming_window, outgoing_window));
        Ok(())
    }

    fn attach_link(&mut self, spec: LinkSpec) -> Result<(), LinkError> {
        let mut st = self.st();
        if let Some(e) = st.fail_attach.take() {
            return Err(e);
        }
        st.links.push(spec);
        Ok(())
    }

    fn send(&mut self, message: OutboundMessage) -> Result<(), LinkError> {
        let mut st = self.st();
        if let Some(e) = st.fail_send.take() {
            return Err(e);
        }
        st.sent.push(message);
        st.pending_sends += 1;
        Ok(())
    }

    // The borrow is released around every callback so handlers may inspect
    // the script.
    fn do_work(&mut self, events: &mut dyn ConnectionEvents) {
        let challenge = {
            let mut st = self.st();
            if st.sasl_pending {
                st.sasl_pending = false;
                st.sasl_challenge.clone()
            } else {
                None
            }
        };
        if let Some(nonce) = challenge {
            let answer = events.on_sasl_challenge(&nonce);
            let refused = answer.is_none();
            self.st().challenge_answers.push(answer);
            if refused {
                self.set_link(LinkRole::Sender, LinkState::Error, events);
                return;
            }
        }

        let open_links = {
            let st = self.st();
            st.auto_open && st.sender == LinkState::Idle && st.receiver == LinkState::Idle
        };
        if open_links {
            self.set_link(LinkRole::Receiver, LinkState::Open, events);
            self.set_link(LinkRole::Sender, LinkState::Open, events);
        }

        let turn = self.st().turns.pop_front();
        for step in turn.unwrap_or_default() {
            match step {
                Step::Link(role, state) => self.set_link(role, state, events),
                Step::Message(message) => self.deliver(message, events),
            }
        }

        let reply = {
            let mut st = self.st();
            if st.awaiting_reply > 0 {
                let reply = st.replies.pop_front();
                if reply.is_some() {
                    st.awaiting_reply -= 1;
                }
                reply
            } else {
                None
            }
        };
        if let Some(message) = reply {
            self.deliver(message, events);
        }

        let (completed, result) = {
            let mut st = self.st();
            let n = std::mem::take(&mut st.pending_sends);
            if st.send_result == SendResult::Ok {
                st.awaiting_reply += n;
            }
            (n, st.send_result)
        };
        for _ in 0..completed {
            events.on_send_complete(result);
        }
    }

    fn set_trace(&mut self, enabled: bool) {
        self.st().traces.push(enabled);
    }

    fn close(&mut self, events: &mut dyn ConnectionEvents) {
        let pending = {
            let mut st = self.st();
            st.closes += 1;
            let n = std::mem::take(&mut st.pending_sends);
            st.cancelled += n;
            st.awaiting_reply = 0;
            st.sender = LinkState::Idle;
            st.receiver = LinkState::Idle;
            n
        };
        for _ in 0..pending {
            events.on_send_complete(SendResult::Cancelled);
        }
    }
}
