use std::sync::{Arc, Mutex};

use super::transport::*;
use super::transport_types::{AmqpFlavor, ConnectionState, ProtocolState};
use crate::domain::config::OperationIdPolicy;
use crate::domain::identity::IdentityKind;
use crate::domain::proxy::ProxyOptions;
use crate::ports::amqp::{InboundMessage, LinkError, LinkRole, LinkState, MessageBody, SendResult};
use crate::ports::transport::{
    TransportError, TransportFailure, TransportParams, TransportProvider, TransportReply,
    TransportStatus,
};
use crate::test_support::{
    assigned_json, assigning_json, status_json, unassigned_json, RecordingEvents, ScriptedAmqp,
    Step, TEST_EK, TEST_HOST, TEST_SCOPE_ID, TEST_SRK,
};

const HW: IdentityKind = IdentityKind::HardwareProof;
const CERT: IdentityKind = IdentityKind::CertificateProof;

// ---------------- Helpers ----------------

fn params(kind: IdentityKind) -> TransportParams {
    TransportParams {
        uri: TEST_HOST.into(),
        identity_kind: kind,
        scope_id: TEST_SCOPE_ID.into(),
        registration_id: "reg-1".into(),
        api_version: "2017-08-31-preview".into(),
        operation_id_policy: OperationIdPolicy::Reset,
    }
}

fn transport(kind: IdentityKind, flavor: AmqpFlavor, script: &ScriptedAmqp) -> AmqpTransport {
    AmqpTransport::new(params(kind), flavor, Box::new(script.connector())).unwrap()
}

/// Opened hardware transport with a register request queued.
fn hw_registering(script: &ScriptedAmqp) -> (AmqpTransport, RecordingEvents) {
    let mut t = transport(HW, AmqpFlavor::Tls, script);
    let mut ev = RecordingEvents::new(HW);
    t.open(Some(TEST_EK), Some(TEST_SRK), &mut ev).unwrap();
    t.register_device().unwrap();
    (t, ev)
}

/// Opened certificate transport with a register request queued.
fn cert_registering(script: &ScriptedAmqp) -> (AmqpTransport, RecordingEvents) {
    let mut t = transport(CERT, AmqpFlavor::Tls, script);
    t.set_client_cert("CERT", "KEY").unwrap();
    let mut ev = RecordingEvents::new(CERT);
    t.open(None, None, &mut ev).unwrap();
    t.register_device().unwrap();
    (t, ev)
}

fn poll_n(t: &mut AmqpTransport, ev: &mut RecordingEvents, n: usize) {
    for _ in 0..n {
        t.poll(ev);
    }
}

// ---------------- Construction & open ----------------

#[test]
fn new_rejects_empty_parameters() {
    let script = ScriptedAmqp::new();
    for field in ["uri", "scope_id", "registration_id", "api_version"] {
        let mut p = params(HW);
        match field {
            "uri" => p.uri.clear(),
            "scope_id" => p.scope_id.clear(),
            "registration_id" => p.registration_id.clear(),
            _ => p.api_version.clear(),
        }
        let err = AmqpTransport::new(p, AmqpFlavor::Tls, Box::new(script.connector())).unwrap_err();
        assert!(matches!(err, TransportError::InvalidArgument(f) if f == field));
    }
}

#[test]
fn link_address_uses_registration_path() {
    let script = ScriptedAmqp::new();
    let t = transport(HW, AmqpFlavor::Tls, &script);
    assert_eq!(t.link_address(), format!("amqps://{TEST_HOST}/{TEST_SCOPE_ID}/registrations/reg-1"));
    assert_eq!(t.api_version(), "2017-08-31-preview");
}

#[test]
fn hardware_open_requires_both_keys() {
    let script = ScriptedAmqp::new();
    let mut t = transport(HW, AmqpFlavor::Tls, &script);
    let mut ev = RecordingEvents::new(HW);
    assert!(matches!(t.open(Some(TEST_EK), None, &mut ev), Err(TransportError::MissingKeys)));
    assert!(matches!(t.open(None, Some(TEST_SRK), &mut ev), Err(TransportError::MissingKeys)));
    assert_eq!(t.connection_state(), ConnectionState::Idle);
    assert!(ev.statuses.is_empty());
}

#[test]
fn open_reports_connected_and_defers_connecting() {
    let script = ScriptedAmqp::new();
    let mut t = transport(HW, AmqpFlavor::Tls, &script);
    let mut ev = RecordingEvents::new(HW);
    t.open(Some(TEST_EK), Some(TEST_SRK), &mut ev).unwrap();
    assert_eq!(ev.statuses, vec![TransportStatus::Connected]);
    assert_eq!(t.connection_state(), ConnectionState::Disconnected);
    assert!(script.state().connects.is_empty());
}

#[test]
fn poll_before_open_does_nothing() {
    let script = ScriptedAmqp::new();
    let mut t = transport(HW, AmqpFlavor::Tls, &script);
    let mut ev = RecordingEvents::new(HW);
    poll_n(&mut t, &mut ev, 3);
    assert!(script.state().connects.is_empty());
    assert!(ev.statuses.is_empty() && ev.replies.is_empty());
}

// ---------------- Happy paths ----------------

#[test]
fn hardware_register_assigned_end_to_end() {
    let script = ScriptedAmqp::new();
    script.challenge_with(b"nonce-blob");
    script.reply_json(&assigned_json("hub.example.net", "dev1", Some(b"hub-key")));
    let (mut t, mut ev) = hw_registering(&script);
    assert_eq!(t.protocol_state(), ProtocolState::RegisterSend);

    // connect
    t.poll(&mut ev);
    assert_eq!(t.connection_state(), ConnectionState::Connecting);
    {
        let st = script.state();
        assert_eq!(st.connects.len(), 1);
        let c = &st.connects[0];
        assert_eq!(c.hostname, TEST_HOST);
        assert_eq!(c.port, 5671);
        assert_eq!(c.container_id, "dps_connection");
        assert_eq!(c.websocket, None);
        assert_eq!(c.sasl_registration_id.as_deref(), Some("reg-1"));
        assert_eq!(c.sasl_endorsement_key.as_deref(), Some(TEST_EK));
        assert_eq!(st.sessions, vec![(2_147_483_647, 65_536)]);
        assert_eq!(st.links.len(), 2);
        assert_eq!(st.links[0].role, LinkRole::Receiver);
        assert_eq!(st.links[0].name, "recv_link");
        assert_eq!(st.links[0].source, t.link_address());
        assert_eq!(st.links[0].max_message_size, 65_536);
        assert_eq!(st.links[1].role, LinkRole::Sender);
        assert_eq!(st.links[1].name, "sender_link");
        assert_eq!(st.links[1].target, t.link_address());
    }

    // SASL challenge, links open, request sent
    t.poll(&mut ev);
    assert_eq!(ev.challenges, vec![(b"nonce-blob".to_vec(), "registration".to_string())]);
    assert_eq!(script.state().challenge_answers, vec![ev.challenge_answer.clone()]);
    assert_eq!(ev.statuses, vec![TransportStatus::Connected, TransportStatus::Connected]);
    assert_eq!(t.connection_state(), ConnectionState::Connected);
    assert_eq!(t.protocol_state(), ProtocolState::RegisterSent);
    assert_eq!(script.state().operation_types(), vec![REGISTER_ME.to_string()]);
    assert!(!script.state().sent[0].application_properties.contains_key(OPERATION_ID_PROPERTY));

    // send completes, then the reply lands
    poll_n(&mut t, &mut ev, 2);
    assert_eq!(t.protocol_state(), ProtocolState::Idle);
    assert_eq!(
        ev.replies,
        vec![TransportReply::Assigned {
            auth_key: Some(zeroize::Zeroizing::new(b"hub-key".to_vec())),
            assigned_endpoint: "hub.example.net".into(),
            device_id: "dev1".into(),
        }]
    );
    assert_eq!(script.state().dispositions.len(), 1);
}

#[test]
fn assigning_then_status_query_carries_operation_id() {
    let script = ScriptedAmqp::new();
    script.reply_json(&assigning_json("op-1"));
    let (mut t, mut ev) = cert_registering(&script);

    poll_n(&mut t, &mut ev, 4);
    assert_eq!(ev.statuses.last(), Some(&TransportStatus::Assigning));
    assert_eq!(t.operation_id(), Some("op-1"));
    assert_eq!(t.protocol_state(), ProtocolState::Idle);
    assert!(ev.replies.is_empty());

    script.reply_json(&assigned_json("hub.example.net", "cert-dev", None));
    t.get_operation_status().unwrap();
    t.poll(&mut ev);
    assert_eq!(t.protocol_state(), ProtocolState::StatusSent);
    {
        let st = script.state();
        assert_eq!(st.operation_types(), vec![REGISTER_ME.to_string(), OPERATION_STATUS.to_string()]);
        assert_eq!(
            st.sent[1].application_properties.get(OPERATION_ID_PROPERTY).map(String::as_str),
            Some("op-1")
        );
    }

    poll_n(&mut t, &mut ev, 2);
    assert_eq!(
        ev.replies,
        vec![TransportReply::Assigned {
            auth_key: None,
            assigned_endpoint: "hub.example.net".into(),
            device_id: "cert-dev".into(),
        }]
    );
}

#[test]
fn unassigned_reply_reports_status_and_keeps_operation_id() {
    let script = ScriptedAmqp::new();
    script.challenge_with(b"n");
    script.reply_json(&unassigned_json(b"k", "registration", Some("op-7")));
    let (mut t, mut ev) = hw_registering(&script);
    poll_n(&mut t, &mut ev, 4);
    assert_eq!(ev.statuses.last(), Some(&TransportStatus::Unassigned));
    assert_eq!(t.operation_id(), Some("op-7"));
}

#[test]
fn certificate_connection_carries_client_and_trusted_certs() {
    let script = ScriptedAmqp::new();
    let mut t = transport(CERT, AmqpFlavor::Tls, &script);
    t.set_client_cert("CERT", "KEY").unwrap();
    t.set_trusted_cert(Some("ROOT-CA")).unwrap();
    t.set_trace(true);
    let mut ev = RecordingEvents::new(CERT);
    t.open(None, None, &mut ev).unwrap();
    t.poll(&mut ev);

    let st = script.state();
    let c = &st.connects[0];
    assert_eq!(c.client_cert, Some(("CERT".to_string(), "KEY".to_string())));
    assert_eq!(c.trusted_cert.as_deref(), Some("ROOT-CA"));
    assert_eq!(c.sasl_registration_id, None);
    assert!(c.trace);
}

#[test]
fn websocket_flavor_uses_port_443_and_proxy() {
    let script = ScriptedAmqp::new();
    let mut t = transport(CERT, AmqpFlavor::WebSocket, &script);
    t.set_client_cert("CERT", "KEY").unwrap();
    let proxy = ProxyOptions::new("proxy.local", 8888).with_credentials("u", "p");
    t.set_proxy(&proxy).unwrap();
    let mut ev = RecordingEvents::new(CERT);
    t.open(None, None, &mut ev).unwrap();
    t.poll(&mut ev);

    let st = script.state();
    let c = &st.connects[0];
    assert_eq!(c.port, 443);
    let ws = c.websocket.unwrap();
    assert_eq!(ws.protocol, "AMQPWSB10");
    assert_eq!(ws.resource, "/$iothub/websocket");
    assert_eq!(c.proxy.as_ref(), Some(&proxy));
}

#[test]
fn trace_toggles_reach_live_connection() {
    let script = ScriptedAmqp::new();
    let (mut t, mut ev) = cert_registering(&script);
    t.poll(&mut ev);
    t.set_trace(true);
    t.set_trace(false);
    assert_eq!(script.state().traces, vec![true, false]);
}

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn trace_toggle_is_logged_at_trace_level() {
    let script = ScriptedAmqp::new();
    let mut t = transport(CERT, AmqpFlavor::Tls, &script);
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, || t.set_trace(true));

    let out = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
    assert!(out.contains("TRACE"), "{out}");
    assert!(out.contains("amqp frame tracing toggled"), "{out}");
    assert!(out.contains("enabled=true"), "{out}");
}

// ---------------- Failures ----------------

#[test]
fn connect_failure_is_reported_in_the_same_poll() {
    let script = ScriptedAmqp::new();
    script.state_mut().fail_connect = Some(LinkError::Io("refused".into()));
    let (mut t, mut ev) = hw_registering(&script);
    t.poll(&mut ev);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Link)]);
    t.poll(&mut ev);
    assert_eq!(ev.replies.len(), 1);
    assert_eq!(t.connection_state(), ConnectionState::Idle);
    assert_eq!(t.protocol_state(), ProtocolState::Idle);
}

#[test]
fn attach_failure_is_a_link_failure() {
    let script = ScriptedAmqp::new();
    script.state_mut().fail_attach = Some(LinkError::Link("detached".into()));
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 2);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Link)]);
}

#[test]
fn certificate_identity_without_client_cert_cannot_connect() {
    let script = ScriptedAmqp::new();
    let mut t = transport(CERT, AmqpFlavor::Tls, &script);
    let mut ev = RecordingEvents::new(CERT);
    t.open(None, None, &mut ev).unwrap();
    t.register_device().unwrap();
    poll_n(&mut t, &mut ev, 2);
    assert!(script.state().connects.is_empty());
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Link)]);
}

#[test]
fn link_error_fails_the_attempt() {
    let script = ScriptedAmqp::new();
    script.manual_links();
    script.push_turn(vec![
        Step::Link(LinkRole::Sender, LinkState::Opening),
        Step::Link(LinkRole::Sender, LinkState::Error),
    ]);
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 2);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Link)]);
    assert_eq!(ev.statuses, vec![TransportStatus::Connected]);
    assert!(script.state().sent.is_empty());
}

#[test]
fn links_opening_after_a_failure_do_not_reconnect() {
    let script = ScriptedAmqp::new();
    script.manual_links();
    script.push_turn(vec![
        Step::Message(InboundMessage { body: MessageBody::Empty, application_properties: Default::default() }),
        Step::Link(LinkRole::Receiver, LinkState::Open),
        Step::Link(LinkRole::Sender, LinkState::Open),
    ]);
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 2);
    // only the Connected raised by open()
    assert_eq!(ev.statuses, vec![TransportStatus::Connected]);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Parse)]);
    assert!(script.state().sent.is_empty());
    assert_eq!(t.connection_state(), ConnectionState::Idle);
}

#[test]
fn refused_challenge_reports_challenge_failure() {
    let script = ScriptedAmqp::new();
    script.challenge_with(b"n");
    let (mut t, mut ev) = hw_registering(&script);
    ev.challenge_answer = None;
    poll_n(&mut t, &mut ev, 2);
    // the link error that follows does not mask the first failure
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Challenge)]);
    assert_eq!(script.state().challenge_answers, vec![None]);
}

#[test]
fn challenge_without_pending_registration_is_refused() {
    let script = ScriptedAmqp::new();
    script.challenge_with(b"n");
    let mut t = transport(HW, AmqpFlavor::Tls, &script);
    let mut ev = RecordingEvents::new(HW);
    t.open(Some(TEST_EK), Some(TEST_SRK), &mut ev).unwrap();
    poll_n(&mut t, &mut ev, 2);
    assert!(ev.challenges.is_empty());
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Challenge)]);
}

#[test]
fn send_failures_are_link_failures() {
    let script = ScriptedAmqp::new();
    script.state_mut().fail_send = Some(LinkError::Send("busy".into()));
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 3);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Link)]);

    let script = ScriptedAmqp::new();
    script.state_mut().send_result = SendResult::Timeout;
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 3);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Link)]);
}

#[test]
fn reply_without_operation_id_is_a_parse_failure() {
    let script = ScriptedAmqp::new();
    script.reply_json(&unassigned_json(b"k", "registration", None));
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 5);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Parse)]);
    assert!(matches!(t.get_operation_status(), Err(TransportError::InvalidState(_))));
}

#[test]
fn malformed_reply_is_a_parse_failure() {
    let script = ScriptedAmqp::new();
    script.reply_json("{not json");
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 5);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Parse)]);
}

#[test]
fn non_data_body_is_a_parse_failure() {
    let script = ScriptedAmqp::new();
    script.reply(InboundMessage {
        body: MessageBody::Value("assigned".into()),
        application_properties: Default::default(),
    });
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 4);
    assert_eq!(ev.replies, vec![TransportReply::Failed(TransportFailure::Parse)]);
}

#[test]
fn blacklisted_and_failed_statuses() {
    for (status, failure) in
        [("blacklisted", TransportFailure::Unauthorized), ("failed", TransportFailure::Service)]
    {
        let script = ScriptedAmqp::new();
        script.reply_json(&status_json(status));
        let (mut t, mut ev) = cert_registering(&script);
        poll_n(&mut t, &mut ev, 5);
        assert_eq!(ev.replies, vec![TransportReply::Failed(failure)], "{status}");
    }
}

#[test]
fn unsolicited_reply_is_dropped() {
    let script = ScriptedAmqp::new();
    script.push_turn(vec![Step::Message(InboundMessage {
        body: MessageBody::Data(status_json("assigned").into_bytes()),
        application_properties: Default::default(),
    })]);
    let mut t = transport(CERT, AmqpFlavor::Tls, &script);
    t.set_client_cert("CERT", "KEY").unwrap();
    let mut ev = RecordingEvents::new(CERT);
    t.open(None, None, &mut ev).unwrap();
    poll_n(&mut t, &mut ev, 3);
    assert!(ev.replies.is_empty());
    assert_eq!(t.protocol_state(), ProtocolState::Idle);
    assert_eq!(t.connection_state(), ConnectionState::Connected);
    assert_eq!(script.state().dispositions.len(), 1);
}

// ---------------- Request bookkeeping ----------------

#[test]
fn second_request_while_in_flight_is_rejected() {
    let script = ScriptedAmqp::new();
    let (mut t, _ev) = cert_registering(&script);
    assert!(matches!(t.register_device(), Err(TransportError::InvalidState(_))));
    assert!(matches!(t.get_operation_status(), Err(TransportError::InvalidState(_))));
}

#[test]
fn stale_operation_id_policy() {
    let script = ScriptedAmqp::new();
    script.reply_json(&assigning_json("op-1"));
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 4);
    assert_eq!(t.operation_id(), Some("op-1"));
    t.register_device().unwrap();
    assert_eq!(t.operation_id(), None);

    let script = ScriptedAmqp::new();
    script.reply_json(&assigning_json("op-2"));
    let mut p = params(CERT);
    p.operation_id_policy = OperationIdPolicy::FailFast;
    let mut t = AmqpTransport::new(p, AmqpFlavor::Tls, Box::new(script.connector())).unwrap();
    t.set_client_cert("CERT", "KEY").unwrap();
    let mut ev = RecordingEvents::new(CERT);
    t.open(None, None, &mut ev).unwrap();
    t.register_device().unwrap();
    poll_n(&mut t, &mut ev, 4);
    assert!(matches!(t.register_device(), Err(TransportError::InvalidState(_))));
    assert_eq!(t.operation_id(), Some("op-2"));
}

#[test]
fn close_cancels_pending_send_and_resets() {
    let script = ScriptedAmqp::new();
    script.reply_json(&assigning_json("op-1"));
    let (mut t, mut ev) = cert_registering(&script);
    poll_n(&mut t, &mut ev, 2);
    assert_eq!(t.protocol_state(), ProtocolState::RegisterSent);
    t.close();
    {
        let st = script.state();
        assert_eq!(st.closes, 1);
        assert_eq!(st.cancelled, 1);
    }
    assert_eq!(t.connection_state(), ConnectionState::Idle);
    assert_eq!(t.protocol_state(), ProtocolState::Idle);
    assert_eq!(t.operation_id(), None);
    assert!(ev.replies.is_empty());
}

#[test]
fn drop_closes_live_connection_once() {
    let script = ScriptedAmqp::new();
    {
        let (mut t, mut ev) = cert_registering(&script);
        t.poll(&mut ev);
        t.close();
    }
    assert_eq!(script.state().closes, 1);
}

// ---------------- Options ----------------

#[test]
fn option_validation() {
    let script = ScriptedAmqp::new();
    let mut hw = transport(HW, AmqpFlavor::WebSocket, &script);
    assert!(matches!(hw.set_client_cert("C", "K"), Err(TransportError::WrongIdentityKind(HW))));

    let mut cert = transport(CERT, AmqpFlavor::Tls, &script);
    assert!(matches!(cert.set_client_cert("", "K"), Err(TransportError::InvalidArgument(_))));
    assert!(matches!(cert.set_trusted_cert(Some("")), Err(TransportError::InvalidArgument(_))));
    cert.set_trusted_cert(Some("CA")).unwrap();
    assert_eq!(cert.trusted_cert(), Some("CA"));
    cert.set_trusted_cert(None).unwrap();
    assert_eq!(cert.trusted_cert(), None);

    let proxy = ProxyOptions::new("proxy.local", 8080);
    assert!(matches!(cert.set_proxy(&proxy), Err(TransportError::InvalidArgument(_))));
    assert!(matches!(
        hw.set_proxy(&ProxyOptions::new("", 8080)),
        Err(TransportError::Proxy(_))
    ));
    hw.set_proxy(&proxy).unwrap();
}
