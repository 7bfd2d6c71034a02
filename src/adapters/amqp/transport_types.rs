use crate::ports::amqp::WebSocketParams;

/// Connection axis of the AMQP transport.
///
/// `Idle` until `open()`, `Disconnected` until the next `poll()` builds the
/// connection, `Connecting` until both links report open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Request/reply axis of the AMQP transport.
///
/// Transitions beyond `Idle` only make progress while the connection axis is
/// `Connected` (or `Error`, to report the failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Idle,
    RegisterSend,
    RegisterSent,
    RegisterRecv,
    StatusSend,
    StatusSent,
    StatusRecv,
    Error,
}

/// Inputs to the protocol transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// `register_device()` queued a register-me request.
    Register,
    /// `get_operation_status()` queued a status request.
    QueryStatus,
    /// The queued request was handed to the sender link.
    RequestSent,
    /// A reply arrived on the receiver link.
    ReplyReceived,
    /// The buffered reply was handled.
    ReplyHandled,
    /// Anything failed.
    Fail,
    /// Error reported to the owner, or the transport was closed.
    Reset,
}

/// Which AMQP flavour a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmqpFlavor {
    /// AMQP over TLS on port 5671.
    #[default]
    Tls,
    /// AMQP over WebSocket on port 443; the only flavour that can tunnel
    /// through an HTTP proxy.
    WebSocket,
}

pub(crate) const AMQP_TLS_PORT: u16 = 5671;
pub(crate) const AMQP_WS_PORT: u16 = 443;
pub(crate) const WS_PROTOCOL: &str = "AMQPWSB10";
pub(crate) const WS_RESOURCE: &str = "/$iothub/websocket";

impl AmqpFlavor {
    #[must_use]
    pub fn port(self) -> u16 {
        match self {
            Self::Tls => AMQP_TLS_PORT,
            Self::WebSocket => AMQP_WS_PORT,
        }
    }

    #[must_use]
    pub fn websocket(self) -> Option<WebSocketParams> {
        match self {
            Self::Tls => None,
            Self::WebSocket => Some(WebSocketParams { protocol: WS_PROTOCOL, resource: WS_RESOURCE }),
        }
    }

    #[must_use]
    pub fn supports_proxy(self) -> bool {
        matches!(self, Self::WebSocket)
    }
}
