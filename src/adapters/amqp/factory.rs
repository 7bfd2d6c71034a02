use super::transport::AmqpTransport;
use super::transport_types::AmqpFlavor;
use crate::ports::amqp::AmqpConnector;
use crate::ports::transport::{TransportError, TransportFactory, TransportParams, TransportProvider};

/// Creates an [`AmqpTransport`] of the chosen flavour over a connector.
pub struct AmqpTransportFactory {
    flavor: AmqpFlavor,
    connector: Box<dyn AmqpConnector>,
}

impl AmqpTransportFactory {
    pub fn new(flavor: AmqpFlavor, connector: impl AmqpConnector + 'static) -> Self {
        Self { flavor, connector: Box::new(connector) }
    }

    /// AMQP over TLS (port 5671).
    pub fn tls(connector: impl AmqpConnector + 'static) -> Self {
        Self::new(AmqpFlavor::Tls, connector)
    }

    /// AMQP over WebSocket (port 443), proxy capable.
    pub fn websocket(connector: impl AmqpConnector + 'static) -> Self {
        Self::new(AmqpFlavor::WebSocket, connector)
    }

    #[must_use]
    pub fn flavor(&self) -> AmqpFlavor {
        self.flavor
    }
}

impl TransportFactory for AmqpTransportFactory {
    fn create(self, params: TransportParams) -> Result<Box<dyn TransportProvider>, TransportError> {
        Ok(Box::new(AmqpTransport::new(params, self.flavor, self.connector)?))
    }
}
