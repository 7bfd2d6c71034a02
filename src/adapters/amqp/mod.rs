pub mod factory;
pub mod transport;
#[cfg(test)]
mod transport_tests;
pub mod transport_types;

pub use factory::AmqpTransportFactory;
pub use transport::AmqpTransport;
pub use transport_types::{AmqpFlavor, ConnectionState, ProtocolState};
